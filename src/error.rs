//! The main error enum for the project lives here, and documents the various
//! conditions that can arise while interacting with the system.
//!
//! Errors are loosely grouped by [`ErrorKind`] so callers can tell a possible
//! attack (a [security](ErrorKind::Security) error) apart from an ordinary bad
//! input or a programming mistake.

use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input was rejected before any cryptography ran.
    Validation,
    /// Something that smells like tampering or key misuse.
    Security,
    /// An operation was attempted in a state that forbids it.
    State,
    /// The ledger's storage collaborator failed.
    Storage,
    /// Malformed data or a failing cryptographic primitive.
    Crypto,
}

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad length on a fixed-size value (hash, nonce, coordinate...)
    #[error("bad length")]
    BadLength,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Bad key.
    #[error("key is invalid")]
    CryptoBadKey,

    /// Bad salt given to a cryptographic function.
    #[error("salt must be at least {0} bytes")]
    CryptoBadSalt(usize),

    /// Decrypting a wrapped value failed after the key check passed. The stored
    /// ciphertext is damaged.
    #[error("failed to open a wrapped object")]
    CryptoOpenFailed,

    /// Key derivation failed
    #[error("key derivation failed")]
    CryptoKdfFailed,

    /// The key encoding (DER, PEM, JWK point) could not be parsed.
    #[error("malformed key encoding")]
    CryptoMalformedKey,

    /// Failed to produce a signature
    #[error("failed to create a signature")]
    CryptoSignatureFailed,

    /// A signature failed to verify.
    #[error("the given signature/public key/data combo does not verify")]
    CryptoSignatureVerificationFailed,

    /// The wrapping secret's hash doesn't match the one stored alongside the
    /// wrapped value.
    #[error("incorrect wrapping key")]
    CryptoWrongKey,

    /// An error while decoding base64.
    #[error("deserialization error")]
    DeserializeBase64(#[from] base64::DecodeError),

    /// An error while encoding or decoding json.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A notary signature is already present on this envelope.
    #[error("the envelope has already been notarized")]
    EnvelopeAlreadyNotarized,

    /// The envelope carries no signatures, so there is nothing to verify.
    #[error("the envelope has no signatures")]
    EnvelopeUnsigned,

    /// The signature list isn't in timestamp order.
    #[error("the envelope's signatures are out of order")]
    EnvelopeUnordered,

    /// A signature was added to an envelope that has already been notarized.
    #[error("cannot add signatures to a notarized envelope")]
    EnvelopeNotarized,

    /// An attestation was requested with an empty fact set.
    #[error("attestation data cannot be empty")]
    AttestationEmpty,

    /// An attestation request was missing something we need.
    #[error("invalid attestation request: {0}")]
    AttestationRequestInvalid(String),

    /// A metadata value cannot be represented canonically (non-finite floats).
    #[error("metadata value for `{0}` is not supported")]
    EnvelopeBadMetadata(String),

    /// The given identity is not a valid domain name.
    #[error("invalid identity: {0}")]
    IdentityInvalid(String),

    /// An IO error while reading a document
    #[error("io error {0:?}")]
    IoError(#[from] std::io::Error),

    /// The JWK is missing fields, or has the wrong key type or curve.
    #[error("invalid jwk: {0}")]
    JwkInvalid(String),

    /// The key is dead and can't be used for new operations.
    #[error("key is dead")]
    KeyDead,

    /// The key lifetime must put expiration after creation.
    #[error("key lifetime must be positive")]
    KeyLifetimeInvalid,

    /// Two appends raced: the tip moved between reading it and writing.
    #[error("ledger tip moved, expected previous hash {expected}")]
    LedgerForked {
        /// Base64 of the previous hash the append was linked to.
        expected: String,
    },

    /// The chain tip is further in the future than clock drift explains.
    #[error("ledger tip is {ahead_ms}ms ahead of the clock")]
    LedgerClockSkew {
        /// How far past now the tip's timestamp sits.
        ahead_ms: i64,
    },

    /// A ledger record failed field validation.
    #[error("ledger record invalid: {0}")]
    LedgerRecordInvalid(String),

    /// The chain does not verify starting at the given row.
    #[error("ledger chain broken at row {0}")]
    LedgerChainBroken(u64),

    /// An identity wrote to a ledger too often.
    #[error("identity wrote to the ledger too recently, retry after {retry_after_secs}s")]
    LedgerThrottled {
        /// Seconds until another registration is accepted.
        retry_after_secs: i64,
    },

    /// Error from the storage backing a ledger.
    #[error("ledger storage error: {0}")]
    LedgerStorage(String),

    /// A specific signer's signature failed to verify.
    #[error("signature from `{identity}` is invalid")]
    SignatureInvalid {
        /// The identity claimed by the failing signature.
        identity: String,
    },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CryptoWrongKey
            | Self::CryptoSignatureVerificationFailed
            | Self::SignatureInvalid { .. }
            | Self::EnvelopeAlreadyNotarized
            | Self::EnvelopeUnsigned
            | Self::EnvelopeUnordered
            | Self::KeyDead
            | Self::LedgerClockSkew { .. }
            | Self::LedgerChainBroken(_)
            | Self::LedgerForked { .. } => ErrorKind::Security,
            Self::EnvelopeNotarized => ErrorKind::State,
            Self::BadLength
            | Self::ConfigInvalid(_)
            | Self::CryptoBadSalt(_)
            | Self::AttestationEmpty
            | Self::AttestationRequestInvalid(_)
            | Self::EnvelopeBadMetadata(_)
            | Self::IdentityInvalid(_)
            | Self::JwkInvalid(_)
            | Self::KeyLifetimeInvalid
            | Self::LedgerRecordInvalid(_)
            | Self::LedgerThrottled { .. } => ErrorKind::Validation,
            Self::LedgerStorage(_) | Self::IoError(_) => ErrorKind::Storage,
            Self::CryptoBadKey
            | Self::CryptoOpenFailed
            | Self::CryptoKdfFailed
            | Self::CryptoMalformedKey
            | Self::CryptoSignatureFailed
            | Self::DeserializeBase64(_)
            | Self::Json(_) => ErrorKind::Crypto,
        }
    }

    /// Whether the caller should treat this as a possible attack.
    pub fn is_security(&self) -> bool {
        self.kind() == ErrorKind::Security
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // io and json errors aren't comparable, so compare the debug output.
        format!("{:?}", self) == format!("{:?}", other)
    }
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;
