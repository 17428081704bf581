//! An envelope is a hash of a document plus some metadata about it, and is
//! what actually gets signed. Signing the envelope rather than the document
//! lets people sign things they'd rather not pass around in full, and lets
//! metadata (author, title, attested facts) ride along under the same
//! signature.
//!
//! The document hash is always taken over `nonce || document` with a fresh
//! random nonce, so two envelopes over the same bytes don't match unless
//! they share the nonce too.

use crate::{
    crypto::base::{ct_eq, HASH_ALGORITHM},
    error::{Error, Result},
    util::{
        ser::{self, base64_encode},
        Timestamp,
    },
};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// The envelope format version we produce.
pub const ENVELOPE_VERSION: u16 = 1;

/// Length of the random nonce mixed into the document hash.
pub const CONTENT_NONCE_LEN: usize = 32;

/// The metadata map carried by an envelope. Sorted by key.
pub type AdditionalInfo = BTreeMap<String, MetaValue>;

/// A metadata value. This is a closed set so the json we sign is always
/// something we know how to produce byte-for-byte.
///
/// Note that timestamps serialize as integer milliseconds, so once read back
/// they come out as [`MetaValue::Integer`]. The json (and thus any signature
/// over it) is the same either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Integer(i64),
    /// Only for integers past `i64::MAX`, which would otherwise come back as
    /// a lossy float.
    UInt(u64),
    /// Must be finite.
    Float(f64),
    Text(String),
    Map(BTreeMap<String, MetaValue>),
    Timestamp(Timestamp),
}

impl MetaValue {
    /// Make sure this value has a canonical json form. `key` names the entry
    /// for the error.
    pub fn validate(&self, key: &str) -> Result<()> {
        match self {
            Self::Float(val) if !val.is_finite() => Err(Error::EnvelopeBadMetadata(key.into())),
            Self::Map(map) => {
                for (k, v) in map {
                    v.validate(&format!("{}.{}", key, k))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(val) => Some(val.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            Self::Map(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, MetaValue>> {
        match self {
            Self::Map(val) => Some(val),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<i64> for MetaValue {
    fn from(val: i64) -> Self {
        Self::Integer(val)
    }
}

impl From<u64> for MetaValue {
    fn from(val: u64) -> Self {
        match i64::try_from(val) {
            Ok(val) => Self::Integer(val),
            Err(_) => Self::UInt(val),
        }
    }
}

impl From<i32> for MetaValue {
    fn from(val: i32) -> Self {
        Self::Integer(val as i64)
    }
}

impl From<f64> for MetaValue {
    fn from(val: f64) -> Self {
        Self::Float(val)
    }
}

impl From<&str> for MetaValue {
    fn from(val: &str) -> Self {
        Self::Text(val.into())
    }
}

impl From<String> for MetaValue {
    fn from(val: String) -> Self {
        Self::Text(val)
    }
}

impl From<Timestamp> for MetaValue {
    fn from(val: Timestamp) -> Self {
        Self::Timestamp(val)
    }
}

impl From<BTreeMap<String, MetaValue>> for MetaValue {
    fn from(val: BTreeMap<String, MetaValue>) -> Self {
        Self::Map(val)
    }
}

/// A hashed document plus metadata. The json of this struct, field order
/// and all, is exactly what signatures are made over, so don't reorder the
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::MutGetters)]
#[getset(get = "pub", get_mut = "pub(crate)")]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Format version
    version: u16,
    /// `SHA-256(content_nonce || document)`
    #[serde(with = "ser::human_bytes")]
    content_hash: Vec<u8>,
    /// Random bytes mixed into the hash. Also serves as the envelope's id.
    #[serde(with = "ser::human_bytes")]
    content_nonce: Vec<u8>,
    /// Name of the hash used for `content_hash`
    hash_algorithm: String,
    /// When the envelope was made
    timestamp: Timestamp,
    /// Document length in bytes
    content_length: u64,
    /// Whatever else we want to say about the document
    additional_info: AdditionalInfo,
}

impl Envelope {
    /// Create an envelope from a document held in memory.
    pub fn from_bytes<R: RngCore + CryptoRng>(rng: &mut R, document: &[u8], additional_info: AdditionalInfo) -> Result<Self> {
        Self::from_reader(rng, document, additional_info)
    }

    /// Create an envelope from a document on disk.
    pub fn from_path<R: RngCore + CryptoRng, P: AsRef<Path>>(rng: &mut R, path: P, additional_info: AdditionalInfo) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(rng, std::io::BufReader::new(file), additional_info)
    }

    /// Create an envelope from a stream, hashing it as we go.
    pub fn from_reader<R: RngCore + CryptoRng, T: Read>(rng: &mut R, mut reader: T, additional_info: AdditionalInfo) -> Result<Self> {
        for (key, val) in &additional_info {
            val.validate(key)?;
        }
        let mut nonce = vec![0u8; CONTENT_NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let (content_hash, content_length) = hash_stream(&nonce, &mut reader)?;
        let envelope = Self {
            version: ENVELOPE_VERSION,
            content_hash,
            content_nonce: nonce,
            hash_algorithm: HASH_ALGORITHM.into(),
            timestamp: Timestamp::now(),
            content_length,
            additional_info,
        };
        debug!(nonce = %envelope.content_nonce_base64(), length = content_length, "created envelope");
        Ok(envelope)
    }

    /// The compact json we sign. This output is a durable format: signatures
    /// made over it have to keep verifying forever.
    pub fn canonical_json(&self) -> Result<Vec<u8>> {
        ser::to_json_vec(self)
    }

    /// Standard base64 of the content nonce.
    pub fn content_nonce_base64(&self) -> String {
        base64_encode(&self.content_nonce)
    }

    /// Is this the document the envelope was made for?
    pub fn matches_document(&self, document: &[u8]) -> bool {
        if document.len() as u64 != self.content_length {
            return false;
        }
        match hash_stream(&self.content_nonce, &mut &document[..]) {
            Ok((hash, _)) => ct_eq(&hash, &self.content_hash),
            Err(_) => false,
        }
    }
}

fn hash_stream<T: Read>(nonce: &[u8], reader: &mut T) -> Result<(Vec<u8>, u64)> {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    let len = std::io::copy(reader, &mut hasher)?;
    Ok((hasher.finalize().to_vec(), len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::base::sha256_concat;

    fn info() -> AdditionalInfo {
        let mut info = AdditionalInfo::new();
        info.insert("title".into(), "my dad's lasagna".into());
        info.insert("author".into(), "dad".into());
        info.insert("servings".into(), 6i64.into());
        info.insert("vegetarian".into(), false.into());
        info.insert("rating".into(), 4.5f64.into());
        let mut nested: BTreeMap<String, MetaValue> = BTreeMap::new();
        nested.insert("cheese".into(), "ricotta".into());
        info.insert("ingredients".into(), nested.into());
        info
    }

    #[test]
    fn hashes_nonce_and_document() {
        let mut rng = crate::util::test::rng();
        let doc = b"layer the noodles, then the sauce, then the cheese";
        let envelope = Envelope::from_bytes(&mut rng, doc, info()).unwrap();
        assert_eq!(envelope.version(), &ENVELOPE_VERSION);
        assert_eq!(envelope.hash_algorithm(), "SHA-256");
        assert_eq!(envelope.content_nonce().len(), CONTENT_NONCE_LEN);
        assert_eq!(envelope.content_length(), &(doc.len() as u64));
        assert_eq!(envelope.content_hash(), &sha256_concat(&[envelope.content_nonce().as_slice(), &doc[..]]).to_vec());
        assert!(envelope.matches_document(doc));
        assert!(!envelope.matches_document(b"layer the noodles, then the cheese, then the sauce"));

        // same document, different nonce, different hash
        let envelope2 = Envelope::from_bytes(&mut rng, doc, info()).unwrap();
        assert!(envelope.content_hash() != envelope2.content_hash());
    }

    #[test]
    fn constructors_agree() {
        let mut rng = crate::util::test::rng();
        let doc = vec![7u8; 20000];
        let from_bytes = Envelope::from_bytes(&mut rng, &doc, AdditionalInfo::new()).unwrap();
        let from_reader = Envelope::from_reader(&mut rng, std::io::Cursor::new(doc.clone()), AdditionalInfo::new()).unwrap();
        let path = std::env::temp_dir().join(format!("envelope-test-{}.bin", std::process::id()));
        std::fs::write(&path, &doc).unwrap();
        let from_path = Envelope::from_path(&mut rng, &path, AdditionalInfo::new()).unwrap();
        std::fs::remove_file(&path).unwrap();

        for env in [&from_bytes, &from_reader, &from_path] {
            assert_eq!(env.content_length(), &20000);
            assert!(env.matches_document(&doc));
        }
        let missing = Envelope::from_path(&mut rng, "/this/path/does/not/exist/lasagna", AdditionalInfo::new());
        assert!(matches!(missing, Err(Error::IoError(_))));
    }

    #[test]
    fn read_errors_surface() {
        struct Broken(usize);
        impl Read for Broken {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0 == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
                }
                let n = self.0.min(buf.len());
                buf[..n].fill(1);
                self.0 -= n;
                Ok(n)
            }
        }
        let mut rng = crate::util::test::rng();
        let res = Envelope::from_reader(&mut rng, Broken(20000), AdditionalInfo::new());
        assert!(matches!(res, Err(Error::IoError(_))));
    }

    #[test]
    fn canonical_json_is_stable() {
        let mut rng = crate::util::test::rng();
        let envelope = Envelope::from_bytes(&mut rng, b"hi", info()).unwrap();
        let json = String::from_utf8(envelope.canonical_json().unwrap()).unwrap();
        let expected = format!(
            r#"{{"version":1,"contentHash":"{}","contentNonce":"{}","hashAlgorithm":"SHA-256","timestamp":{},"contentLength":2,"additionalInfo":{{"author":"dad","ingredients":{{"cheese":"ricotta"}},"rating":4.5,"servings":6,"title":"my dad's lasagna","vegetarian":false}}}}"#,
            base64_encode(envelope.content_hash()),
            envelope.content_nonce_base64(),
            envelope.timestamp().millis(),
        );
        assert_eq!(json, expected);

        let envelope2: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope2, envelope);
        assert_eq!(envelope2.canonical_json().unwrap(), envelope.canonical_json().unwrap());
    }

    #[test]
    fn timestamps_keep_their_json() {
        let mut rng = crate::util::test::rng();
        let mut info = AdditionalInfo::new();
        let ts = Timestamp::from_millis(1700000000123).unwrap();
        info.insert("signedOn".into(), ts.into());
        let envelope = Envelope::from_bytes(&mut rng, b"hi", info).unwrap();
        let json = envelope.canonical_json().unwrap();
        assert!(String::from_utf8(json.clone()).unwrap().contains(r#""signedOn":1700000000123"#));
        let envelope2: Envelope = serde_json::from_slice(&json).unwrap();
        assert_eq!(envelope2.additional_info().get("signedOn"), Some(&MetaValue::Integer(1700000000123)));
        assert_eq!(envelope2.canonical_json().unwrap(), json);
    }

    #[test]
    fn big_integers_stay_exact() {
        let mut rng = crate::util::test::rng();
        let mut info = AdditionalInfo::new();
        info.insert("big".into(), u64::MAX.into());
        info.insert("small".into(), 7u64.into());
        assert_eq!(info.get("small"), Some(&MetaValue::Integer(7)));
        let envelope = Envelope::from_bytes(&mut rng, b"hi", info).unwrap();
        let json = envelope.canonical_json().unwrap();
        assert!(String::from_utf8(json.clone()).unwrap().contains(r#""big":18446744073709551615"#));
        let envelope2: Envelope = serde_json::from_slice(&json).unwrap();
        assert_eq!(envelope2.additional_info().get("big"), Some(&MetaValue::UInt(u64::MAX)));
        assert_eq!(envelope2.canonical_json().unwrap(), json);
    }

    #[test]
    fn rejects_non_finite_floats() {
        let mut rng = crate::util::test::rng();
        let mut info = info();
        let mut nested: BTreeMap<String, MetaValue> = BTreeMap::new();
        nested.insert("depth".into(), f64::NAN.into());
        info.insert("pan".into(), nested.into());
        let res = Envelope::from_bytes(&mut rng, b"hi", info);
        assert_eq!(res.err(), Some(Error::EnvelopeBadMetadata("pan.depth".into())));
    }
}
