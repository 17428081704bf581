//! P-384 public keys, as held by us or received from another identity.
//!
//! A public key is safe to pass around: none of the operations here need a
//! secret. Keys we receive from elsewhere carry their own short validity
//! window (an hour by default) so a cached remote key doesn't live forever.

use crate::{
    crypto::base::crc32c,
    error::{Error, Result},
    util::{
        ser::{base64url_decode, base64url_encode},
        Timestamp,
    },
};
use chrono::Duration;
use p384::{
    ecdsa::{signature::Verifier, Signature as EcdsaSignature, VerifyingKey},
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    pkcs8::{DecodePublicKey, EncodePublicKey},
    EncodedPoint, FieldBytes, PublicKey,
};
use serde_derive::{Deserialize, Serialize};

/// The only curve we speak.
pub const CURVE_NAME: &str = "P-384";

/// Name of the signature scheme, recorded alongside every signature.
pub const SIGNATURE_ALGORITHM: &str = "SHA-384withECDSA";

/// How long a key received from someone else stays valid unless extended.
pub const REMOTE_KEY_LIFETIME_HOURS: i64 = 1;

/// Length of one P-384 coordinate.
const COORDINATE_LEN: usize = 48;

/// A JSON web key, EC flavor. Field order matters here since the compact
/// base64url form is just this struct's json, and that string gets signed
/// and hashed into the key chain ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `EC`.
    pub kty: String,
    /// Curve, always `P-384`.
    pub crv: String,
    /// base64url (no padding) X coordinate.
    pub x: String,
    /// base64url (no padding) Y coordinate.
    pub y: String,
}

impl Jwk {
    /// Parse a JWK from its json form, making sure it's a P-384 EC key.
    pub fn parse(json: &str) -> Result<Self> {
        let jwk: Jwk = serde_json::from_str(json).map_err(|e| Error::JwkInvalid(format!("{}", e)))?;
        if jwk.kty != "EC" {
            Err(Error::JwkInvalid(format!("key type must be EC, got {}", jwk.kty)))?;
        }
        if jwk.crv != CURVE_NAME {
            Err(Error::JwkInvalid(format!("curve must be {}, got {}", CURVE_NAME, jwk.crv)))?;
        }
        Ok(jwk)
    }

    fn to_public_key(&self) -> Result<PublicKey> {
        let coordinate = |name: &str, val: &str| -> Result<FieldBytes> {
            let bytes = base64url_decode(val).map_err(|_| Error::JwkInvalid(format!("{} is not base64url", name)))?;
            if bytes.len() != COORDINATE_LEN {
                Err(Error::JwkInvalid(format!("{} must be {} bytes", name, COORDINATE_LEN)))?;
            }
            Ok(FieldBytes::clone_from_slice(&bytes))
        };
        let x = coordinate("x", &self.x)?;
        let y = coordinate("y", &self.y)?;
        let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
        Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| Error::JwkInvalid("point is not on the curve".into()))
    }
}

/// A P-384 public key: its DER (SubjectPublicKeyInfo) encoding, the CRC-32C
/// of that encoding, and when it expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
#[serde(rename_all = "camelCase")]
pub struct EccPublicKey {
    /// DER-encoded public key
    #[serde(with = "crate::util::ser::human_bytes")]
    der: Vec<u8>,
    /// CRC-32C of `der`, used to identify the key (in logs, in lookups).
    crc32c: u32,
    /// When this key stops being usable for new operations.
    expiration: Timestamp,
}

impl EccPublicKey {
    pub(crate) fn from_parsed(key: &PublicKey, expiration: Timestamp) -> Result<Self> {
        let der = key
            .to_public_key_der()
            .map_err(|_| Error::CryptoMalformedKey)?
            .as_bytes()
            .to_vec();
        Ok(Self {
            crc32c: crc32c(&der),
            der,
            expiration,
        })
    }

    fn remote_expiration() -> Timestamp {
        Timestamp::now().add(Duration::hours(REMOTE_KEY_LIFETIME_HOURS))
    }

    /// Import a DER (SubjectPublicKeyInfo) P-384 public key.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let key = PublicKey::from_public_key_der(der).map_err(|_| Error::CryptoMalformedKey)?;
        Self::from_parsed(&key, Self::remote_expiration())
    }

    /// Import a key from its JWK json.
    pub fn from_jwk(jwk: &str) -> Result<Self> {
        let key = Jwk::parse(jwk)?.to_public_key()?;
        Self::from_parsed(&key, Self::remote_expiration())
    }

    /// Import a key from the compact form: base64url of the JWK json.
    pub fn from_jwk_base64url(jwk_base64url: &str) -> Result<Self> {
        let bytes = base64url_decode(jwk_base64url).map_err(|_| Error::JwkInvalid("not base64url".into()))?;
        let json = String::from_utf8(bytes).map_err(|_| Error::JwkInvalid("not utf8".into()))?;
        Self::from_jwk(&json)
    }

    /// Parse our DER back into a usable key.
    pub(crate) fn parsed(&self) -> Result<PublicKey> {
        PublicKey::from_public_key_der(&self.der).map_err(|_| Error::CryptoMalformedKey)
    }

    /// Get this key as a [`Jwk`].
    pub fn jwk(&self) -> Result<Jwk> {
        let point = self.parsed()?.to_encoded_point(false);
        let x = point.x().ok_or(Error::CryptoMalformedKey)?;
        let y = point.y().ok_or(Error::CryptoMalformedKey)?;
        Ok(Jwk {
            kty: "EC".into(),
            crv: CURVE_NAME.into(),
            x: base64url_encode(x),
            y: base64url_encode(y),
        })
    }

    /// Get this key as compact JWK json.
    pub fn to_jwk(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.jwk()?)?)
    }

    /// base64url of [`to_jwk`](Self::to_jwk), the form we publish to the
    /// key chain ledger.
    pub fn to_jwk_base64url(&self) -> Result<String> {
        Ok(base64url_encode(self.to_jwk()?))
    }

    /// base64url of the uncompressed point (`0x04 || X || Y`).
    pub fn to_uncompressed_base64url(&self) -> Result<String> {
        let point = self.parsed()?.to_encoded_point(false);
        Ok(base64url_encode(point.as_bytes()))
    }

    /// Verify a DER ECDSA (SHA-384) signature over some data. Anything
    /// malformed is simply a failed verification.
    pub fn verify_signature(&self, data: &[u8], signature: &[u8]) -> bool {
        let key = match self.parsed() {
            Ok(key) => key,
            Err(_) => return false,
        };
        let signature = match EcdsaSignature::from_der(signature) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        VerifyingKey::from(&key).verify(data, &signature).is_ok()
    }

    /// Has this key expired as of the given time?
    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        now > &self.expiration
    }

    /// Has this key expired?
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(&Timestamp::now())
    }

    /// A key is valid if it hasn't expired and its checksum matches its DER.
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && crc32c(&self.der) == self.crc32c
    }

    /// Push the expiration out to `hours` from now. Never moves it backward.
    pub fn extend(&mut self, hours: i64) -> Result<()> {
        let candidate = Duration::try_hours(hours)
            .and_then(|duration| Timestamp::now().checked_add(duration))
            .ok_or(Error::KeyLifetimeInvalid)?;
        if candidate > self.expiration {
            self.expiration = candidate;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_expiration(&mut self, expiration: Timestamp) {
        self.expiration = expiration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::base::{EccKeyPair, Lifetime, SecureBuffer};

    fn keypair() -> (EccKeyPair, SecureBuffer) {
        let mut rng = crate::util::test::rng();
        let secret = SecureBuffer::random(&mut rng, 16);
        let key = EccKeyPair::generate(&mut rng, &secret, Lifetime::hours(2), &()).unwrap();
        (key, secret)
    }

    #[test]
    fn der_round_trip() {
        let (key, _) = keypair();
        let public = EccPublicKey::from_der(key.public().der()).unwrap();
        assert_eq!(public.der(), key.public().der());
        assert_eq!(public.crc32c(), key.public().crc32c());
        assert!(public.is_valid());
        assert_eq!(EccPublicKey::from_der(b"hi i'm a key").err(), Some(Error::CryptoMalformedKey));
    }

    #[test]
    fn jwk_round_trip_verifies() {
        let (key, secret) = keypair();
        let jwk = key.public().to_jwk().unwrap();
        assert!(jwk.starts_with(r#"{"kty":"EC","crv":"P-384","x":""#));
        let imported = EccPublicKey::from_jwk(&jwk).unwrap();
        assert_eq!(imported.der(), key.public().der());
        assert_eq!(imported.crc32c(), key.public().crc32c());

        let data = b"get a job";
        let sig = key.sign(&secret, data).unwrap();
        assert!(key.public().verify_signature(data, &sig));
        assert!(imported.verify_signature(data, &sig));
        assert!(!imported.verify_signature(b"get a jab", &sig));
        assert!(!imported.verify_signature(data, b"not a signature"));

        let compact = key.public().to_jwk_base64url().unwrap();
        assert!(!compact.contains('='));
        let imported2 = EccPublicKey::from_jwk_base64url(&compact).unwrap();
        assert_eq!(imported2.der(), key.public().der());
    }

    #[test]
    fn jwk_rejects_wrong_type_and_curve() {
        let (key, _) = keypair();
        let mut jwk = key.public().jwk().unwrap();
        jwk.kty = "RSA".into();
        let res = EccPublicKey::from_jwk(&serde_json::to_string(&jwk).unwrap());
        assert!(matches!(res, Err(Error::JwkInvalid(_))));

        let mut jwk = key.public().jwk().unwrap();
        jwk.crv = "P-256".into();
        let res = EccPublicKey::from_jwk(&serde_json::to_string(&jwk).unwrap());
        assert!(matches!(res, Err(Error::JwkInvalid(_))));

        let mut jwk = key.public().jwk().unwrap();
        jwk.x = base64url_encode([1u8; 48]);
        let res = EccPublicKey::from_jwk(&serde_json::to_string(&jwk).unwrap());
        assert!(matches!(res, Err(Error::JwkInvalid(_))));

        let res = EccPublicKey::from_jwk(r#"{"kty":"EC","crv":"P-384"}"#);
        assert!(matches!(res, Err(Error::JwkInvalid(_))));
        assert_eq!(res.err().unwrap().kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn uncompressed_form() {
        let (key, _) = keypair();
        let encoded = key.public().to_uncompressed_base64url().unwrap();
        let bytes = base64url_decode(&encoded).unwrap();
        assert_eq!(bytes.len(), 97);
        assert_eq!(bytes[0], 0x04);
    }

    #[test]
    fn remote_expiration_and_extend() {
        let (key, _) = keypair();
        let mut public = EccPublicKey::from_der(key.public().der()).unwrap();
        let exp = *public.expiration();
        assert!(!public.is_expired());
        assert!(public.is_expired_at(&exp.add(Duration::milliseconds(1))));

        public.extend(0).unwrap();
        assert_eq!(public.expiration(), &exp);
        public.extend(48).unwrap();
        assert!(public.expiration() > &exp.add(Duration::hours(46)));

        // out of range is an error, and leaves the expiration alone
        let exp = *public.expiration();
        assert_eq!(public.extend(i64::MAX), Err(Error::KeyLifetimeInvalid));
        assert_eq!(public.extend(Duration::MAX.num_hours()), Err(Error::KeyLifetimeInvalid));
        assert_eq!(public.expiration(), &exp);

        public.set_expiration(Timestamp::now().add(Duration::hours(-1)));
        assert!(public.is_expired());
        assert!(!public.is_valid());
    }
}
