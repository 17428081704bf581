//! Helpful serialization tools.
//!
//! Binary values travel inside JSON documents (envelopes, signatures, ledger
//! rows) so we need a consistent textual form for them. Byte fields are
//! standard base64 (padded), while anything crossing identity boundaries as a
//! key (JWK coordinates, the compact JWK form) is base64url without padding,
//! per RFC 4648 §5.

use crate::error::Result;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use serde::Serialize;

/// Convert bytes to base64url (no padding)
pub fn base64url_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Convert base64url (no padding) to bytes
pub fn base64url_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(bytes.as_ref())?)
}

/// Convert bytes to standard base64
pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    STANDARD.encode(bytes.as_ref())
}

/// Convert standard base64 to bytes
pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(bytes.as_ref())?)
}

/// Compact json, no whitespace. This is the exact byte string we sign, so it
/// must stay stable.
pub(crate) fn to_json_vec<T: Serialize>(obj: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(obj)?)
}

/// Serializes a byte vector as a base64 string in human-readable formats.
pub(crate) mod human_bytes {
    use super::{base64_decode, base64_encode};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&base64_encode(bytes.as_slice()))
        } else {
            serializer.serialize_bytes(bytes.as_slice())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = <String>::deserialize(deserializer)?;
            base64_decode(s).map_err(de::Error::custom)
        } else {
            <Vec<u8>>::deserialize(deserializer)
        }
    }
}
