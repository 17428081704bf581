//! Identities are domain names. This module validates them and, in
//! [attestation], lets an authority vouch for facts about them.

pub mod attestation;

use crate::error::{Error, Result};
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::ops::Deref;
use std::str::FromStr;

/// Longest domain name we accept.
pub const MAX_DOMAIN_LEN: usize = 255;
/// Shortest domain name we accept (`a.b`).
pub const MIN_DOMAIN_LEN: usize = 3;
const MAX_LABEL_LEN: usize = 63;

/// A validated, lowercased ascii domain name, such as `frank.example`.
///
/// At least two labels, each 1-63 characters of `a-z`, `0-9` or `-`, never
/// starting or ending with a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    /// Validate and normalize a domain name.
    pub fn new(name: &str) -> Result<Self> {
        let invalid = |why: &str| Error::IdentityInvalid(format!("{}: {}", name, why));
        if !name.is_ascii() {
            Err(invalid("must be ascii"))?;
        }
        if name.len() < MIN_DOMAIN_LEN || name.len() > MAX_DOMAIN_LEN {
            Err(invalid("bad length"))?;
        }
        let name = name.to_ascii_lowercase();
        let labels = name.split('.').collect::<Vec<_>>();
        if labels.len() < 2 {
            Err(invalid("needs at least two labels"))?;
        }
        for label in labels {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                Err(invalid("bad label length"))?;
            }
            if label.starts_with('-') || label.ends_with('-') {
                Err(invalid("labels can't start or end with a hyphen"))?;
            }
            if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                Err(invalid("bad character"))?;
            }
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for DomainName {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for DomainName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DomainName {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}

impl std::fmt::Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
