//! Settings for the parts of the system an operator would want to tune.
//!
//! Nothing here reads files or the environment. These are plain serde structs
//! with sensible defaults, so the application can load them from whatever
//! format it already uses and hand them in.

use crate::util::ser;
use serde_derive::{Deserialize, Serialize};

/// Placeholder in [`AttestationConfig::verification_url_template`] that gets
/// swapped for a signature.
pub const SIGNATURE_PLACEHOLDER: &str = "$signature";

/// Who issues attestations, and how they can be checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttestationConfig {
    /// The authority's identity, which signs every attestation.
    pub authority: String,
    /// Where an attestation can be verified. Contains `$signature`.
    pub verification_url_template: String,
    /// How many years an attestation is good for.
    pub validity_years: u32,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            authority: "id.trust.earth".into(),
            verification_url_template: format!("https://id.trust.earth/verify?signature={}", SIGNATURE_PLACEHOLDER),
            validity_years: 5,
        }
    }
}

impl AttestationConfig {
    /// Fill the verification url template in with a signature (base64,
    /// url-encoded).
    pub fn verification_url(&self, signature: &[u8]) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(ser::base64_encode(signature).as_bytes()).collect();
        self.verification_url_template.replace(SIGNATURE_PLACEHOLDER, &encoded)
    }
}

/// Key chain ledger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerConfig {
    /// Shortest time allowed between two key registrations by one identity.
    pub min_registration_interval_secs: i64,
    /// Hashed to get the previous hash of the very first record.
    #[serde(with = "ser::human_bytes")]
    pub genesis_seed: Vec<u8>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_registration_interval_secs: 30 * 24 * 60 * 60,
            genesis_seed: vec![0u8; 16],
        }
    }
}

/// Notary chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotaryConfig {
    /// The notary's identity, which signs every notarized envelope.
    pub identity: String,
    /// How many notarizations one identity gets per window.
    pub max_notarizations: u32,
    /// Length of the throttling window.
    pub window_secs: i64,
    /// Hashed to get the previous hash of the very first record.
    #[serde(with = "ser::human_bytes")]
    pub genesis_seed: Vec<u8>,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            identity: "notarius.trust.earth".into(),
            max_notarizations: 2,
            window_secs: 30 * 24 * 60 * 60,
            genesis_seed: vec![0u8; 16],
        }
    }
}
