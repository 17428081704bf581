//! Attestations: an authority signing an envelope that states a fact about
//! an identity ("this is a human", "their legal name is ...").
//!
//! There's nothing special about the cryptography here. An attestation is an
//! ordinary [`SignedEnvelope`] built from a fixed template, and verifying one
//! is just [`SignedEnvelope::verify_all`].
//!
//! Every attestation envelope carries these entries in its additional info:
//!
//! - `data`: the attested facts, e.g. `{"LegalName": "Alice Smith"}`
//! - `issuer`: the authority's identity
//! - `subject`: the identity the facts are about
//! - `verificationUrl`: where the attestation can be checked
//! - `usagePolicyUrl`: `https://{subject}/policies/attestation-usage-policy`
//! - `issued` / `expiration`: the validity window
//! - `requestNonce`: only on attestations issued from a request, the base64
//!   content nonce of that request envelope
//!
//! The envelope's document is the json of `data`.

use crate::{
    config::AttestationConfig,
    crypto::{
        base::{EccKeyPair, SecureBuffer},
        envelope::{AdditionalInfo, Envelope, MetaValue},
        signed::SignedEnvelope,
    },
    error::{Error, Result},
    identity::DomainName,
    util::{ser, Timestamp},
};
use chrono::{Months, NaiveDate};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use tracing::{debug, info};
use url::Url;

/// Attests the subject is a human being.
pub const FACT_HUMAN: &str = "IsHuman";
pub const FACT_LEGAL_NAME: &str = "LegalName";
/// Part of a legal name, for people who don't want to share all of it.
pub const FACT_SUBSET_LEGAL_NAME: &str = "SubsetLegalName";
pub const FACT_NATIONALITY: &str = "Nationality";
pub const FACT_PHONE_NUMBER: &str = "PhoneNumber";
pub const FACT_EMAIL_ADDRESS: &str = "EmailAddress";
/// Formatted `YYYY-MM-DD`.
pub const FACT_BIRTHDATE: &str = "Birthdate";
/// A map of address parts (street, city, postal code...).
pub const FACT_RESIDENTIAL_ADDRESS: &str = "ResidentialAddress";

/// The additional info key holding the attested facts.
pub const INFO_DATA: &str = "data";
pub const INFO_ISSUER: &str = "issuer";
pub const INFO_SUBJECT: &str = "subject";
pub const INFO_VERIFICATION_URL: &str = "verificationUrl";
pub const INFO_USAGE_POLICY_URL: &str = "usagePolicyUrl";
pub const INFO_ISSUED: &str = "issued";
pub const INFO_EXPIRATION: &str = "expiration";
/// Links an attestation back to the request envelope it answers.
pub const INFO_REQUEST_NONCE: &str = "requestNonce";

const BIRTHDATE_FORMAT: &str = "%Y-%m-%d";

/// Where a subject publishes how attestations about them may be used.
pub fn usage_policy_url(subject: &DomainName) -> Result<Url> {
    Url::parse(&format!("https://{}/policies/attestation-usage-policy", subject))
        .map_err(|e| Error::IdentityInvalid(format!("{}: {}", subject, e)))
}

/// Issues attestations, signed by the authority's key.
pub struct AttestationIssuer<'a> {
    key: &'a EccKeyPair,
    secret: &'a SecureBuffer,
    config: AttestationConfig,
    /// Set while answering a request.
    request_nonce: Option<String>,
}

impl<'a> AttestationIssuer<'a> {
    pub fn new(key: &'a EccKeyPair, secret: &'a SecureBuffer, config: AttestationConfig) -> Self {
        Self {
            key,
            secret,
            config,
            request_nonce: None,
        }
    }

    /// An issuer whose attestations all point back at `request`.
    fn answering(&self, request: &SignedEnvelope) -> AttestationIssuer<'a> {
        AttestationIssuer {
            key: self.key,
            secret: self.secret,
            config: self.config.clone(),
            request_nonce: Some(request.envelope().content_nonce_base64()),
        }
    }

    pub fn config(&self) -> &AttestationConfig {
        &self.config
    }

    /// Build and sign an attestation over a set of facts.
    pub fn attest<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, data: BTreeMap<String, MetaValue>) -> Result<SignedEnvelope> {
        if data.is_empty() {
            Err(Error::AttestationEmpty)?;
        }
        let document = ser::to_json_vec(&data)?;
        let issued = Timestamp::now();
        let expiration = issued
            .checked_add_months(Months::new(12 * self.config.validity_years))
            .map(Timestamp::from)
            .ok_or_else(|| Error::AttestationRequestInvalid("validity period out of range".into()))?;

        let mut additional_info = AdditionalInfo::new();
        additional_info.insert(INFO_DATA.into(), MetaValue::Map(data));
        additional_info.insert(INFO_ISSUER.into(), self.config.authority.as_str().into());
        additional_info.insert(INFO_SUBJECT.into(), subject.as_str().into());
        additional_info.insert(INFO_VERIFICATION_URL.into(), self.config.verification_url_template.as_str().into());
        additional_info.insert(INFO_USAGE_POLICY_URL.into(), usage_policy_url(subject)?.to_string().into());
        additional_info.insert(INFO_ISSUED.into(), issued.into());
        additional_info.insert(INFO_EXPIRATION.into(), expiration.into());
        if let Some(nonce) = self.request_nonce.as_ref() {
            additional_info.insert(INFO_REQUEST_NONCE.into(), nonce.as_str().into());
        }

        let envelope = Envelope::from_bytes(rng, &document, additional_info)?;
        let mut signed = SignedEnvelope::new(envelope);
        signed.add_signature(&self.config.authority, self.secret, self.key)?;
        debug!(subject = %subject, nonce = %signed.envelope().content_nonce_base64(), "issued attestation");
        Ok(signed)
    }

    fn attest_one<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, fact: &str, value: MetaValue) -> Result<SignedEnvelope> {
        let mut data = BTreeMap::new();
        data.insert(fact.to_string(), value);
        self.attest(rng, subject, data)
    }

    fn attest_text<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, fact: &str, value: &str) -> Result<SignedEnvelope> {
        if value.trim().is_empty() {
            Err(Error::AttestationEmpty)?;
        }
        self.attest_one(rng, subject, fact, value.into())
    }

    /// Attest that the subject is a person.
    pub fn attest_human<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName) -> Result<SignedEnvelope> {
        self.attest_one(rng, subject, FACT_HUMAN, true.into())
    }

    pub fn attest_legal_name<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, legal_name: &str) -> Result<SignedEnvelope> {
        self.attest_text(rng, subject, FACT_LEGAL_NAME, legal_name)
    }

    pub fn attest_subset_legal_name<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, subset_legal_name: &str) -> Result<SignedEnvelope> {
        self.attest_text(rng, subject, FACT_SUBSET_LEGAL_NAME, subset_legal_name)
    }

    pub fn attest_nationality<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, nationality: &str) -> Result<SignedEnvelope> {
        self.attest_text(rng, subject, FACT_NATIONALITY, nationality)
    }

    pub fn attest_phone_number<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, phone_number: &str) -> Result<SignedEnvelope> {
        self.attest_text(rng, subject, FACT_PHONE_NUMBER, phone_number)
    }

    pub fn attest_email_address<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, email: &str) -> Result<SignedEnvelope> {
        self.attest_text(rng, subject, FACT_EMAIL_ADDRESS, email)
    }

    pub fn attest_birthdate<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, birthdate: NaiveDate) -> Result<SignedEnvelope> {
        self.attest_one(rng, subject, FACT_BIRTHDATE, birthdate.format(BIRTHDATE_FORMAT).to_string().into())
    }

    /// Attest a residential address, given as its parts.
    pub fn attest_residential_address<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, address: &BTreeMap<String, String>) -> Result<SignedEnvelope> {
        if address.is_empty() {
            Err(Error::AttestationEmpty)?;
        }
        let parts = address
            .iter()
            .map(|(k, v)| (k.clone(), MetaValue::from(v.as_str())))
            .collect::<BTreeMap<_, _>>();
        self.attest_one(rng, subject, FACT_RESIDENTIAL_ADDRESS, MetaValue::Map(parts))
    }

    /// Turn a request from `subject` into attestations.
    ///
    /// The request is an envelope signed by the subject whose `data` entry
    /// lists the facts they want attested. The request must verify, and its
    /// first signer must be the subject. We always attest the subject is
    /// human, then one attestation per recognized fact. Unknown facts are
    /// ignored. Either every attestation is issued or none are. Each one
    /// carries the request's content nonce under `requestNonce`.
    pub fn attest_from_request<R: RngCore + CryptoRng>(&self, rng: &mut R, subject: &DomainName, request: &SignedEnvelope) -> Result<Vec<SignedEnvelope>> {
        request.verify_all_detailed()?;
        let signer = request
            .signatures()
            .first()
            .map(|s| s.identity().to_ascii_lowercase())
            .ok_or(Error::EnvelopeUnsigned)?;
        if signer != subject.as_str() {
            Err(Error::AttestationRequestInvalid(format!("request signed by {}, not {}", signer, subject)))?;
        }
        let data = request
            .envelope()
            .additional_info()
            .get(INFO_DATA)
            .and_then(|d| d.as_map())
            .ok_or_else(|| Error::AttestationRequestInvalid("request has no data section".into()))?;

        let issuer = self.answering(request);
        let mut attestations = vec![issuer.attest_human(rng, subject)?];
        if let Some(name) = text_fact(data, FACT_LEGAL_NAME)? {
            attestations.push(issuer.attest_legal_name(rng, subject, name)?);
        }
        if let Some(name) = text_fact(data, FACT_SUBSET_LEGAL_NAME)? {
            attestations.push(issuer.attest_subset_legal_name(rng, subject, name)?);
        }
        if let Some(nationality) = text_fact(data, FACT_NATIONALITY)? {
            attestations.push(issuer.attest_nationality(rng, subject, nationality)?);
        }
        if let Some(phone) = text_fact(data, FACT_PHONE_NUMBER)? {
            attestations.push(issuer.attest_phone_number(rng, subject, phone)?);
        }
        if let Some(email) = text_fact(data, FACT_EMAIL_ADDRESS)? {
            attestations.push(issuer.attest_email_address(rng, subject, email)?);
        }
        if let Some(bday) = text_fact(data, FACT_BIRTHDATE)? {
            let date = NaiveDate::parse_from_str(bday, BIRTHDATE_FORMAT)
                .map_err(|_| Error::AttestationRequestInvalid(format!("{} must be YYYY-MM-DD", FACT_BIRTHDATE)))?;
            attestations.push(issuer.attest_birthdate(rng, subject, date)?);
        }
        if let Some(address) = data.get(FACT_RESIDENTIAL_ADDRESS) {
            let parts = address
                .as_map()
                .ok_or_else(|| Error::AttestationRequestInvalid(format!("{} must be a map", FACT_RESIDENTIAL_ADDRESS)))?
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(|| Error::AttestationRequestInvalid(format!("{}.{} must be a string", FACT_RESIDENTIAL_ADDRESS, k)))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            attestations.push(issuer.attest_residential_address(rng, subject, &parts)?);
        }
        info!(subject = %subject, count = attestations.len(), request_nonce = ?issuer.request_nonce, "issued attestations from request");
        Ok(attestations)
    }
}

fn text_fact<'d>(data: &'d BTreeMap<String, MetaValue>, fact: &str) -> Result<Option<&'d str>> {
    match data.get(fact) {
        None => Ok(None),
        Some(val) => val
            .as_str()
            .map(Some)
            .ok_or_else(|| Error::AttestationRequestInvalid(format!("{} must be a string", fact))),
    }
}

/// Check an attestation. This is exactly [`SignedEnvelope::verify_all`].
pub fn verify_attestation(attestation: &SignedEnvelope) -> bool {
    attestation.verify_all()
}
