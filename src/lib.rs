//! Welcome to trust core, the cryptographic heart of an identity service.
//!
//! An identity here is a domain name (`frank.example`) that owns P-384 key
//! pairs. Everything the identity does, and everything anyone says about it,
//! comes down to a few building blocks:
//!
//! - [Keys](crypto::base::EccKeyPair) whose private half never sits around in
//! the clear. It is wrapped with AES-CBC under a secret the caller holds, and
//! the secret is checked before any decryption is attempted. Keys expire, and
//! a little while after expiring they die for good.
//! - [Secret splitting](crypto::base::XorWrapped), where a secret is split
//! into two halves so neither side of a connection can recover it alone.
//! - [Envelopes](crypto::envelope::Envelope) that describe a document without
//! containing it: a salted hash, a length, some metadata.
//! - [Signed envelopes](crypto::signed::SignedEnvelope) carrying any number of
//! identities' signatures, optionally sealed off by a notary signature over the
//! whole lot.
//! - [Attestations](identity::attestation::AttestationIssuer): signed
//! envelopes in which an authority vouches for facts about an identity (a
//! legal name, a nationality, that it is a human at all).
//! - The [key chain](keychain::KeyChainLedger), an append-only hash chain of
//! every key any identity has published, so that anyone can check whether a
//! key really belonged to an identity, and when.
//! - The [notary chain](notary::NotaryLedger), the same kind of hash chain
//! recording every envelope the notary has sealed.
//!
//! The goals of this library are as follows:
//!
//! 1. Secrets in memory are wiped on drop, and never printed.
//! 1. Anything signed can be verified by anyone holding the signed object and
//! nothing else.
//! 1. Tampering (a wrong key, a broken chain, a forged signature) is reported
//! as a [security error](error::ErrorKind::Security), distinct from plain bad
//! input.
//! 1. Serialized objects are stable: canonical json in, the same bytes out.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod keychain;
pub mod notary;
pub mod util;
