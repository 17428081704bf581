//! The crypto module holds the primitives (keys, key wrapping, hashing) and
//! the signing protocol built on them: envelopes, self-describing signatures
//! and multi-signed, optionally notarized envelopes.

pub mod base;
pub mod envelope;
pub mod signature;
pub mod signed;
