//! Ledger integration module
//!
//! The contract binding and resolver traits the synchronizer talks to, the
//! ledger-side data model, the positional wire decoder, and an in-memory
//! ledger used by the demo binary and the tests.

/// Contract binding and resolver traits
mod binding;
/// Positional wire form decoding
mod decode;
/// In-memory ledger, resolver and event feeds
pub mod memory;
/// Ledger data model
mod types;

pub use binding::{ContractBinding, ContractResolver, EventStream};
pub use decode::{DecodeError, RawRequest, decode_request};
pub use types::*;
