//! Types for the ledger-side data model: addresses, network identities, the
//! mirrored `Request` entity and the two contract event payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Number of bytes in a ledger address.
pub const ADDRESS_LEN: usize = 20;

/// Substring the ledger uses when a contract has no deployment on the detected network.
pub const NOT_DEPLOYED_MARKER: &str = "has not been deployed to detected network";

/// Fixed-length ledger identifier, rendered as `0x` followed by 40 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// The sentinel "null address": an open, untargeted valentine or a placeholder entry.
    pub const NULL: Address = Address([0u8; ADDRESS_LEN]);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Return a copy with the hex digit at `digit` (0-based, after the `0x` prefix) replaced.
    pub fn with_hex_digit(mut self, digit: usize, value: u8) -> Self {
        let byte = &mut self.0[digit / 2];
        let value = value & 0x0f;
        if digit % 2 == 0 {
            *byte = (*byte & 0x0f) | (value << 4);
        } else {
            *byte = (*byte & 0xf0) | value;
        }
        self
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(AddressError::InvalidLength(digits.len()));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes)?;
        Ok(Address(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Error types for address parsing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AddressError {
    #[error("expected 40 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Opaque token identifying the logical ledger network a transport is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A valentine request as recorded on the ledger.
///
/// `requester_address` is the unique key. Only `was_accepted` ever changes after
/// the ledger accepts the request, and only from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub requester_name: String,
    pub valentine_name: String,
    pub custom_message: String,
    pub requester_address: Address,
    /// `Address::NULL` for an open request that anyone may accept.
    pub valentine_address: Address,
    pub was_accepted: bool,
}

impl Request {
    /// Whether this is the ledger's "no such entry" placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.requester_name.is_empty()
            && self.valentine_name.is_empty()
            && self.custom_message.is_empty()
            && !self.was_accepted
            && self.requester_address.is_null()
            && self.valentine_address.is_null()
    }

    /// Open requests are not addressed to a specific valentine.
    pub fn is_open(&self) -> bool {
        self.valentine_address.is_null()
    }
}

/// Payload of the `LogValentineRequestCreated` contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCreatedEvent {
    pub requester_name: String,
    pub valentine_name: String,
    pub custom_message: String,
    pub requester_address: Address,
    pub valentine_address: Address,
}

impl From<RequestCreatedEvent> for Request {
    fn from(event: RequestCreatedEvent) -> Self {
        Request {
            requester_name: event.requester_name,
            valentine_name: event.valentine_name,
            custom_message: event.custom_message,
            requester_address: event.requester_address,
            valentine_address: event.valentine_address,
            was_accepted: false,
        }
    }
}

/// Payload of the `LogRequestAccepted` contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAcceptedEvent {
    pub requester_address: Address,
    pub valentine_address: Address,
}

/// Free-text fields of a request about to be submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub requester_name: String,
    pub valentine_name: String,
    pub custom_message: String,
}

/// Error types for ledger calls and event delivery
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Contract resolution failed: {0}")]
    Resolution(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Event delivery error: {0}")]
    Delivery(String),

    #[error("Decode error: {0}")]
    Decode(#[from] crate::ledger::DecodeError),

    #[error("Ledger call timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    /// Whether the failure says the contract is absent from the detected network.
    pub fn is_not_deployed(&self) -> bool {
        self.to_string().contains(NOT_DEPLOYED_MARKER)
    }
}
