//! Decoding of the ledger's positional request tuple.
//!
//! The contract returns a request as an ordered list of fields. This is the
//! only place in the crate that knows that order.

use super::types::{Address, Request};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUESTER_NAME: usize = 0;
const VALENTINE_NAME: usize = 1;
const CUSTOM_MESSAGE: usize = 2;
const REQUESTER_ADDRESS: usize = 3;
const VALENTINE_ADDRESS: usize = 4;
const WAS_ACCEPTED: usize = 5;
const FIELD_COUNT: usize = 6;

/// A request in positional wire form, exactly as returned by the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRequest(pub Vec<Value>);

impl RawRequest {
	/// Encode a request into positional form.
	pub fn encode(request: &Request) -> Self {
		RawRequest(vec![
			Value::String(request.requester_name.clone()),
			Value::String(request.valentine_name.clone()),
			Value::String(request.custom_message.clone()),
			Value::String(request.requester_address.to_string()),
			Value::String(request.valentine_address.to_string()),
			Value::Bool(request.was_accepted),
		])
	}

	/// The positional form of the "no such entry" placeholder.
	pub fn placeholder() -> Self {
		RawRequest(vec![
			Value::String(String::new()),
			Value::String(String::new()),
			Value::String(String::new()),
			Value::String(Address::NULL.to_string()),
			Value::String(Address::NULL.to_string()),
			Value::Bool(false),
		])
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
	#[error("expected {expected} fields, got {actual}")]
	FieldCount { expected: usize, actual: usize },

	#[error("field {field} has the wrong type, expected {expected}")]
	WrongType {
		field: &'static str,
		expected: &'static str,
	},

	#[error("field {field} is not a valid address: {reason}")]
	InvalidAddress { field: &'static str, reason: String },
}

/// Decode a positional request.
///
/// Returns `Ok(None)` for the placeholder the ledger uses to say "no such entry".
pub fn decode_request(raw: &RawRequest) -> Result<Option<Request>, DecodeError> {
	let fields = &raw.0;
	if fields.len() != FIELD_COUNT {
		return Err(DecodeError::FieldCount {
			expected: FIELD_COUNT,
			actual: fields.len(),
		});
	}

	let request = Request {
		requester_name: string_field(fields, REQUESTER_NAME, "requesterName")?,
		valentine_name: string_field(fields, VALENTINE_NAME, "valentineName")?,
		custom_message: string_field(fields, CUSTOM_MESSAGE, "customMessage")?,
		requester_address: address_field(fields, REQUESTER_ADDRESS, "requesterAddress")?,
		valentine_address: address_field(fields, VALENTINE_ADDRESS, "valentineAddress")?,
		was_accepted: fields[WAS_ACCEPTED]
			.as_bool()
			.ok_or(DecodeError::WrongType {
				field: "wasAccepted",
				expected: "bool",
			})?,
	};

	if request.is_placeholder() {
		Ok(None)
	} else {
		Ok(Some(request))
	}
}

fn string_field(fields: &[Value], index: usize, name: &'static str) -> Result<String, DecodeError> {
	fields[index]
		.as_str()
		.map(str::to_string)
		.ok_or(DecodeError::WrongType {
			field: name,
			expected: "string",
		})
}

fn address_field(
	fields: &[Value],
	index: usize,
	name: &'static str,
) -> Result<Address, DecodeError> {
	let text = fields[index].as_str().ok_or(DecodeError::WrongType {
		field: name,
		expected: "address string",
	})?;
	text.parse().map_err(|e: super::types::AddressError| DecodeError::InvalidAddress {
		field: name,
		reason: e.to_string(),
	})
}
