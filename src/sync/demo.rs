//! Synthetic requests for a ledger that has no live data yet.

use crate::ledger::{ADDRESS_LEN, Address, Request};
use rand::Rng;

const NAME_LEN: std::ops::RangeInclusive<usize> = 4..=9;
const MESSAGE_WORDS: std::ops::RangeInclusive<usize> = 3..=7;

/// Hex digits a demo address may vary: all but the first and the last.
const VARIABLE_DIGITS: usize = ADDRESS_LEN * 2 - 2;

/// Number of distinct demo addresses (15 non-zero values per variable digit).
pub const DEMO_ADDRESS_SPACE: usize = VARIABLE_DIGITS * 15;

/// Produces random requests whose addresses differ from `Address::NULL` in
/// exactly one interior hex digit.
pub struct DemoGenerator<R: Rng> {
	rng: R,
}

impl<R: Rng> DemoGenerator<R> {
	pub fn new(rng: R) -> Self {
		Self { rng }
	}

	pub fn address(&mut self) -> Address {
		let digit = self.rng.random_range(1..ADDRESS_LEN * 2 - 1);
		let value = self.rng.random_range(1..16u8);
		Address::NULL.with_hex_digit(digit, value)
	}

	fn word(&mut self, len: usize) -> String {
		(0..len)
			.map(|_| self.rng.random_range(b'a'..=b'z') as char)
			.collect()
	}

	fn name(&mut self) -> String {
		let len = self.rng.random_range(NAME_LEN);
		let mut name = self.word(len);
		if let Some(first) = name.get_mut(0..1) {
			first.make_ascii_uppercase();
		}
		name
	}

	pub fn request(&mut self) -> Request {
		let words = self.rng.random_range(MESSAGE_WORDS);
		let custom_message = (0..words)
			.map(|_| {
				let len = self.rng.random_range(2..=8);
				self.word(len)
			})
			.collect::<Vec<_>>()
			.join(" ");
		let valentine_address = if self.rng.random_bool(0.5) {
			Address::NULL
		} else {
			self.address()
		};
		Request {
			requester_name: self.name(),
			valentine_name: self.name(),
			custom_message,
			requester_address: self.address(),
			valentine_address,
			was_accepted: false,
		}
	}

	/// Generate up to `count` requests whose requester is not `taken`.
	///
	/// The address space is small, so generation gives up after a bounded
	/// number of collisions and may return fewer than `count`. `count` is
	/// capped at `DEMO_ADDRESS_SPACE`.
	pub fn generate(&mut self, count: usize, taken: impl Fn(&Address) -> bool) -> Vec<Request> {
		let count = count.min(DEMO_ADDRESS_SPACE);
		let max_attempts = count.saturating_mul(8);
		let mut requests: Vec<Request> = Vec::with_capacity(count);
		let mut attempts = 0;
		while requests.len() < count && attempts < max_attempts {
			attempts += 1;
			let request = self.request();
			let address = request.requester_address;
			if taken(&address) || requests.iter().any(|r| r.requester_address == address) {
				continue;
			}
			requests.push(request);
		}
		requests
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn generator() -> DemoGenerator<StdRng> {
		DemoGenerator::new(StdRng::seed_from_u64(14))
	}

	#[test]
	fn test_addresses_differ_from_null_in_one_interior_digit() {
		let mut generator = generator();
		let null = Address::NULL.to_string();
		for _ in 0..200 {
			let address = generator.address().to_string();
			assert_ne!(address, null);
			let differing: Vec<usize> = address
				.bytes()
				.zip(null.bytes())
				.enumerate()
				.filter(|(_, (a, b))| a != b)
				.map(|(i, _)| i)
				.collect();
			assert_eq!(differing.len(), 1);
			// "0x" prefix plus the first and last digit are never touched
			assert!(differing[0] > 2 && differing[0] < null.len() - 1);
		}
	}

	#[test]
	fn test_requests_are_real_entities() {
		let mut generator = generator();
		for request in generator.generate(10, |_| false) {
			assert!(!request.is_placeholder());
			assert!(!request.requester_address.is_null());
			assert!(!request.was_accepted);
			assert!(request.requester_name.chars().all(|c| c.is_ascii_alphabetic()));
			assert!(
				request
					.custom_message
					.chars()
					.all(|c| c.is_ascii_lowercase() || c == ' ')
			);
		}
	}

	#[test]
	fn test_generate_skips_taken_and_duplicate_addresses() {
		let mut generator = generator();
		let taken = generator.address();
		let requests = generator.generate(25, |a| *a == taken);
		assert_eq!(requests.len(), 25);
		assert!(requests.iter().all(|r| r.requester_address != taken));
		for (i, request) in requests.iter().enumerate() {
			assert!(
				requests[i + 1..]
					.iter()
					.all(|other| other.requester_address != request.requester_address)
			);
		}
	}

	#[test]
	fn test_huge_count_is_capped_to_address_space() {
		let mut generator = generator();
		let requests = generator.generate(usize::MAX / 4, |_| false);
		assert!(!requests.is_empty());
		assert!(requests.len() <= DEMO_ADDRESS_SPACE);
	}
}
