//! SASL PLAIN credential encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Mechanism name sent alongside the SASL payload.
pub const SASL_MECHANISM_PLAIN: &str = "PLAIN";

/// Encodes credentials as a base64 SASL PLAIN message (`\0username\0password`).
pub fn sasl_plain(username: &str, password: &str) -> String {
	let mut message = Vec::with_capacity(username.len() + password.len() + 2);
	message.push(0);
	message.extend_from_slice(username.as_bytes());
	message.push(0);
	message.extend_from_slice(password.as_bytes());
	STANDARD.encode(message)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sasl_plain_layout() {
		let encoded = sasl_plain("user", "pass");
		let decoded = STANDARD.decode(encoded).unwrap();
		assert_eq!(decoded, b"\0user\0pass");
	}

	#[test]
	fn test_sasl_plain_empty_password() {
		let decoded = STANDARD.decode(sasl_plain("user", "")).unwrap();
		assert_eq!(decoded, b"\0user\0");
	}
}
