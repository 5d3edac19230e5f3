//! PKCE (RFC 7636) verifier/challenge and CSRF `state` generation.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 32;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Verifier plus its derived challenge.
#[derive(Clone)]
pub struct PkcePair {
	/// Secret verifier sent with the code exchange.
	pub verifier: String,
	/// Public challenge sent with the authorize request.
	pub challenge: String,
	/// Challenge derivation method.
	pub method: PkceCodeChallengeMethod,
}
impl PkcePair {
	/// Generates a fresh verifier and its S256 challenge.
	pub fn generate() -> Self {
		let verifier = new_verifier();
		let challenge = challenge_s256(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}
impl Debug for PkcePair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkcePair")
			.field("verifier", &"<redacted>")
			.field("challenge", &self.challenge)
			.field("method", &self.method)
			.finish()
	}
}

/// 32 bytes from the thread-local CSPRNG, base64url-encoded without padding (43 chars).
pub fn new_verifier() -> String {
	random_token(VERIFIER_BYTES)
}

/// `base64url_nopad(sha256(verifier))`.
pub fn challenge_s256(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Random opaque value echoed back on the callback for CSRF protection.
pub fn new_state() -> String {
	random_token(STATE_BYTES)
}

/// Exact-match comparison of the returned `state` against the expected one.
pub fn state_matches(expected: &str, returned: &str) -> bool {
	expected == returned
}

pub(crate) fn random_token(len: usize) -> String {
	let mut bytes = vec![0_u8; len];

	rand::rng().fill_bytes(&mut bytes);

	URL_SAFE_NO_PAD.encode(bytes)
}
