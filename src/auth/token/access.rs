//! In-memory access tokens derived from [`AuthState`](crate::auth::AuthState).

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Access tokens closer than this to expiry are refreshed before use.
pub const EXPIRY_SKEW: Duration = Duration::seconds(60);

/// Short-lived bearer token. Never persisted and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
	/// Bearer secret.
	pub token: TokenSecret,
	/// Token type reported by the provider.
	pub token_type: String,
	/// Absolute expiry instant.
	pub expiry: OffsetDateTime,
}
impl AccessToken {
	/// Creates a token expiring at `expiry`.
	pub fn new(
		token: impl Into<String>,
		token_type: impl Into<String>,
		expiry: OffsetDateTime,
	) -> Self {
		Self { token: TokenSecret::new(token), token_type: token_type.into(), expiry }
	}

	/// Returns `true` when fewer than [`EXPIRY_SKEW`] remain at `now`.
	pub fn is_expiring_at(&self, now: OffsetDateTime) -> bool {
		self.expiry - now < EXPIRY_SKEW
	}

	/// Checks [`is_expiring_at`](Self::is_expiring_at) against the current clock.
	pub fn is_expiring(&self) -> bool {
		self.is_expiring_at(OffsetDateTime::now_utc())
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("expiry", &self.expiry)
			.finish()
	}
}
