//! Persisted sign-in state.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Durable credential state created by a successful authorization-code exchange.
///
/// Only the refresh token and the metadata below are ever persisted; access tokens live in
/// [`AccessToken`](crate::auth::AccessToken) and stay in memory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
	/// Long-lived refresh token.
	pub refresh_token: TokenSecret,
	/// Token type reported by the provider (normally `Bearer`).
	pub token_type: String,
	/// Absolute expiry of the access token minted alongside this state.
	#[serde(with = "time::serde::rfc3339")]
	pub access_token_expiry: OffsetDateTime,
}
impl AuthState {
	/// Creates a state from a refresh token and an absolute access-token expiry.
	pub fn new(
		refresh_token: impl Into<String>,
		token_type: impl Into<String>,
		access_token_expiry: OffsetDateTime,
	) -> Self {
		Self {
			refresh_token: TokenSecret::new(refresh_token),
			token_type: token_type.into(),
			access_token_expiry,
		}
	}

	/// Returns a copy carrying `refresh_token` when the provider rotated it.
	///
	/// A missing or blank replacement keeps the current refresh token.
	pub fn rotated(&self, refresh_token: Option<&TokenSecret>, expiry: OffsetDateTime) -> Self {
		let refresh_token = match refresh_token {
			Some(secret) if !secret.is_blank() => secret.clone(),
			_ => self.refresh_token.clone(),
		};

		Self { refresh_token, token_type: self.token_type.clone(), access_token_expiry: expiry }
	}
}
impl Debug for AuthState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthState")
			.field("refresh_token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("access_token_expiry", &self.access_token_expiry)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn rotation_keeps_existing_token_when_absent() {
		let state = AuthState::new("1//old", "Bearer", datetime!(2026-01-01 00:00 UTC));
		let later = datetime!(2026-01-01 01:00 UTC);
		let kept = state.rotated(None, later);
		let blank = state.rotated(Some(&TokenSecret::new("")), later);
		let rotated = state.rotated(Some(&TokenSecret::new("1//new")), later);

		assert_eq!(kept.refresh_token.expose(), "1//old");
		assert_eq!(kept.access_token_expiry, later);
		assert_eq!(blank.refresh_token.expose(), "1//old");
		assert_eq!(rotated.refresh_token.expose(), "1//new");
	}

	#[test]
	fn state_serializes_with_rfc3339_expiry() {
		let state = AuthState::new("1//r", "Bearer", datetime!(2026-03-04 05:06:07 UTC));
		let json = serde_json::to_value(&state).expect("State should serialize.");

		assert_eq!(json["access_token_expiry"], "2026-03-04T05:06:07Z");
		assert_eq!(json["refresh_token"], "1//r");
		assert!(!format!("{state:?}").contains("1//r"));
	}
}
