//! Helpers shared by the sign-in and refresh flows.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret},
	error::{AuthError, ConfigError},
	oauth::TokenEndpointResponse,
};

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::hours(1);

const DEFAULT_TOKEN_TYPE: &str = "Bearer";
const MAX_EXPIRES_IN_SECS: i64 = 366 * 24 * 60 * 60;

/// Converts a relative `expires_in` into an absolute instant.
pub fn expiry_after(issued_at: OffsetDateTime, expires_in: Option<i64>) -> Result<OffsetDateTime> {
	let lifetime = match expires_in {
		None => DEFAULT_EXPIRES_IN,
		Some(secs) if (0..=MAX_EXPIRES_IN_SECS).contains(&secs) => Duration::seconds(secs),
		Some(_) => return Err(ConfigError::ExpiresInOutOfRange.into()),
	};

	Ok(issued_at + lifetime)
}

/// Extracts the access token, failing with [`AuthError::MissingAccessToken`] if absent or blank.
pub fn access_token_from(
	response: &TokenEndpointResponse,
	issued_at: OffsetDateTime,
) -> Result<AccessToken> {
	let token = response
		.access_token
		.as_deref()
		.filter(|value| !value.trim().is_empty())
		.ok_or(AuthError::MissingAccessToken)?;
	let expiry = expiry_after(issued_at, response.expires_in)?;

	Ok(AccessToken::new(token, token_type_of(response), expiry))
}

/// Non-blank refresh token carried by the response, if any.
pub fn refresh_token_from(response: &TokenEndpointResponse) -> Option<TokenSecret> {
	response
		.refresh_token
		.as_deref()
		.filter(|value| !value.trim().is_empty())
		.map(TokenSecret::new)
}

/// Provider-reported token type, defaulting to `Bearer`.
pub fn token_type_of(response: &TokenEndpointResponse) -> String {
	response
		.token_type
		.as_deref()
		.filter(|value| !value.is_empty())
		.unwrap_or(DEFAULT_TOKEN_TYPE)
		.to_owned()
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	#[test]
	fn expiry_is_issued_at_plus_expires_in() {
		let now = datetime!(2026-05-01 12:00 UTC);

		assert_eq!(expiry_after(now, Some(3600)).expect("Valid lifetime."), now + Duration::hours(1));
		assert_eq!(expiry_after(now, None).expect("Default lifetime."), now + DEFAULT_EXPIRES_IN);
		assert!(expiry_after(now, Some(-5)).is_err());
		assert!(expiry_after(now, Some(i64::MAX)).is_err());
	}

	#[test]
	fn blank_tokens_count_as_missing() {
		let response = TokenEndpointResponse {
			access_token: Some("  ".into()),
			refresh_token: Some(String::new()),
			..Default::default()
		};
		let err = access_token_from(&response, OffsetDateTime::now_utc())
			.expect_err("Blank access tokens must be rejected.");

		assert!(matches!(err, Error::Auth(AuthError::MissingAccessToken)));
		assert!(refresh_token_from(&response).is_none());
		assert_eq!(token_type_of(&response), "Bearer");
	}
}
