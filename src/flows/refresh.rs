//! Access-token refresh with refresh-token rotation.
//!
//! [`Authorizer::get_valid_access_token`] reuses a cached token until it is within
//! [`EXPIRY_SKEW`](crate::auth::EXPIRY_SKEW) of expiry, then performs a
//! `grant_type=refresh_token` call. When the provider rotates the refresh token the caller
//! receives the replacement [`AuthState`] and must persist it before using the access token.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, AuthState},
	flows::{Authorizer, common},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
};

/// Result of [`Authorizer::get_valid_access_token`].
#[derive(Clone, Debug)]
pub struct ValidAccessToken {
	/// Token safe to use for at least the expiry skew.
	pub access_token: AccessToken,
	/// Updated state when a network refresh happened.
	pub auth: Option<AuthState>,
	/// `true` when the provider issued a new refresh token.
	pub refresh_token_rotated: bool,
}
impl ValidAccessToken {
	fn cached(access_token: AccessToken) -> Self {
		Self { access_token, auth: None, refresh_token_rotated: false }
	}
}

impl<C, M> Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns `cached` when it is still fresh, otherwise refreshes against the token endpoint.
	pub async fn get_valid_access_token(
		&self,
		auth: &AuthState,
		cached: Option<&AccessToken>,
	) -> Result<ValidAccessToken> {
		if let Some(token) = cached.filter(|token| !token.is_expiring()) {
			tracing::trace!(expiry = %token.expiry, "reusing cached access token");

			return Ok(ValidAccessToken::cached(token.clone()));
		}

		obs::observe(FlowKind::Refresh, "refresh_access_token", async move {
			let issued_at = OffsetDateTime::now_utc();
			let response = self.token_endpoint().refresh(auth.refresh_token.expose()).await?;
			let access_token = common::access_token_from(&response, issued_at)?;
			let rotated_secret = common::refresh_token_from(&response)
				.filter(|secret| secret != &auth.refresh_token);
			let refresh_token_rotated = rotated_secret.is_some();
			let updated = auth.rotated(rotated_secret.as_ref(), access_token.expiry);

			if refresh_token_rotated {
				tracing::info!("provider rotated the refresh token");
			}

			Ok(ValidAccessToken { access_token, auth: Some(updated), refresh_token_rotated })
		})
		.await
	}
}
