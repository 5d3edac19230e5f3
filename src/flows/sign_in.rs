//! Browser-driven authorization code + PKCE sign-in.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, AuthState},
	callback::LoopbackCallbackListener,
	error::AuthError,
	flows::{
		Authorizer, common,
		pkce::{self, PkcePair},
	},
	http::TokenHttpClient,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind},
};

/// Credentials minted by a successful sign-in.
#[derive(Clone, Debug)]
pub struct SignedIn {
	/// Durable state to persist.
	pub auth: AuthState,
	/// Access token issued alongside the refresh token.
	pub access_token: AccessToken,
}

impl<C, M> Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Runs the full sign-in: listener, browser, callback wait, and code exchange.
	///
	/// Fails with [`AuthError::MissingRefreshToken`] when the provider did not grant offline
	/// access.
	pub async fn sign_in(&self) -> Result<SignedIn> {
		obs::observe(FlowKind::SignIn, "sign_in", async move {
			let pkce = PkcePair::generate();
			let state = pkce::new_state();
			let listener =
				LoopbackCallbackListener::start(&self.descriptor.callback_path, state.clone())
					.await?;
			let redirect_uri = listener.redirect_uri().clone();
			let authorize_url = self.authorization_url(&redirect_uri, &pkce, &state)?;

			if let Err(e) = self.browser.open(&authorize_url) {
				tracing::warn!(
					error = %e,
					url = %authorize_url,
					"could not open a browser; open the URL manually"
				);
			}

			let code = listener.wait_for_callback(self.callback_timeout).await?;
			let issued_at = OffsetDateTime::now_utc();
			let response =
				self.token_endpoint().exchange_code(&code, &pkce.verifier, &redirect_uri).await?;
			let access_token = common::access_token_from(&response, issued_at)?;
			let refresh_token =
				common::refresh_token_from(&response).ok_or(AuthError::MissingRefreshToken)?;
			let auth = AuthState {
				refresh_token,
				token_type: access_token.token_type.clone(),
				access_token_expiry: access_token.expiry,
			};

			tracing::info!(expiry = %auth.access_token_expiry, "sign-in completed");

			Ok(SignedIn { auth, access_token })
		})
		.await
	}

	/// Builds the browser-facing authorization URL.
	pub fn authorization_url(&self, redirect_uri: &Url, pkce: &PkcePair, state: &str) -> Result<Url> {
		let mut url = self.descriptor.endpoints.authorization.clone();

		if url.cannot_be_a_base() {
			return Err(AuthError::InvalidAuthUrl.into());
		}

		url.query_pairs_mut()
			.append_pair("client_id", &self.descriptor.client_id)
			.append_pair("redirect_uri", redirect_uri.as_str())
			.append_pair("response_type", "code")
			.append_pair("scope", &self.descriptor.scope.normalized())
			.append_pair("code_challenge", &pkce.challenge)
			.append_pair("code_challenge_method", pkce.method.as_str())
			.append_pair("access_type", "offline")
			.append_pair("prompt", "consent")
			.append_pair("state", state);

		Ok(url)
	}
}
