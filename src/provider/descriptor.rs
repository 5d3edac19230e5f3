//! Provider descriptor data structures shared by the sign-in and refresh flows.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant identifiers.
pub mod grant;

pub use builder::*;
pub use grant::*;

// self
use crate::{_prelude::*, auth::ScopeSet};

/// Default path served by the loopback callback listener.
pub const DEFAULT_CALLBACK_PATH: &str = "oauth-callback";

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Browser-facing authorization endpoint.
	pub authorization: Url,
	/// Token endpoint used for exchanges and refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Client secret sent in the form body (installed-app clients still carry one).
	pub client_secret: Option<String>,
	/// Fixed scopes requested at sign-in.
	pub scope: ScopeSet,
	/// Path component of the loopback redirect URI.
	pub callback_path: String,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided client identifier.
	pub fn builder(client_id: impl Into<String>) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(client_id)
	}

	/// Google's OAuth endpoints with the scopes the backend needs.
	pub fn google(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
	) -> Result<Self, ProviderDescriptorError> {
		let scope = ScopeSet::new([
			"https://www.googleapis.com/auth/cloud-platform",
			"https://www.googleapis.com/auth/userinfo.email",
			"https://www.googleapis.com/auth/userinfo.profile",
			"openid",
		])
		.map_err(|_| ProviderDescriptorError::InvalidScope)?;

		Self::builder(client_id)
			.client_secret(client_secret)
			.authorization_endpoint(google_url("https://accounts.google.com/o/oauth2/v2/auth")?)
			.token_endpoint(google_url("https://oauth2.googleapis.com/token")?)
			.scope(scope)
			.build()
	}
}
impl Debug for ProviderDescriptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderDescriptor")
			.field("endpoints", &self.endpoints)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("scope", &self.scope)
			.field("callback_path", &self.callback_path)
			.finish()
	}
}

fn google_url(raw: &str) -> Result<Url, ProviderDescriptorError> {
	Url::parse(raw).map_err(|_| ProviderDescriptorError::InvalidEndpoint {
		endpoint: "google",
		url: raw.to_owned(),
	})
}
