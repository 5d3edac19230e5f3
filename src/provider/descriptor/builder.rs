// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	provider::{DEFAULT_CALLBACK_PATH, ProviderDescriptor, ProviderEndpoints},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required for sign-in.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is mandatory for all flows.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Client identifier must not be blank.
	#[error("Client identifier must not be empty.")]
	EmptyClientId,
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Endpoint string could not be parsed.
	#[error("The {endpoint} endpoint is not a valid URL: {url}.")]
	InvalidEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Offending input.
		url: String,
	},
	/// Scope list failed validation.
	#[error("Descriptor scopes are invalid.")]
	InvalidScope,
	/// Callback path must be a single non-empty segment.
	#[error("Callback path `{path}` must be a single URL path segment.")]
	InvalidCallbackPath {
		/// Offending path.
		path: String,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// OAuth client identifier.
	pub client_id: String,
	/// Optional client secret.
	pub client_secret: Option<String>,
	/// Authorization endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for exchanges and refreshes.
	pub token_endpoint: Option<Url>,
	/// Fixed scopes requested at sign-in.
	pub scope: ScopeSet,
	/// Loopback callback path.
	pub callback_path: String,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided client identifier.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: None,
			authorization_endpoint: None,
			token_endpoint: None,
			scope: ScopeSet::default(),
			callback_path: DEFAULT_CALLBACK_PATH.into(),
		}
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the fixed scope list.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Overrides the loopback callback path.
	pub fn callback_path(mut self, path: impl Into<String>) -> Self {
		self.callback_path = path.into();

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let descriptor = ProviderDescriptor {
			endpoints: ProviderEndpoints { authorization, token },
			client_id: self.client_id,
			client_secret: self.client_secret,
			scope: self.scope,
			callback_path: self.callback_path.trim_matches('/').to_owned(),
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if self.client_id.trim().is_empty() {
			return Err(ProviderDescriptorError::EmptyClientId);
		}
		if self.callback_path.is_empty() || self.callback_path.contains(['/', '?', '#']) {
			return Err(ProviderDescriptorError::InvalidCallbackPath {
				path: self.callback_path.clone(),
			});
		}

		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() == "https" || is_loopback(url) {
		Ok(())
	} else {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host_str() {
		Some("localhost") => true,
		Some(host) => host
			.trim_start_matches('[')
			.trim_end_matches(']')
			.parse::<IpAddr>()
			.map(|ip| ip.is_loopback())
			.unwrap_or(false),
		None => false,
	}
}
