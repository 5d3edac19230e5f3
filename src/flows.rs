//! Authorization flows against the identity provider.
//!
//! [`Authorizer`] owns the transport, the provider descriptor, and the browser launcher so the
//! sign-in and refresh flows can focus on grant-specific logic.

pub mod common;
pub mod pkce;
pub mod refresh;
pub mod sign_in;

pub use refresh::*;
pub use sign_in::*;

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	callback::{BrowserLauncher, SystemBrowser},
	http::{ReqwestHttpClient, TokenHttpClient},
	oauth::{ReqwestTransportErrorMapper, TokenEndpoint, TransportErrorMapper},
	provider::ProviderDescriptor,
};

/// Default bound on the browser round-trip.
pub const DEFAULT_CALLBACK_TIMEOUT: StdDuration = StdDuration::from_secs(180);

/// Authorizer specialized for the crate's default reqwest transport stack.
pub type ReqwestAuthorizer = Authorizer<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Runs sign-in and refresh against a single provider descriptor.
#[derive(Clone)]
pub struct Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every token-endpoint request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Provider endpoints, client credentials, and scopes.
	pub descriptor: ProviderDescriptor,
	/// Opens the authorization URL.
	pub browser: Arc<dyn BrowserLauncher>,
	/// How long sign-in waits for the redirect.
	pub callback_timeout: StdDuration,
}
impl<C, M> Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an authorizer that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		descriptor: ProviderDescriptor,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			descriptor,
			browser: Arc::new(SystemBrowser),
			callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
		}
	}

	/// Replaces the browser launcher.
	pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
		self.browser = browser;

		self
	}

	/// Overrides the callback wait bound.
	pub fn with_callback_timeout(mut self, timeout: StdDuration) -> Self {
		self.callback_timeout = timeout;

		self
	}

	pub(crate) fn token_endpoint(&self) -> TokenEndpoint<'_, C, M> {
		TokenEndpoint {
			descriptor: &self.descriptor,
			http_client: self.http_client.as_ref(),
			mapper: self.transport_mapper.as_ref(),
		}
	}
}
impl ReqwestAuthorizer {
	/// Creates an authorizer with its own reqwest-backed transport.
	pub fn new(descriptor: ProviderDescriptor) -> Self {
		Self::with_http_client(
			descriptor,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for Authorizer<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Authorizer")
			.field("descriptor", &self.descriptor)
			.field("callback_timeout", &self.callback_timeout)
			.finish()
	}
}
