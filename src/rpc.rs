//! Backend RPC surface.
//!
//! [`BackendRpc`] is what the supervisor and orchestrator call; [`RpcConnector`] builds a client
//! for a freshly started backend. [`PinnedConnector`] is the production pair: a
//! [`PinnedRpcClient`] that trusts exactly one certificate.

pub mod client;
pub mod pin;

pub use client::PinnedRpcClient;
pub use pin::PinnedCertVerifier;

// std
use std::path::{Path, PathBuf};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, AuthState},
	config::{AgentConfig, ClientIdentity, RpcConfig},
};

/// Future returned by [`BackendRpc`] operations.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Unary calls the agent makes against a live backend.
pub trait BackendRpc
where
	Self: Send + Sync,
{
	/// Lightweight liveness probe.
	fn heartbeat(&self) -> RpcFuture<'_, ()>;

	/// Pushes the current credentials to the backend; callers treat failure as non-fatal.
	fn save_credential<'a>(
		&'a self,
		token: &'a AccessToken,
		auth: &'a AuthState,
	) -> RpcFuture<'a, ()>;

	/// Fetches the raw usage payload consumed by [`quota::parse`](crate::quota::parse).
	fn get_usage_status<'a>(&'a self, token: &'a AccessToken) -> RpcFuture<'a, Vec<u8>>;
}

/// Builds [`BackendRpc`] clients for a backend listening on `port`.
pub trait RpcConnector
where
	Self: 'static + Send + Sync,
{
	/// Client type handed out per backend.
	type Client: 'static + BackendRpc + Clone;

	/// Creates a client for the backend on `port` guarded by `shared_secret`.
	fn connect(&self, port: u16, shared_secret: &str) -> Result<Self::Client>;
}

/// Connector producing certificate-pinned clients.
#[derive(Clone, Debug)]
pub struct PinnedConnector {
	config: Arc<RpcConfig>,
	identity: Arc<ClientIdentity>,
	cert_path: PathBuf,
}
impl PinnedConnector {
	/// Creates a connector that loads the pin from `cert_path` on every connect.
	pub fn new(config: RpcConfig, identity: ClientIdentity, cert_path: impl Into<PathBuf>) -> Self {
		Self { config: Arc::new(config), identity: Arc::new(identity), cert_path: cert_path.into() }
	}

	/// Derives the connector from the agent configuration.
	pub fn for_config(config: &AgentConfig) -> Self {
		Self::new(
			config.rpc.clone(),
			config.backend.identity.clone(),
			config.rpc.resolved_cert_path(&config.backend),
		)
	}

	/// Certificate the connector pins.
	pub fn cert_path(&self) -> &Path {
		&self.cert_path
	}
}
impl RpcConnector for PinnedConnector {
	type Client = PinnedRpcClient;

	fn connect(&self, port: u16, shared_secret: &str) -> Result<Self::Client> {
		let verifier = Arc::new(PinnedCertVerifier::from_pem_file(&self.cert_path)?);

		PinnedRpcClient::connect(
			self.config.clone(),
			self.identity.clone(),
			verifier,
			port,
			shared_secret,
		)
	}
}
