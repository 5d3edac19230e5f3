//! Explicit agent configuration passed to the orchestrator at construction.

// std
use std::{path::PathBuf, time::Duration as StdDuration};
// self
use crate::flows::DEFAULT_CALLBACK_TIMEOUT;

/// Default cadence of the periodic refresh.
pub const DEFAULT_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(300);

/// Top-level configuration consumed by [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
	/// Periodic refresh cadence; `None` means manual refresh only.
	pub refresh_interval: Option<StdDuration>,
	/// Backend subprocess settings.
	pub backend: BackendConfig,
	/// RPC client settings.
	pub rpc: RpcConfig,
	/// How long sign-in waits for the browser redirect.
	pub callback_timeout: StdDuration,
}
impl Default for AgentConfig {
	fn default() -> Self {
		Self {
			refresh_interval: Some(DEFAULT_REFRESH_INTERVAL),
			backend: BackendConfig::default(),
			rpc: RpcConfig::default(),
			callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
		}
	}
}

/// Identity strings the backend expects from its host client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
	/// Host application name.
	pub ide_name: String,
	/// Host application version.
	pub ide_version: String,
	/// Extension name reported to the backend.
	pub extension_name: String,
	/// Extension version reported to the backend.
	pub extension_version: String,
	/// BCP 47 locale.
	pub locale: String,
}
impl Default for ClientIdentity {
	fn default() -> Self {
		Self {
			ide_name: "quota-agent".into(),
			ide_version: env!("CARGO_PKG_VERSION").into(),
			extension_name: "quota-agent".into(),
			extension_version: env!("CARGO_PKG_VERSION").into(),
			locale: "en".into(),
		}
	}
}

/// Command-line flag names understood by the backend binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendFlags {
	/// Flag carrying the listening port.
	pub port: String,
	/// Flag carrying the shared secret.
	pub shared_secret: String,
	/// Flags that switch off companion servers the agent does not use.
	pub disable_companions: Vec<String>,
	/// Flag carrying the upstream API endpoint.
	pub api_server_url: String,
	/// Flag carrying the backend's data directory.
	pub app_data_dir: String,
}
impl Default for BackendFlags {
	fn default() -> Self {
		Self {
			port: "--https_server_port".into(),
			shared_secret: "--csrf_token".into(),
			disable_companions: vec!["--disable_lsp".into()],
			api_server_url: "--api_server_url".into(),
			app_data_dir: "--app_data_dir".into(),
		}
	}
}

/// How the backend subprocess is launched and probed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
	/// Backend executable.
	pub binary: PathBuf,
	/// Upstream API endpoint passed to the backend.
	pub api_server_url: Option<String>,
	/// Data directory passed to the backend.
	pub app_data_dir: Option<PathBuf>,
	/// Additional raw arguments appended after the managed ones.
	pub extra_args: Vec<String>,
	/// Flag names.
	pub flags: BackendFlags,
	/// Identity written into the handshake and environment.
	pub identity: ClientIdentity,
	/// Readiness probe attempts.
	pub ready_attempts: u32,
	/// Delay between readiness probes.
	pub ready_interval: StdDuration,
	/// Grace period between terminate and kill.
	pub stop_grace: StdDuration,
	/// Forward redacted child output to the diagnostic log.
	pub verbose: bool,
}
impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			binary: PathBuf::from("language_server"),
			api_server_url: None,
			app_data_dir: None,
			extra_args: Vec::new(),
			flags: BackendFlags::default(),
			identity: ClientIdentity::default(),
			ready_attempts: 50,
			ready_interval: StdDuration::from_millis(100),
			stop_grace: StdDuration::from_millis(200),
			verbose: false,
		}
	}
}

/// Backend RPC surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcConfig {
	/// PEM certificate pinned for TLS; defaults to `cert.pem` beside the backend binary.
	pub cert_path: Option<PathBuf>,
	/// Fully-qualified service name used as the first path segment.
	pub service: String,
	/// Liveness method.
	pub status_method: String,
	/// Credential push method.
	pub save_credential_method: String,
	/// Usage fetch method.
	pub usage_method: String,
	/// Header carrying the shared secret.
	pub secret_header: String,
	/// Protocol-version header name.
	pub protocol_header: String,
	/// Protocol-version header value.
	pub protocol_version: String,
	/// Per-call timeout.
	pub timeout: StdDuration,
}
impl RpcConfig {
	/// Resolves the pinned certificate path for `backend`.
	pub fn resolved_cert_path(&self, backend: &BackendConfig) -> PathBuf {
		match &self.cert_path {
			Some(path) => path.clone(),
			None => backend
				.binary
				.parent()
				.map(|dir| dir.join("cert.pem"))
				.unwrap_or_else(|| PathBuf::from("cert.pem")),
		}
	}
}
impl Default for RpcConfig {
	fn default() -> Self {
		Self {
			cert_path: None,
			service: "exa.language_server_pb.LanguageServerService".into(),
			status_method: "GetStatus".into(),
			save_credential_method: "SaveOAuthTokenInfo".into(),
			usage_method: "GetUserStatus".into(),
			secret_header: "X-Codeium-Csrf-Token".into(),
			protocol_header: "Connect-Protocol-Version".into(),
			protocol_version: "1".into(),
			timeout: StdDuration::from_secs(10),
		}
	}
}
