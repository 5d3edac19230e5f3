//! Agent-level error types shared across flows, the backend supervisor, and the RPC client.

// std
use std::path::PathBuf;
// self
use crate::_prelude::*;

/// Agent-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical agent error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Authorization failure (browser step, callback, or token endpoint).
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Backend subprocess failure.
	#[error(transparent)]
	Backend(#[from] BackendError),
	/// RPC call to the backend failed.
	#[error(transparent)]
	Rpc(#[from] RpcError),
	/// Backend payload could not be parsed.
	#[error(transparent)]
	Parse(#[from] ParseError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl Error {
	/// Returns `true` when the failure means the local backend could not be reached or started.
	pub fn is_backend_unreachable(&self) -> bool {
		matches!(self, Error::Backend(_) | Error::Rpc(_))
	}

	/// Human-readable message suitable for the presentation layer.
	///
	/// Transport, RPC, and backend-start failures collapse into a single actionable line; the
	/// full error chain is only ever written to the diagnostic log.
	pub fn user_message(&self) -> String {
		match self {
			Error::Backend(BackendError::Spawn { source, .. })
				if source.kind() == std::io::ErrorKind::NotFound =>
				"Backend is not installed. Install the backend binary or point --backend-bin at it."
					.into(),
			Error::Rpc(RpcError::Certificate { .. }) =>
				"Backend certificate is missing. Reinstall the backend so its certificate is present."
					.into(),
			err if err.is_backend_unreachable() =>
				"Could not reach the local backend. Make sure it is installed and try again.".into(),
			Error::Transport(_) => "Could not reach the identity provider.".into(),
			other => other.to_string(),
		}
	}
}

/// Authorization-step failures; every provider-side problem is classified into one of these.
#[derive(Debug, ThisError)]
pub enum AuthError {
	/// Authorization URL could not be constructed from the descriptor.
	#[error("Authorization URL is invalid.")]
	InvalidAuthUrl,
	/// Token endpoint did not grant offline access.
	#[error("Token endpoint response is missing a refresh token.")]
	MissingRefreshToken,
	/// Token endpoint response omitted the access token.
	#[error("Token endpoint response is missing an access token.")]
	MissingAccessToken,
	/// Provider returned an explicit `error` field.
	#[error("Identity provider returned an error: {message}.")]
	RemoteError {
		/// Provider-supplied error code and description.
		message: String,
	},
	/// Loopback listener could not be bound.
	#[error("Callback listener failed: {detail}.")]
	CallbackListenerFailed {
		/// Bind or accept failure detail.
		detail: String,
	},
	/// No callback arrived within the configured bound.
	#[error("Timed out waiting for the authorization callback.")]
	CallbackTimedOut,
	/// A callback arrived but failed validation.
	#[error("Authorization callback was rejected: {reason}.")]
	CallbackRejected {
		/// Which check failed.
		reason: String,
	},
	/// Another sign-in is still waiting for its browser round-trip.
	#[error("A sign-in is already in progress.")]
	SignInInProgress,
	/// Sign-out or shutdown interrupted the sign-in.
	#[error("Sign-in was cancelled.")]
	SignInCancelled,
}

/// Backend subprocess failures.
#[derive(Debug, ThisError)]
pub enum BackendError {
	/// The backend binary could not be spawned.
	#[error("Failed to spawn backend `{}`.", binary.display())]
	Spawn {
		/// Binary that failed to launch.
		binary: PathBuf,
		/// Underlying spawn failure.
		#[source]
		source: std::io::Error,
	},
	/// The handshake could not be written to the backend's standard input.
	#[error("Failed to write the backend handshake.")]
	Handshake {
		/// Underlying pipe failure.
		#[source]
		source: std::io::Error,
	},
	/// No ephemeral port could be allocated.
	#[error("Failed to allocate a local port.")]
	PortAllocation {
		/// Underlying bind failure.
		#[source]
		source: std::io::Error,
	},
	/// The backend never answered its status probe.
	#[error("Backend on port {port} failed to start: {last_error}.")]
	FailedToStart {
		/// Port the backend was told to listen on.
		port: u16,
		/// Last observed probe failure.
		last_error: String,
	},
	/// The backend exited while it was expected to be serving.
	#[error("Backend exited unexpectedly ({status}).")]
	Crashed {
		/// Exit status description.
		status: String,
	},
}

/// RPC failures against the local backend.
#[derive(Debug, ThisError)]
pub enum RpcError {
	/// Non-200 response.
	#[error("Backend call {method} returned HTTP {status}.")]
	Status {
		/// RPC method name.
		method: String,
		/// HTTP status code.
		status: u16,
	},
	/// The per-call timeout elapsed.
	#[error("Backend call {method} timed out.")]
	Timeout {
		/// RPC method name.
		method: String,
	},
	/// The presented certificate did not match the pinned one.
	#[error("TLS pin mismatch.")]
	PinMismatch,
	/// Any other transport failure.
	#[error("Backend call {method} failed.")]
	Transport {
		/// RPC method name.
		method: String,
		/// Underlying transport failure.
		#[source]
		source: BoxError,
	},
	/// The pinned certificate could not be loaded.
	#[error("Pinned certificate {} is unusable: {reason}.", path.display())]
	Certificate {
		/// Certificate path.
		path: PathBuf,
		/// What went wrong.
		reason: String,
	},
	/// The TLS client could not be constructed.
	#[error("RPC client could not be constructed.")]
	ClientBuild {
		/// Underlying builder failure.
		#[source]
		source: BoxError,
	},
}
impl RpcError {
	/// Returns `true` when retrying later may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, RpcError::Timeout { .. } | RpcError::Transport { .. })
	}
}

/// Top-level payload parse failures; nested drift never lands here.
#[derive(Debug, ThisError)]
pub enum ParseError {
	/// Payload is not valid JSON.
	#[error("Usage payload is malformed JSON.")]
	Malformed {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Payload is JSON but not an object.
	#[error("Usage payload is not a JSON object.")]
	NotAnObject,
}

/// Configuration and validation failures raised by the agent.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Provider descriptor failed validation.
	#[error(transparent)]
	InvalidDescriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or agent-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
