//! Backend subprocess supervision.
//!
//! [`BackendSupervisor`] keeps at most one backend alive. A live backend is reused only while
//! its process is running and it was started with the same API key; otherwise it is retired
//! (terminate, grace period, kill) before a replacement is spawned, handshaken, and probed.
//!
//! ```text
//! Stopped -> Starting -> Ready -> Stopped
//!                          \----> Crashed -> Stopped (next ensure_running/stop)
//! ```

pub mod child;
pub mod handshake;
pub mod output;
pub mod port;

pub use child::BackendChild;
pub use handshake::Handshake;

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::BackendConfig,
	error::BackendError,
	flows::pkce,
	obs::{self, FlowKind},
	rpc::{BackendRpc, RpcConnector},
};

const SHARED_SECRET_BYTES: usize = 32;

/// Lifecycle of the supervised backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorState {
	/// Nothing is running.
	Stopped,
	/// A process was spawned and is being probed.
	Starting,
	/// The process answered its status probe.
	Ready,
	/// The process exited while it was expected to be serving.
	Crashed {
		/// Exit description retained until the next `ensure_running` or `stop`.
		last_error: String,
	},
}

/// Connection parameters of one live backend.
#[derive(Clone)]
pub struct BackendConnection<C> {
	/// Loopback port the backend listens on.
	pub port: u16,
	/// Secret required on every RPC call.
	pub shared_secret: TokenSecret,
	/// RPC client bound to this backend.
	pub client: C,
}
impl<C> Debug for BackendConnection<C> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BackendConnection")
			.field("port", &self.port)
			.field("shared_secret", &self.shared_secret)
			.finish_non_exhaustive()
	}
}

struct LiveBackend<C> {
	connection: BackendConnection<C>,
	child: BackendChild,
	api_key: TokenSecret,
}

/// Owns the backend process and its connection.
pub struct BackendSupervisor<R>
where
	R: RpcConnector,
{
	config: BackendConfig,
	connector: R,
	live: Option<LiveBackend<R::Client>>,
	state: SupervisorState,
}
impl<R> BackendSupervisor<R>
where
	R: RpcConnector,
{
	/// Creates an idle supervisor.
	pub fn new(config: BackendConfig, connector: R) -> Self {
		Self { config, connector, live: None, state: SupervisorState::Stopped }
	}

	/// Current state, after checking whether a ready process has exited.
	pub fn state(&mut self) -> &SupervisorState {
		self.observe_exit();

		&self.state
	}

	/// Process id of the live backend, if any.
	pub fn pid(&self) -> Option<u32> {
		self.live.as_ref().and_then(|live| live.child.pid())
	}

	/// Returns a live backend started with `api_key`, spawning one when needed.
	pub async fn ensure_running(
		&mut self,
		api_key: &TokenSecret,
	) -> Result<BackendConnection<R::Client>> {
		self.observe_exit();

		let reusable = self
			.live
			.as_ref()
			.filter(|live| self.state == SupervisorState::Ready && live.api_key == *api_key);

		if let Some(live) = reusable {
			return Ok(live.connection.clone());
		}

		if let SupervisorState::Crashed { last_error } = &self.state {
			tracing::info!(%last_error, "restarting crashed backend");
		}

		self.retire().await;

		obs::observe(FlowKind::EnsureBackend, "ensure_running", self.start(api_key)).await
	}

	/// Stops the live backend, if any. Safe to call repeatedly.
	pub async fn stop(&mut self) {
		self.retire().await;
	}

	async fn start(&mut self, api_key: &TokenSecret) -> Result<BackendConnection<R::Client>> {
		self.state = SupervisorState::Starting;

		let port = match port::allocate() {
			Ok(port) => port,
			Err(e) => {
				self.state = SupervisorState::Stopped;

				return Err(e);
			},
		};
		let shared_secret = TokenSecret::new(pkce::random_token(SHARED_SECRET_BYTES));
		let mut child = match BackendChild::spawn(&self.config, port, shared_secret.expose()) {
			Ok(child) => child,
			Err(e) => {
				self.state = SupervisorState::Stopped;

				return Err(e);
			},
		};

		let probed = Self::handshake_and_probe(
			&self.config,
			&self.connector,
			&mut child,
			port,
			&shared_secret,
			api_key,
		)
		.await;

		match probed {
			Ok(client) => {
				let connection = BackendConnection { port, shared_secret, client };

				self.live = Some(LiveBackend {
					connection: connection.clone(),
					child,
					api_key: api_key.clone(),
				});
				self.state = SupervisorState::Ready;

				tracing::info!(port, pid = self.pid(), "backend ready");

				Ok(connection)
			},
			Err(e) => {
				child.terminate(self.config.stop_grace).await;

				self.state = SupervisorState::Stopped;

				Err(e)
			},
		}
	}

	async fn handshake_and_probe(
		config: &BackendConfig,
		connector: &R,
		child: &mut BackendChild,
		port: u16,
		shared_secret: &TokenSecret,
		api_key: &TokenSecret,
	) -> Result<R::Client> {
		let stdin = child.take_stdin().ok_or_else(|| BackendError::Handshake {
			source: std::io::Error::other("backend stdin was not piped"),
		})?;

		Handshake::new(&config.identity, api_key).write_to(stdin).await?;

		let client = connector.connect(port, shared_secret.expose())?;
		let mut last_error = String::from("no probe attempted");

		for attempt in 1..=config.ready_attempts {
			if let Some(status) = child.exit_status() {
				return Err(BackendError::FailedToStart {
					port,
					last_error: format!("backend exited during startup ({status})"),
				}
				.into());
			}

			match client.heartbeat().await {
				Ok(()) => {
					tracing::debug!(port, attempt, "backend answered status probe");

					return Ok(client);
				},
				Err(e) => last_error = e.to_string(),
			}

			tokio::time::sleep(config.ready_interval).await;
		}

		Err(BackendError::FailedToStart { port, last_error }.into())
	}

	fn observe_exit(&mut self) {
		let Some(live) = &mut self.live else {
			return;
		};
		let Some(status) = live.child.exit_status() else {
			return;
		};

		tracing::warn!(%status, port = live.connection.port, "backend exited unexpectedly");

		self.live = None;
		self.state = SupervisorState::Crashed {
			last_error: BackendError::Crashed { status }.to_string(),
		};
	}

	async fn retire(&mut self) {
		if let Some(live) = self.live.take() {
			live.child.terminate(self.config.stop_grace).await;
		}

		self.state = SupervisorState::Stopped;
	}
}
impl<R> Debug for BackendSupervisor<R>
where
	R: RpcConnector,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BackendSupervisor")
			.field("binary", &self.config.binary)
			.field("state", &self.state)
			.field("pid", &self.pid())
			.finish()
	}
}
