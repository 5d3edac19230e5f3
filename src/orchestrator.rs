//! Refresh orchestration: the single owner of credentials, the backend, and published state.
//!
//! [`Orchestrator`] is a cheap, cloneable handle. Every mutation happens on one actor task;
//! slow work (the browser round-trip, token refresh, backend start, usage fetch) runs on jobs
//! that report back by message. Each sign-in or sign-out starts a new credential epoch, and
//! job results tagged with an older epoch are dropped unseen.
//!
//! A refresh is split in two jobs so that a rotated refresh token reaches the
//! [`CredentialStore`] (written only by the actor) before the new access token is used.

// crates.io
use tokio::{
	sync::{mpsc, oneshot, watch},
	task::{JoinHandle, JoinSet},
	time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, AuthState},
	backend::BackendSupervisor,
	config::AgentConfig,
	error::AuthError,
	flows::{ReqwestAuthorizer, SignedIn, ValidAccessToken},
	obs::{self, FlowKind},
	quota::{self, QuotaSnapshot},
	rpc::{BackendRpc, PinnedConnector, RpcConnector},
	store::CredentialStore,
};

const COMMAND_CAPACITY: usize = 32;
const SIGN_IN_FAILED: &str = "Sign-in failed";
const FETCH_FAILED: &str = "Failed to fetch quota";

/// Builds the RPC connector for a given configuration.
pub type ConnectorFactory<R> = Arc<dyn Fn(&AgentConfig) -> R + Send + Sync>;

/// Everything the presentation layer may observe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentState {
	/// Latest snapshot with the user's pin merged in; cleared when a refresh fails.
	pub snapshot: Option<Arc<QuotaSnapshot>>,
	/// Credentials are loaded.
	pub signed_in: bool,
	/// A refresh is in flight.
	pub refreshing: bool,
	/// Prefixed, user-facing description of the last failure.
	pub last_error: Option<String>,
}

enum Command {
	SignIn(oneshot::Sender<Result<()>>),
	SignOut(oneshot::Sender<()>),
	RefreshNow(oneshot::Sender<()>),
	SelectItem(Option<String>, oneshot::Sender<()>),
	UpdateConfig(Box<AgentConfig>, oneshot::Sender<()>),
	Shutdown(oneshot::Sender<()>),
}

enum Event {
	Tick { epoch: u64, ticker: u64 },
	SignedIn { epoch: u64, result: Result<SignedIn> },
	TokenReady { epoch: u64, result: Result<ValidAccessToken> },
	Fetched { epoch: u64, result: Result<QuotaSnapshot> },
}

/// Handle to the orchestrator actor.
#[derive(Clone, Debug)]
pub struct Orchestrator {
	commands: mpsc::Sender<Command>,
	state: watch::Receiver<AgentState>,
	actor: Arc<Mutex<Option<JoinHandle<()>>>>,
}
impl Orchestrator {
	/// Starts the actor with certificate-pinned backend connections.
	pub async fn start_pinned(
		config: AgentConfig,
		authorizer: ReqwestAuthorizer,
		store: CredentialStore,
	) -> Self {
		Self::start(config, authorizer, store, PinnedConnector::for_config).await
	}

	/// Loads stored credentials and starts the actor.
	///
	/// With credentials present the agent is signed in immediately; a first refresh is kicked
	/// off and the periodic ticker started.
	pub async fn start<R, F>(
		config: AgentConfig,
		authorizer: ReqwestAuthorizer,
		store: CredentialStore,
		connector: F,
	) -> Self
	where
		R: RpcConnector,
		F: 'static + Send + Sync + Fn(&AgentConfig) -> R,
	{
		let stored = store.load().await;
		let connector: ConnectorFactory<R> = Arc::new(connector);
		let supervisor = BackendSupervisor::new(config.backend.clone(), connector(&config));
		let authorizer = Arc::new(authorizer.with_callback_timeout(config.callback_timeout));
		let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(AgentState::default());
		let mut actor = Actor {
			config,
			authorizer,
			store,
			connector,
			supervisor: Arc::new(AsyncMutex::new(supervisor)),
			events: events_tx,
			state: state_tx,
			epoch: 0,
			auth: None,
			access_token: None,
			snapshot: None,
			selected_item_id: None,
			last_error: None,
			sign_in: None,
			refresh: None,
			jobs: JoinSet::new(),
			ticker: None,
			tickers_started: 0,
		};

		actor.resume(stored);

		let handle = tokio::spawn(actor.run(commands_rx, events_rx));

		Self { commands: commands_tx, state: state_rx, actor: Arc::new(Mutex::new(Some(handle))) }
	}

	/// Current state.
	pub fn state(&self) -> AgentState {
		self.state.borrow().clone()
	}

	/// Receiver notified on every state change.
	pub fn subscribe(&self) -> watch::Receiver<AgentState> {
		self.state.clone()
	}

	/// Runs the browser sign-in and resolves once it has been applied.
	///
	/// A successful sign-in replaces any previous credentials and triggers a refresh.
	pub async fn sign_in(&self) -> Result<()> {
		let (reply, outcome) = oneshot::channel();

		if self.commands.send(Command::SignIn(reply)).await.is_err() {
			return Err(AuthError::SignInCancelled.into());
		}

		outcome.await.unwrap_or_else(|_| Err(AuthError::SignInCancelled.into()))
	}

	/// Cancels pending work, stops the backend, and deletes stored credentials.
	pub async fn sign_out(&self) {
		self.request(Command::SignOut).await;
	}

	/// Refreshes now, or joins the refresh already in flight.
	///
	/// Resolves once the outcome is published. Does nothing while signed out or signing in.
	pub async fn refresh_now(&self) {
		self.request(Command::RefreshNow).await;
	}

	/// Pins (or unpins) a quota item in every published snapshot.
	pub async fn set_selected_item_id(&self, id: Option<String>) {
		self.request(|reply| Command::SelectItem(id, reply)).await;
	}

	/// Replaces the configuration; backend settings take effect on the next backend start.
	pub async fn update_config(&self, config: AgentConfig) {
		self.request(|reply| Command::UpdateConfig(Box::new(config), reply)).await;
	}

	/// Cancels all work, stops the backend, and waits for the actor to exit.
	pub async fn shutdown(&self) {
		self.request(Command::Shutdown).await;

		let actor = self.actor.lock().take();

		if let Some(actor) = actor {
			if let Err(e) = actor.await {
				tracing::error!(error = %e, "orchestrator task ended abnormally");
			}
		}
	}

	async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) {
		let (reply, done) = oneshot::channel();

		if self.commands.send(command(reply)).await.is_ok() {
			let _ = done.await;
		}
	}
}

struct Ticker {
	id: u64,
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

struct Actor<R>
where
	R: RpcConnector,
{
	config: AgentConfig,
	authorizer: Arc<ReqwestAuthorizer>,
	store: CredentialStore,
	connector: ConnectorFactory<R>,
	supervisor: Arc<AsyncMutex<BackendSupervisor<R>>>,
	events: mpsc::UnboundedSender<Event>,
	state: watch::Sender<AgentState>,
	epoch: u64,
	auth: Option<AuthState>,
	access_token: Option<AccessToken>,
	snapshot: Option<QuotaSnapshot>,
	selected_item_id: Option<String>,
	last_error: Option<String>,
	sign_in: Option<oneshot::Sender<Result<()>>>,
	refresh: Option<Vec<oneshot::Sender<()>>>,
	jobs: JoinSet<()>,
	ticker: Option<Ticker>,
	tickers_started: u64,
}
impl<R> Actor<R>
where
	R: RpcConnector,
{
	async fn run(
		mut self,
		mut commands: mpsc::Receiver<Command>,
		mut events: mpsc::UnboundedReceiver<Event>,
	) {
		loop {
			tokio::select! {
				command = commands.recv() => match command {
					Some(Command::Shutdown(reply)) => {
						self.shutdown().await;

						let _ = reply.send(());

						return;
					},
					Some(command) => self.handle_command(command).await,
					None => {
						self.shutdown().await;

						return;
					},
				},
				Some(event) = events.recv() => self.handle_event(event).await,
				Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
					if let Err(e) = joined {
						if e.is_panic() {
							tracing::error!(error = %e, "orchestrator job panicked");
						}
					}
				},
			}
		}
	}

	fn resume(&mut self, stored: Option<AuthState>) {
		match stored {
			Some(auth) => {
				tracing::info!("resuming session from stored credentials");

				self.auth = Some(auth);
				self.start_ticker();
				self.request_refresh(None);
			},
			None => self.publish(),
		}
	}

	async fn handle_command(&mut self, command: Command) {
		match command {
			Command::SignIn(reply) => self.begin_sign_in(reply),
			Command::SignOut(reply) => {
				self.sign_out().await;

				let _ = reply.send(());
			},
			Command::RefreshNow(reply) => self.request_refresh(Some(reply)),
			Command::SelectItem(id, reply) => {
				self.selected_item_id = id;
				self.publish();

				let _ = reply.send(());
			},
			Command::UpdateConfig(config, reply) => {
				self.apply_config(*config).await;

				let _ = reply.send(());
			},
			Command::Shutdown(reply) => {
				self.shutdown().await;

				let _ = reply.send(());
			},
		}
	}

	async fn handle_event(&mut self, event: Event) {
		match event {
			Event::Tick { epoch, ticker } if epoch == self.epoch && self.ticking(ticker) =>
				self.request_refresh(None),
			Event::SignedIn { epoch, result } if epoch == self.epoch =>
				self.finish_sign_in(result).await,
			Event::TokenReady { epoch, result } if epoch == self.epoch =>
				self.token_ready(result).await,
			Event::Fetched { epoch, result } if epoch == self.epoch => self.finish_refresh(result),
			_ => tracing::debug!(epoch = self.epoch, "dropping result from an outdated session"),
		}
	}

	fn begin_sign_in(&mut self, reply: oneshot::Sender<Result<()>>) {
		if self.sign_in.is_some() {
			let _ = reply.send(Err(AuthError::SignInInProgress.into()));

			return;
		}

		let authorizer = self.authorizer.clone();
		let events = self.events.clone();
		let epoch = self.epoch;

		self.sign_in = Some(reply);
		self.jobs.spawn(async move {
			let result = authorizer.sign_in().await;

			let _ = events.send(Event::SignedIn { epoch, result });
		});
	}

	async fn finish_sign_in(&mut self, result: Result<SignedIn>) {
		let reply = self.sign_in.take();
		let outcome = match result {
			Ok(signed) => {
				self.end_session().await;
				self.store.save(&signed.auth).await;
				self.auth = Some(signed.auth);
				self.access_token = Some(signed.access_token);
				self.snapshot = None;
				self.last_error = None;

				tracing::info!("signed in");

				self.start_ticker();
				self.request_refresh(None);

				Ok(())
			},
			Err(e) => {
				tracing::warn!(error = ?e, "sign-in failed");

				self.last_error = Some(format!("{SIGN_IN_FAILED}: {}", e.user_message()));
				self.publish();

				Err(e)
			},
		};

		if let Some(reply) = reply {
			let _ = reply.send(outcome);
		}
	}

	fn request_refresh(&mut self, reply: Option<oneshot::Sender<()>>) {
		let Some(auth) = self.auth.clone() else {
			tracing::debug!("refresh skipped while signed out");

			return;
		};

		if self.sign_in.is_some() {
			tracing::debug!("refresh skipped while a sign-in is in progress");

			return;
		}
		if let Some(waiters) = &mut self.refresh {
			waiters.extend(reply);

			return;
		}

		self.refresh = Some(reply.into_iter().collect());
		self.publish();

		let authorizer = self.authorizer.clone();
		let cached = self.access_token.clone();
		let events = self.events.clone();
		let epoch = self.epoch;

		self.jobs.spawn(async move {
			let result = authorizer.get_valid_access_token(&auth, cached.as_ref()).await;

			let _ = events.send(Event::TokenReady { epoch, result });
		});
	}

	async fn token_ready(&mut self, result: Result<ValidAccessToken>) {
		let valid = match result {
			Ok(valid) => valid,
			Err(e) => return self.finish_refresh(Err(e)),
		};

		if let Some(auth) = valid.auth {
			if valid.refresh_token_rotated {
				self.store.save(&auth).await;
			}

			self.auth = Some(auth);
		}

		let Some(auth) = self.auth.clone() else {
			return;
		};
		let token = valid.access_token;
		let supervisor = self.supervisor.clone();
		let events = self.events.clone();
		let epoch = self.epoch;

		self.access_token = Some(token.clone());
		self.jobs.spawn(async move {
			let result = fetch_quota(supervisor, auth, token).await;

			let _ = events.send(Event::Fetched { epoch, result });
		});
	}

	fn finish_refresh(&mut self, result: Result<QuotaSnapshot>) {
		match result {
			Ok(snapshot) => {
				tracing::debug!(items = snapshot.items.len(), "quota snapshot updated");

				self.snapshot = Some(snapshot);
				self.last_error = None;
			},
			Err(e) => {
				match &e {
					Error::Rpc(rpc) if rpc.is_transient() =>
						tracing::info!(error = ?e, "quota refresh hit a transient backend failure"),
					_ => tracing::warn!(error = ?e, "quota refresh failed"),
				}

				self.snapshot = None;
				self.last_error = Some(format!("{FETCH_FAILED}: {}", e.user_message()));
			},
		}

		self.resolve_refresh();
		self.publish();
	}

	async fn sign_out(&mut self) {
		self.end_session().await;
		self.supervisor.lock().await.stop().await;
		self.store.delete().await;
		self.auth = None;
		self.access_token = None;
		self.snapshot = None;
		self.last_error = None;
		self.publish();

		tracing::info!("signed out");
	}

	async fn apply_config(&mut self, config: AgentConfig) {
		if config.backend != self.config.backend || config.rpc != self.config.rpc {
			let mut supervisor = self.supervisor.lock().await;

			supervisor.stop().await;
			*supervisor = BackendSupervisor::new(config.backend.clone(), (self.connector)(&config));
		}
		if config.callback_timeout != self.config.callback_timeout {
			self.authorizer = Arc::new(
				self.authorizer.as_ref().clone().with_callback_timeout(config.callback_timeout),
			);
		}

		let cadence_changed = config.refresh_interval != self.config.refresh_interval;

		self.config = config;

		if cadence_changed && self.auth.is_some() {
			self.stop_ticker().await;
			self.start_ticker();
		}

		tracing::debug!(refresh_interval = ?self.config.refresh_interval, "configuration updated");
	}

	async fn shutdown(&mut self) {
		self.end_session().await;
		self.supervisor.lock().await.stop().await;
		self.publish();

		tracing::debug!("orchestrator stopped");
	}

	/// Invalidates everything started under the current epoch and waits for it to wind down.
	async fn end_session(&mut self) {
		self.epoch += 1;
		self.stop_ticker().await;
		self.jobs.abort_all();

		while self.jobs.join_next().await.is_some() {}

		self.sign_in = None;
		self.resolve_refresh();
	}

	fn resolve_refresh(&mut self) {
		for waiter in self.refresh.take().unwrap_or_default() {
			let _ = waiter.send(());
		}
	}

	fn start_ticker(&mut self) {
		let Some(period) = self.config.refresh_interval.filter(|period| !period.is_zero()) else {
			return;
		};
		let cancel = CancellationToken::new();
		let token = cancel.clone();
		let events = self.events.clone();
		let epoch = self.epoch;

		self.tickers_started += 1;

		let id = self.tickers_started;
		let handle = tokio::spawn(async move {
			let mut interval = time::interval_at(Instant::now() + period, period);

			interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					_ = interval.tick() => {},
				}

				if events.send(Event::Tick { epoch, ticker: id }).is_err() {
					break;
				}
			}
		});

		self.ticker = Some(Ticker { id, cancel, handle });
	}

	fn ticking(&self, id: u64) -> bool {
		self.ticker.as_ref().is_some_and(|ticker| ticker.id == id)
	}

	async fn stop_ticker(&mut self) {
		if let Some(ticker) = self.ticker.take() {
			ticker.cancel.cancel();

			let _ = ticker.handle.await;
		}
	}

	fn publish(&self) {
		let snapshot = self
			.snapshot
			.as_ref()
			.map(|snapshot| Arc::new(snapshot.with_selection(self.selected_item_id.clone())));

		self.state.send_replace(AgentState {
			snapshot,
			signed_in: self.auth.is_some(),
			refreshing: self.refresh.is_some(),
			last_error: self.last_error.clone(),
		});
	}
}

async fn fetch_quota<R>(
	supervisor: Arc<AsyncMutex<BackendSupervisor<R>>>,
	auth: AuthState,
	token: AccessToken,
) -> Result<QuotaSnapshot>
where
	R: RpcConnector,
{
	let connection = supervisor.lock().await.ensure_running(&token.token).await?;

	obs::observe(FlowKind::FetchQuota, "fetch_quota", async {
		if let Err(e) = connection.client.save_credential(&token, &auth).await {
			tracing::warn!(error = %e, "credential push failed; fetching usage anyway");
		}

		let payload = connection.client.get_usage_status(&token).await?;

		quota::parse(&payload, OffsetDateTime::now_utc())
	})
	.await
}
