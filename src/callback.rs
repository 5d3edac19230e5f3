//! One-shot loopback HTTP listener that captures the OAuth redirect.
//!
//! [`LoopbackCallbackListener::start`] binds `127.0.0.1:0` and reports the concrete redirect
//! URI. [`LoopbackCallbackListener::wait_for_callback`] serves the callback path with an axum
//! router until the first request for it arrives, then shuts the server down. Each connection
//! is served on its own task, so an idle socket never holds up the redirect.

// std
use std::{net::Ipv4Addr, time::Duration as StdDuration};
// crates.io
use axum::{
	Router,
	extract::{Query, State},
	http::StatusCode,
	response::Html,
	routing,
};
use tokio::{net::TcpListener, sync::oneshot};
use tokio_util::sync::CancellationToken;
// self
use crate::{_prelude::*, error::AuthError, flows::pkce};

const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(1);
const SUCCESS_PAGE: &str = "<html><body style='font-family: sans-serif; text-align: center; \
	padding: 50px;'><h1>Signed in</h1><p>You can close this window and return to the \
	app.</p></body></html>";
const REJECTED_PAGE: &str = "<html><body style='font-family: sans-serif; text-align: center; \
	padding: 50px;'><h1>Sign-in failed</h1><p>The authorization response could not be \
	verified. Return to the app and try again.</p></body></html>";

type Outcome = Result<String, AuthError>;

/// Opens authorization URLs for the user.
pub trait BrowserLauncher
where
	Self: Send + Sync,
{
	/// Opens `url` in the user's browser.
	fn open(&self, url: &Url) -> std::io::Result<()>;
}

/// Launches the platform default browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBrowser;
impl BrowserLauncher for SystemBrowser {
	fn open(&self, url: &Url) -> std::io::Result<()> {
		open::that(url.as_str())
	}
}

/// Ephemeral listener awaiting exactly one authorization redirect.
#[derive(Debug)]
pub struct LoopbackCallbackListener {
	listener: TcpListener,
	redirect_uri: Url,
	path: String,
	expected_state: String,
}
impl LoopbackCallbackListener {
	/// Binds an ephemeral loopback port and returns once the socket is accepting.
	pub async fn start(path: &str, expected_state: impl Into<String>) -> Result<Self> {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
			.await
			.map_err(|e| AuthError::CallbackListenerFailed { detail: e.to_string() })?;
		let port = listener
			.local_addr()
			.map_err(|e| AuthError::CallbackListenerFailed { detail: e.to_string() })?
			.port();
		let path = format!("/{}", path.trim_matches('/'));
		let redirect_uri = Url::parse(&format!("http://127.0.0.1:{port}{path}"))
			.map_err(|e| AuthError::CallbackListenerFailed { detail: e.to_string() })?;

		tracing::debug!(%redirect_uri, "callback listener ready");

		Ok(Self { listener, redirect_uri, path, expected_state: expected_state.into() })
	}

	/// Redirect URI to register with the authorization request.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Waits for the redirect and returns the authorization code.
	///
	/// Requests for other paths (favicons, probes) receive a 404 and are skipped. The first
	/// request for the callback path decides the outcome. The socket is closed on every
	/// outcome, including the timeout.
	pub async fn wait_for_callback(self, timeout: StdDuration) -> Result<String> {
		let (outcome_tx, outcome_rx) = oneshot::channel();
		let state = CallbackState {
			expected_state: Arc::new(self.expected_state),
			outcome: Arc::new(Mutex::new(Some(outcome_tx))),
		};
		let router = Router::new()
			.route(&self.path, routing::get(handle_callback))
			.fallback(|| async { StatusCode::NOT_FOUND })
			.with_state(state);
		let shutdown = CancellationToken::new();
		let mut server = tokio::spawn(
			axum::serve(self.listener, router)
				.with_graceful_shutdown(shutdown.clone().cancelled_owned())
				.into_future(),
		);
		let outcome = tokio::time::timeout(timeout, outcome_rx).await;

		shutdown.cancel();

		match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
			Ok(Ok(Err(e))) => tracing::debug!(error = %e, "callback server stopped with an error"),
			Ok(_) => {},
			Err(_) => {
				server.abort();

				let _ = server.await;
			},
		}

		match outcome {
			Ok(Ok(outcome)) => outcome.map_err(Into::into),
			Ok(Err(_)) => Err(AuthError::CallbackListenerFailed {
				detail: "callback server stopped before a redirect arrived".into(),
			}
			.into()),
			Err(_) => {
				tracing::warn!(timeout_secs = timeout.as_secs_f64(), "authorization callback timed out");

				Err(AuthError::CallbackTimedOut.into())
			},
		}
	}
}

#[derive(Clone)]
struct CallbackState {
	expected_state: Arc<String>,
	outcome: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

async fn handle_callback(
	State(state): State<CallbackState>,
	Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
	let outcome = validate(&state.expected_state, &params);
	let page = if outcome.is_ok() { SUCCESS_PAGE } else { REJECTED_PAGE };
	let sender = state.outcome.lock().take();

	match sender {
		Some(sender) => {
			let _ = sender.send(outcome);
		},
		None => tracing::debug!("ignoring a repeated authorization callback"),
	}

	Html(page)
}

fn validate(expected_state: &str, params: &HashMap<String, String>) -> Outcome {
	if let Some(error) = params.get("error") {
		return Err(AuthError::CallbackRejected { reason: format!("provider returned {error}") });
	}

	match params.get("state") {
		Some(state) if pkce::state_matches(expected_state, state) => {},
		Some(_) => return Err(AuthError::CallbackRejected { reason: "state mismatch".into() }),
		None => return Err(AuthError::CallbackRejected { reason: "missing state".into() }),
	}

	match params.get("code") {
		Some(code) if !code.is_empty() => Ok(code.clone()),
		_ => Err(AuthError::CallbackRejected { reason: "missing code".into() }),
	}
}
