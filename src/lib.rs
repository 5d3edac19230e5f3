//! Background quota agent: OAuth 2.0 PKCE sign-in against a cloud identity provider, a
//! supervised local backend subprocess, and a certificate-pinned RPC client that polls usage
//! quotas and publishes normalized snapshots.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod auth;
pub mod backend;
pub mod callback;
pub mod config;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod orchestrator;
pub mod provider;
pub mod quota;
pub mod rpc;
pub mod store;
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests.

	pub use crate::_prelude::*;

	// std
	use std::path::{Path, PathBuf};
	// self
	use crate::{
		auth::ScopeSet,
		backend::BackendSupervisor,
		callback::BrowserLauncher,
		config::{AgentConfig, BackendConfig},
		flows::{Authorizer, ReqwestAuthorizer},
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::ProviderDescriptor,
		rpc::{BackendRpc, RpcConnector, RpcFuture},
	};

	/// Client identifier used by test descriptors.
	pub const TEST_CLIENT_ID: &str = "client-test";
	/// Client secret used by test descriptors.
	pub const TEST_CLIENT_SECRET: &str = "secret-test";

	/// Builds a provider descriptor whose endpoints live under `base` (e.g. an `httpmock` URL).
	pub fn test_descriptor(base: &str) -> ProviderDescriptor {
		ProviderDescriptor::builder(TEST_CLIENT_ID)
			.client_secret(TEST_CLIENT_SECRET)
			.authorization_endpoint(
				Url::parse(&format!("{base}/authorize"))
					.expect("Test authorization endpoint should parse."),
			)
			.token_endpoint(
				Url::parse(&format!("{base}/token")).expect("Test token endpoint should parse."),
			)
			.scope(ScopeSet::new(["openid", "email"]).expect("Test scopes should be valid."))
			.build()
			.expect("Test descriptor should build.")
	}

	/// Browser stand-in that follows the authorization URL's redirect by itself.
	///
	/// The launcher parses `redirect_uri` and `state` from the authorize URL and issues the
	/// callback request on a background task, optionally overriding the state to simulate a
	/// forged redirect.
	#[derive(Clone, Debug, Default)]
	pub struct RedirectingBrowser {
		/// Code returned on the callback.
		pub code: String,
		/// Replaces the real `state` when set.
		pub forged_state: Option<String>,
		/// Every URL the launcher was asked to open.
		pub opened: Arc<Mutex<Vec<Url>>>,
	}
	impl RedirectingBrowser {
		/// Creates a launcher answering with `code`.
		pub fn answering(code: impl Into<String>) -> Self {
			Self { code: code.into(), ..Default::default() }
		}

		/// Makes the launcher send a different `state` than the one it was given.
		pub fn with_forged_state(mut self, state: impl Into<String>) -> Self {
			self.forged_state = Some(state.into());

			self
		}
	}
	impl BrowserLauncher for RedirectingBrowser {
		fn open(&self, url: &Url) -> std::io::Result<()> {
			self.opened.lock().push(url.clone());

			let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
			let redirect = pairs
				.get("redirect_uri")
				.and_then(|value| Url::parse(value).ok())
				.ok_or_else(|| std::io::Error::other("authorize URL lacks redirect_uri"))?;
			let state = self
				.forged_state
				.clone()
				.or_else(|| pairs.get("state").cloned())
				.unwrap_or_default();
			let mut callback = redirect;

			callback.query_pairs_mut().append_pair("code", &self.code).append_pair("state", &state);

			tokio::spawn(async move {
				let _ = ReqwestClient::new().get(callback).send().await;
			});

			Ok(())
		}
	}

	/// Builds a reqwest-backed [`Authorizer`] for `descriptor` that opens URLs via `browser`.
	pub fn build_test_authorizer(
		descriptor: ProviderDescriptor,
		browser: impl BrowserLauncher + 'static,
	) -> ReqwestAuthorizer {
		Authorizer::with_http_client(
			descriptor,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_browser(Arc::new(browser))
	}

	/// Scripted backend RPC stand-in.
	#[derive(Clone, Debug, Default)]
	pub struct StubRpc {
		/// Payload returned by the usage call.
		pub usage_payload: Arc<Mutex<Vec<u8>>>,
		/// Makes the status probe fail when set.
		pub fail_heartbeat: bool,
		/// Makes the credential push fail when set.
		pub fail_save_credential: bool,
		/// Makes the usage call fail when set.
		pub fail_usage: Arc<Mutex<bool>>,
		/// Bearer tokens the usage call was invoked with.
		pub seen_tokens: Arc<Mutex<Vec<String>>>,
		/// When set, each usage call waits for one permit before answering.
		pub usage_gate: Option<Arc<tokio::sync::Semaphore>>,
	}
	impl StubRpc {
		/// Creates a stub answering usage calls with `payload`.
		pub fn with_payload(payload: serde_json::Value) -> Self {
			let stub = Self::default();

			*stub.usage_payload.lock() = payload.to_string().into_bytes();

			stub
		}

		/// Holds every usage call until `gate` hands out a permit.
		pub fn with_usage_gate(mut self, gate: Arc<tokio::sync::Semaphore>) -> Self {
			self.usage_gate = Some(gate);

			self
		}
	}
	impl BackendRpc for StubRpc {
		fn heartbeat(&self) -> RpcFuture<'_, ()> {
			let fail = self.fail_heartbeat;

			Box::pin(async move {
				if fail {
					Err(crate::error::RpcError::Status { method: "GetStatus".into(), status: 503 }
						.into())
				} else {
					Ok(())
				}
			})
		}

		fn save_credential<'a>(
			&'a self,
			_token: &'a crate::auth::AccessToken,
			_auth: &'a crate::auth::AuthState,
		) -> RpcFuture<'a, ()> {
			let fail = self.fail_save_credential;

			Box::pin(async move {
				if fail {
					Err(crate::error::RpcError::Status {
						method: "SaveOAuthTokenInfo".into(),
						status: 500,
					}
					.into())
				} else {
					Ok(())
				}
			})
		}

		fn get_usage_status<'a>(
			&'a self,
			token: &'a crate::auth::AccessToken,
		) -> RpcFuture<'a, Vec<u8>> {
			Box::pin(async move {
				self.seen_tokens.lock().push(token.token.expose().to_owned());

				if let Some(gate) = &self.usage_gate {
					if let Ok(permit) = gate.acquire().await {
						permit.forget();
					}
				}
				if *self.fail_usage.lock() {
					return Err(crate::error::RpcError::Timeout {
						method: "GetUserStatus".into(),
					}
					.into());
				}

				Ok(self.usage_payload.lock().clone())
			})
		}
	}

	/// Connector handing out clones of one [`StubRpc`].
	#[derive(Clone, Debug, Default)]
	pub struct StubConnector(pub StubRpc);
	impl RpcConnector for StubConnector {
		type Client = StubRpc;

		fn connect(&self, _port: u16, _secret: &str) -> Result<Self::Client> {
			Ok(self.0.clone())
		}
	}

	/// Writes an executable shell script that swallows the handshake and then idles.
	///
	/// Each started process appends its PID to `<dir>/spawned`.
	#[cfg(unix)]
	pub fn write_stub_backend(dir: &Path) -> PathBuf {
		// std
		use std::os::unix::fs::PermissionsExt;

		let script = dir.join("stub-backend.sh");
		let log = dir.join("spawned");
		let body = format!(
			"#!/bin/sh\necho $$ >> '{}'\ncat > /dev/null\nexec sleep 30\n",
			log.display()
		);

		std::fs::write(&script, body).expect("Stub backend script should be writable.");
		std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
			.expect("Stub backend script should be made executable.");

		script
	}

	/// Waits until at least `count` stub backends have recorded their PIDs, then returns them.
	#[cfg(unix)]
	pub async fn wait_for_spawned(dir: &Path, count: usize) -> Vec<i32> {
		let log = dir.join("spawned");

		for _ in 0..100 {
			let pids: Vec<i32> = std::fs::read_to_string(&log)
				.unwrap_or_default()
				.lines()
				.filter_map(|line| line.trim().parse().ok())
				.collect();

			if pids.len() >= count {
				return pids;
			}

			tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		}

		panic!("Expected {count} stub backend(s) to start.");
	}

	/// Returns `true` while a process with `pid` exists.
	#[cfg(unix)]
	pub fn process_alive(pid: i32) -> bool {
		nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
	}

	/// Agent configuration pointing at `binary` with the periodic refresh disabled.
	pub fn test_agent_config(binary: PathBuf) -> AgentConfig {
		AgentConfig {
			refresh_interval: None,
			backend: BackendConfig { binary, ..BackendConfig::default() },
			..AgentConfig::default()
		}
	}

	/// Supervisor wired to a [`StubConnector`].
	pub fn build_stub_supervisor(
		binary: PathBuf,
		rpc: StubRpc,
	) -> BackendSupervisor<StubConnector> {
		BackendSupervisor::new(test_agent_config(binary).backend, StubConnector(rpc))
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
