#![cfg(unix)]

// std
use std::{path::Path, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
// self
use quota_agent::{
	_preludet::*,
	auth::AuthState,
	callback::BrowserLauncher,
	config::AgentConfig,
	error::AuthError,
	orchestrator::Orchestrator,
	store::{CredentialStore, MemoryVault},
};

const SIGN_IN_BODY: &str =
	r#"{"access_token":"A","refresh_token":"R","expires_in":3600,"token_type":"Bearer"}"#;

fn usage_payload() -> Value {
	json!({
		"userStatus": {
			"email": "dev@example.com",
			"planStatus": { "planInfo": { "planName": "Pro" } },
			"cascadeModelConfigData": {
				"clientModelConfigs": [
					{
						"label": "Model One",
						"modelOrAlias": { "model": "m1" },
						"quotaInfo": { "remainingFraction": 0.75, "resetTime": "2030-01-01T00:00:00Z" }
					},
					{
						"label": "Model Two",
						"modelOrAlias": { "model": "m2" },
						"quotaInfo": { "remainingFraction": 0 }
					}
				]
			}
		}
	})
}

fn stored(vault: &MemoryVault) -> CredentialStore {
	CredentialStore::new(Arc::new(vault.clone()))
}

/// Launcher that records the authorize URL and never answers it.
#[derive(Clone, Default)]
struct SilentBrowser {
	opened: Arc<Mutex<Vec<Url>>>,
}
impl BrowserLauncher for SilentBrowser {
	fn open(&self, url: &Url) -> std::io::Result<()> {
		self.opened.lock().push(url.clone());

		Ok(())
	}
}

async fn start_agent(
	server: &MockServer,
	dir: &Path,
	rpc: StubRpc,
	vault: &MemoryVault,
) -> Orchestrator {
	start_agent_with(
		server,
		test_agent_config(write_stub_backend(dir)),
		rpc,
		vault,
		RedirectingBrowser::answering("code-123"),
	)
	.await
}

async fn start_agent_with(
	server: &MockServer,
	config: AgentConfig,
	rpc: StubRpc,
	vault: &MemoryVault,
	browser: impl BrowserLauncher + 'static,
) -> Orchestrator {
	let authorizer = build_test_authorizer(test_descriptor(&server.base_url()), browser);

	Orchestrator::start(config, authorizer, stored(vault), move |_: &AgentConfig| {
		StubConnector(rpc.clone())
	})
	.await
}

fn ticking_config(dir: &Path, period: StdDuration) -> AgentConfig {
	AgentConfig { refresh_interval: Some(period), ..test_agent_config(write_stub_backend(dir)) }
}

async fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
	for _ in 0..200 {
		if ready() {
			return;
		}

		tokio::time::sleep(StdDuration::from_millis(50)).await;
	}

	panic!("Timed out waiting until {what}.");
}

fn fetch_count(rpc: &StubRpc) -> usize {
	rpc.seen_tokens.lock().len()
}

fn assert_fetched_with(rpc: &StubRpc, token: &str) {
	let seen = rpc.seen_tokens.lock();

	assert!(!seen.is_empty(), "The usage call should have run.");
	assert!(seen.iter().all(|seen| seen == token), "Unexpected tokens: {seen:?}.");
}

async fn mock_sign_in(server: &MockServer) -> httpmock::Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "authorization_code");
			then.status(200).header("content-type", "application/json").body(SIGN_IN_BODY);
		})
		.await
}

#[tokio::test]
async fn sign_in_publishes_the_first_snapshot() {
	let server = MockServer::start_async().await;
	let token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let rpc = StubRpc::with_payload(usage_payload());
	let vault = MemoryVault::default();
	let agent = start_agent(&server, dir.path(), rpc.clone(), &vault).await;

	assert!(!agent.state().signed_in);

	agent.sign_in().await.expect("Sign-in should succeed.");
	agent.refresh_now().await;

	let state = agent.state();
	let snapshot = state.snapshot.expect("A snapshot should be published.");

	assert!(state.signed_in);
	assert!(!state.refreshing);
	assert_eq!(state.last_error, None);
	assert_eq!(snapshot.account_label.as_deref(), Some("dev@example.com"));
	assert_eq!(snapshot.plan_label.as_deref(), Some("Pro"));
	assert_eq!(snapshot.items.len(), 2);
	assert_eq!(snapshot.items[0].remaining_percent, 75);
	assert!(!snapshot.items[0].is_exhausted);
	assert_eq!(snapshot.items[1].remaining_percent, 0);
	assert!(snapshot.items[1].is_exhausted);
	assert_fetched_with(&rpc, "A");

	let persisted = stored(&vault).load().await.expect("Credentials should be persisted.");

	assert_eq!(persisted.refresh_token.expose(), "R");

	token_mock.assert_async().await;
	agent.shutdown().await;
}

#[tokio::test]
async fn failed_credential_push_does_not_block_the_fetch() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let rpc = StubRpc { fail_save_credential: true, ..StubRpc::with_payload(usage_payload()) };
	let agent = start_agent(&server, dir.path(), rpc, &MemoryVault::default()).await;

	agent.sign_in().await.expect("Sign-in should succeed.");
	agent.refresh_now().await;

	let state = agent.state();

	assert!(state.snapshot.is_some());
	assert_eq!(state.last_error, None);

	agent.shutdown().await;
}

#[tokio::test]
async fn failed_fetch_clears_the_snapshot_until_the_next_success() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let rpc = StubRpc::with_payload(usage_payload());
	let agent = start_agent(&server, dir.path(), rpc.clone(), &MemoryVault::default()).await;

	agent.sign_in().await.expect("Sign-in should succeed.");
	agent.refresh_now().await;

	assert!(agent.state().snapshot.is_some());

	*rpc.fail_usage.lock() = true;

	agent.refresh_now().await;

	let state = agent.state();
	let error = state.last_error.expect("The failure should be published.");

	assert!(state.snapshot.is_none());
	assert!(state.signed_in);
	assert!(error.starts_with("Failed to fetch quota: "), "Unexpected error: {error}.");

	*rpc.fail_usage.lock() = false;

	agent.refresh_now().await;

	let state = agent.state();

	assert!(state.snapshot.is_some());
	assert_eq!(state.last_error, None);

	agent.shutdown().await;
}

#[tokio::test]
async fn sign_out_clears_state_credentials_and_the_backend() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let vault = MemoryVault::default();
	let agent =
		start_agent(&server, dir.path(), StubRpc::with_payload(usage_payload()), &vault).await;

	agent.sign_in().await.expect("Sign-in should succeed.");
	agent.refresh_now().await;

	let pid = wait_for_spawned(dir.path(), 1).await[0];

	assert!(process_alive(pid));

	agent.sign_out().await;

	let state = agent.state();

	assert!(!state.signed_in);
	assert!(state.snapshot.is_none());
	assert_eq!(state.last_error, None);
	assert!(stored(&vault).load().await.is_none());
	assert!(!process_alive(pid), "Sign-out must stop the backend.");

	agent.shutdown().await;
}

#[tokio::test]
async fn stored_credentials_resume_and_rotation_is_persisted() {
	let server = MockServer::start_async().await;
	let refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "R");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"A2","refresh_token":"R2","expires_in":3600,"token_type":"Bearer"}"#,
			);
		})
		.await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let vault = MemoryVault::default();

	stored(&vault)
		.save(&AuthState::new("R", "Bearer", OffsetDateTime::now_utc() - Duration::minutes(5)))
		.await;

	let rpc = StubRpc::with_payload(usage_payload());
	let agent = start_agent(&server, dir.path(), rpc.clone(), &vault).await;

	assert!(agent.state().signed_in, "Stored credentials should sign the agent in.");

	agent.refresh_now().await;

	assert!(agent.state().snapshot.is_some());
	assert_fetched_with(&rpc, "A2");

	let persisted = stored(&vault).load().await.expect("Credentials should remain stored.");

	assert_eq!(persisted.refresh_token.expose(), "R2");

	refresh_mock.assert_async().await;
	agent.shutdown().await;
}

#[tokio::test]
async fn selected_item_is_merged_into_published_snapshots() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let agent = start_agent(
		&server,
		dir.path(),
		StubRpc::with_payload(usage_payload()),
		&MemoryVault::default(),
	)
	.await;

	agent.set_selected_item_id(Some("m2".into())).await;
	agent.sign_in().await.expect("Sign-in should succeed.");
	agent.refresh_now().await;

	let snapshot = agent.state().snapshot.expect("A snapshot should be published.");

	assert_eq!(snapshot.selected_item_id.as_deref(), Some("m2"));
	assert_eq!(snapshot.selected_item().map(|item| item.label.as_str()), Some("Model Two"));

	agent.set_selected_item_id(None).await;

	let snapshot = agent.state().snapshot.expect("The snapshot should survive an unpin.");

	assert!(snapshot.selected_item().is_none());

	agent.shutdown().await;
}

#[tokio::test]
async fn failed_sign_in_is_reported_and_leaves_the_agent_signed_out() {
	let server = MockServer::start_async().await;
	let _token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_grant","error_description":"Bad code"}"#);
		})
		.await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let vault = MemoryVault::default();
	let agent = start_agent(&server, dir.path(), StubRpc::default(), &vault).await;

	agent.sign_in().await.expect_err("Sign-in should fail.");

	let state = agent.state();
	let error = state.last_error.expect("The failure should be published.");

	assert!(!state.signed_in);
	assert!(error.starts_with("Sign-in failed: "), "Unexpected error: {error}.");
	assert!(stored(&vault).load().await.is_none());

	agent.shutdown().await;
}

#[tokio::test]
async fn refresh_while_signed_out_does_nothing() {
	let server = MockServer::start_async().await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let rpc = StubRpc::with_payload(usage_payload());
	let agent = start_agent(&server, dir.path(), rpc.clone(), &MemoryVault::default()).await;

	agent.refresh_now().await;

	let state = agent.state();

	assert!(!state.signed_in);
	assert!(!state.refreshing);
	assert!(state.snapshot.is_none());
	assert!(rpc.seen_tokens.lock().is_empty());

	agent.shutdown().await;
}

#[tokio::test]
async fn periodic_ticker_refreshes_without_prompting() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let rpc = StubRpc::with_payload(usage_payload());
	let agent = start_agent_with(
		&server,
		ticking_config(dir.path(), StdDuration::from_millis(150)),
		rpc.clone(),
		&MemoryVault::default(),
		RedirectingBrowser::answering("code-123"),
	)
	.await;

	agent.sign_in().await.expect("Sign-in should succeed.");

	wait_until("the ticker has refreshed twice", || fetch_count(&rpc) >= 3).await;

	assert!(agent.state().signed_in);
	assert_fetched_with(&rpc, "A");

	agent.shutdown().await;
}

#[tokio::test]
async fn sign_out_cancels_the_ticker_and_the_refresh_in_flight() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let gate = Arc::new(Semaphore::new(0));
	let rpc = StubRpc::with_payload(usage_payload()).with_usage_gate(gate.clone());
	let vault = MemoryVault::default();
	let agent = start_agent_with(
		&server,
		ticking_config(dir.path(), StdDuration::from_millis(100)),
		rpc.clone(),
		&vault,
		RedirectingBrowser::answering("code-123"),
	)
	.await;

	agent.sign_in().await.expect("Sign-in should succeed.");

	wait_until("the usage call is pending", || fetch_count(&rpc) == 1).await;

	assert!(agent.state().refreshing);

	let joined = tokio::spawn({
		let agent = agent.clone();

		async move { agent.refresh_now().await }
	});

	tokio::time::sleep(StdDuration::from_millis(100)).await;
	agent.sign_out().await;
	tokio::time::timeout(StdDuration::from_secs(5), joined)
		.await
		.expect("A joined refresh should resolve on sign-out.")
		.expect("Refresh task should join.");

	let state = agent.state();

	assert!(!state.signed_in);
	assert!(!state.refreshing);
	assert!(state.snapshot.is_none());
	assert!(stored(&vault).load().await.is_none());

	gate.add_permits(16);
	tokio::time::sleep(StdDuration::from_millis(500)).await;

	let state = agent.state();

	assert_eq!(fetch_count(&rpc), 1, "No refresh may run after sign-out.");
	assert!(!state.signed_in);
	assert!(state.snapshot.is_none(), "A cancelled fetch must not publish a snapshot.");

	agent.shutdown().await;
}

#[tokio::test]
async fn second_sign_in_is_rejected_and_refresh_waits_for_the_first() {
	let server = MockServer::start_async().await;
	let _refresh_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").form_urlencoded_tuple("grant_type", "refresh_token");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"A2","expires_in":3600,"token_type":"Bearer"}"#);
		})
		.await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let vault = MemoryVault::default();

	stored(&vault)
		.save(&AuthState::new("R", "Bearer", OffsetDateTime::now_utc() - Duration::minutes(5)))
		.await;

	let rpc = StubRpc::with_payload(usage_payload());
	let browser = SilentBrowser::default();
	let agent = start_agent_with(
		&server,
		test_agent_config(write_stub_backend(dir.path())),
		rpc.clone(),
		&vault,
		browser.clone(),
	)
	.await;

	agent.refresh_now().await;

	let fetched = fetch_count(&rpc);

	assert!(fetched >= 1);

	let first = tokio::spawn({
		let agent = agent.clone();

		async move { agent.sign_in().await }
	});

	wait_until("the browser is opened", || !browser.opened.lock().is_empty()).await;

	let err = agent.sign_in().await.expect_err("A second sign-in must be rejected.");

	assert!(matches!(err, Error::Auth(AuthError::SignInInProgress)), "Unexpected error: {err:?}.");

	agent.refresh_now().await;

	assert_eq!(fetch_count(&rpc), fetched, "Refresh must not run during sign-in.");
	assert!(!agent.state().refreshing);

	agent.sign_out().await;

	let err = tokio::time::timeout(StdDuration::from_secs(5), first)
		.await
		.expect("The pending sign-in should resolve on sign-out.")
		.expect("Sign-in task should join.")
		.expect_err("The pending sign-in must be cancelled.");

	assert!(matches!(err, Error::Auth(AuthError::SignInCancelled)), "Unexpected error: {err:?}.");

	agent.shutdown().await;
}

#[tokio::test]
async fn changing_the_cadence_restarts_the_ticker() {
	let server = MockServer::start_async().await;
	let _token_mock = mock_sign_in(&server).await;
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let config = test_agent_config(write_stub_backend(dir.path()));
	let rpc = StubRpc::with_payload(usage_payload());
	let agent = start_agent_with(
		&server,
		config.clone(),
		rpc.clone(),
		&MemoryVault::default(),
		RedirectingBrowser::answering("code-123"),
	)
	.await;

	agent.sign_in().await.expect("Sign-in should succeed.");
	agent.refresh_now().await;

	let before = fetch_count(&rpc);

	agent
		.update_config(AgentConfig {
			refresh_interval: Some(StdDuration::from_millis(100)),
			..config.clone()
		})
		.await;

	wait_until("the new cadence has ticked", || fetch_count(&rpc) >= before + 2).await;

	agent.update_config(config).await;
	agent.refresh_now().await;

	let settled = fetch_count(&rpc);

	tokio::time::sleep(StdDuration::from_millis(500)).await;

	assert_eq!(fetch_count(&rpc), settled, "Disabling the cadence must stop the ticker.");

	agent.shutdown().await;
}
