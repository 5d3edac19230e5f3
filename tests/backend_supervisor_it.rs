#![cfg(unix)]

// std
use std::{path::PathBuf, time::Duration as StdDuration};
// self
use quota_agent::{
	_preludet::*,
	auth::TokenSecret,
	backend::{BackendSupervisor, SupervisorState},
	config::BackendConfig,
	error::BackendError,
};

#[tokio::test]
async fn same_api_key_reuses_the_running_backend() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let mut supervisor =
		build_stub_supervisor(write_stub_backend(dir.path()), StubRpc::default());
	let key = TokenSecret::new("ya29.first");
	let first = supervisor.ensure_running(&key).await.expect("Backend should start.");
	let pid = supervisor.pid().expect("A running backend has a PID.");
	let second = supervisor.ensure_running(&key).await.expect("Backend should be reused.");

	assert_eq!(first.port, second.port);
	assert_eq!(first.shared_secret, second.shared_secret);
	assert_eq!(supervisor.pid(), Some(pid));
	assert_eq!(supervisor.state(), &SupervisorState::Ready);

	tokio::time::sleep(StdDuration::from_millis(200)).await;

	assert_eq!(wait_for_spawned(dir.path(), 1).await.len(), 1, "Only one process may start.");

	supervisor.stop().await;

	assert_eq!(supervisor.state(), &SupervisorState::Stopped);
	assert!(!process_alive(pid as i32));
}

#[tokio::test]
async fn new_api_key_stops_the_old_backend_before_starting_another() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let mut supervisor =
		build_stub_supervisor(write_stub_backend(dir.path()), StubRpc::default());
	let first = supervisor
		.ensure_running(&TokenSecret::new("ya29.first"))
		.await
		.expect("First backend should start.");
	let old_pid = supervisor.pid().expect("A running backend has a PID.") as i32;
	let second = supervisor
		.ensure_running(&TokenSecret::new("ya29.second"))
		.await
		.expect("Second backend should start.");
	let new_pid = supervisor.pid().expect("A running backend has a PID.") as i32;

	assert_ne!(old_pid, new_pid);
	assert_ne!(first.shared_secret, second.shared_secret);
	assert!(!process_alive(old_pid), "The first backend must be gone.");
	assert!(process_alive(new_pid));
	assert_eq!(wait_for_spawned(dir.path(), 2).await, vec![old_pid, new_pid]);

	supervisor.stop().await;
}

#[tokio::test]
async fn exited_backend_is_reported_as_crashed_and_restarted() {
	// crates.io
	use nix::{
		sys::signal::{self, Signal},
		unistd::Pid,
	};

	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let mut supervisor =
		build_stub_supervisor(write_stub_backend(dir.path()), StubRpc::default());
	let key = TokenSecret::new("ya29.first");

	supervisor.ensure_running(&key).await.expect("Backend should start.");

	let pid = supervisor.pid().expect("A running backend has a PID.") as i32;

	signal::kill(Pid::from_raw(pid), Signal::SIGKILL).expect("The stub should be killable.");

	let mut crashed = false;

	for _ in 0..100 {
		if matches!(supervisor.state(), SupervisorState::Crashed { .. }) {
			crashed = true;

			break;
		}

		tokio::time::sleep(StdDuration::from_millis(20)).await;
	}

	assert!(crashed, "A killed backend should be observed as crashed.");
	assert_eq!(supervisor.pid(), None);

	supervisor.ensure_running(&key).await.expect("A crashed backend should be restarted.");

	assert_eq!(supervisor.state(), &SupervisorState::Ready);
	assert_ne!(supervisor.pid(), Some(pid as u32));

	supervisor.stop().await;
}

#[tokio::test]
async fn backend_that_never_answers_fails_to_start_and_is_terminated() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let config = BackendConfig {
		binary: write_stub_backend(dir.path()),
		ready_attempts: 3,
		ready_interval: StdDuration::from_millis(10),
		..BackendConfig::default()
	};
	let rpc = StubRpc { fail_heartbeat: true, ..StubRpc::default() };
	let mut supervisor = BackendSupervisor::new(config, StubConnector(rpc));
	let err = supervisor
		.ensure_running(&TokenSecret::new("ya29.first"))
		.await
		.expect_err("A silent backend must fail to start.");

	match &err {
		Error::Backend(BackendError::FailedToStart { last_error, .. }) =>
			assert!(last_error.contains("503"), "Unexpected last error: {last_error}."),
		other => panic!("Unexpected error: {other:?}."),
	}

	assert!(err.is_backend_unreachable());
	assert_eq!(supervisor.state(), &SupervisorState::Stopped);
	assert_eq!(supervisor.pid(), None);

	let pids = wait_for_spawned(dir.path(), 1).await;

	assert!(!process_alive(pids[0]), "A backend that failed to start must be terminated.");
}

#[tokio::test]
async fn missing_binary_is_reported_as_not_installed() {
	let mut supervisor = build_stub_supervisor(
		PathBuf::from("/nonexistent/quota-agent-backend"),
		StubRpc::default(),
	);
	let err = supervisor
		.ensure_running(&TokenSecret::new("ya29.first"))
		.await
		.expect_err("A missing binary must fail.");

	assert!(matches!(err, Error::Backend(BackendError::Spawn { .. })));
	assert!(err.user_message().starts_with("Backend is not installed."));
	assert_eq!(supervisor.state(), &SupervisorState::Stopped);
}

#[tokio::test]
async fn stop_is_idempotent() {
	let dir = tempfile::tempdir().expect("Temporary directory should be created.");
	let mut supervisor =
		build_stub_supervisor(write_stub_backend(dir.path()), StubRpc::default());

	supervisor.stop().await;
	supervisor.stop().await;

	assert_eq!(supervisor.state(), &SupervisorState::Stopped);
	assert_eq!(supervisor.pid(), None);
}
