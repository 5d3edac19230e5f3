//! Backend child-process handle: spawn, exit observation, graceful terminate, forced kill.

// std
use std::{process::Stdio, time::Duration as StdDuration};
// crates.io
use tokio::{
	process::{Child, ChildStdin, Command},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	backend::output,
	config::BackendConfig,
	error::BackendError,
};

const REAP_TIMEOUT: StdDuration = StdDuration::from_secs(2);

/// A running backend subprocess.
#[derive(Debug)]
pub struct BackendChild {
	child: Child,
	pid: Option<u32>,
	pumps: Vec<JoinHandle<()>>,
}
impl BackendChild {
	/// Spawns `config.binary` listening on `port` and guarded by `shared_secret`.
	///
	/// Standard input is piped for the handshake. Output is discarded unless `config.verbose`
	/// is set, in which case it is forwarded through [`output::pump`].
	pub fn spawn(config: &BackendConfig, port: u16, shared_secret: &str) -> Result<Self> {
		let mut command = Command::new(&config.binary);
		let output_stdio = || if config.verbose { Stdio::piped() } else { Stdio::null() };

		command
			.args(spawn_args(config, port, shared_secret))
			.envs(identity_env(config))
			.stdin(Stdio::piped())
			.stdout(output_stdio())
			.stderr(output_stdio())
			.kill_on_drop(true);

		let mut child = command
			.spawn()
			.map_err(|source| BackendError::Spawn { binary: config.binary.clone(), source })?;
		let pid = child.id();
		let mut pumps = Vec::new();

		if let Some(stdout) = child.stdout.take() {
			pumps.push(tokio::spawn(output::pump(stdout, "stdout")));
		}
		if let Some(stderr) = child.stderr.take() {
			pumps.push(tokio::spawn(output::pump(stderr, "stderr")));
		}

		tracing::info!(pid, port, binary = %config.binary.display(), "backend spawned");

		Ok(Self { child, pid, pumps })
	}

	/// OS process id captured at spawn.
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Takes the handshake pipe; `None` after the first call.
	pub fn take_stdin(&mut self) -> Option<ChildStdin> {
		self.child.stdin.take()
	}

	/// Returns a description of the exit status once the process has terminated.
	pub fn exit_status(&mut self) -> Option<String> {
		match self.child.try_wait() {
			Ok(Some(status)) => Some(status.to_string()),
			Ok(None) => None,
			Err(e) => Some(format!("status unavailable: {e}")),
		}
	}

	/// Sends SIGTERM (where supported), waits up to `grace`, then force-kills and reaps.
	pub async fn terminate(mut self, grace: StdDuration) {
		if self.exit_status().is_none() {
			self.signal_terminate();

			if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
				tracing::debug!(pid = self.pid, "backend ignored terminate; killing");

				if let Err(e) = self.child.start_kill() {
					tracing::warn!(pid = self.pid, error = %e, "failed to kill backend");
				}
				if tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await.is_err() {
					tracing::warn!(pid = self.pid, "backend did not exit after kill");
				}
			}
		}

		for pump in self.pumps.drain(..) {
			pump.abort();
		}

		tracing::info!(pid = self.pid, "backend stopped");
	}

	#[cfg(unix)]
	fn signal_terminate(&self) {
		// crates.io
		use nix::{
			sys::signal::{self, Signal},
			unistd::Pid,
		};

		let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
			return;
		};

		if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
			tracing::debug!(pid, error = %e, "SIGTERM delivery failed");
		}
	}

	#[cfg(not(unix))]
	fn signal_terminate(&mut self) {
		let _ = self.child.start_kill();
	}
}

/// Arguments passed to the backend binary.
pub fn spawn_args(config: &BackendConfig, port: u16, shared_secret: &str) -> Vec<String> {
	let flags = &config.flags;
	let mut args = vec![
		flags.port.clone(),
		port.to_string(),
		flags.shared_secret.clone(),
		shared_secret.to_owned(),
	];

	args.extend(flags.disable_companions.iter().cloned());

	if let Some(url) = &config.api_server_url {
		args.push(flags.api_server_url.clone());
		args.push(url.clone());
	}
	if let Some(dir) = &config.app_data_dir {
		args.push(flags.app_data_dir.clone());
		args.push(dir.display().to_string());
	}

	args.extend(config.extra_args.iter().cloned());

	args
}

/// Fixed environment describing the client identity.
pub fn identity_env(config: &BackendConfig) -> [(&'static str, String); 3] {
	let identity = &config.identity;

	[
		("QUOTA_AGENT_IDE_NAME", identity.ide_name.clone()),
		("QUOTA_AGENT_IDE_VERSION", identity.ide_version.clone()),
		("QUOTA_AGENT_LOCALE", identity.locale.clone()),
	]
}
