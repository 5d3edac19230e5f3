//! `quota-agent` command-line entry point.

// std
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration as StdDuration};
// crates.io
use clap::{Parser, Subcommand, ValueEnum};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;
// self
use quota_agent::{
	config::{AgentConfig, BackendConfig, RpcConfig},
	flows::ReqwestAuthorizer,
	orchestrator::{AgentState, Orchestrator},
	provider::ProviderDescriptor,
	quota,
	store::{CredentialStore, CredentialVault, FileVault, MemoryVault},
};

#[derive(Debug, Parser)]
#[command(name = "quota-agent", version, about = "Sign in and report usage quotas.")]
struct Cli {
	/// OAuth client identifier.
	#[arg(long, env = "QUOTA_AGENT_CLIENT_ID")]
	client_id: String,
	/// OAuth client secret.
	#[arg(long, env = "QUOTA_AGENT_CLIENT_SECRET", hide_env_values = true)]
	client_secret: String,
	/// Backend executable.
	#[arg(long, env = "QUOTA_AGENT_BACKEND_BIN", default_value = "language_server")]
	backend_bin: PathBuf,
	/// Pinned backend certificate; defaults to `cert.pem` beside the backend executable.
	#[arg(long, env = "QUOTA_AGENT_CERT")]
	cert: Option<PathBuf>,
	/// Upstream API endpoint handed to the backend.
	#[arg(long)]
	api_server_url: Option<String>,
	/// Data directory handed to the backend.
	#[arg(long)]
	app_data_dir: Option<PathBuf>,
	/// Seconds between periodic refreshes; 0 refreshes only on demand.
	#[arg(long, default_value_t = 300)]
	refresh_secs: u64,
	/// Seconds to wait for the browser redirect.
	#[arg(long, default_value_t = 180)]
	callback_timeout_secs: u64,
	/// Where credentials are persisted; the OS keyring unless built without it.
	#[arg(long, value_enum, default_value_t = StoreKind::default())]
	store: StoreKind,
	/// Credential file used by `--store file`.
	#[arg(long, env = "QUOTA_AGENT_CREDENTIALS")]
	credentials: Option<PathBuf>,
	/// Keep credentials in memory only.
	#[arg(long)]
	no_persist: bool,
	/// Forward redacted backend output to the log.
	#[arg(long)]
	verbose_backend: bool,
	#[command(subcommand)]
	command: Command,
}
impl Cli {
	fn agent_config(&self) -> AgentConfig {
		AgentConfig {
			refresh_interval: Some(StdDuration::from_secs(self.refresh_secs))
				.filter(|interval| !interval.is_zero()),
			backend: BackendConfig {
				binary: self.backend_bin.clone(),
				api_server_url: self.api_server_url.clone(),
				app_data_dir: self.app_data_dir.clone(),
				verbose: self.verbose_backend,
				..BackendConfig::default()
			},
			rpc: RpcConfig { cert_path: self.cert.clone(), ..RpcConfig::default() },
			callback_timeout: StdDuration::from_secs(self.callback_timeout_secs),
		}
	}

	fn credential_store(&self) -> CredentialStore {
		if self.no_persist {
			return CredentialStore::new(Arc::new(MemoryVault::default()));
		}

		let vault: Arc<dyn CredentialVault> = match self.store {
			StoreKind::File => {
				let path = self.credentials.clone().unwrap_or_else(|| {
					dirs::config_dir().unwrap_or_default().join("quota-agent").join("credentials.json")
				});

				Arc::new(FileVault::new(path))
			},
			#[cfg(feature = "keyring")]
			StoreKind::Keyring => Arc::new(quota_agent::store::KeyringVault::new(
				quota_agent::store::keyring::DEFAULT_SERVICE,
				&self.client_id,
			)),
		};

		CredentialStore::new(vault)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
	/// JSON file readable only by the current user.
	File,
	/// Operating-system keyring.
	#[cfg(feature = "keyring")]
	Keyring,
}
impl Default for StoreKind {
	fn default() -> Self {
		#[cfg(feature = "keyring")]
		{
			Self::Keyring
		}
		#[cfg(not(feature = "keyring"))]
		{
			Self::File
		}
	}
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Open the browser, sign in, and print the first snapshot.
	SignIn,
	/// Delete stored credentials.
	SignOut,
	/// Refresh once and print the snapshot.
	Status,
	/// Keep refreshing and print every change until interrupted.
	Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	let descriptor = match ProviderDescriptor::google(&cli.client_id, &cli.client_secret) {
		Ok(descriptor) => descriptor,
		Err(e) => {
			tracing::error!(error = %e, "invalid provider configuration");

			return ExitCode::FAILURE;
		},
	};
	let agent = Orchestrator::start_pinned(
		cli.agent_config(),
		ReqwestAuthorizer::new(descriptor),
		cli.credential_store(),
	)
	.await;
	let code = run(&cli.command, &agent).await;

	agent.shutdown().await;

	code
}

async fn run(command: &Command, agent: &Orchestrator) -> ExitCode {
	match command {
		Command::SignIn => {
			if let Err(e) = agent.sign_in().await {
				eprintln!("Sign-in failed: {}", e.user_message());

				return ExitCode::FAILURE;
			}

			agent.refresh_now().await;

			report(&agent.state())
		},
		Command::SignOut => {
			agent.sign_out().await;

			println!("Signed out.");

			ExitCode::SUCCESS
		},
		Command::Status => {
			agent.refresh_now().await;

			report(&agent.state())
		},
		Command::Watch => watch(agent).await,
	}
}

async fn watch(agent: &Orchestrator) -> ExitCode {
	let mut updates = agent.subscribe();

	report(&updates.borrow_and_update());

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => return ExitCode::SUCCESS,
			changed = updates.changed() => {
				if changed.is_err() {
					return ExitCode::FAILURE;
				}

				let state = updates.borrow_and_update().clone();

				if !state.refreshing {
					report(&state);
				}
			},
		}
	}
}

fn report(state: &AgentState) -> ExitCode {
	if !state.signed_in {
		println!("Not signed in. Run `quota-agent sign-in`.");

		return ExitCode::FAILURE;
	}
	if let Some(error) = &state.last_error {
		println!("{error}");

		return ExitCode::FAILURE;
	}

	let Some(snapshot) = &state.snapshot else {
		println!("No quota data yet.");

		return ExitCode::SUCCESS;
	};
	let now = OffsetDateTime::now_utc();
	let account = snapshot.account_label.as_deref().unwrap_or("unknown account");

	match &snapshot.plan_label {
		Some(plan) => println!("{account} ({plan})"),
		None => println!("{account}"),
	}

	for item in &snapshot.items {
		let pinned = snapshot.selected_item_id.as_deref() == Some(item.id.as_str());
		let pin = if pinned { '*' } else { ' ' };
		let reset = item
			.reset_at
			.map(|reset_at| format!(", resets in {}", quota::format_reset(reset_at, now)))
			.unwrap_or_default();

		println!("{pin} {:<40} {:>3}% left{reset}", item.label, item.remaining_percent);
	}

	ExitCode::SUCCESS
}
