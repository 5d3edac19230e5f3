//! Credential persistence.
//!
//! [`CredentialStore`] serializes [`AuthState`] as JSON into a [`CredentialVault`]. Reads treat
//! missing or corrupt data as "signed out"; write failures are logged and swallowed so the
//! in-memory session keeps working until the process exits.

pub mod file;
#[cfg(feature = "keyring")] pub mod keyring;
pub mod memory;

pub use file::FileVault;
#[cfg(feature = "keyring")] pub use keyring::KeyringVault;
pub use memory::MemoryVault;

// self
use crate::{_prelude::*, auth::AuthState};

/// Future returned by [`CredentialVault`] operations.
pub type VaultFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Raw storage slot holding one serialized credential blob.
pub trait CredentialVault
where
	Self: Send + Sync,
{
	/// Returns the stored blob, or `None` when nothing is stored.
	fn read(&self) -> VaultFuture<'_, Option<String>>;

	/// Replaces the stored blob.
	fn write<'a>(&'a self, blob: &'a str) -> VaultFuture<'a, ()>;

	/// Removes the stored blob; removing an absent blob succeeds.
	fn remove(&self) -> VaultFuture<'_, ()>;
}

/// Error type produced by [`CredentialVault`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the vault.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Sign-in state persistence over a [`CredentialVault`].
///
/// Calls are serialized through an internal lock so two overlapping callers in one process never
/// interleave a read with a write.
#[derive(Clone)]
pub struct CredentialStore {
	vault: Arc<dyn CredentialVault>,
	guard: Arc<AsyncMutex<()>>,
}
impl CredentialStore {
	/// Wraps `vault`.
	pub fn new(vault: Arc<dyn CredentialVault>) -> Self {
		Self { vault, guard: Default::default() }
	}

	/// Store backed by process memory only.
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryVault::default()))
	}

	/// Loads the persisted state; absent or undecodable data yields `None`.
	pub async fn load(&self) -> Option<AuthState> {
		let _guard = self.guard.lock().await;
		let blob = match self.vault.read().await {
			Ok(Some(blob)) => blob,
			Ok(None) => return None,
			Err(e) => {
				tracing::warn!(error = %e, "failed to read stored credentials");

				return None;
			},
		};

		match serde_json::from_str::<AuthState>(&blob) {
			Ok(state) if !state.refresh_token.is_blank() => Some(state),
			Ok(_) => {
				tracing::warn!("stored credentials carry a blank refresh token; ignoring them");

				None
			},
			Err(e) => {
				tracing::warn!(error = %e, "stored credentials are corrupt; ignoring them");

				None
			},
		}
	}

	/// Persists `state`; failures are logged, never returned.
	pub async fn save(&self, state: &AuthState) {
		let _guard = self.guard.lock().await;
		let blob = match serde_json::to_string(state) {
			Ok(blob) => blob,
			Err(e) => {
				tracing::error!(error = %e, "failed to serialize credentials");

				return;
			},
		};

		match self.vault.write(&blob).await {
			Ok(()) => tracing::debug!("credentials persisted"),
			Err(e) => tracing::error!(
				error = %e,
				"failed to persist credentials; sign-in will be required after restart"
			),
		}
	}

	/// Removes persisted credentials; best effort.
	pub async fn delete(&self) {
		let _guard = self.guard.lock().await;

		if let Err(e) = self.vault.remove().await {
			tracing::warn!(error = %e, "failed to delete stored credentials");
		}
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CredentialStore(..)")
	}
}

/// Runs synchronous vault I/O on the blocking pool.
pub(crate) async fn run_blocking<T, F>(op: F) -> Result<T, StoreError>
where
	T: 'static + Send,
	F: 'static + Send + FnOnce() -> Result<T, StoreError>,
{
	tokio::task::spawn_blocking(op)
		.await
		.map_err(|e| StoreError::Backend { message: format!("Storage task failed: {e}") })?
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	struct FailingVault;
	impl CredentialVault for FailingVault {
		fn read(&self) -> VaultFuture<'_, Option<String>> {
			Box::pin(async { Err(StoreError::Backend { message: "locked".into() }) })
		}

		fn write<'a>(&'a self, _blob: &'a str) -> VaultFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "read-only".into() }) })
		}

		fn remove(&self) -> VaultFuture<'_, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "read-only".into() }) })
		}
	}

	fn state() -> AuthState {
		AuthState::new("1//refresh", "Bearer", datetime!(2026-05-01 13:00 UTC))
	}

	#[tokio::test]
	async fn save_load_delete_cycle() {
		let store = CredentialStore::in_memory();

		assert!(store.load().await.is_none());

		store.save(&state()).await;

		assert_eq!(store.load().await, Some(state()));

		store.delete().await;
		store.delete().await;

		assert!(store.load().await.is_none());
	}

	#[tokio::test]
	async fn corrupt_blobs_read_as_signed_out() {
		let vault = Arc::new(MemoryVault::default());
		let store = CredentialStore::new(vault.clone());

		vault.write("{not json").await.expect("Memory vault writes cannot fail.");

		assert!(store.load().await.is_none());
	}

	#[tokio::test]
	async fn vault_io_leaves_the_runtime_thread() {
		let caller = std::thread::current().id();
		let worker = run_blocking(|| Ok(std::thread::current().id()))
			.await
			.expect("Blocking task should complete.");

		assert_ne!(worker, caller);
	}

	#[tokio::test]
	async fn vault_failures_are_swallowed() {
		let store = CredentialStore::new(Arc::new(FailingVault));

		store.save(&state()).await;
		store.delete().await;

		assert!(store.load().await.is_none());
	}

	#[test]
	fn persisted_form_holds_only_refresh_metadata() {
		let blob = serde_json::to_value(state()).expect("State should serialize.");
		let mut keys: Vec<_> =
			blob.as_object().expect("State serializes as an object.").keys().cloned().collect();

		keys.sort();

		assert_eq!(keys, ["access_token_expiry", "refresh_token", "token_type"]);
	}
}
