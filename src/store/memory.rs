//! Process-local [`CredentialVault`] used by tests and `--no-persist` runs.

// self
use crate::{
	_prelude::*,
	store::{CredentialVault, VaultFuture},
};

/// Vault that keeps the blob in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryVault(Arc<RwLock<Option<String>>>);
impl CredentialVault for MemoryVault {
	fn read(&self) -> VaultFuture<'_, Option<String>> {
		Box::pin(async move { Ok(self.0.read().clone()) })
	}

	fn write<'a>(&'a self, blob: &'a str) -> VaultFuture<'a, ()> {
		Box::pin(async move {
			*self.0.write() = Some(blob.to_owned());

			Ok(())
		})
	}

	fn remove(&self) -> VaultFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().take();

			Ok(())
		})
	}
}
