//! OS keyring [`CredentialVault`] (Keychain, Credential Manager, Secret Service).

// self
use crate::{
	_prelude::*,
	store::{self, CredentialVault, StoreError, VaultFuture},
};

/// Keyring service name used when none is supplied.
pub const DEFAULT_SERVICE: &str = "quota-agent";

/// Stores the credential blob as a single keyring entry.
#[derive(Clone, Debug)]
pub struct KeyringVault {
	service: String,
	account: String,
}
impl KeyringVault {
	/// Creates a vault addressing `service`/`account`.
	pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
		Self { service: service.into(), account: account.into() }
	}

	fn entry(&self) -> Result<keyring::Entry, StoreError> {
		keyring::Entry::new(&self.service, &self.account).map_err(backend_error)
	}
}
impl CredentialVault for KeyringVault {
	fn read(&self) -> VaultFuture<'_, Option<String>> {
		let vault = self.clone();

		Box::pin(store::run_blocking(move || match vault.entry()?.get_password() {
			Ok(blob) => Ok(Some(blob)),
			Err(keyring::Error::NoEntry) => Ok(None),
			Err(e) => Err(backend_error(e)),
		}))
	}

	fn write<'a>(&'a self, blob: &'a str) -> VaultFuture<'a, ()> {
		let vault = self.clone();
		let blob = blob.to_owned();

		Box::pin(store::run_blocking(move || {
			vault.entry()?.set_password(&blob).map_err(backend_error)
		}))
	}

	fn remove(&self) -> VaultFuture<'_, ()> {
		let vault = self.clone();

		Box::pin(store::run_blocking(move || match vault.entry()?.delete_credential() {
			Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
			Err(e) => Err(backend_error(e)),
		}))
	}
}

fn backend_error(e: keyring::Error) -> StoreError {
	StoreError::Backend { message: format!("Keyring access failed: {e}") }
}
