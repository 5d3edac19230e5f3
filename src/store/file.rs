//! File-backed [`CredentialVault`] with owner-only permissions.

// std
use std::{
	fs::{self, OpenOptions},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{self, CredentialVault, StoreError, VaultFuture},
};

/// Writes the credential blob to a single file, replacing it atomically on every save.
#[derive(Clone, Debug)]
pub struct FileVault {
	path: PathBuf,
}
impl FileVault {
	/// Creates a vault rooted at `path`; the file is created lazily.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Location of the credential file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn ensure_parent_exists(&self) -> Result<(), StoreError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create credential directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn load(&self) -> Result<Option<String>, StoreError> {
		match fs::read_to_string(&self.path) {
			Ok(blob) if blob.trim().is_empty() => Ok(None),
			Ok(blob) => Ok(Some(blob)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to read {}: {e}", self.path.display()),
			}),
		}
	}

	fn persist(&self, blob: &str) -> Result<(), StoreError> {
		self.ensure_parent_exists()?;

		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut options = OpenOptions::new();

			options.write(true).create(true).truncate(true);

			#[cfg(unix)]
			{
				// std
				use std::os::unix::fs::OpenOptionsExt;

				options.mode(0o600);
			}

			let mut file = options.open(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(blob.as_bytes()).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn unlink(&self) -> Result<(), StoreError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to remove {}: {e}", self.path.display()),
			}),
		}
	}
}
impl CredentialVault for FileVault {
	fn read(&self) -> VaultFuture<'_, Option<String>> {
		let vault = self.clone();

		Box::pin(store::run_blocking(move || vault.load()))
	}

	fn write<'a>(&'a self, blob: &'a str) -> VaultFuture<'a, ()> {
		let vault = self.clone();
		let blob = blob.to_owned();

		Box::pin(store::run_blocking(move || vault.persist(&blob)))
	}

	fn remove(&self) -> VaultFuture<'_, ()> {
		let vault = self.clone();

		Box::pin(store::run_blocking(move || vault.unlink()))
	}
}
