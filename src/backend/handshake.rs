//! Standard-input handshake written once to a freshly spawned backend.

// crates.io
use prost::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};
// self
use crate::{_prelude::*, auth::TokenSecret, config::ClientIdentity, error::BackendError};

/// Identity fields plus the bearer key, encoded as protobuf (tag + length-prefixed fields).
#[derive(Clone, PartialEq, Message)]
#[prost(skip_debug)]
pub struct Handshake {
	/// Bearer API key the backend uses upstream.
	#[prost(string, tag = "1")]
	pub api_key: String,
	/// Host application name.
	#[prost(string, tag = "2")]
	pub ide_name: String,
	/// Host application version.
	#[prost(string, tag = "3")]
	pub ide_version: String,
	/// Extension name.
	#[prost(string, tag = "4")]
	pub extension_name: String,
	/// Extension version.
	#[prost(string, tag = "5")]
	pub extension_version: String,
	/// Locale.
	#[prost(string, tag = "6")]
	pub locale: String,
}
impl Handshake {
	/// Builds the handshake for `identity` carrying `api_key`.
	pub fn new(identity: &ClientIdentity, api_key: &TokenSecret) -> Self {
		Self {
			api_key: api_key.expose().to_owned(),
			ide_name: identity.ide_name.clone(),
			ide_version: identity.ide_version.clone(),
			extension_name: identity.extension_name.clone(),
			extension_version: identity.extension_version.clone(),
			locale: identity.locale.clone(),
		}
	}

	/// Writes the encoded message to `stdin`, then shuts the pipe down.
	pub async fn write_to<W>(&self, mut stdin: W) -> Result<()>
	where
		W: AsyncWrite + Unpin,
	{
		let bytes = self.encode_to_vec();

		stdin.write_all(&bytes).await.map_err(|source| BackendError::Handshake { source })?;
		stdin.shutdown().await.map_err(|source| BackendError::Handshake { source })?;

		Ok(())
	}
}
impl Debug for Handshake {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Handshake")
			.field("api_key", &"<redacted>")
			.field("ide_name", &self.ide_name)
			.field("ide_version", &self.ide_version)
			.field("extension_name", &self.extension_name)
			.field("extension_version", &self.extension_version)
			.field("locale", &self.locale)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn handshake_is_written_once_and_decodes() {
		let handshake = Handshake::new(&ClientIdentity::default(), &TokenSecret::new("ya29.key"));
		let mut sink = Vec::new();

		handshake.write_to(&mut sink).await.expect("Writing into a Vec cannot fail.");

		let decoded = Handshake::decode(sink.as_slice()).expect("Handshake should decode.");

		assert_eq!(decoded.api_key, "ya29.key");
		assert_eq!(decoded.ide_name, "quota-agent");
		assert_eq!(sink[0], 0x0A, "First field should be tag 1, length-delimited.");
		assert!(!format!("{handshake:?}").contains("ya29"));
	}
}
