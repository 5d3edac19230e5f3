//! JSON-over-HTTPS unary client for the backend's RPC surface.

// crates.io
use reqwest::{
	StatusCode,
	header::{ACCEPT, CONTENT_TYPE},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, AuthState, TokenSecret},
	config::{ClientIdentity, RpcConfig},
	error::RpcError,
	rpc::{BackendRpc, PinnedCertVerifier, RpcFuture},
};

const JSON_CONTENT_TYPE: &str = "application/json";
const EMPTY_BODY: &[u8] = b"{}";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveCredentialRequest<'a> {
	token_info: TokenInfo<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenInfo<'a> {
	access_token: &'a str,
	token_type: &'a str,
	refresh_token: &'a str,
	#[serde(with = "time::serde::rfc3339")]
	expiry: OffsetDateTime,
}

#[derive(Serialize)]
struct UsageRequest<'a> {
	metadata: CallerMetadata<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallerMetadata<'a> {
	ide_name: &'a str,
	ide_version: &'a str,
	extension_name: &'a str,
	extension_version: &'a str,
	locale: &'a str,
	api_key: &'a str,
}

/// Backend client that trusts exactly one certificate.
///
/// Every call is `POST <base>/<service>/<method>` carrying the shared secret and protocol
/// version headers. Anything other than `200 OK` is a failure; partial bodies are never parsed.
#[derive(Clone)]
pub struct PinnedRpcClient {
	http: ReqwestClient,
	base_url: Url,
	config: Arc<RpcConfig>,
	identity: Arc<ClientIdentity>,
	shared_secret: TokenSecret,
	verifier: Option<Arc<PinnedCertVerifier>>,
}
impl PinnedRpcClient {
	/// Builds a client for `https://127.0.0.1:<port>/` that trusts only `verifier`'s pin.
	pub fn connect(
		config: Arc<RpcConfig>,
		identity: Arc<ClientIdentity>,
		verifier: Arc<PinnedCertVerifier>,
		port: u16,
		shared_secret: &str,
	) -> Result<Self> {
		let tls = rustls::ClientConfig::builder_with_provider(verifier.provider())
			.with_safe_default_protocol_versions()
			.map_err(|e| RpcError::ClientBuild { source: Box::new(e) })?
			.dangerous()
			.with_custom_certificate_verifier(verifier.clone())
			.with_no_client_auth();
		let http = ReqwestClient::builder()
			.use_preconfigured_tls(tls)
			.no_proxy()
			.timeout(config.timeout)
			.build()
			.map_err(|e| RpcError::ClientBuild { source: Box::new(e) })?;
		let base_url = Url::parse(&format!("https://127.0.0.1:{port}/"))
			.map_err(|e| RpcError::ClientBuild { source: Box::new(e) })?;

		Ok(Self {
			http,
			base_url,
			config,
			identity,
			shared_secret: TokenSecret::new(shared_secret),
			verifier: Some(verifier),
		})
	}

	/// Builds an unpinned client against an arbitrary base URL.
	///
	/// Used against plain-HTTP test servers; production connections go through
	/// [`connect`](Self::connect).
	pub fn with_base_url(
		base_url: Url,
		config: RpcConfig,
		identity: ClientIdentity,
		shared_secret: &str,
	) -> Result<Self> {
		let http = ReqwestClient::builder()
			.no_proxy()
			.timeout(config.timeout)
			.build()
			.map_err(|e| RpcError::ClientBuild { source: Box::new(e) })?;

		Ok(Self {
			http,
			base_url,
			config: Arc::new(config),
			identity: Arc::new(identity),
			shared_secret: TokenSecret::new(shared_secret),
			verifier: None,
		})
	}

	/// Base URL calls are issued against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Posts `body` to `method` and returns the raw response body.
	///
	/// An empty body is sent as `{}`.
	pub async fn call(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
		let url = self
			.base_url
			.join(&format!("{}/{method}", self.config.service))
			.map_err(|e| RpcError::Transport { method: method.into(), source: Box::new(e) })?;
		let body = if body.is_empty() { EMPTY_BODY.to_vec() } else { body };
		let mismatches = self.mismatch_count();
		let response = self
			.http
			.post(url)
			.header(CONTENT_TYPE, JSON_CONTENT_TYPE)
			.header(ACCEPT, JSON_CONTENT_TYPE)
			.header(self.config.protocol_header.as_str(), self.config.protocol_version.as_str())
			.header(self.config.secret_header.as_str(), self.shared_secret.expose())
			.body(body)
			.send()
			.await
			.map_err(|e| self.classify(method, mismatches, e))?;
		let status = response.status();

		tracing::debug!(method, status = status.as_u16(), "backend call completed");

		if status != StatusCode::OK {
			return Err(RpcError::Status { method: method.into(), status: status.as_u16() }.into());
		}

		let bytes = response.bytes().await.map_err(|e| self.classify(method, mismatches, e))?;

		Ok(bytes.to_vec())
	}

	fn mismatch_count(&self) -> u64 {
		self.verifier.as_ref().map_or(0, |verifier| verifier.mismatch_count())
	}

	fn classify(&self, method: &str, mismatches_before: u64, err: ReqwestError) -> Error {
		tracing::debug!(method, error = ?err, "backend call failed");

		if err.is_timeout() {
			return RpcError::Timeout { method: method.into() }.into();
		}
		if self.mismatch_count() > mismatches_before {
			return RpcError::PinMismatch.into();
		}

		RpcError::Transport { method: method.into(), source: Box::new(err) }.into()
	}

	fn encode<T>(method: &str, request: &T) -> Result<Vec<u8>>
	where
		T: Serialize,
	{
		serde_json::to_vec(request)
			.map_err(|e| RpcError::Transport { method: method.into(), source: Box::new(e) }.into())
	}
}
impl BackendRpc for PinnedRpcClient {
	fn heartbeat(&self) -> RpcFuture<'_, ()> {
		Box::pin(async move {
			self.call(&self.config.status_method, Vec::new()).await?;

			Ok(())
		})
	}

	fn save_credential<'a>(
		&'a self,
		token: &'a AccessToken,
		auth: &'a AuthState,
	) -> RpcFuture<'a, ()> {
		Box::pin(async move {
			let method = self.config.save_credential_method.as_str();
			let body = Self::encode(
				method,
				&SaveCredentialRequest {
					token_info: TokenInfo {
						access_token: token.token.expose(),
						token_type: &token.token_type,
						refresh_token: auth.refresh_token.expose(),
						expiry: token.expiry,
					},
				},
			)?;

			self.call(method, body).await?;

			Ok(())
		})
	}

	fn get_usage_status<'a>(&'a self, token: &'a AccessToken) -> RpcFuture<'a, Vec<u8>> {
		Box::pin(async move {
			let method = self.config.usage_method.as_str();
			let identity = &self.identity;
			let body = Self::encode(
				method,
				&UsageRequest {
					metadata: CallerMetadata {
						ide_name: &identity.ide_name,
						ide_version: &identity.ide_version,
						extension_name: &identity.extension_name,
						extension_version: &identity.extension_version,
						locale: &identity.locale,
						api_key: token.token.expose(),
					},
				},
			)?;

			self.call(method, body).await
		})
	}
}
impl Debug for PinnedRpcClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PinnedRpcClient")
			.field("base_url", &self.base_url.as_str())
			.field("service", &self.config.service)
			.field("shared_secret", &self.shared_secret)
			.field("pinned", &self.verifier.is_some())
			.finish()
	}
}
