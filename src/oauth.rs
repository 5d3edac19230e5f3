//! Token-endpoint envelope: deterministic form bodies, transport dispatch, and response
//! classification.

// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError, HttpRequest,
	http::{
		Method,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
// self
use crate::{
	_prelude::*,
	error::{AuthError, ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{GrantType, ProviderDescriptor},
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Maps HTTP transport failures into agent [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an agent error.
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(grant, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => TransientError::TokenEndpoint {
				message: format!("HTTP client error during {grant}: {message}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
			_ => TransientError::TokenEndpoint {
				message: format!("HTTP client error during {grant}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			}
			.into(),
		}
	}
}

/// Raw token-endpoint response fields consumed by the flows.
#[derive(Clone, Default, Deserialize)]
pub struct TokenEndpointResponse {
	/// Issued access token.
	pub access_token: Option<String>,
	/// Token type, usually `Bearer`.
	pub token_type: Option<String>,
	/// Lifetime of the access token in seconds.
	pub expires_in: Option<i64>,
	/// Issued (or rotated) refresh token.
	pub refresh_token: Option<String>,
	/// OAuth error code.
	pub error: Option<String>,
	/// Human-readable error detail.
	pub error_description: Option<String>,
}
impl Debug for TokenEndpointResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenEndpointResponse")
			.field("access_token_set", &self.access_token.is_some())
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("refresh_token_set", &self.refresh_token.is_some())
			.field("error", &self.error)
			.field("error_description", &self.error_description)
			.finish()
	}
}

/// Serializes `params` as `application/x-www-form-urlencoded` in key order.
pub fn form_body(params: &BTreeMap<&str, &str>) -> String {
	url::form_urlencoded::Serializer::new(String::new()).extend_pairs(params).finish()
}

/// Issues token requests for one provider through a [`TokenHttpClient`].
pub(crate) struct TokenEndpoint<'a, C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) descriptor: &'a ProviderDescriptor,
	pub(crate) http_client: &'a C,
	pub(crate) mapper: &'a M,
}
impl<C, M> TokenEndpoint<'_, C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// `grant_type=authorization_code` with the PKCE verifier.
	pub(crate) async fn exchange_code(
		&self,
		code: &str,
		code_verifier: &str,
		redirect_uri: &Url,
	) -> Result<TokenEndpointResponse> {
		let mut params = self.client_params(GrantType::AuthorizationCode);

		params.insert("code", code);
		params.insert("code_verifier", code_verifier);
		params.insert("redirect_uri", redirect_uri.as_str());

		self.post(GrantType::AuthorizationCode, &params).await
	}

	/// `grant_type=refresh_token`.
	pub(crate) async fn refresh(&self, refresh_token: &str) -> Result<TokenEndpointResponse> {
		let mut params = self.client_params(GrantType::RefreshToken);

		params.insert("refresh_token", refresh_token);

		self.post(GrantType::RefreshToken, &params).await
	}

	fn client_params(&self, grant: GrantType) -> BTreeMap<&str, &str> {
		let mut params = BTreeMap::new();

		params.insert("client_id", self.descriptor.client_id.as_str());
		params.insert("grant_type", grant.as_str());

		if let Some(secret) = self.descriptor.client_secret.as_deref() {
			params.insert("client_secret", secret);
		}

		params
	}

	async fn post(
		&self,
		grant: GrantType,
		params: &BTreeMap<&str, &str>,
	) -> Result<TokenEndpointResponse> {
		let request: HttpRequest = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(self.descriptor.endpoints.token.as_str())
			.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
			.header(ACCEPT, JSON_CONTENT_TYPE)
			.body(form_body(params).into_bytes())
			.map_err(ConfigError::from)?;
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());
		let response = handle
			.call(request)
			.await
			.map_err(|e| self.mapper.map_transport_error(grant, slot.take().as_ref(), e))?;
		let meta = slot.take();

		tracing::debug!(%grant, status = response.status().as_u16(), "token endpoint responded");

		classify_response(response.status().is_success(), response.body(), meta.as_ref())
	}
}

/// Classifies a token-endpoint body; provider `error` fields win over HTTP status.
pub(crate) fn classify_response(
	success: bool,
	body: &[u8],
	meta: Option<&ResponseMetadata>,
) -> Result<TokenEndpointResponse> {
	let mut deserializer = serde_json::Deserializer::from_slice(body);
	let parsed: Result<TokenEndpointResponse, _> =
		serde_path_to_error::deserialize(&mut deserializer);

	match parsed {
		Ok(response) => {
			if let Some(error) = response.error.as_deref() {
				let message = match response.error_description.as_deref() {
					Some(description) if !description.is_empty() => format!("{error}: {description}"),
					_ => error.to_owned(),
				};

				return Err(AuthError::RemoteError { message }.into());
			}
			if !success {
				return Err(TransientError::TokenEndpoint {
					message: "non-success status without an error field".into(),
					status: meta_status(meta),
					retry_after: meta_retry_after(meta),
				}
				.into());
			}

			Ok(response)
		},
		Err(source) if success =>
			Err(TransientError::TokenResponseParse { source, status: meta_status(meta) }.into()),
		Err(_) => Err(TransientError::TokenEndpoint {
			message: "non-success status with an unreadable body".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into()),
	}
}

fn map_reqwest_error(grant: GrantType, meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: format!("request timed out during {grant}"),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
