// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
// self
use quota_agent::{_preludet::*, callback::BrowserLauncher, error::AuthError};

const TOKEN_BODY: &str =
	r#"{"access_token":"A","refresh_token":"R","expires_in":3600,"token_type":"Bearer"}"#;

struct SilentBrowser;
impl BrowserLauncher for SilentBrowser {
	fn open(&self, _url: &Url) -> std::io::Result<()> {
		Ok(())
	}
}

#[tokio::test]
async fn sign_in_exchanges_the_callback_code_for_tokens() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", "authorization_code")
				.form_urlencoded_tuple("code", "code-123")
				.form_urlencoded_tuple("client_id", TEST_CLIENT_ID)
				.form_urlencoded_tuple("client_secret", TEST_CLIENT_SECRET);
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let browser = RedirectingBrowser::answering("code-123");
	let authorizer = build_test_authorizer(test_descriptor(&server.base_url()), browser.clone());
	let signed = authorizer.sign_in().await.expect("Sign-in should succeed.");

	mock.assert_async().await;

	assert_eq!(signed.access_token.token.expose(), "A");
	assert_eq!(signed.auth.refresh_token.expose(), "R");
	assert_eq!(signed.auth.token_type, "Bearer");
	assert_eq!(signed.auth.access_token_expiry, signed.access_token.expiry);

	let remaining = signed.auth.access_token_expiry - OffsetDateTime::now_utc();

	assert!(remaining > Duration::minutes(59) && remaining <= Duration::hours(1));

	let opened = browser.opened.lock().clone();

	assert_eq!(opened.len(), 1, "The authorization URL should be opened exactly once.");
	assert!(opened[0].as_str().starts_with(&format!("{}/authorize?", server.base_url())));

	let pairs: HashMap<String, String> = opened[0].query_pairs().into_owned().collect();

	assert_eq!(pairs["client_id"], TEST_CLIENT_ID);
	assert_eq!(pairs["response_type"], "code");
	assert_eq!(pairs["scope"], "email openid");
	assert_eq!(pairs["code_challenge_method"], "S256");
	assert_eq!(pairs["code_challenge"].len(), 43);
	assert_eq!(pairs["access_type"], "offline");
	assert_eq!(pairs["prompt"], "consent");
	assert!(pairs["redirect_uri"].starts_with("http://127.0.0.1:"));
	assert!(pairs["redirect_uri"].ends_with("/oauth-callback"));
}

#[tokio::test]
async fn forged_state_is_rejected_before_any_exchange() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let browser = RedirectingBrowser::answering("code-123").with_forged_state("forged");
	let authorizer = build_test_authorizer(test_descriptor(&server.base_url()), browser);
	let err = authorizer.sign_in().await.expect_err("A forged state must fail the sign-in.");

	assert!(matches!(err, Error::Auth(AuthError::CallbackRejected { .. })));

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn missing_refresh_token_means_offline_access_was_not_granted() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"A","expires_in":3600,"token_type":"Bearer"}"#);
		})
		.await;
	let authorizer = build_test_authorizer(
		test_descriptor(&server.base_url()),
		RedirectingBrowser::answering("code-123"),
	);
	let err = authorizer.sign_in().await.expect_err("Sign-in without a refresh token must fail.");

	assert!(matches!(err, Error::Auth(AuthError::MissingRefreshToken)));

	mock.assert_async().await;
}

#[tokio::test]
async fn provider_errors_on_exchange_are_classified() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_grant","error_description":"Bad code"}"#);
		})
		.await;
	let authorizer = build_test_authorizer(
		test_descriptor(&server.base_url()),
		RedirectingBrowser::answering("code-123"),
	);
	let err = authorizer.sign_in().await.expect_err("A provider error must fail the sign-in.");

	assert!(matches!(
		err,
		Error::Auth(AuthError::RemoteError { ref message }) if message == "invalid_grant: Bad code"
	));

	mock.assert_async().await;
}

#[tokio::test]
async fn sign_in_times_out_when_the_browser_never_redirects() {
	let server = MockServer::start_async().await;
	let authorizer = build_test_authorizer(test_descriptor(&server.base_url()), SilentBrowser)
		.with_callback_timeout(StdDuration::from_secs(1));
	let err = authorizer.sign_in().await.expect_err("No redirect should mean a timeout.");

	assert!(matches!(err, Error::Auth(AuthError::CallbackTimedOut)));
}
