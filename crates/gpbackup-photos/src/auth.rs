//! OAuth2 installed-app flow for the Google Photos Library API
//!
//! Implements the Authorization Code flow for desktop clients: the user
//! signs in through the browser, Google redirects to a loopback listener on
//! an ephemeral `127.0.0.1` port, and the code is exchanged for tokens using
//! the client id and secret from a downloaded `client_secret.json`.
//!
//! ## Components
//!
//! - [`ClientSecretFile`] - The `installed` section of `client_secret.json`
//! - [`Tokens`] - Access and refresh tokens with their expiry
//! - [`KeyringTokenStorage`] - Secure token storage using the system keyring
//! - [`InstalledAppFlow`] - Authorization URL, code exchange and refresh
//! - [`LocalCallbackServer`] - Minimal HTTP server for the OAuth redirect
//! - [`GooglePhotosAuth`] - Orchestrates the full authentication flow

use std::convert::Infallible;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// Google's authorization endpoint, used when the secret file omits `auth_uri`
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google's token endpoint, used when the secret file omits `token_uri`
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Keyring service name for storing tokens
const KEYRING_SERVICE: &str = "gpbackup";

/// Access tokens this close to expiry are refreshed before use
const EXPIRY_MARGIN_SECS: i64 = 60;

// ============================================================================
// ClientSecretFile
// ============================================================================

/// OAuth client registration for an installed (desktop) application
#[derive(Debug, Clone, Deserialize)]
pub struct InstalledApp {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Layout of the `client_secret.json` downloaded from the Google Cloud console
#[derive(Debug, Deserialize)]
pub struct ClientSecretFile {
    installed: Option<InstalledApp>,
}

impl ClientSecretFile {
    /// Reads the `installed` client registration from `path`
    pub fn load(path: &Path) -> Result<InstalledApp> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read client secret from {}", path.display()))?;
        Self::parse(&json).with_context(|| format!("Invalid client secret file {}", path.display()))
    }

    fn parse(json: &str) -> Result<InstalledApp> {
        let file: ClientSecretFile =
            serde_json::from_str(json).context("Failed to parse client secret JSON")?;
        match file.installed {
            Some(app) if !app.client_id.is_empty() => Ok(app),
            Some(_) => bail!("client_id is empty"),
            None => bail!("no \"installed\" client; create a Desktop app OAuth client"),
        }
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// OAuth tokens received from Google
#[derive(Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Bearer token for authenticating API requests
    pub access_token: String,
    /// Token for refreshing the access token without user interaction
    pub refresh_token: Option<String>,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Returns true if the access token has expired or is about to
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// KeyringTokenStorage
// ============================================================================

/// Stores and retrieves OAuth tokens from the system keyring
///
/// Tokens are serialized as JSON under the service name "gpbackup", keyed by
/// the OAuth client id so that different client registrations do not clash.
pub struct KeyringTokenStorage;

impl KeyringTokenStorage {
    /// Stores tokens in the system keyring for the given account
    pub fn store(account: &str, tokens: &Tokens) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        let json = serde_json::to_string(tokens).context("Failed to serialize tokens")?;

        entry
            .set_password(&json)
            .context("Failed to store tokens in keyring")?;

        debug!(account, "Stored tokens in keyring");
        Ok(())
    }

    /// Loads tokens from the system keyring for the given account
    ///
    /// # Returns
    /// `Some(Tokens)` if found and valid, `None` if not found
    pub fn load(account: &str) -> Result<Option<Tokens>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(json) => {
                let tokens: Tokens = serde_json::from_str(&json)
                    .context("Failed to deserialize tokens from keyring")?;
                debug!(account, "Loaded tokens from keyring");
                Ok(Some(tokens))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account, "No tokens found in keyring");
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes tokens from the system keyring for the given account
    pub fn clear(account: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) => {
                info!(account, "Cleared tokens from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!(account, "No tokens to clear");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

// ============================================================================
// InstalledAppFlow
// ============================================================================

/// Authorization code exchange and refresh using the `oauth2` crate
///
/// Google issues refresh tokens to installed apps only when
/// `access_type=offline` is requested, and re-issues them only with
/// `prompt=consent`; both are always sent.
pub struct InstalledAppFlow {
    client: BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>,
    scopes: Vec<String>,
}

impl InstalledAppFlow {
    /// Creates a new flow for `app` requesting `scopes`
    pub fn new(app: &InstalledApp, scopes: &[String]) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(app.client_id.clone()))
            .set_client_secret(ClientSecret::new(app.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(app.auth_uri.clone()).context("Invalid authorization URL")?)
            .set_token_uri(TokenUrl::new(app.token_uri.clone()).context("Invalid token URL")?);

        Ok(Self {
            client,
            scopes: scopes.to_vec(),
        })
    }

    /// Sets the redirect URI the authorization server sends the code to
    pub fn with_redirect_uri(mut self, uri: &str) -> Result<Self> {
        self.client = self
            .client
            .set_redirect_uri(RedirectUrl::new(uri.to_string()).context("Invalid redirect URI")?);
        Ok(self)
    }

    /// Generates an authorization URL with a PKCE challenge
    ///
    /// # Returns
    /// A tuple of `(authorization_url, csrf_token, pkce_verifier)`.
    /// The `pkce_verifier` must be kept until the code exchange step.
    pub fn generate_auth_url(&self) -> (String, CsrfToken, PkceCodeVerifier) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = self.client.authorize_url(CsrfToken::new_random);
        for scope in &self.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token) = auth_request
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        debug!("Generated authorization URL");
        (auth_url.to_string(), csrf_token, pkce_verifier)
    }

    /// Exchanges an authorization code for OAuth tokens
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<Tokens> {
        info!("Exchanging authorization code for tokens");

        let http_client = reqwest::Client::new();
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&http_client)
            .await
            .context("Failed to exchange authorization code")?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        Ok(Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().to_string()),
            expires_at,
        })
    }

    /// Refreshes an expired access token using a refresh token
    ///
    /// Google usually omits the refresh token from the answer; the old one
    /// stays valid and is carried over.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        info!("Refreshing access token");

        let http_client = reqwest::Client::new();
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await
            .context("Failed to refresh token")?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        Ok(Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
        })
    }
}

// ============================================================================
// LocalCallbackServer
// ============================================================================

/// Parameters extracted from the OAuth2 callback
#[derive(Debug)]
pub struct CallbackParams {
    /// The authorization code
    pub code: String,
    /// The CSRF state parameter
    pub state: String,
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<Result<CallbackParams, String>>>>>;

/// Minimal HTTP server on an ephemeral loopback port that receives the
/// OAuth2 redirect.
///
/// Requests that carry neither `code` nor `error` (a browser asking for
/// `/favicon.ico`, say) are answered with 404 and otherwise ignored.
pub struct LocalCallbackServer {
    listener: TcpListener,
    port: u16,
}

impl LocalCallbackServer {
    /// Binds `127.0.0.1` on a port chosen by the OS
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("Failed to bind callback server on 127.0.0.1")?;
        let port = listener
            .local_addr()
            .context("Failed to read callback server address")?
            .port();

        info!(port, "Started local OAuth callback server");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI to register with the authorization request
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Serves connections until the redirect arrives
    ///
    /// # Returns
    /// The callback parameters, or an error when the user denied access
    pub async fn wait(self) -> Result<CallbackParams> {
        use hyper::server::conn::http1;
        use hyper::service::service_fn;
        use hyper_util::rt::TokioIo;

        let (tx, mut rx) = oneshot::channel();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        loop {
            tokio::select! {
                received = &mut rx => {
                    let outcome = received
                        .context("Callback server channel closed without receiving parameters")?;
                    return match outcome {
                        Ok(params) => {
                            info!("Received OAuth callback with authorization code");
                            Ok(params)
                        }
                        Err(error) => bail!("Authorization was not granted: {error}"),
                    };
                }
                accepted = self.listener.accept() => {
                    let (stream, _addr) = accepted
                        .context("Failed to accept connection on callback server")?;
                    let tx = Arc::clone(&tx);
                    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                        let tx = Arc::clone(&tx);
                        async move { Ok::<_, Infallible>(handle_callback(req.uri(), tx).await) }
                    });

                    tokio::spawn(async move {
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            warn!("Callback server connection error: {}", e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_callback(
    uri: &hyper::Uri,
    tx: CallbackSender,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    use hyper::StatusCode;

    debug!(path = uri.path(), "Callback server received request");

    let Some(outcome) = parse_callback(&uri.to_string()) else {
        return html_response(StatusCode::NOT_FOUND, error_html("Not found"));
    };

    let response = match &outcome {
        Ok(_) => html_response(StatusCode::OK, success_html()),
        Err(error) => html_response(StatusCode::BAD_REQUEST, error_html(error)),
    };

    if let Some(sender) = tx.lock().await.take() {
        let _ = sender.send(outcome);
    }
    response
}

fn html_response(
    status: hyper::StatusCode,
    html: String,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(hyper::body::Bytes::from(html)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Parses the redirect's query string
///
/// Returns `None` for requests that are not the redirect at all,
/// `Some(Err(_))` when the authorization server reported an error.
fn parse_callback(uri: &str) -> Option<Result<CallbackParams, String>> {
    let url = url::Url::parse(&format!("http://localhost{}", uri)).ok()?;
    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Some(Err(error));
    }
    Some(Ok(CallbackParams {
        code: code?,
        state: state.unwrap_or_default(),
    }))
}

/// Returns the HTML for a successful authentication page
fn success_html() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>gpbackup - Access granted</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Access granted</h1>
    <p>gpbackup can now read your Google Photos library.</p>
    <p>You can close this window.</p>
</body>
</html>"#
        .to_string()
}

/// Returns the HTML for an authentication error page
fn error_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>gpbackup - Authentication Error</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Authentication Error</h1>
    <p>{}</p>
    <p>Please close this window and try again.</p>
</body>
</html>"#,
        message
    )
}

// ============================================================================
// GooglePhotosAuth
// ============================================================================

/// High-level authentication adapter for Google Photos
///
/// 1. Binds the loopback callback server
/// 2. Opens the user's browser on the consent page
/// 3. Exchanges the returned code for tokens and stores them in the keyring
///
/// Later runs call [`access_token`](Self::access_token), which refreshes the
/// stored tokens when they are about to expire.
pub struct GooglePhotosAuth {
    app: InstalledApp,
    scopes: Vec<String>,
}

impl GooglePhotosAuth {
    pub fn new(app: InstalledApp, scopes: Vec<String>) -> Self {
        Self { app, scopes }
    }

    /// Creates an adapter from a `client_secret.json` file
    pub fn from_client_secret_file(path: &Path, scopes: Vec<String>) -> Result<Self> {
        Ok(Self::new(ClientSecretFile::load(path)?, scopes))
    }

    /// Keyring account under which tokens for this client are stored
    pub fn account(&self) -> &str {
        &self.app.client_id
    }

    /// Performs the full interactive login and stores the tokens
    pub async fn login(&self) -> Result<Tokens> {
        info!("Starting OAuth2 login flow");

        let server = LocalCallbackServer::bind().await?;
        let flow = InstalledAppFlow::new(&self.app, &self.scopes)?
            .with_redirect_uri(&server.redirect_uri())?;
        let (auth_url, csrf_token, pkce_verifier) = flow.generate_auth_url();

        info!("Opening browser for authentication");
        if let Err(e) = webbrowser::open(&auth_url) {
            warn!(error = %e, url = %auth_url, "Could not open a browser; open the URL manually");
        }

        let callback = server.wait().await?;
        if callback.state != *csrf_token.secret() {
            bail!("OAuth state mismatch; the callback did not come from this login");
        }

        let tokens = flow.exchange_code(callback.code, pkce_verifier).await?;
        if tokens.refresh_token.is_none() {
            warn!("No refresh token issued; the login will have to be repeated when the access token expires");
        }
        KeyringTokenStorage::store(self.account(), &tokens)?;

        info!("OAuth2 login completed successfully");
        Ok(tokens)
    }

    /// Refreshes an access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let flow = InstalledAppFlow::new(&self.app, &self.scopes)?;
        flow.refresh_token(refresh_token).await
    }

    /// Tokens stored for this client, if any
    pub fn stored_tokens(&self) -> Result<Option<Tokens>> {
        KeyringTokenStorage::load(self.account())
    }

    /// Returns tokens with a usable access token, refreshing if needed
    pub async fn access_token(&self) -> Result<Tokens> {
        let Some(tokens) = self.stored_tokens()? else {
            bail!("Not logged in. Run `gpbackup auth login` first");
        };
        if !tokens.is_expired() {
            return Ok(tokens);
        }

        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            bail!("Access token expired and no refresh token is stored. Run `gpbackup auth login`");
        };
        let refreshed = self.refresh(refresh_token).await?;
        KeyringTokenStorage::store(self.account(), &refreshed)?;
        Ok(refreshed)
    }

    /// Forgets the stored tokens
    pub fn logout(&self) -> Result<()> {
        KeyringTokenStorage::clear(self.account())
    }
}
