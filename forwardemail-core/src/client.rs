//! HTTP transport for the Forward Email API.
//!
//! [`Client`] authenticates each request through an [`AuthProvider`], sets
//! the fixed headers, executes it, and either decodes the JSON body or hands
//! the error response to [`ApiError::classify`].
//!
//! Failures come back as one of three distinct shapes:
//! - [`ClientError::Credential`]: no key could be resolved; no request was sent
//! - [`ClientError::Network`]: the service could not be reached (DNS, refused,
//!   timeout); the `reqwest` error is passed through untouched
//! - [`ClientError::Api`]: the service answered with an error status

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use url::Url;

use crate::api_error::ApiError;
use crate::auth::{endpoint, AuthProvider};
use crate::config::ConfigError;
use crate::resolve::{Credential, CredentialError};

/// Static `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("forward-email-cli/", env!("CARGO_PKG_VERSION"));

/// Error type for API calls.
///
/// Wrapping variants add their own context only; the wrapped error stays
/// reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No API key could be resolved.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The API key was rejected (401 from the validation endpoint).
    ///
    /// Always holds [`CredentialError::Invalid`], whose source is the
    /// classified response.
    #[error(transparent)]
    InvalidCredential(CredentialError),

    /// The service answered with an error status.
    #[error("API request failed with HTTP {}", .0.status())]
    Api(#[from] ApiError),

    /// The service could not be reached.
    #[error("could not reach the API")]
    Network(#[from] reqwest::Error),

    /// The response body was not the expected JSON.
    #[error("failed to decode response")]
    Decode(#[from] serde_json::Error),

    /// The profile configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A request URL could not be built.
    #[error("invalid request URL")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    /// The classified API error, if the service answered with one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            Self::InvalidCredential(e) => e.api_error(),
            _ => None,
        }
    }

    /// True for failures where the service was never reached.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Result type for API calls.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Authenticated API client bound to one profile.
///
/// The API key is resolved on the first request and reused for every later
/// request made through this client (and its clones made after that point).
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    auth: AuthProvider,
    credential: OnceCell<Credential>,
}

impl Client {
    /// Create a client for the provider's profile, using its base URL and timeout.
    pub fn new(auth: AuthProvider) -> Result<Self> {
        let base_url = auth.config().base_url(auth.profile())?;
        let timeout = auth.config().profile(auth.profile())?.timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            auth,
            credential: OnceCell::new(),
        })
    }

    /// The authentication provider.
    pub fn auth(&self) -> &AuthProvider {
        &self.auth
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The credential this client sends, resolving it on first use.
    pub async fn credential(&self) -> Result<&Credential> {
        Ok(self
            .credential
            .get_or_try_init(|| self.auth.get_api_key())
            .await?)
    }

    /// Build a request for `path` relative to the base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<Request> {
        Ok(Request::new(method, endpoint(&self.base_url, path)?))
    }

    /// Authenticate a request with `credential`, set the fixed headers and
    /// send it. The response is returned whatever its status.
    pub(crate) async fn send(
        &self,
        mut request: Request,
        credential: &Credential,
    ) -> Result<reqwest::Response> {
        self.auth.apply_credential(&mut request, credential);

        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!("{} {}", method, url);

        let response = self.http.execute(request).await?;
        tracing::debug!("{} {} -> {}", method, url, response.status().as_u16());
        Ok(response)
    }

    /// Execute a request and decode its JSON body.
    ///
    /// Returns `Ok(None)` for a successful response with an empty body.
    pub async fn execute<T: DeserializeOwned>(&self, request: Request) -> Result<Option<T>> {
        let credential = self.credential().await?;
        let response = self.send(request, credential).await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(ApiError::from_response(response).await.into());
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Execute a request and require a JSON body.
    async fn execute_required<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        match self.execute(request).await? {
            Some(value) => Ok(value),
            None => Err(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "empty response body",
            ))
            .into()),
        }
    }

    fn with_json<B: Serialize + ?Sized>(mut request: Request, body: &B) -> Result<Request> {
        let payload = serde_json::to_vec(body)?;
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(payload.into());
        Ok(request)
    }

    /// `GET path`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute_required(self.request(Method::GET, path)?).await
    }

    /// `POST path` with a JSON body.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Self::with_json(self.request(Method::POST, path)?, body)?;
        self.execute_required(request).await
    }

    /// `PUT path` with a JSON body.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Self::with_json(self.request(Method::PUT, path)?, body)?;
        self.execute_required(request).await
    }

    /// `DELETE path`, ignoring any response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute::<serde_json::Value>(self.request(Method::DELETE, path)?)
            .await?;
        Ok(())
    }
}
