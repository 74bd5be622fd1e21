//! HTTP auth transport
//!
//! Talks to the auth API with reqwest:
//!
//! | Endpoint               | Method | Success                          |
//! |------------------------|--------|----------------------------------|
//! | `/api/auth/login/json` | POST   | `{access_token, refresh_token}`  |
//! | `/api/auth/register`   | POST   | user record                      |
//! | `/api/auth/refresh`    | POST   | `{access_token, refresh_token}`  |
//! | `/api/auth/me`         | GET    | user profile (bearer)            |

use crate::gateway::with_bearer;
use async_trait::async_trait;
use hq_core::config::join_url;
use hq_core::{
    error_message, AccessToken, ApiConfig, AuthTransport, HqError, LoginRequest, RefreshRequest,
    RefreshToken, RegisterRequest, Result, TokenPair, UserProfile,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const LOGIN_PATH: &str = "/api/auth/login/json";
pub const REGISTER_PATH: &str = "/api/auth/register";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const ME_PATH: &str = "/api/auth/me";

/// reqwest-backed [`AuthTransport`]
#[derive(Debug, Clone)]
pub struct HttpAuthTransport {
    client: Client,
    base_url: String,
}

impl HttpAuthTransport {
    /// Create a transport for the API at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Reuse an existing client (connection pool, proxies, TLS settings)
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Ok(Self::with_client(build_client(config)?, config.base_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// Build the HTTP client described by `config`
pub fn build_client(config: &ApiConfig) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| HqError::Config(format!("Failed to build HTTP client: {e}")))
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn login(&self, request: &LoginRequest) -> Result<TokenPair> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(refused(response).await);
        }
        decode(response, LOGIN_PATH).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<UserProfile> {
        let response = self
            .client
            .post(self.url(REGISTER_PATH))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(refused(response).await);
        }
        decode(response, REGISTER_PATH).await
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair> {
        let body = RefreshRequest {
            refresh_token: refresh_token.as_str().to_string(),
        };

        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        decode(response, REFRESH_PATH).await
    }

    async fn fetch_profile(&self, access_token: &AccessToken) -> Result<UserProfile> {
        let response = with_bearer(self.client.get(self.url(ME_PATH)), Some(access_token))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(HqError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        decode(response, ME_PATH).await
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> HqError {
    HqError::Transport(err.to_string())
}

/// Login/registration failure. Only a 4xx is a credential rejection
/// carrying the server's `{detail}` message; anything else is an HTTP error.
async fn refused(response: Response) -> HqError {
    if !response.status().is_client_error() {
        return http_error(response).await;
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    HqError::Rejected {
        status,
        message: error_message(status, &body),
    }
}

pub(crate) async fn http_error(response: Response) -> HqError {
    let status = response.status().as_u16();
    if status == StatusCode::UNAUTHORIZED.as_u16() {
        return HqError::Unauthorized;
    }
    let body = response.text().await.unwrap_or_default();
    HqError::Http {
        status,
        message: error_message(status, &body),
    }
}

async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body).map_err(|e| HqError::MalformedResponse {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}
