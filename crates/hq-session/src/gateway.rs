//! Authorized request gateway
//!
//! Every outbound API call is built here so it carries the current access
//! token as a bearer credential. Injection is all the default path does;
//! refresh-and-retry is opt-in through [`AuthorizedClient::send_with_retry`]
//! so genuine authorization errors on non-idempotent calls are not masked.

use crate::transport::{build_client, http_error, transport_error};
use hq_core::config::join_url;
use hq_core::{AccessToken, ApiConfig, HqError, Result, SessionAccessor};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Attach `token` as `Authorization: Bearer <token>`; no header without one
pub fn with_bearer(builder: RequestBuilder, token: Option<&AccessToken>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token.as_str()),
        None => builder,
    }
}

/// HTTP helper for feature code
#[derive(Clone)]
pub struct AuthorizedClient {
    client: Client,
    base_url: String,
    session: Arc<dyn SessionAccessor>,
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AuthorizedClient {
    pub fn new(base_url: impl Into<String>, session: Arc<dyn SessionAccessor>) -> Self {
        Self::with_client(Client::new(), base_url, session)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        session: Arc<dyn SessionAccessor>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Create from config
    pub fn from_config(config: &ApiConfig, session: Arc<dyn SessionAccessor>) -> Result<Self> {
        Ok(Self::with_client(
            build_client(config)?,
            config.base_url.clone(),
            session,
        ))
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Request builder carrying the current access token
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self.session.get_token();
        with_bearer(self.client.request(method, self.url(path)), token.as_ref())
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Send a prepared request once. Any status comes back as a response.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(transport_error)
    }

    /// Send with one refresh-and-retry on 401.
    ///
    /// `customize` adds body, query, or headers and is applied to both
    /// attempts. When renewal yields no token the session is logged out. A
    /// second 401 is returned as [`HqError::Unauthorized`] without another
    /// renewal. Use only for calls that are safe to repeat.
    pub async fn send_with_retry<F>(
        &self,
        method: Method,
        path: &str,
        customize: F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        let token = self.session.get_token();

        let first = customize(with_bearer(
            self.client.request(method.clone(), &url),
            token.as_ref(),
        ))
        .send()
        .await
        .map_err(transport_error)?;

        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        tracing::debug!(%method, path, "Request unauthorized; renewing token");
        let Some(renewed) = self.session.trigger_refresh().await else {
            tracing::info!(path, "Renewal failed; signing out");
            self.session.force_logout().await;
            return Err(HqError::Unauthorized);
        };

        let second = customize(with_bearer(
            self.client.request(method, &url),
            Some(&renewed),
        ))
        .send()
        .await
        .map_err(transport_error)?;

        if second.status() == StatusCode::UNAUTHORIZED {
            return Err(HqError::Unauthorized);
        }
        Ok(second)
    }

    /// GET a JSON document, retrying once on 401
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send_with_retry(Method::GET, path, |b| b).await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| HqError::MalformedResponse {
                endpoint: path.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    struct FixedToken(Option<AccessToken>);

    #[async_trait::async_trait]
    impl SessionAccessor for FixedToken {
        fn get_token(&self) -> Option<AccessToken> {
            self.0.clone()
        }

        async fn trigger_refresh(&self) -> Option<AccessToken> {
            None
        }

        async fn force_logout(&self) {}
    }

    fn client(token: Option<&str>) -> AuthorizedClient {
        AuthorizedClient::new(
            "http://api.test/",
            Arc::new(FixedToken(token.map(AccessToken::new))),
        )
    }

    #[test]
    fn test_request_carries_bearer() {
        let request = client(Some("abc")).get("/api/posts").build().unwrap();

        assert_eq!(request.url().as_str(), "http://api.test/api/posts");
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn test_request_without_token_has_no_header() {
        let request = client(None).post("/api/posts").build().unwrap();
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_with_bearer_sets_single_header() {
        let builder = Client::new().get("http://api.test/x");
        let request = with_bearer(builder, Some(&AccessToken::new("t1")))
            .build()
            .unwrap();

        assert_eq!(request.headers().get_all(AUTHORIZATION).iter().count(), 1);
    }
}
