//! Authorized HTTP client for the RondiTrack API
//!
//! Attaches the stored bearer token to every request and transparently
//! renews it once when the API answers `401 Unauthorized`.

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::auth::{OAuthClient, UserInfo};
use crate::error::{AuthError, AuthResult};
use crate::storage::StorageKey;

/// JSON API client bound to an [`OAuthClient`] session
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: OAuthClient,
    base_url: Url,
}

impl ApiClient {
    /// Create a client for `client.config().api_base_url`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Url` if the base URL is invalid.
    pub fn new(client: OAuthClient) -> AuthResult<Self> {
        let mut base = client.config().api_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        Ok(Self { client, base_url })
    }

    /// Get the OAuth client
    #[must_use]
    pub fn oauth(&self) -> &OAuthClient {
        &self.client
    }

    /// Resolve an endpoint against the API base URL
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Url` if the endpoint cannot be joined.
    pub fn endpoint_url(&self, endpoint: &str) -> AuthResult<Url> {
        Ok(self.base_url.join(endpoint.trim_start_matches('/'))?)
    }

    /// Send a JSON request and decode the JSON answer
    ///
    /// A `401` on a request that carried a token triggers one refresh and one
    /// replay with the new token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` if the API rejects the credentials
    /// and refreshing does not help, `AuthError::Api` for any other
    /// non-success status, `AuthError::Http` on transport failure.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> AuthResult<T> {
        let url = self.endpoint_url(endpoint)?;
        let token = self.client.access_token();

        let mut response = self
            .send(method.clone(), url.clone(), body, token.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && token.is_some() {
            tracing::debug!(endpoint, "Access token rejected, refreshing");
            if !self.client.refresh_access_token().await {
                return Err(AuthError::Unauthorized);
            }

            let token = self.client.store().get(StorageKey::AccessToken)?;
            response = self.send(method, url, body, token.as_deref()).await?;
        }

        Self::decode(response).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> AuthResult<Response> {
        tracing::debug!(%method, %url, "API request");

        let mut request = self
            .client
            .http_client()
            .request(method, url)
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> AuthResult<T> {
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::Unauthorized);
        }
        if !status.is_success() {
            return Err(AuthError::Api {
                status: status.as_u16(),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            });
        }

        // Empty bodies (204) decode as JSON null
        let text = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(text)?)
    }

    /// `GET endpoint`
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> AuthResult<T> {
        self.request(Method::GET, endpoint, None).await
    }

    /// `POST endpoint` with a JSON body
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> AuthResult<T> {
        self.request(Method::POST, endpoint, Some(body)).await
    }

    /// `PUT endpoint` with a JSON body
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn put<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> AuthResult<T> {
        self.request(Method::PUT, endpoint, Some(body)).await
    }

    /// `DELETE endpoint`
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> AuthResult<T> {
        self.request(Method::DELETE, endpoint, None).await
    }

    /// Profile of the signed-in user
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn user_profile(&self) -> AuthResult<UserInfo> {
        self.get("user/profile").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::navigator::RecordingNavigator;
    use crate::storage::CredentialStore;
    use std::sync::Arc;

    fn api(base: &str) -> ApiClient {
        let client = OAuthClient::builder()
            .config(AuthConfig::from_urls(
                "https://app.example",
                base,
                "https://sec.example/oauth/v1/token",
            ))
            .store(CredentialStore::in_memory())
            .navigator(Arc::new(RecordingNavigator::new()))
            .build()
            .unwrap();
        ApiClient::new(client).unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let api = api("https://api.example/api/v1");
        assert_eq!(
            api.endpoint_url("user/profile").unwrap().as_str(),
            "https://api.example/api/v1/user/profile"
        );
        assert_eq!(
            api.endpoint_url("/rounds?page=2").unwrap().as_str(),
            "https://api.example/api/v1/rounds?page=2"
        );
    }
}
