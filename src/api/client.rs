//! HTTP client for the CAOS API.
//!
//! Reference lists (projects, metrics, tags) rarely change during a
//! session, so they are fetched once and cached for the lifetime of the
//! client. Each cache admits at most one in-flight request: concurrent
//! first calls share the same fetch, and a failed fetch leaves the cache
//! empty so the next call retries.

use reqwest::Response;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::warn;
use url::Url;

use crate::api::error::ApiError;
use crate::api::models::{
    Envelope, GraphqlResponse, Project, RemoteMetric, Status, StatusWire, Tag, TokenWire,
};

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    bearer: RwLock<Option<String>>,
    projects: OnceCell<Vec<Project>>,
    metrics: OnceCell<Vec<RemoteMetric>>,
    tags: OnceCell<Vec<Tag>>,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(ApiClient {
            http,
            base_url,
            bearer: RwLock::new(None),
            projects: OnceCell::new(),
            metrics: OnceCell::new(),
            tags: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let url = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path);
        Ok(Url::parse(&url)?)
    }

    async fn bearer_token(&self) -> Option<String> {
        self.bearer.read().await.clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let mut request = self.http.get(self.endpoint(path)?);
        if let Some(token) = self.bearer_token().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.is_empty() {
                message = status.canonical_reason().unwrap_or("server error").to_string();
            }
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Server status, including whether the current token authenticates.
    pub async fn status(&self) -> Result<Status, ApiError> {
        let envelope: Envelope<StatusWire> = self.get_json("status").await?;
        Ok(envelope.data.into())
    }

    /// Exchanges credentials for a bearer token. Does not store it, see
    /// [`ApiClient::login`].
    pub async fn token(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let body = json!({ "username": username, "password": password });
        let response = self
            .http
            .post(self.endpoint("token")?)
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<TokenWire> = Self::decode(response).await?;
        Ok(envelope.data.token)
    }

    pub async fn set_token(&self, token: String) {
        *self.bearer.write().await = Some(token);
    }

    pub async fn logout(&self) {
        *self.bearer.write().await = None;
    }

    /// Obtains a token, stores it, and confirms it against `/status`.
    /// Returns whether the server accepted the token.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool, ApiError> {
        let token = self.token(username, password).await?;
        self.set_token(token).await;
        let status = self.status().await?;
        Ok(status.auth)
    }

    /// Projects sorted by name. Cached after the first successful fetch.
    pub async fn projects(&self) -> Result<&[Project], ApiError> {
        let projects = self
            .projects
            .get_or_try_init(|| async {
                let envelope: Envelope<Vec<Project>> = self.get_json("projects").await?;
                let mut projects = envelope.data;
                projects.sort_by(|a, b| a.name.cmp(&b.name));
                Ok::<_, ApiError>(projects)
            })
            .await?;
        Ok(projects)
    }

    /// Metrics known to the server. Cached after the first successful fetch.
    pub async fn metrics(&self) -> Result<&[RemoteMetric], ApiError> {
        let metrics = self
            .metrics
            .get_or_try_init(|| async {
                let envelope: Envelope<Vec<RemoteMetric>> = self.get_json("metrics").await?;
                Ok::<_, ApiError>(envelope.data)
            })
            .await?;
        Ok(metrics)
    }

    /// Tags known to the server. Cached after the first successful fetch.
    pub async fn tags(&self) -> Result<&[Tag], ApiError> {
        let tags = self
            .tags
            .get_or_try_init(|| async {
                let envelope: Envelope<Vec<Tag>> = self.get_json("tags").await?;
                Ok::<_, ApiError>(envelope.data)
            })
            .await?;
        Ok(tags)
    }

    /// Runs a GraphQL query and returns its `data` document.
    ///
    /// GraphQL-level errors do not fail the call: the server may return
    /// partial data alongside them, so they are logged and whatever data
    /// arrived is returned (`Value::Null` when there is none).
    pub async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ApiError> {
        let body = json!({ "query": query, "variables": variables });
        let mut request = self.http.post(self.endpoint("graphql")?).json(&body);
        if let Some(token) = self.bearer_token().await {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let graphql: GraphqlResponse = Self::decode(response).await?;

        if let Some(errors) = &graphql.errors {
            for error in errors {
                warn!("GraphQL error: {}", error.message);
            }
        }

        Ok(graphql.data.unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(Url::parse(base).unwrap(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let client = client("http://localhost:8080/api/v1");
        let url = client.endpoint("projects").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/projects");
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let client = client("http://localhost:8080/api/v1/");
        let url = client.endpoint("graphql").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/graphql");
    }

    #[tokio::test]
    async fn test_token_storage() {
        let client = client("http://localhost:8080/api/v1");
        assert!(client.bearer_token().await.is_none());

        client.set_token("secret".to_string()).await;
        assert_eq!(client.bearer_token().await.as_deref(), Some("secret"));

        client.logout().await;
        assert!(client.bearer_token().await.is_none());
    }
}
