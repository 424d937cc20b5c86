//! Shared helpers for integration tests.
//!
//! [`StubApi`] is an in-process stand-in for the CAOS API: every test
//! spawns its own instance on an ephemeral port and points an
//! [`ApiClient`] at it. GraphQL sample queries are dispatched on a key
//! derived from the query variables, so tests can script per-series
//! responses, delays and failures.
#![allow(dead_code)]

use anyhow::Result;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use caos_dashboard::api::ApiClient;
use caos_dashboard::test_utils::graphql_samples_response;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub mod fixtures;

/// Loads the default configuration once per test binary.
pub fn ensure_config() {
    caos_dashboard::config::load_configuration_for_tests()
        .expect("Failed to load test configuration");
}

/// Scripted response for one series key.
#[derive(Clone)]
pub enum SeriesRule {
    /// Answer with these `(unix_ts, value)` samples.
    Samples(Vec<(f64, f64)>),
    /// Answer with these samples after a delay.
    Delayed(Vec<(f64, f64)>, Duration),
    /// Answer with this HTTP status and an empty body.
    Status(u16),
    /// Answer with a GraphQL error document and no data.
    Errors(Vec<String>),
}

#[derive(Default)]
struct StubState {
    projects: Vec<Value>,
    metrics: Vec<Value>,
    tags: Vec<Value>,
    username: String,
    password: String,
    token: String,

    projects_hits: AtomicUsize,
    metrics_hits: AtomicUsize,
    tags_hits: AtomicUsize,
    graphql_hits: AtomicUsize,
    projects_failures: AtomicUsize,

    series: Mutex<HashMap<String, SeriesRule>>,
}

/// An in-process CAOS API stub, one per test.
pub struct StubApi {
    state: Arc<StubState>,
    pub base_url: Url,
}

impl StubApi {
    /// Spawns a stub with two projects, `astro` and `bio`.
    pub async fn spawn() -> Result<StubApi> {
        Self::spawn_with_projects(&[("p1", "astro"), ("p2", "bio")]).await
    }

    pub async fn spawn_with_projects(projects: &[(&str, &str)]) -> Result<StubApi> {
        let state = Arc::new(StubState {
            projects: projects
                .iter()
                .map(|(id, name)| json!({ "id": id, "name": name }))
                .collect(),
            metrics: vec![
                json!({ "name": "cpu", "type": "delta" }),
                json!({ "name": "wallclocktime", "type": "delta" }),
            ],
            tags: vec![json!({ "key": "project", "value": "p1" })],
            username: "admin".to_string(),
            password: "secret".to_string(),
            token: "tok-tests".to_string(),
            ..Default::default()
        });

        let app = axum::Router::new()
            .route("/api/v1/status", get(status_handler))
            .route("/api/v1/token", post(token_handler))
            .route("/api/v1/projects", get(projects_handler))
            .route("/api/v1/metrics", get(metrics_handler))
            .route("/api/v1/tags", get(tags_handler))
            .route("/api/v1/graphql", post(graphql_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let base_url = Url::parse(&format!("http://{addr}/api/v1"))?;
        Ok(StubApi { state, base_url })
    }

    pub fn client(&self) -> Result<ApiClient> {
        Ok(ApiClient::new(self.base_url.clone(), Duration::from_secs(5))?)
    }

    pub fn shared_client(&self) -> Result<Arc<ApiClient>> {
        Ok(Arc::new(self.client()?))
    }

    /// Registers the response for a series key, see [`series_key`].
    pub fn set_series(&self, key: &str, rule: SeriesRule) {
        self.state
            .series
            .lock()
            .unwrap()
            .insert(key.to_string(), rule);
    }

    /// The next `count` project list fetches fail with a 500.
    pub fn fail_projects(&self, count: usize) {
        self.state.projects_failures.store(count, Ordering::SeqCst);
    }

    pub fn projects_hits(&self) -> usize {
        self.state.projects_hits.load(Ordering::SeqCst)
    }

    pub fn metrics_hits(&self) -> usize {
        self.state.metrics_hits.load(Ordering::SeqCst)
    }

    pub fn tags_hits(&self) -> usize {
        self.state.tags_hits.load(Ordering::SeqCst)
    }

    pub fn graphql_hits(&self) -> usize {
        self.state.graphql_hits.load(Ordering::SeqCst)
    }
}

/// Dispatch key for a GraphQL samples request.
///
/// Aggregate queries key as `{metric}:{scope}`, expression queries as
/// `expr:{expression}:{scope}`. The scope is the comma-joined tag values
/// of the value filter, or empty for a grouped query.
pub fn series_key(variables: &Value) -> String {
    if let Some(expression) = variables.get("expression").and_then(Value::as_str) {
        let scope = variables
            .get("terms")
            .and_then(Value::as_array)
            .and_then(|terms| terms.first())
            .map(|term| tag_scope(&term["series"]))
            .unwrap_or_default();
        format!("expr:{expression}:{scope}")
    } else {
        let series = &variables["series"];
        let name = series["metric"]["name"].as_str().unwrap_or_default();
        format!("{name}:{}", tag_scope(series))
    }
}

fn tag_scope(series: &Value) -> String {
    match series.get("tags").and_then(Value::as_array) {
        Some(tags) => tags
            .iter()
            .filter_map(|tag| tag["value"].as_str())
            .collect::<Vec<_>>()
            .join(","),
        None => String::new(),
    }
}

async fn status_handler(State(state): State<Arc<StubState>>, headers: HeaderMap) -> Json<Value> {
    let expected = format!("Bearer {}", state.token);
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    Json(json!({
        "data": {
            "status": "online",
            "version": "1.4.2",
            "auth": if authorized { "yes" } else { "no" },
        }
    }))
}

async fn token_handler(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    if username == state.username && password == state.password {
        Json(json!({ "data": { "token": state.token } })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "invalid credentials").into_response()
    }
}

async fn projects_handler(State(state): State<Arc<StubState>>) -> Response {
    state.projects_hits.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .projects_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
            left.checked_sub(1)
        })
        .is_ok();
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "simulated failure").into_response();
    }
    Json(json!({ "data": state.projects })).into_response()
}

async fn metrics_handler(State(state): State<Arc<StubState>>) -> Json<Value> {
    state.metrics_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "data": state.metrics }))
}

async fn tags_handler(State(state): State<Arc<StubState>>) -> Json<Value> {
    state.tags_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "data": state.tags }))
}

async fn graphql_handler(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    state.graphql_hits.fetch_add(1, Ordering::SeqCst);
    let variables = body.get("variables").cloned().unwrap_or(Value::Null);
    let rule = {
        let series = state.series.lock().unwrap();
        series.get(&series_key(&variables)).cloned()
    };

    match rule {
        Some(SeriesRule::Samples(samples)) => {
            Json(graphql_samples_response(&samples)).into_response()
        }
        Some(SeriesRule::Delayed(samples, delay)) => {
            tokio::time::sleep(delay).await;
            Json(graphql_samples_response(&samples)).into_response()
        }
        Some(SeriesRule::Status(status)) => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, "simulated failure").into_response()
        }
        Some(SeriesRule::Errors(messages)) => {
            let errors: Vec<Value> = messages
                .iter()
                .map(|message| json!({ "message": message }))
                .collect();
            Json(json!({ "data": null, "errors": errors })).into_response()
        }
        None => Json(graphql_samples_response(&[])).into_response(),
    }
}
