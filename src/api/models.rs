//! Wire models for the CAOS REST API.
//!
//! Every REST payload arrives wrapped in a `data` envelope, so the
//! deserialization types here mirror that shape rather than the
//! in-crate data model.

use serde::Deserialize;
use std::collections::HashMap;

/// The `{"data": ...}` wrapper around every REST payload.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// A project known to the accounting system.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// A metric as reported by the API, not to be confused with the
/// curated catalog in [`crate::datamodel::metric`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A tag key/value pair with optional free-form extra attributes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Parsed `/status` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub status: String,
    pub version: String,
    /// Whether the current bearer token is accepted by the server.
    pub auth: bool,
}

/// Raw `/status` payload. The server reports authentication as the
/// string `"yes"` or `"no"`.
#[derive(Debug, Deserialize)]
pub struct StatusWire {
    pub status: String,
    pub version: String,
    pub auth: String,
}

impl From<StatusWire> for Status {
    fn from(wire: StatusWire) -> Self {
        Status {
            auth: wire.auth == "yes",
            status: wire.status,
            version: wire.version,
        }
    }
}

/// Raw `/token` payload.
#[derive(Debug, Deserialize)]
pub struct TokenWire {
    pub token: String,
}

/// Raw GraphQL response body.
#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
pub struct GraphqlError {
    pub message: String,
}
