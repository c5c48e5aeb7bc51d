//! Same-origin relay in front of the upstream content API.
//!
//! `GET /api/proxy?endpoint=<path>&...` rebuilds `<upstream><path>`, forwards
//! every other query parameter and hands the upstream JSON back untouched.
//! Only the known catalog endpoints are relayed, so the outbound authority is
//! always the configured upstream. The relay never caches or retries.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::Value;
use tokio::task;
use tracing::{debug, error, warn};

use crate::api::{ENDPOINT_PARAM, Endpoint, RELAY_PATH};

pub const RELAY_USER_AGENT: &str = "Mozilla/5.0";

#[derive(Clone)]
pub struct RelayState {
    upstream_base: Arc<str>,
    agent: ureq::Agent,
}

impl RelayState {
    pub fn new(upstream_base: &str) -> Self {
        Self {
            upstream_base: Arc::from(upstream_base.trim_end_matches('/')),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn upstream_base(&self) -> &str {
        &self.upstream_base
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route(RELAY_PATH, get(proxy))
        .with_state(state)
}

#[derive(Debug)]
pub struct RelayError {
    pub status: StatusCode,
    pub message: String,
}

impl RelayError {
    fn missing_endpoint() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Missing endpoint".into(),
        }
    }

    fn unknown_endpoint() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Unknown endpoint".into(),
        }
    }

    fn upstream_status(code: u16) -> Self {
        Self {
            status: StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
            message: format!("API returned {code}"),
        }
    }

    fn gateway() -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: "Failed to fetch from API".into(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type RelayResult<T> = Result<T, RelayError>;

/// Query pairs with set-semantics: a repeated key keeps its first position and
/// its last value.
fn collapse(pairs: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut collapsed: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        match collapsed.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => collapsed.push((key, value)),
        }
    }
    collapsed
}

pub async fn proxy(
    State(state): State<RelayState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> RelayResult<Json<Value>> {
    let pairs = collapse(pairs);
    let endpoint = pairs
        .iter()
        .find(|(key, _)| key == ENDPOINT_PARAM)
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_empty())
        .ok_or_else(RelayError::missing_endpoint)?;
    let endpoint = Endpoint::from_path(&endpoint).ok_or_else(|| {
        warn!(%endpoint, "refusing to relay unknown endpoint");
        RelayError::unknown_endpoint()
    })?;

    let target = format!("{}{}", state.upstream_base, endpoint.path());
    let forwarded: Vec<(String, String)> = pairs
        .into_iter()
        .filter(|(key, _)| key != ENDPOINT_PARAM)
        .collect();

    debug!(%endpoint, params = forwarded.len(), "relaying request");
    let agent = state.agent.clone();
    let outcome = task::spawn_blocking(move || {
        let mut request = agent
            .get(&target)
            .set("User-Agent", RELAY_USER_AGENT)
            .set("Accept", "application/json");
        for (key, value) in &forwarded {
            request = request.query(key, value);
        }
        match request.call() {
            Ok(response) => response.into_json::<Value>().map_err(|err| {
                error!(url = %target, error = %err, "upstream body is not JSON");
                RelayError::gateway()
            }),
            Err(ureq::Error::Status(code, _)) => {
                warn!(url = %target, status = code, "upstream returned an error status");
                Err(RelayError::upstream_status(code))
            }
            Err(ureq::Error::Transport(transport)) => {
                error!(url = %target, error = %transport, "proxy error");
                Err(RelayError::gateway())
            }
        }
    })
    .await
    .map_err(|err| {
        error!(error = %err, "relay task join error");
        RelayError::gateway()
    })?;

    outcome.map(Json)
}
