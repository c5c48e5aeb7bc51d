//! Request routing for the upstream content API.
//!
//! Every data accessor goes through [`RequestRouter::fetch_api`]. Where the
//! call physically goes is decided once, when the router is built:
//!
//! * [`Route::Direct`] talks to the upstream base URL itself and may reuse a
//!   response for [`REVALIDATE_AFTER`].
//! * [`Route::Relay`] sends everything to the same-origin relay at
//!   [`RELAY_PATH`], passing the upstream path as the `endpoint` parameter.
//!
//! The transport is `ureq`, so every call blocks the current thread.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::catalog::{
    DetailResponse, HomepageResponse, SearchResponse, SourcesResponse, StreamResponse,
};

pub const DEFAULT_UPSTREAM_BASE: &str = "http://moviebox.ccgnimex.my.id:8000";
pub const RELAY_PATH: &str = "/api/proxy";
/// Name of the relay query parameter carrying the upstream path.
pub const ENDPOINT_PARAM: &str = "endpoint";
pub const REVALIDATE_AFTER: Duration = Duration::from_secs(300);
pub const DIRECT_STREAM_PATH: &str = "/moviebox/direct-stream";

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// The closed set of upstream endpoints the front-end calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Homepage,
    Search,
    Detail,
    Sources,
    GenerateStreamLink,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::Homepage,
        Endpoint::Search,
        Endpoint::Detail,
        Endpoint::Sources,
        Endpoint::GenerateStreamLink,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Homepage => "/moviebox/homepage",
            Self::Search => "/moviebox/search",
            Self::Detail => "/moviebox/detail",
            Self::Sources => "/moviebox/sources",
            Self::GenerateStreamLink => "/moviebox/generate-link-stream-video",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.path() == path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Ordered query parameters. A key may carry no value at all, which is
/// treated like an empty string: it never reaches the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, Option<String>)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key.into(), Some(value.into()))
    }

    pub fn set_optional<V: ToString>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        self.put(key.into(), value.map(|v| v.to_string()))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    fn put(&mut self, key: String, value: Option<String>) -> &mut Self {
        match self.pairs.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(existing, _)| existing == key)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Pairs that will actually be transmitted.
    pub fn effective(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().filter_map(|(key, value)| match value.as_deref() {
            Some(value) if !value.is_empty() => Some((key.as_str(), value)),
            _ => None,
        })
    }
}

/// Where outbound calls are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Straight to the upstream API.
    Direct,
    /// Through the relay served at `origin` + [`RELAY_PATH`].
    Relay { origin: String },
}

/// A fully resolved outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub endpoint: Endpoint,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// How long a response may be reused; only set for direct calls.
    pub revalidate: Option<Duration>,
}

impl ProxyRequest {
    /// URL including the encoded query string.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.url, query)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API error: {0}")]
    Status(u16),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("reading response body: {0}")]
    Body(#[from] std::io::Error),
    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Time-bounded response reuse for direct calls, keyed by full URL. Stale
/// entries are dropped whenever a fresh response is stored.
#[derive(Default)]
struct RevalidationCache {
    entries: RwLock<HashMap<String, (Instant, Value)>>,
}

impl RevalidationCache {
    fn get(&self, key: &str, max_age: Duration) -> Option<Value> {
        self.get_at(key, max_age, Instant::now())
    }

    fn get_at(&self, key: &str, max_age: Duration, now: Instant) -> Option<Value> {
        let entries = self.entries.read();
        let (stored_at, value) = entries.get(key)?;
        (now.saturating_duration_since(*stored_at) < max_age).then(|| value.clone())
    }

    fn put(&self, key: String, value: Value, max_age: Duration) {
        self.put_at(key, value, max_age, Instant::now());
    }

    fn put_at(&self, key: String, value: Value, max_age: Duration, now: Instant) {
        let mut entries = self.entries.write();
        entries.retain(|_, (stored_at, _)| now.saturating_duration_since(*stored_at) < max_age);
        entries.insert(key, (now, value));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

pub struct RequestRouter {
    route: Route,
    upstream_base: String,
    agent: ureq::Agent,
    cache: RevalidationCache,
}

impl RequestRouter {
    pub fn new(upstream_base: impl Into<String>, route: Route) -> Self {
        Self {
            route,
            upstream_base: trim_base(upstream_base.into()),
            agent: ureq::AgentBuilder::new().build(),
            cache: RevalidationCache::default(),
        }
    }

    pub fn direct(upstream_base: impl Into<String>) -> Self {
        Self::new(upstream_base, Route::Direct)
    }

    pub fn relayed(upstream_base: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::new(
            upstream_base,
            Route::Relay {
                origin: trim_base(origin.into()),
            },
        )
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn upstream_base(&self) -> &str {
        &self.upstream_base
    }

    /// Resolves `endpoint` and `params` into the call the current route makes.
    pub fn build_request(&self, endpoint: Endpoint, params: &QueryParams) -> ProxyRequest {
        let forwarded = params
            .effective()
            .map(|(key, value)| (key.to_owned(), value.to_owned()));

        match &self.route {
            Route::Direct => ProxyRequest {
                endpoint,
                url: format!("{}{}", self.upstream_base, endpoint.path()),
                query: forwarded.collect(),
                revalidate: Some(REVALIDATE_AFTER),
            },
            Route::Relay { origin } => {
                let mut query = vec![(ENDPOINT_PARAM.to_owned(), endpoint.path().to_owned())];
                // `endpoint` belongs to the relay; a caller's own is dropped.
                query.extend(forwarded.filter(|(key, _)| key != ENDPOINT_PARAM));
                ProxyRequest {
                    endpoint,
                    url: format!("{origin}{RELAY_PATH}"),
                    query,
                    revalidate: None,
                }
            }
        }
    }

    /// Performs the call and decodes the JSON body.
    pub fn fetch_api<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: &QueryParams,
    ) -> FetchResult<T> {
        let request = self.build_request(endpoint, params);
        let cache_key = request.full_url();

        if let Some(max_age) = request.revalidate {
            if let Some(cached) = self.cache.get(&cache_key, max_age) {
                debug!(url = %cache_key, "reusing cached upstream response");
                return Ok(serde_json::from_value(cached)?);
            }
        }

        let mut call = self
            .agent
            .get(&request.url)
            .set("Accept", "application/json");
        for (key, value) in &request.query {
            call = call.query(key, value);
        }

        debug!(url = %cache_key, "fetching");
        let body: Value = match call.call() {
            Ok(response) => response.into_json()?,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport(transport.to_string()));
            }
        };

        if let Some(max_age) = request.revalidate {
            self.cache.put(cache_key, body.clone(), max_age);
        }
        Ok(serde_json::from_value(body)?)
    }

    pub fn get_homepage(&self) -> FetchResult<HomepageResponse> {
        self.fetch_api(Endpoint::Homepage, &QueryParams::new())
    }

    pub fn search_content(
        &self,
        query: &str,
        subject_type: &str,
        page: u32,
        per_page: u32,
    ) -> FetchResult<SearchResponse> {
        let params = QueryParams::new()
            .with("query", query)
            .with("subject_type", subject_type)
            .with("page", page.to_string())
            .with("per_page", per_page.to_string());
        self.fetch_api(Endpoint::Search, &params)
    }

    pub fn get_detail(&self, api_url: &str) -> FetchResult<DetailResponse> {
        self.fetch_api(Endpoint::Detail, &QueryParams::new().with("url", api_url))
    }

    pub fn get_sources(
        &self,
        api_url: &str,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> FetchResult<SourcesResponse> {
        let mut params = QueryParams::new().with("url", api_url);
        params
            .set_optional("season", season)
            .set_optional("episode", episode);
        self.fetch_api(Endpoint::Sources, &params)
    }

    pub fn get_stream_link(
        &self,
        api_url: &str,
        season: Option<u32>,
        episode: Option<u32>,
        quality: &str,
    ) -> FetchResult<StreamResponse> {
        let mut params = QueryParams::new()
            .with("url", api_url)
            .with("quality", quality);
        params
            .set_optional("season", season)
            .set_optional("episode", episode);
        self.fetch_api(Endpoint::GenerateStreamLink, &params)
    }

    pub fn direct_stream_url(&self, video_url: &str) -> String {
        direct_stream_url(&self.upstream_base, video_url)
    }
}

pub const DEFAULT_SUBJECT_TYPE: &str = "all";
pub const DEFAULT_PER_PAGE: u32 = 24;
pub const DEFAULT_QUALITY: &str = "best";

/// Media URL the player can open directly. Pure string work, no request.
pub fn direct_stream_url(upstream_base: &str, video_url: &str) -> String {
    format!(
        "{}{DIRECT_STREAM_PATH}?url={}",
        upstream_base.trim_end_matches('/'),
        encode_component(video_url)
    )
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}
