//! In-process stand-in for the upstream content API used by unit tests.

use std::{
    collections::HashMap,
    net::TcpListener as StdTcpListener,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

type Params = HashMap<String, String>;

#[derive(Clone, Default)]
struct FakeState {
    hits: Arc<AtomicUsize>,
    last_query: Arc<Mutex<Params>>,
    last_headers: Arc<Mutex<HashMap<String, String>>>,
}

pub(crate) struct Upstream {
    pub base: String,
    pub hits: Arc<AtomicUsize>,
    last_query: Arc<Mutex<Params>>,
    last_headers: Arc<Mutex<HashMap<String, String>>>,
}

impl Upstream {
    pub fn last_query(&self, key: &str) -> Option<String> {
        self.last_query.lock().get(key).cloned()
    }

    pub fn last_query_len(&self) -> usize {
        self.last_query.lock().len()
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.last_headers.lock().get(name).cloned()
    }
}

/// Starts the fake upstream on its own thread and runtime so blocking clients
/// can call it from plain `#[test]` functions.
pub(crate) fn spawn_upstream() -> Upstream {
    let state = FakeState::default();
    let app = Router::new()
        .route("/moviebox/homepage", get(homepage))
        .route("/moviebox/search", get(search))
        .route("/moviebox/detail", get(detail))
        .route("/moviebox/sources", get(sources))
        .route("/moviebox/generate-link-stream-video", get(echo))
        .layer(axum::middleware::from_fn_with_state(state.clone(), record))
        .with_state(state.clone());

    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    Upstream {
        base: format!("http://{addr}"),
        hits: state.hits,
        last_query: state.last_query,
        last_headers: state.last_headers,
    }
}

/// Base URL on which nothing is listening.
pub(crate) fn closed_base() -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn record(
    State(state): State<FakeState>,
    Query(params): Query<Params>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock() = params;
    *state.last_headers.lock() = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect();
    next.run(request).await
}

fn subject_id_of(params: &Params) -> String {
    params
        .get("url")
        .and_then(|url| url.rsplit("id=").next())
        .unwrap_or_default()
        .to_owned()
}

async fn homepage() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "operatingList": [{
                "type": "SUBJECTS_MOVIE",
                "position": 1,
                "title": "Trending",
                "opId": "op-1",
                "subjects": [{"subjectId": "m1", "title": "Movie One", "subjectType": 1}]
            }],
            "platformList": [{"name": "Fake", "uploadBy": "tests"}]
        }
    }))
}

async fn search(Query(params): Query<Params>) -> Response {
    let query = params.get("query").cloned().unwrap_or_default();
    match query.as_str() {
        "nothing" => return Json(json!({"success": false, "data": null})).into_response(),
        "outage" => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
        "garbled" => return "definitely not json".into_response(),
        _ => {}
    }
    let page: i64 = params
        .get("page")
        .and_then(|page| page.parse().ok())
        .unwrap_or(1);
    Json(json!({
        "success": true,
        "data": {
            "items": [{"subjectId": format!("s-{query}"), "title": query}],
            "pager": {"hasMore": page == 1, "nextPage": page + 1, "page": page, "perPage": 24, "totalCount": 2}
        }
    }))
    .into_response()
}

async fn detail(Query(params): Query<Params>) -> Response {
    let id = subject_id_of(&params);
    match id.as_str() {
        "missing" => StatusCode::NOT_FOUND.into_response(),
        "broken" => Json(json!({"success": false, "data": null})).into_response(),
        "legacy" => Json(json!({
            "success": true,
            "data": {
                "resData": {
                    "subject": {
                        "subjectId": "legacy-canonical",
                        "subjectType": 1,
                        "title": "Old Film",
                        "imdbRate": 7.4,
                        "durationSeconds": 5400
                    }
                }
            }
        }))
        .into_response(),
        _ => {
            let subject_type = if id.starts_with("series") { 2 } else { 1 };
            Json(json!({
                "success": true,
                "data": {
                    "resData": {
                        "subject": {
                            "subjectId": id,
                            "subjectType": subject_type,
                            "title": "Fake Title",
                            "detailPath": "fake-title",
                            "cover": {"url": "https://img.test/cover.jpg", "width": 100, "height": 150}
                        },
                        "stars": [{"name": "Someone", "character": "Lead"}],
                        "resource": {
                            "seasons": [{"se": 1, "maxEp": 8}, {"se": 2, "maxEp": 10}]
                        }
                    }
                }
            }))
            .into_response()
        }
    }
}

async fn sources(Query(params): Query<Params>) -> Response {
    let id = subject_id_of(&params);
    if id.ends_with("failsrc") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let downloads = if id.ends_with("nosrc") {
        json!([])
    } else {
        json!([
            {"url": "https://cdn.test/480.mp4", "resolution": 480},
            {"url": "https://cdn.test/1080.mp4", "resolution": 1080},
            {"url": "https://cdn.test/720.mp4", "resolution": 720}
        ])
    };
    Json(json!({
        "success": true,
        "data": {
            "downloads": downloads,
            "captions": [
                {"lanName": "English", "url": "https://cdn.test/en.srt"},
                {"lanName": "", "url": "https://cdn.test/blank.srt"},
                {"url": "https://cdn.test/nameless.srt"}
            ]
        }
    }))
    .into_response()
}

async fn echo(Query(params): Query<Params>) -> Json<Value> {
    Json(json!({"success": true, "data": {"received": params}}))
}
