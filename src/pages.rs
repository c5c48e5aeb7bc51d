//! Page assembly on top of the request router.
//!
//! Each loader turns upstream responses into the state a view renders. Fetch
//! failures and `success: false` envelopes never escape as errors: they become
//! empty collections or a [`PageError`] describing what is unavailable. Pages
//! that need two requests issue them concurrently and use whatever settles
//! successfully.

use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    api::{DEFAULT_PER_PAGE, FetchResult, RequestRouter},
    catalog::{ApiResponse, BannerItem, CatalogItem, build_detail_url},
    history::HistoryStore,
};

pub const BANNER_ROW: &str = "BANNER";
pub const MOVIE_ROW: &str = "SUBJECTS_MOVIE";
pub const TV_ROW: &str = "SUBJECTS_TV";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("Missing content identifier")]
    MissingIdentifier,
    #[error("Failed to load content details")]
    DetailsUnavailable,
    #[error("No video sources available for this content")]
    NoSources,
    #[error("Failed to load video sources. Please try again.")]
    SourcesUnavailable,
}

/// One downloadable rendition listed by the sources endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Download {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub resolution: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub language: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    #[serde(default)]
    pub se: u32,
    #[serde(default, rename = "maxEp")]
    pub max_ep: u32,
}

pub fn detail_link(slug: &str, subject_id: &str) -> String {
    build_detail_url(slug, subject_id)
}

pub fn watch_link(slug: &str, subject_id: &str, episode: Option<(u32, u32)>) -> String {
    match episode {
        Some((season, episode)) => {
            format!("/watch/{slug}?id={subject_id}&season={season}&episode={episode}")
        }
        None => format!("/watch/{slug}?id={subject_id}"),
    }
}

/// Outcome of one request in an all-settled pair.
fn settle(
    label: &str,
    joined: thread::Result<FetchResult<ApiResponse<Value>>>,
) -> Option<Value> {
    match joined {
        Ok(Ok(response)) => response.into_data(),
        Ok(Err(err)) => {
            warn!(request = label, error = %err, "request failed");
            None
        }
        Err(_) => {
            error!(request = label, "request worker panicked");
            None
        }
    }
}

/// Runs the detail and sources requests side by side. Neither outcome
/// affects the other.
fn detail_and_sources(
    router: &RequestRouter,
    api_url: &str,
    season: Option<u32>,
    episode: Option<u32>,
) -> (Option<Value>, Option<Value>) {
    thread::scope(|scope| {
        let detail = scope.spawn(|| router.get_detail(api_url));
        let sources = scope.spawn(|| router.get_sources(api_url, season, episode));
        (
            settle("detail", detail.join()),
            settle("sources", sources.join()),
        )
    })
}

fn subject_of(res_data: &Value) -> Option<CatalogItem> {
    let subject = res_data.get("subject")?;
    match serde_json::from_value(subject.clone()) {
        Ok(item) => Some(item),
        Err(err) => {
            warn!(error = %err, "unexpected subject shape");
            None
        }
    }
}

/// Older detail payloads carry `imdbRate` and `durationSeconds` instead of
/// `imdbRatingValue` and `duration`.
fn apply_legacy_fields(subject: &mut CatalogItem) {
    fn number(value: Option<&Value>) -> Option<f64> {
        match value? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    if subject.imdb_rating_value <= 0.0 {
        if let Some(rate) = number(subject.extras.get("imdbRate")) {
            subject.imdb_rating_value = rate;
        }
    }
    if subject.duration <= 0 {
        if let Some(seconds) = number(subject.extras.get("durationSeconds")) {
            subject.duration = seconds as i64;
        }
    }
}

fn seasons_of(res_data: &Value) -> Vec<Season> {
    res_data
        .pointer("/resource/seasons")
        .and_then(Value::as_array)
        .map(|seasons| {
            seasons
                .iter()
                .filter_map(|season| serde_json::from_value(season.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn downloads_of(sources: &Value) -> Vec<Download> {
    sources
        .get("downloads")
        .and_then(Value::as_array)
        .map(|downloads| {
            downloads
                .iter()
                .filter_map(|download| serde_json::from_value(download.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Captions with both a language name and a URL.
fn subtitles_of(sources: &Value) -> Vec<SubtitleTrack> {
    sources
        .get("captions")
        .and_then(Value::as_array)
        .map(|captions| {
            captions
                .iter()
                .filter_map(|caption| {
                    let url = caption.get("url")?.as_str().filter(|s| !s.is_empty())?;
                    let language = caption.get("lanName")?.as_str().filter(|s| !s.is_empty())?;
                    Some(SubtitleTrack {
                        language: language.to_owned(),
                        url: url.to_owned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Highest resolution first; ties keep upstream order.
fn best_download(downloads: &[Download]) -> Option<&Download> {
    downloads
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.resolution.cmp(&b.resolution).then(ib.cmp(ia)))
        .map(|(_, download)| download)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub slug: String,
    pub subject_id: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl WatchRequest {
    pub fn episode(&self) -> Option<(u32, u32)> {
        self.season.zip(self.episode)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchPage {
    pub title: String,
    pub poster: String,
    pub stream_url: Option<String>,
    pub subtitles: Vec<SubtitleTrack>,
    /// Episodes in the current season, zero when unknown or not a series.
    pub total_episodes: u32,
    pub episode_links: Vec<String>,
    pub detail_link: String,
    pub error: Option<PageError>,
}

impl WatchPage {
    /// Machine readable form; a page that failed to resolve a stream reports
    /// the error and the way back to the detail page instead.
    pub fn to_json(&self) -> Value {
        match &self.error {
            Some(err) => serde_json::json!({
                "error": err.to_string(),
                "detail": self.detail_link,
            }),
            None => serde_json::json!({
                "title": self.title,
                "poster": self.poster,
                "stream": self.stream_url,
                "subtitles": self.subtitles,
                "episodes": self.episode_links,
            }),
        }
    }
}

/// Loads everything the watch page shows and records the title in `history`
/// once its details are known.
pub fn load_watch(
    router: &RequestRouter,
    history: &HistoryStore,
    request: &WatchRequest,
) -> Result<WatchPage, PageError> {
    if request.slug.is_empty() || request.subject_id.is_empty() {
        return Err(PageError::MissingIdentifier);
    }

    let api_url = build_detail_url(&request.slug, &request.subject_id);
    let (detail, sources) =
        detail_and_sources(router, &api_url, request.season, request.episode);

    let mut page = WatchPage {
        detail_link: detail_link(&request.slug, &request.subject_id),
        ..Default::default()
    };

    let res_data = detail.as_ref().and_then(|data| data.get("resData"));
    if let Some(subject) = res_data.and_then(subject_of) {
        page.poster = subject.cover.url.clone();
        history.add_to_history(&subject);

        match request.episode() {
            Some((season, episode)) if season > 0 && episode > 0 => {
                page.title = format!("{} - S{season}E{episode}", subject.title);
                if let Some(current) = res_data
                    .map(seasons_of)
                    .unwrap_or_default()
                    .into_iter()
                    .find(|s| s.se == season)
                {
                    page.total_episodes = current.max_ep;
                    page.episode_links = (1..=current.max_ep)
                        .map(|ep| {
                            watch_link(&request.slug, &request.subject_id, Some((season, ep)))
                        })
                        .collect();
                }
            }
            _ => page.title = subject.title.clone(),
        }
    }

    match sources {
        Some(sources) => {
            let downloads = downloads_of(&sources);
            match best_download(&downloads) {
                Some(best) => page.stream_url = Some(router.direct_stream_url(&best.url)),
                None => page.error = Some(PageError::NoSources),
            }
            page.subtitles = subtitles_of(&sources);
        }
        None => page.error = Some(PageError::SourcesUnavailable),
    }

    Ok(page)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailPage {
    pub slug: String,
    /// Identifier the page was requested with; links are built from it.
    pub subject_id: String,
    pub subject: CatalogItem,
    pub stars: Vec<Value>,
    pub seasons: Vec<Season>,
    pub downloads: Vec<Download>,
}

impl DetailPage {
    pub fn is_series(&self) -> bool {
        self.subject.is_series()
    }

    /// Link of the play button; series start at episode 1 of `season`.
    pub fn watch_link(&self, season: u32) -> String {
        let episode = self.is_series().then_some((season, 1));
        watch_link(&self.slug, &self.subject_id, episode)
    }

    pub fn episode_links(&self, season: u32) -> Vec<String> {
        self.seasons
            .iter()
            .find(|s| s.se == season)
            .map(|s| {
                (1..=s.max_ep)
                    .map(|ep| watch_link(&self.slug, &self.subject_id, Some((season, ep))))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn load_detail(
    router: &RequestRouter,
    slug: &str,
    subject_id: &str,
) -> Result<DetailPage, PageError> {
    if slug.is_empty() || subject_id.is_empty() {
        return Err(PageError::MissingIdentifier);
    }

    let api_url = build_detail_url(slug, subject_id);
    let (detail, sources) = detail_and_sources(router, &api_url, None, None);

    let res_data = detail
        .as_ref()
        .and_then(|data| data.get("resData"))
        .ok_or(PageError::DetailsUnavailable)?;

    let mut subject = match res_data.get("subject") {
        Some(_) => subject_of(res_data).ok_or(PageError::DetailsUnavailable)?,
        None => CatalogItem {
            subject_id: subject_id.to_owned(),
            ..Default::default()
        },
    };
    let stars = res_data
        .get("stars")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    apply_legacy_fields(&mut subject);

    Ok(DetailPage {
        slug: slug.to_owned(),
        subject_id: subject_id.to_owned(),
        subject,
        stars,
        seasons: seasons_of(res_data),
        downloads: sources.as_ref().map(downloads_of).unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub items: Vec<CatalogItem>,
    pub page: u32,
    pub has_more: bool,
}

/// Runs a search. A blank query yields no results without touching the
/// network; failures yield no results and no further pages.
pub fn search(router: &RequestRouter, query: &str, filter: &str, page: u32) -> SearchResults {
    let empty = SearchResults {
        page,
        ..Default::default()
    };
    if query.trim().is_empty() {
        return empty;
    }

    match router.search_content(query, filter, page, DEFAULT_PER_PAGE) {
        Ok(response) => match response.into_data() {
            Some(data) => SearchResults {
                items: data.items,
                page,
                has_more: data.pager.has_more,
            },
            None => empty,
        },
        Err(err) => {
            warn!(%query, error = %err, "search failed");
            empty
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub title: String,
    pub subjects: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Default)]
pub struct HomePage {
    pub banner: Vec<BannerItem>,
    pub categories: Vec<CategoryRow>,
}

/// Homepage feed: the last banner row plus every non-empty movie/TV row.
pub fn load_homepage(router: &RequestRouter) -> HomePage {
    let mut home = HomePage::default();
    let feed = match router.get_homepage() {
        Ok(response) => response.into_data(),
        Err(err) => {
            error!(error = %err, "homepage fetch error");
            None
        }
    };

    for row in feed.map(|feed| feed.operating_list).unwrap_or_default() {
        if row.kind == BANNER_ROW {
            if let Some(banner) = row.banner.filter(|banner| !banner.items.is_empty()) {
                home.banner = banner.items;
            }
        }
        if (row.kind == MOVIE_ROW || row.kind == TV_ROW) && !row.subjects.is_empty() {
            home.categories.push(CategoryRow {
                title: row.title,
                subjects: row.subjects,
            });
        }
    }
    home
}
