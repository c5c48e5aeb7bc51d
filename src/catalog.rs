//! Catalog records exchanged with the upstream content API.
//!
//! The structs mirror the JSON the upstream service returns. Fields the
//! front-end does not interpret are kept in `extras` so a record survives a
//! round trip through the history store without losing data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Image descriptor attached to subjects, banners and episodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub blur_hash: String,
}

/// Known values of `subjectType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    Movie,
    Series,
    Music,
    Short,
    Other(i64),
}

impl SubjectType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Movie,
            2 => Self::Series,
            6 => Self::Music,
            7 => Self::Short,
            other => Self::Other(other),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Movie => "Movie",
            Self::Series => "TV Series",
            Self::Music => "Music",
            Self::Short => "Short",
            Self::Other(_) => "Other",
        }
    }
}

/// A single title ("subject") as returned by the upstream catalog.
///
/// `subject_id` is the only identity; every dedup and lookup goes through it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub subject_id: String,
    #[serde(default)]
    pub subject_type: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub release_date: String,
    /// Runtime in seconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub cover: ImageData,
    #[serde(default)]
    pub country_name: String,
    #[serde(default)]
    pub imdb_rating_value: f64,
    #[serde(default)]
    pub detail_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner: Option<String>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl CatalogItem {
    pub fn kind(&self) -> SubjectType {
        SubjectType::from_code(self.subject_type)
    }

    pub fn is_series(&self) -> bool {
        self.kind() == SubjectType::Series
    }

    /// Route of the detail page, also used as the `url` parameter upstream.
    pub fn detail_url(&self) -> String {
        build_detail_url(&self.detail_path, &self.subject_id)
    }
}

/// A catalog item together with the moment it was last watched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub item: CatalogItem,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl HistoryEntry {
    pub fn subject_id(&self) -> &str {
        &self.item.subject_id
    }
}

/// Envelope shared by every upstream JSON endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Payload of a successful response; `success: false` counts as no data.
    pub fn into_data(self) -> Option<T> {
        if self.success { self.data } else { None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: ImageData,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub subject_type: i64,
    #[serde(default)]
    pub subject: Option<CatalogItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Banner {
    #[serde(default)]
    pub items: Vec<BannerItem>,
}

/// One row of the homepage feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingItem {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subjects: Vec<CatalogItem>,
    #[serde(default)]
    pub banner: Option<Banner>,
    #[serde(default)]
    pub op_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub upload_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Homepage {
    #[serde(default)]
    pub operating_list: Vec<OperatingItem>,
    #[serde(default)]
    pub platform_list: Vec<Platform>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPager {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_page: i64,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub per_page: i64,
    #[serde(default)]
    pub total_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub items: Vec<CatalogItem>,
    #[serde(default)]
    pub pager: SearchPager,
}

pub type HomepageResponse = ApiResponse<Homepage>;
pub type SearchResponse = ApiResponse<SearchPage>;
/// Detail, sources and stream-link payloads are loosely shaped upstream and
/// are picked apart by the page loaders.
pub type DetailResponse = ApiResponse<Value>;
pub type SourcesResponse = ApiResponse<Value>;
pub type StreamResponse = ApiResponse<Value>;

/// Route of a detail page: `/detail/{path}?id={subjectId}`.
pub fn build_detail_url(detail_path: &str, subject_id: &str) -> String {
    format!("/detail/{detail_path}?id={subject_id}")
}

/// Human readable runtime, e.g. `1h 32m` or `45m`. Zero yields an empty string.
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return String::new();
    }
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
