use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.spotify.com";

/// Largest page the saved-tracks endpoint accepts.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<Duration>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// A liked track as the rest of the system sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover_url: Option<String>,
}

#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CatalogClient {
    pub fn new(token: impl Into<String>) -> Result<Self, CatalogError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, CatalogError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn get_current_user(&self) -> Result<CurrentUser, CatalogError> {
        let url = self.endpoint("/v1/me")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_saved_tracks(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<SavedTrackPage, CatalogError> {
        let mut url = self.endpoint("/v1/me/tracks")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Walks every page until the endpoint returns a short one.
    ///
    /// Any page error aborts the whole listing: a partial result is never
    /// returned, so callers can't mistake a failed fetch for a shrunken catalog.
    pub async fn list_saved_tracks_all(&self, page_size: u32) -> Result<Vec<Item>, CatalogError> {
        let page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        let mut offset = 0u32;
        let mut items = Vec::new();
        loop {
            let page = self.list_saved_tracks(page_size, offset).await?;
            let fetched = page.len() as u32;
            items.extend(page.into_items());
            if fetched < page_size {
                break;
            }
            offset = offset.saturating_add(fetched);
        }
        Ok(items)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CatalogError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CatalogError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers(), SystemTime::now());
            let body = response.text().await.unwrap_or_default();
            Err(CatalogError::Api {
                status,
                body,
                retry_after,
            })
        }
    }
}

impl CatalogError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CatalogError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CatalogError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// Retry-After is either delta-seconds or an HTTP-date.
fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SavedTrackPage {
    items: Vec<SavedTrack>,
    pub limit: u32,
    pub offset: u32,
    pub total: u32,
}

impl SavedTrackPage {
    /// Raw entry count, including entries that `into_items` drops.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries without an id or without any artist are skipped.
    pub fn into_items(self) -> Vec<Item> {
        self.items
            .into_iter()
            .filter_map(|saved| saved.track)
            .filter_map(TrackObject::into_item)
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct SavedTrack {
    #[serde(default)]
    track: Option<TrackObject>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TrackObject {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistObject>,
    #[serde(default)]
    album: Option<AlbumObject>,
}

impl TrackObject {
    fn into_item(self) -> Option<Item> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let artist = self.artists.into_iter().next()?.name;
        let (album, cover_url) = match self.album {
            Some(album) => (album.name, album.images.into_iter().next().map(|i| i.url)),
            None => (String::new(), None),
        };
        Some(Item {
            id,
            title: self.name,
            artist,
            album,
            cover_url,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct AlbumObject {
    name: String,
    #[serde(default)]
    images: Vec<ImageObject>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ImageObject {
    url: String,
}
