use std::future::Future;
use std::path::{Path, PathBuf};

use id3::frame::{Picture, PictureType};
use id3::{Tag, TagLike, Version};
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag error: {0}")]
    Id3(#[from] id3::Error),
    #[error("tagging task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("file to tag is missing: {0}")]
    MissingFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover_url: Option<String>,
}

pub trait MetadataTagger: Send + Sync + 'static {
    fn tag(
        &self,
        path: &Path,
        tags: &TrackTags,
    ) -> impl Future<Output = Result<(), TagError>> + Send;
}

/// Writes ID3v2.4 title/artist/album frames plus the album cover as the
/// front-cover picture.
#[derive(Clone)]
pub struct Id3Tagger {
    http: Client,
}

impl Default for Id3Tagger {
    fn default() -> Self {
        Self::new()
    }
}

impl Id3Tagger {
    pub fn new() -> Self {
        Self::with_http(Client::new())
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }

    // Cover art is best effort: a broken image URL must not lose the track.
    async fn fetch_cover(&self, url: &str) -> Option<(Vec<u8>, String)> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%url, %err, "cover download failed");
                return None;
            }
        };
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%url, %err, "cover download rejected");
                return None;
            }
        };
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some((bytes.to_vec(), mime)),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(%url, %err, "cover body read failed");
                None
            }
        }
    }
}

impl MetadataTagger for Id3Tagger {
    async fn tag(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TagError::MissingFile(path.to_path_buf()));
        }
        let cover = match tags.cover_url.as_deref() {
            Some(url) => self.fetch_cover(url).await,
            None => None,
        };
        let path = path.to_path_buf();
        let tags = tags.clone();
        tokio::task::spawn_blocking(move || write_tags(&path, &tags, cover)).await??;
        Ok(())
    }
}

fn write_tags(
    path: &Path,
    tags: &TrackTags,
    cover: Option<(Vec<u8>, String)>,
) -> Result<(), TagError> {
    let mut tag = Tag::read_from_path(path).unwrap_or_else(|_| Tag::new());
    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    if tags.album.trim().is_empty() {
        tag.remove_album();
    } else {
        tag.set_album(tags.album.clone());
    }
    if let Some((data, mime_type)) = cover {
        tag.remove_picture_by_type(PictureType::CoverFront);
        tag.add_frame(Picture {
            mime_type,
            picture_type: PictureType::CoverFront,
            description: String::new(),
            data,
        });
    }
    tag.write_to_path(path, Version::Id3v24)?;
    Ok(())
}
