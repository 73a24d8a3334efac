use std::future::Future;
use std::sync::{Arc, RwLock};

use likesync_core::{CatalogClient, CatalogError, CurrentUser, DEFAULT_PAGE_SIZE, Item};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("catalog credentials unavailable: {0}")]
    AuthUnavailable(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl SourceError {
    pub fn is_auth(&self) -> bool {
        match self {
            SourceError::AuthUnavailable(_) => true,
            SourceError::Catalog(err) => err.is_auth(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Catalog(err) if err.is_retryable())
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            SourceError::Catalog(err) => err.retry_after(),
            SourceError::AuthUnavailable(_) => None,
        }
    }
}

/// The remote liked-tracks catalog. `fetch_all` either returns the complete
/// listing or fails; a partial listing is never returned.
pub trait CatalogSource: Send + Sync + 'static {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Item>, SourceError>> + Send;
}

impl<S: CatalogSource> CatalogSource for Arc<S> {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<Item>, SourceError>> + Send {
        (**self).fetch_all()
    }
}

/// Holds the authenticated client. Credentials only change through
/// [`CatalogContext::set_token`] and [`CatalogContext::clear`].
pub struct CatalogContext {
    base_url: Option<String>,
    page_size: u32,
    client: RwLock<Option<CatalogClient>>,
}

impl CatalogContext {
    pub fn new(base_url: Option<String>, token: Option<String>) -> Result<Self, CatalogError> {
        let context = Self {
            base_url,
            page_size: DEFAULT_PAGE_SIZE,
            client: RwLock::new(None),
        };
        if let Some(token) = token {
            context.set_token(token)?;
        }
        Ok(context)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn set_token(&self, token: impl Into<String>) -> Result<(), CatalogError> {
        let client = match self.base_url.as_deref() {
            Some(url) => CatalogClient::with_base_url(url, token)?,
            None => CatalogClient::new(token)?,
        };
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        Ok(())
    }

    pub fn clear(&self) {
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Checks the configured credentials against the catalog.
    pub async fn current_user(&self) -> Result<CurrentUser, SourceError> {
        let client = self
            .client()
            .ok_or_else(|| SourceError::AuthUnavailable("no access token configured".into()))?;
        Ok(client.get_current_user().await?)
    }

    fn client(&self) -> Option<CatalogClient> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CatalogSource for CatalogContext {
    async fn fetch_all(&self) -> Result<Vec<Item>, SourceError> {
        let client = self
            .client()
            .ok_or_else(|| SourceError::AuthUnavailable("no access token configured".into()))?;
        let items = client.list_saved_tracks_all(self.page_size).await?;
        Ok(items)
    }
}
