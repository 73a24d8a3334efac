mod client;

pub use client::{
    ApiErrorClass, CatalogClient, CatalogError, CurrentUser, DEFAULT_PAGE_SIZE, Item,
    SavedTrackPage,
};
