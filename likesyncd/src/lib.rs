pub mod acquire;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod sync;
pub mod tagger;
