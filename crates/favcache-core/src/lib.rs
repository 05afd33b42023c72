//! favcache Core Library
//!
//! This crate provides shared types and configuration for the favcache
//! worker, its storage layer and its hosts.

pub mod config;
pub mod types;

pub use config::{WorkerConfig, DEFAULT_CACHE_VERSION, DEFAULT_PRECACHE};
pub use types::{
    CacheVersion, FavoriteRecord, ImageSource, KeyPolicy, PatternType, UrlPattern,
};
