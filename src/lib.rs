//! Document search core: query compilation, cached tag counts, opaque
//! download tokens and dashboard statistics, served over HTTP.
//!
//! The search index (Elasticsearch) and the key-value cache (Redis) sit
//! behind the traits in [`storage`], so everything above them can run
//! against the in-memory implementations as well.

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod stats;
pub mod storage;
pub mod tag_cache;

pub use api::{router, AppState};
pub use codec::SecureUriCodec;
pub use config::Config;
pub use error::{ApiError, DecodeError, EncodeError, ProviderError, ProviderResult, ValidationError};
pub use tag_cache::{CacheState, TagCache};
