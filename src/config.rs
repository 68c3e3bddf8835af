use clap::Parser;
use std::time::Duration;

use crate::query::compiler::MAX_TAGS_TO_RETRIEVE_IN_AGG;

#[derive(Parser, Debug, Clone)]
#[command(name = "docsearch-server")]
#[command(about = "Document search, tagging and download service", long_about = None)]
pub struct Config {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8004")]
    pub bind_addr: String,

    #[arg(long, env = "ELASTICSEARCH_URL", default_value = "http://localhost:9200")]
    pub elasticsearch_url: String,

    #[arg(long, env = "ES_INDEX", default_value = "ambar_file_data")]
    pub es_index: String,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    /// Shared secret for download tokens. Every node must use the same value.
    #[arg(long, env = "URI_SECRET", hide_env_values = true)]
    pub uri_secret: String,

    /// Rebuild the tag cache from the index at least this often.
    #[arg(long, env = "TAG_CACHE_TTL_SECS")]
    pub tag_cache_ttl_secs: Option<u64>,

    #[arg(long, env = "MAX_TAGS_IN_AGG", default_value_t = MAX_TAGS_TO_RETRIEVE_IN_AGG)]
    pub max_tags_in_agg: usize,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn tag_cache_ttl(&self) -> Option<Duration> {
        self.tag_cache_ttl_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
