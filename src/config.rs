//! Runtime configuration for media-feed-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All cache, prefetch and invalidation knobs (capacities, TTLs, thresholds,
//! coalescing windows) live here. Every section has defaults, so partial files work.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::fetch::types::{Scope, SortOrder};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "media-feed-cache", about = "Paginated media feed cache with push invalidation")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Base URL of the paginated source (overrides the config file).
    #[arg(long)]
    pub source_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Paginated source configuration.
    pub source: SourceConfig,

    /// Cache store configuration.
    pub cache: CacheConfig,

    /// Pagination defaults.
    pub pagination: PaginationConfig,

    /// Prefetching settings.
    pub prefetch: PrefetchConfig,

    /// Push invalidation settings.
    pub invalidation: InvalidationConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Where pages come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the record store API.
    pub base_url: String,

    /// Optional group/owner scope applied to every read.
    pub scope: Option<Scope>,

    /// Per-request timeout in milliseconds. A timeout counts as a network failure.
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api".to_string(),
            scope: None,
            timeout_ms: 10_000,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cache capacity, lifetime and eviction tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before eviction kicks in.
    pub max_entries: usize,

    /// Global default TTL in milliseconds.
    pub default_ttl_ms: u64,

    /// Per-category TTL overrides in milliseconds.
    pub category_ttls_ms: HashMap<String, u64>,

    /// Interval between background sweeps of expired entries.
    pub sweep_interval_ms: u64,

    /// Weight `K` in the eviction score `age + K / (access_count + 1)`, in seconds.
    pub access_weight_secs: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut category_ttls_ms = HashMap::new();
        category_ttls_ms.insert("pages".to_string(), 5 * 60 * 1000);
        category_ttls_ms.insert("items".to_string(), 10 * 60 * 1000);
        category_ttls_ms.insert("prefetch".to_string(), 2 * 60 * 1000);
        Self {
            max_entries: 500,
            default_ttl_ms: 5 * 60 * 1000,
            category_ttls_ms,
            sweep_interval_ms: 60 * 1000,
            access_weight_secs: 60.0,
        }
    }
}

impl CacheConfig {
    /// Effective TTL: explicit > category default > global default.
    pub fn resolve_ttl(&self, explicit: Option<Duration>, category: Option<&str>) -> Duration {
        if let Some(ttl) = explicit {
            return ttl;
        }
        category
            .and_then(|c| self.category_ttls_ms.get(c))
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or_else(|| self.default_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Page size and ordering defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Items requested per page.
    pub page_size: usize,

    /// Largest accepted `limit`.
    pub max_page_size: usize,

    /// Sort field sent when the caller does not choose one.
    pub default_sort_by: Option<String>,

    /// Sort direction sent with `default_sort_by`.
    pub default_sort_order: SortOrder,

    /// Filters active when the session starts.
    pub initial_filters: BTreeMap<String, String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_page_size: 200,
            default_sort_by: None,
            default_sort_order: SortOrder::Desc,
            initial_filters: BTreeMap::new(),
        }
    }
}

/// Prefetch strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Disable to run purely on demand.
    pub enabled: bool,

    /// Scrolled fraction of content (0.0 - 1.0) that triggers prefetching.
    pub threshold: f64,

    /// Maximum number of pages buffered ahead of the current cursor.
    pub max_prefetch_pages: usize,

    /// Scroll signals within this interval of the last prefetch trigger are
    /// held back; the latest one is evaluated when it ends.
    pub debounce_ms: u64,

    /// Extrapolate scroll velocity to prefetch earlier and deeper.
    pub predictive: bool,

    /// How far ahead the predictive mode projects the scroll position.
    pub predictive_horizon_ms: u64,

    /// Window of scroll samples used to estimate velocity.
    pub velocity_window_ms: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.7,
            max_prefetch_pages: 2,
            debounce_ms: 150,
            predictive: false,
            predictive_horizon_ms: 1_000,
            velocity_window_ms: 500,
        }
    }
}

impl PrefetchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Push channel and refresh coalescing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// WebSocket URL of the push channel. No push loop runs when absent.
    pub push_url: Option<String>,

    /// Events arriving within this window share one refresh.
    pub coalesce_window_ms: u64,

    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            push_url: None,
            coalesce_window_ms: 100,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl InvalidationConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

/// Exponential backoff with jitter for the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(url) = &cli.source_url {
            self.source.base_url = url.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.pagination.page_size, 50);
        assert_eq!(cfg.cache.max_entries, 500);
        assert!(cfg.prefetch.enabled);
    }

    #[test]
    fn test_ttl_precedence() {
        let cfg = CacheConfig::default();
        let explicit = Duration::from_millis(100);
        assert_eq!(cfg.resolve_ttl(Some(explicit), Some("pages")), explicit);
        assert_eq!(
            cfg.resolve_ttl(None, Some("items")),
            Duration::from_millis(10 * 60 * 1000)
        );
        assert_eq!(cfg.resolve_ttl(None, Some("unknown")), cfg.default_ttl());
        assert_eq!(cfg.resolve_ttl(None, None), cfg.default_ttl());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cache": {"max_entries": 2}, "prefetch": {"threshold": 0.5}}"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.cache.max_entries, 2);
        assert_eq!(cfg.cache.default_ttl_ms, 5 * 60 * 1000);
        assert_eq!(cfg.prefetch.threshold, 0.5);
        assert_eq!(cfg.prefetch.max_prefetch_pages, 2);
        assert_eq!(cfg.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.invalidation.coalesce_window_ms, 100);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "media-feed-cache",
            "--listen",
            "127.0.0.1:9000",
            "--source-url",
            "http://records.local/api",
        ]);
        let mut cfg = Config::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.server.listen, "127.0.0.1:9000");
        assert_eq!(cfg.source.base_url, "http://records.local/api");
    }
}
