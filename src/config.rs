use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// JSON file with users and rooms. Defaults to `<data_dir>/directory.json`.
    pub directory: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(get("ROOMBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let directory = get("ROOMBOOK_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("directory.json"));
        Self {
            port: parsed(&get, "ROOMBOOK_PORT").unwrap_or(5433),
            bind: get("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            directory,
            data_dir,
            max_connections: parsed(&get, "ROOMBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "ROOMBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&get, "ROOMBOOK_METRICS_PORT"),
            tls_cert: get("ROOMBOOK_TLS_CERT").map(PathBuf::from),
            tls_key: get("ROOMBOOK_TLS_KEY").map(PathBuf::from),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.parse().ok())
}
