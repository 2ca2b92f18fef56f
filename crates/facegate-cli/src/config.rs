use facegate_core::{check_dimension, MatcherKind, DEFAULT_DIMENSION, DEFAULT_TOLERANCE};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite user database.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// Embedding dimensionality for this deployment.
    pub dimension: usize,
    /// Nearest-neighbor strategy.
    pub matcher: MatcherKind,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = lookup("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("users.db"));

        let matcher = match lookup("FACEGATE_MATCHER").map(|v| v.parse::<MatcherKind>()) {
            Some(Ok(kind)) => kind,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "ignoring FACEGATE_MATCHER");
                MatcherKind::default()
            }
            None => MatcherKind::default(),
        };

        Self {
            db_path,
            tolerance: parsed(&lookup, "FACEGATE_TOLERANCE", DEFAULT_TOLERANCE, |t: &f32| {
                *t >= 0.0
            }),
            dimension: parsed(&lookup, "FACEGATE_DIMENSION", DEFAULT_DIMENSION, |d: &usize| {
                check_dimension(*d).is_ok()
            }),
            matcher,
        }
    }
}

/// Parse `key`, falling back to `default` (with a warning) when the value is
/// malformed or out of range.
fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!(key, value = %raw, "ignoring invalid setting");
            default
        }
    }
}
