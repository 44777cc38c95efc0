use crate::detectors::NudityMode;
use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub models_dir: PathBuf,
    pub http_addr: SocketAddr,
    pub grpc_addr: SocketAddr,
    pub max_upload_bytes: usize,
    /// Folder scans are confined below this directory when set.
    pub process_root: Option<PathBuf>,
    pub intra_threads: usize,
    pub nudity_mode: NudityMode,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            http_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            grpc_addr: SocketAddr::from((Ipv6Addr::LOCALHOST, 50051)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            process_root: None,
            intra_threads: num_cpus::get(),
            nudity_mode: NudityMode::Default,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`; bad values warn and keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let models_dir = get("TRIAGE_MODELS_DIR")
            .or_else(|| get("MODEL_DIR"))
            .map(PathBuf::from)
            .unwrap_or(defaults.models_dir);

        Self {
            models_dir,
            http_addr: parse_or("TRIAGE_HTTP_ADDR", get("TRIAGE_HTTP_ADDR"), defaults.http_addr),
            grpc_addr: parse_or("TRIAGE_GRPC_ADDR", get("TRIAGE_GRPC_ADDR"), defaults.grpc_addr),
            max_upload_bytes: parse_or(
                "TRIAGE_MAX_UPLOAD_BYTES",
                get("TRIAGE_MAX_UPLOAD_BYTES"),
                defaults.max_upload_bytes,
            ),
            process_root: get("TRIAGE_PROCESS_ROOT").map(PathBuf::from),
            intra_threads: parse_valid(
                "TRIAGE_INTRA_THREADS",
                get("TRIAGE_INTRA_THREADS"),
                defaults.intra_threads,
                |threads| *threads > 0,
            ),
            nudity_mode: parse_or(
                "TRIAGE_NUDITY_MODE",
                get("TRIAGE_NUDITY_MODE"),
                defaults.nudity_mode,
            ),
        }
    }
}

fn parse_or<T: FromStr + Display>(key: &str, raw: Option<String>, default: T) -> T {
    parse_valid(key, raw, default, |_| true)
}

fn parse_valid<T: FromStr + Display>(
    key: &str,
    raw: Option<String>,
    default: T,
    is_valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = raw else { return default };
    match raw.parse() {
        Ok(value) if is_valid(&value) => value,
        _ => {
            warn!("Invalid {}='{}', falling back to {}", key, raw, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServiceConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = config_from(&[]);
        assert_eq!(config.models_dir, PathBuf::from("models"));
        assert_eq!(config.http_addr.port(), 5000);
        assert_eq!(config.grpc_addr.port(), 50051);
        assert_eq!(config.max_upload_bytes, 200 * 1024 * 1024);
        assert!(config.process_root.is_none());
        assert!(config.intra_threads >= 1);
        assert_eq!(config.nudity_mode, NudityMode::Default);
    }

    #[test]
    fn model_dir_is_a_fallback_for_models_dir() {
        let config = config_from(&[("MODEL_DIR", "/opt/legacy")]);
        assert_eq!(config.models_dir, PathBuf::from("/opt/legacy"));
        let config = config_from(&[("MODEL_DIR", "/opt/legacy"), ("TRIAGE_MODELS_DIR", "/opt/m")]);
        assert_eq!(config.models_dir, PathBuf::from("/opt/m"));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config_from(&[
            ("TRIAGE_HTTP_ADDR", "not-an-addr"),
            ("TRIAGE_MAX_UPLOAD_BYTES", "lots"),
            ("TRIAGE_INTRA_THREADS", "0"),
            ("TRIAGE_PROCESS_ROOT", "/evidence"),
            ("TRIAGE_NUDITY_MODE", "warp"),
        ]);
        assert_eq!(config.http_addr.port(), 5000);
        assert_eq!(config.max_upload_bytes, 200 * 1024 * 1024);
        assert_eq!(config.intra_threads, num_cpus::get());
        assert_eq!(config.process_root, Some(PathBuf::from("/evidence")));
        assert_eq!(config.nudity_mode, NudityMode::Default);
    }

    #[test]
    fn explicit_thread_counts_are_kept() {
        let config = config_from(&[("TRIAGE_INTRA_THREADS", "3")]);
        assert_eq!(config.intra_threads, 3);
        let config = config_from(&[("TRIAGE_INTRA_THREADS", "-2")]);
        assert_eq!(config.intra_threads, num_cpus::get());
    }

    #[test]
    fn nudity_mode_is_configurable() {
        let config = config_from(&[("TRIAGE_NUDITY_MODE", "fast")]);
        assert_eq!(config.nudity_mode, NudityMode::Fast);
    }
}
