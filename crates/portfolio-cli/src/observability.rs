use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const QUIET_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "debug";
const DEFAULT_LOG_FILE: &str = "portfolio.logs.jsonl";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Logging setup resolved from the command line and the environment.
#[derive(Debug, PartialEq)]
struct LogSettings {
    enabled: bool,
    filter: String,
    json_path: Option<PathBuf>,
}

impl LogSettings {
    /// Filter precedence: `--verbose`, then `PORTFOLIO_LOG_LEVEL`, then
    /// `RUST_LOG`, then `warn`. Filters that do not parse are skipped.
    fn resolve(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("PORTFOLIO_OBSERVABILITY_ENABLED")
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);

        let filter = if verbose {
            VERBOSE_FILTER.to_string()
        } else {
            ["PORTFOLIO_LOG_LEVEL", "RUST_LOG"]
                .into_iter()
                .filter_map(&lookup)
                .find(|filter| EnvFilter::try_new(filter).is_ok())
                .unwrap_or_else(|| QUIET_FILTER.to_string())
        };

        Self {
            enabled,
            filter,
            json_path: lookup("PORTFOLIO_JSON_LOG_PATH").map(PathBuf::from),
        }
    }
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `PORTFOLIO_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `PORTFOLIO_LOG_LEVEL`, then `RUST_LOG`: filter used when `--verbose` is absent.
/// - `PORTFOLIO_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format so stdout stays parseable.
pub fn init_observability(verbose: bool) {
    INIT.get_or_init(|| {
        let settings = LogSettings::resolve(verbose, |key| std::env::var(key).ok());
        if !settings.enabled {
            return;
        }

        let env_filter =
            EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(QUIET_FILTER));
        match settings.json_path {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let _ = std::fs::create_dir_all(dir);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn parses_flag_spellings() {
        assert_eq!(parse_bool_env(" Yes "), Some(true));
        assert_eq!(parse_bool_env("off"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn verbose_overrides_env_filters() {
        let lookup = env(&[("PORTFOLIO_LOG_LEVEL", "error"), ("RUST_LOG", "info")]);
        assert_eq!(LogSettings::resolve(true, &lookup).filter, "debug");
        assert_eq!(LogSettings::resolve(false, &lookup).filter, "error");
    }

    #[test]
    fn env_filters_fall_back_in_order() {
        let settings = LogSettings::resolve(false, env(&[("RUST_LOG", "portfolio_stream=trace")]));
        assert_eq!(settings.filter, "portfolio_stream=trace");
        assert!(settings.enabled);
        assert_eq!(settings.json_path, None);

        let settings = LogSettings::resolve(
            false,
            env(&[
                ("PORTFOLIO_LOG_LEVEL", "portfolio_stream=loud"),
                ("PORTFOLIO_OBSERVABILITY_ENABLED", "off"),
                ("PORTFOLIO_JSON_LOG_PATH", "logs/run.jsonl"),
            ]),
        );
        assert_eq!(settings.filter, "warn");
        assert!(!settings.enabled);
        assert_eq!(settings.json_path, Some(PathBuf::from("logs/run.jsonl")));
    }
}
