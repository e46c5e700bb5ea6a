use crate::cli::Cli;
use crate::config::{Config, Secret, StorageConfig};
use crate::error::ConfigError;
use std::time::Duration;
use tracing::{error, info};

/// Builds the immutable [`Config`] from parsed CLI arguments.
///
/// Clap has already merged flags with their `SNAPSHOT_*` environment variables,
/// so this only validates. Empty values count as missing.
pub fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let interval = parse_interval(&cli.interval)?;

    let url = required("url", cli.url.as_deref())?;
    let account_id = required("id", cli.id.as_deref())?;
    let application_key = required("key", cli.key.as_deref())?;
    let bucket = required("bucket", cli.bucket.as_deref())?;

    let config = Config {
        interval,
        url,
        storage: StorageConfig {
            account_id: Secret::new(account_id),
            application_key: Secret::new(application_key),
            bucket,
            api_url: cli.api_url.trim_end_matches('/').to_string(),
        },
    };
    info!("Config loaded and validated successfully");
    Ok(config)
}

fn required(name: &'static str, value: Option<&str>) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => {
            error!(field = name, "Required configuration value missing");
            Err(ConfigError::Missing(name))
        }
    }
}

/// Parses durations such as `1s`, `500ms`, `2m` or `1h30m`.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let interval =
        humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidInterval {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            value: value.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }
    Ok(interval)
}
