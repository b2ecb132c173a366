//! stdout + per-run log file (`<dir>/rig_<YYYYmmdd_HHMMSS>.log`).

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

pub fn log_file_path(config: &LogConfig) -> PathBuf {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    config.dir.join(format!("rig_{ts}.log"))
}

/// グローバル subscriber を設定し、ログファイルのパスを返す
///
/// `RUST_LOG` があれば `filter` より優先される。
pub fn init_logging(config: &LogConfig) -> Result<PathBuf> {
    fs::create_dir_all(&config.dir)
        .with_context(|| format!("Failed to create log dir {}", config.dir.display()))?;
    let path = log_file_path(config);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .with_context(|| format!("Invalid log filter `{}`", config.filter))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_thread_names(true))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name() {
        let config = LogConfig {
            dir: PathBuf::from("logs"),
            filter: "info".to_string(),
        };
        let path = log_file_path(&config);
        assert!(path.starts_with("logs"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("rig_"));
        assert!(name.ends_with(".log"));
        // rig_ + YYYYmmdd_HHMMSS + .log
        assert_eq!(name.len(), 4 + 15 + 4);
    }
}
