use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use tidyledger_engine::ConflictPolicy;
use tidyledger_import::CsvProfile;

const DEFAULT_PATH: &str = "tidyledger.toml";

/// Top-level TOML configuration. `TIDYLEDGER_HOST` / `TIDYLEDGER_TOKEN`
/// override the file so credentials can stay out of it.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub token: String,
    /// Transactions no rule may ever touch.
    pub ignored_ids: Vec<i64>,
    /// (withdrawal id, deposit id) pairs the transfer merge skips silently.
    pub ignored_transfer_pairs: Vec<(i64, i64)>,
    pub policy: ConflictPolicy,
    /// Per-rule configuration blocks, handed to the rule registry verbatim.
    pub rules: toml::value::Table,
    pub import: CsvProfile,
}

pub fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_PATH));
    let mut config = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        AppConfig::default()
    };
    if let Ok(host) = std::env::var("TIDYLEDGER_HOST") {
        config.host = host;
    }
    if let Ok(token) = std::env::var("TIDYLEDGER_TOKEN") {
        config.token = token;
    }
    anyhow::ensure!(
        !config.host.is_empty(),
        "no API host configured (set `host` in {} or TIDYLEDGER_HOST)",
        path.display()
    );
    anyhow::ensure!(
        !config.token.is_empty(),
        "no API token configured (set `token` in {} or TIDYLEDGER_TOKEN)",
        path.display()
    );
    Ok(config)
}
