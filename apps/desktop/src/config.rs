use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context};
use clap::ValueEnum;

pub const SETTINGS_FILE: &str = "stars.toml";
const DEFAULT_DIR_NAME: &str = ".stars";
const DATABASE_FILE: &str = "library.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    File,
    Sqlite,
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub database_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: home.join(DEFAULT_DIR_NAME),
            backend: Backend::File,
            database_url: None,
            catalog_path: None,
            log_filter: "warn".into(),
        }
    }
}

impl Settings {
    /// The explicit database url, or a sqlite file inside the data directory.
    pub fn resolved_database_url(&self) -> String {
        match self.database_url.as_deref() {
            Some(raw) if !raw.trim().is_empty() => normalize_database_url(raw),
            _ => normalize_database_url(&self.data_dir.join(DATABASE_FILE).to_string_lossy()),
        }
    }
}

/// Defaults, then `stars.toml` in the working directory, then the environment.
pub fn load_settings() -> Settings {
    let file_cfg = fs::read_to_string(SETTINGS_FILE)
        .ok()
        .and_then(|raw| toml::from_str::<HashMap<String, String>>(&raw).ok())
        .unwrap_or_default();

    apply_overrides(Settings::default(), &file_cfg, |key| std::env::var(key).ok())
}

pub fn apply_overrides(
    mut settings: Settings,
    file_cfg: &HashMap<String, String>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    if let Some(v) = file_cfg.get("data_dir") {
        settings.data_dir = PathBuf::from(v);
    }
    if let Some(backend) = file_cfg.get("backend").and_then(|v| v.parse().ok()) {
        settings.backend = backend;
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("catalog_path") {
        settings.catalog_path = Some(PathBuf::from(v));
    }
    if let Some(v) = file_cfg.get("log") {
        settings.log_filter = v.clone();
    }

    if let Some(v) = env("STARS_DATA_DIR").or_else(|| env("APP__DATA_DIR")) {
        settings.data_dir = PathBuf::from(v);
    }
    if let Some(backend) = env("STARS_BACKEND")
        .or_else(|| env("APP__BACKEND"))
        .and_then(|v| v.parse().ok())
    {
        settings.backend = backend;
    }
    if let Some(v) = env("STARS_DATABASE_URL").or_else(|| env("APP__DATABASE_URL")) {
        settings.database_url = Some(v);
    }
    if let Some(v) = env("STARS_CATALOG").or_else(|| env("APP__CATALOG")) {
        settings.catalog_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env("STARS_LOG").or_else(|| env("APP__LOG")) {
        settings.log_filter = v;
    }

    settings
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

pub fn ensure_data_dir(path: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create data directory '{}'", path.display()))
}
