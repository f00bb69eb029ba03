use std::{cmp::Ordering, collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Macos, Platform::Linux];

    /// The platform this binary was built for, if it is one the store ships to.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Self::Macos)
        } else if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else {
            None
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::Macos => "macOS",
            Self::Linux => "Linux",
        }
    }
}

/// A published catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    pub id: AppId,
    pub name: String,
    pub developer: String,
    pub icon: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    pub category: String,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub reviews: u32,
    #[serde(default)]
    pub downloads: String,
    pub size: String,
    pub version: String,
    #[serde(deserialize_with = "non_empty_platforms")]
    pub platforms: BTreeSet<Platform>,
    #[serde(default)]
    pub screenshots: Vec<String>,
    #[serde(default)]
    pub price: String,
}

impl AppData {
    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }
}

/// One application tracked in the local library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    pub id: AppId,
    pub name: String,
    pub developer: String,
    pub icon: String,
    pub category: String,
    pub version: String,
    pub installed_version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub install_timestamp: DateTime<Utc>,
    pub size: String,
    #[serde(deserialize_with = "non_empty_platforms")]
    pub platforms: BTreeSet<Platform>,
}

impl InstalledApp {
    /// Snapshot of a catalog entry as it is installed right now.
    pub fn from_app_data(app: &AppData, installed_at: DateTime<Utc>) -> Self {
        Self {
            id: app.id.clone(),
            name: app.name.clone(),
            developer: app.developer.clone(),
            icon: app.icon.clone(),
            category: app.category.clone(),
            version: app.version.clone(),
            installed_version: app.version.clone(),
            install_timestamp: installed_at,
            size: app.size.clone(),
            platforms: app.platforms.clone(),
        }
    }

    /// True when the installed version is older than the latest known one.
    pub fn has_update(&self) -> bool {
        is_older_version(&self.installed_version, &self.version)
    }
}

fn non_empty_platforms<'de, D>(deserializer: D) -> Result<BTreeSet<Platform>, D::Error>
where
    D: Deserializer<'de>,
{
    let platforms = BTreeSet::<Platform>::deserialize(deserializer)?;
    if platforms.is_empty() {
        return Err(de::Error::custom("platforms must not be empty"));
    }
    Ok(platforms)
}

/// Orders dotted versions component by component. Numeric components compare
/// as numbers, anything else lexically; a missing component counts as `0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => compare_component(l.unwrap_or("0"), r.unwrap_or("0")),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn compare_component(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

pub fn is_older_version(installed: &str, latest: &str) -> bool {
    compare_versions(installed, latest) == Ordering::Less
}

/// Increments the last meaningful component of a dotted version.
///
/// `X.Y.Z` bumps the patch and `X.Y` bumps the minor. Any other shape, or a
/// component that is not a plain number or is already at `u64::MAX`, comes
/// back unchanged.
pub fn bump_version(version: &str) -> String {
    let mut parts: Vec<String> = version.split('.').map(str::to_string).collect();
    let target = match parts.len() {
        3 => 2,
        2 => 1,
        _ => return version.to_string(),
    };

    match parts[target].parse::<u64>().ok().and_then(|n| n.checked_add(1)) {
        Some(next) => {
            parts[target] = next.to_string();
            parts.join(".")
        }
        None => version.to_string(),
    }
}
