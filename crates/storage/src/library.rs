use anyhow::{Context, Result};
use chrono::Utc;
use shared::domain::{bump_version, AppData, AppId, InstalledApp};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::KeyValueStore;

/// Key under which the whole library snapshot is persisted.
pub const LIBRARY_KEY: &str = "stars-library";

/// The set of applications the user has installed, persisted as one JSON
/// array under [`LIBRARY_KEY`].
///
/// Reads never fail: a missing, unreadable or malformed snapshot is an empty
/// library. Every mutation rewrites the full snapshot. Mutations made through
/// the same `LibraryStore` are serialized; separate processes sharing a
/// backend still race with last-writer-wins.
pub struct LibraryStore<S> {
    backend: S,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> LibraryStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub async fn list(&self) -> Vec<InstalledApp> {
        self.load().await
    }

    pub async fn is_installed(&self, id: &AppId) -> bool {
        self.load().await.iter().any(|app| &app.id == id)
    }

    pub async fn get(&self, id: &AppId) -> Option<InstalledApp> {
        self.load().await.into_iter().find(|app| &app.id == id)
    }

    pub async fn installed_count(&self) -> usize {
        self.load().await.len()
    }

    /// Installed apps whose installed version lags the latest known version.
    pub async fn updates_available(&self) -> Vec<InstalledApp> {
        self.load()
            .await
            .into_iter()
            .filter(InstalledApp::has_update)
            .collect()
    }

    /// Adds `app` to the library unless an entry with the same id exists.
    /// Returns whichever record the library holds afterwards.
    pub async fn install(&self, app: &AppData) -> Result<InstalledApp> {
        let _guard = self.write_lock.lock().await;
        let mut apps = self.load().await;

        if let Some(existing) = apps.iter().find(|installed| installed.id == app.id) {
            debug!(app_id = %app.id, "library: already installed, leaving snapshot untouched");
            return Ok(existing.clone());
        }

        let record = InstalledApp::from_app_data(app, Utc::now());
        apps.push(record.clone());
        self.save(&apps).await?;
        info!(app_id = %record.id, version = %record.installed_version, "library: installed");
        Ok(record)
    }

    /// Returns `true` if an entry was removed.
    pub async fn remove(&self, id: &AppId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut apps = self.load().await;
        let before = apps.len();
        apps.retain(|app| &app.id != id);
        if apps.len() == before {
            return Ok(false);
        }

        self.save(&apps).await?;
        info!(app_id = %id, "library: removed");
        Ok(true)
    }

    /// Bumps the installed version of `id`. `None` when it is not installed.
    pub async fn update(&self, id: &AppId) -> Result<Option<InstalledApp>> {
        let _guard = self.write_lock.lock().await;
        let mut apps = self.load().await;
        let Some(app) = apps.iter_mut().find(|app| &app.id == id) else {
            debug!(app_id = %id, "library: update requested for unknown app");
            return Ok(None);
        };

        let previous = std::mem::take(&mut app.installed_version);
        app.installed_version = bump_version(&previous);
        if app.installed_version == previous {
            warn!(app_id = %id, version = %previous, "library: version shape not bumpable, keeping it");
        }
        let updated = app.clone();

        self.save(&apps).await?;
        info!(
            app_id = %id,
            from = %previous,
            to = %updated.installed_version,
            "library: updated"
        );
        Ok(Some(updated))
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save(&[]).await
    }

    async fn load(&self) -> Vec<InstalledApp> {
        match self.backend.read(LIBRARY_KEY).await {
            Ok(Some(bytes)) => decode_snapshot(&bytes),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("library: failed to read snapshot, treating as empty: {err:#}");
                Vec::new()
            }
        }
    }

    async fn save(&self, apps: &[InstalledApp]) -> Result<()> {
        let bytes = serde_json::to_vec(apps).context("failed to encode library snapshot")?;
        self.backend
            .write(LIBRARY_KEY, &bytes)
            .await
            .context("failed to persist library snapshot")
    }
}

/// Decodes as many records as possible. A blob that is not a JSON array is
/// an empty library; elements that do not decode are dropped.
fn decode_snapshot(bytes: &[u8]) -> Vec<InstalledApp> {
    let raw = match serde_json::from_slice::<Vec<serde_json::Value>>(bytes) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("library: snapshot is not a JSON array, treating as empty: {err}");
            return Vec::new();
        }
    };

    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(app) => Some(app),
            Err(err) => {
                warn!("library: skipping malformed record at index {index}: {err}");
                None
            }
        })
        .collect()
}
