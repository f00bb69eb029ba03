use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use shared::{
    domain::{AppData, AppId, InstalledApp},
    progress::{OperationKind, ProgressEvent},
};
use storage::{KeyValueStore, LibraryStore};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

mod installation_manager;
pub use installation_manager::{InstallationManager, ManagerError};

pub const INSTALL_STEP_DELAY: Duration = Duration::from_millis(200);
pub const UPDATE_STEP_DELAY: Duration = Duration::from_millis(150);
const INSTALL_PERCENT_STEP: usize = 10;
const UPDATE_PERCENT_STEP: usize = 20;

/// 0, 10, ..., 100
pub fn install_percents() -> impl Iterator<Item = u8> {
    (0..=100u8).step_by(INSTALL_PERCENT_STEP)
}

/// 0, 20, ..., 100
pub fn update_percents() -> impl Iterator<Item = u8> {
    (0..=100u8).step_by(UPDATE_PERCENT_STEP)
}

pub fn install_status(percent: u8) -> String {
    match percent {
        0..=49 => format!("Downloading… {percent}%"),
        50..=89 => "Installing…".to_string(),
        _ => "Finishing up…".to_string(),
    }
}

pub fn update_status(percent: u8) -> String {
    if percent < 80 {
        "Updating…".to_string()
    } else {
        "Finishing…".to_string()
    }
}

/// Stands in for a download-and-install pipeline: waits a fixed interval per
/// step, reports progress, then records the outcome in the library.
///
/// Once started an operation always runs to completion. Dropping the event
/// receiver of a spawned operation only stops the reporting.
pub struct Simulator<S> {
    library: Arc<LibraryStore<S>>,
}

impl<S> Clone for Simulator<S> {
    fn clone(&self) -> Self {
        Self {
            library: self.library.clone(),
        }
    }
}

impl<S: KeyValueStore + 'static> Simulator<S> {
    pub fn new(library: Arc<LibraryStore<S>>) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &Arc<LibraryStore<S>> {
        &self.library
    }

    pub async fn install<F>(&self, app: &AppData, mut on_progress: F) -> Result<InstalledApp>
    where
        F: FnMut(ProgressEvent),
    {
        info!(app_id = %app.id, version = %app.version, "simulator: install started");
        for percent in install_percents() {
            sleep(INSTALL_STEP_DELAY).await;
            on_progress(ProgressEvent {
                app_id: app.id.clone(),
                kind: OperationKind::Install,
                percent,
                status: install_status(percent),
            });
        }

        let installed = self.library.install(app).await?;
        info!(app_id = %installed.id, "simulator: install finished");
        Ok(installed)
    }

    /// Resolves with `None` when `id` is not in the library.
    pub async fn update<F>(&self, id: &AppId, mut on_progress: F) -> Result<Option<InstalledApp>>
    where
        F: FnMut(ProgressEvent),
    {
        info!(app_id = %id, "simulator: update started");
        for percent in update_percents() {
            sleep(UPDATE_STEP_DELAY).await;
            on_progress(ProgressEvent {
                app_id: id.clone(),
                kind: OperationKind::Update,
                percent,
                status: update_status(percent),
            });
        }

        let updated = self.library.update(id).await?;
        match &updated {
            Some(app) => info!(
                app_id = %id,
                version = %app.installed_version,
                "simulator: update finished"
            ),
            None => debug!(app_id = %id, "simulator: update finished for unknown app"),
        }
        Ok(updated)
    }

    /// Runs [`Simulator::install`] on its own task.
    pub fn spawn_install(&self, app: AppData) -> SimulationHandle<InstalledApp> {
        let simulator = self.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            simulator
                .install(&app, |event| {
                    let _ = tx.send(event);
                })
                .await
        });
        SimulationHandle::new(rx, task)
    }

    /// Runs [`Simulator::update`] on its own task.
    pub fn spawn_update(&self, id: AppId) -> SimulationHandle<Option<InstalledApp>> {
        let simulator = self.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            simulator
                .update(&id, |event| {
                    let _ = tx.send(event);
                })
                .await
        });
        SimulationHandle::new(rx, task)
    }
}

/// A running simulation: its ordered progress events, then its result.
/// The event stream ends when the simulation finishes.
pub struct SimulationHandle<T> {
    pub events: UnboundedReceiverStream<ProgressEvent>,
    task: JoinHandle<Result<T>>,
}

impl<T> SimulationHandle<T> {
    fn new(rx: mpsc::UnboundedReceiver<ProgressEvent>, task: JoinHandle<Result<T>>) -> Self {
        Self {
            events: UnboundedReceiverStream::new(rx),
            task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn finish(self) -> Result<T> {
        self.task.await.context("simulation task did not complete")?
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
