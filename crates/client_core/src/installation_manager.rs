use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::{AppData, AppId, InstalledApp},
    error::{ErrorCode, OperationError},
    progress::{OperationKind, OperationSnapshot, OperationState},
};
use storage::KeyValueStore;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::{SimulationHandle, Simulator};

const EVENT_CAPACITY: usize = 256;
const PREPARING_STATUS: &str = "Preparing…";

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("an operation for {0} is already running")]
    AlreadyRunning(AppId),
    #[error("{0} is not installed")]
    NotInstalled(AppId),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            Self::NotInstalled(_) => ErrorCode::NotFound,
            Self::Storage(_) => ErrorCode::Storage,
        }
    }
}

impl From<&ManagerError> for OperationError {
    fn from(value: &ManagerError) -> Self {
        OperationError::new(value.code(), format!("{value:#}"))
    }
}

/// Tracks install and update operations per application and broadcasts every
/// state change.
///
/// At most one operation runs per app id; different ids run concurrently.
/// A completed or failed operation stays visible until it is dismissed or a
/// new operation for the same id starts.
pub struct InstallationManager<S> {
    simulator: Simulator<S>,
    operations: Mutex<HashMap<AppId, OperationSnapshot>>,
    events: broadcast::Sender<OperationSnapshot>,
}

impl<S: KeyValueStore + 'static> InstallationManager<S> {
    pub fn new(simulator: Simulator<S>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            simulator,
            operations: Mutex::new(HashMap::new()),
            events,
        })
    }

    pub fn simulator(&self) -> &Simulator<S> {
        &self.simulator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationSnapshot> {
        self.events.subscribe()
    }

    pub async fn state(&self, id: &AppId) -> Option<OperationSnapshot> {
        self.operations.lock().await.get(id).cloned()
    }

    pub async fn is_running(&self, id: &AppId) -> bool {
        self.operations
            .lock()
            .await
            .get(id)
            .is_some_and(|op| op.state.is_active())
    }

    pub async fn active(&self) -> Vec<OperationSnapshot> {
        let mut active: Vec<_> = self
            .operations
            .lock()
            .await
            .values()
            .filter(|op| op.state.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        active
    }

    /// Clears a finished operation. Returns `false` if there was nothing to
    /// dismiss or the operation is still running.
    pub async fn dismiss(&self, id: &AppId) -> bool {
        let mut operations = self.operations.lock().await;
        match operations.get(id) {
            Some(op) if op.state.needs_dismiss() => {
                operations.remove(id);
                info!(app_id = %id, "installation manager: dismissed");
                true
            }
            _ => false,
        }
    }

    pub async fn install(self: &Arc<Self>, app: AppData) -> Result<InstalledApp, ManagerError> {
        let id = app.id.clone();
        self.begin(&id, OperationKind::Install).await?;
        let handle = self.simulator.spawn_install(app);
        self.supervise(id, OperationKind::Install, handle, Ok).await
    }

    pub async fn update(self: &Arc<Self>, id: AppId) -> Result<InstalledApp, ManagerError> {
        self.begin(&id, OperationKind::Update).await?;
        let handle = self.simulator.spawn_update(id.clone());
        let missing = id.clone();
        self.supervise(id, OperationKind::Update, handle, move |updated| {
            updated.ok_or(ManagerError::NotInstalled(missing))
        })
        .await
    }

    /// Drives the simulation on its own task so the terminal state is
    /// published even when the caller stops waiting.
    async fn supervise<T, F>(
        self: &Arc<Self>,
        id: AppId,
        kind: OperationKind,
        handle: SimulationHandle<T>,
        resolve: F,
    ) -> Result<InstalledApp, ManagerError>
    where
        T: Send + 'static,
        F: FnOnce(T) -> Result<InstalledApp, ManagerError> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let outcome = manager.drive(&task_id, kind, handle).await.and_then(resolve);
            manager.finish(&task_id, kind, outcome).await
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = anyhow::Error::new(err).context("operation task did not complete");
                self.finish(&id, kind, Err(err.into())).await
            }
        }
    }

    async fn begin(&self, id: &AppId, kind: OperationKind) -> Result<(), ManagerError> {
        let mut operations = self.operations.lock().await;
        if operations.get(id).is_some_and(|op| op.state.is_active()) {
            warn!(app_id = %id, ?kind, "installation manager: operation already in progress");
            return Err(ManagerError::AlreadyRunning(id.clone()));
        }

        info!(app_id = %id, ?kind, "installation manager: starting");
        let snapshot = OperationSnapshot {
            app_id: id.clone(),
            kind,
            state: OperationState::Running {
                percent: 0,
                status: PREPARING_STATUS.to_string(),
            },
        };
        operations.insert(id.clone(), snapshot.clone());
        let _ = self.events.send(snapshot);
        Ok(())
    }

    async fn drive<T>(
        &self,
        id: &AppId,
        kind: OperationKind,
        mut handle: SimulationHandle<T>,
    ) -> Result<T, ManagerError> {
        while let Some(event) = handle.events.next().await {
            self.publish(
                id,
                kind,
                OperationState::Running {
                    percent: event.percent,
                    status: event.status,
                },
            )
            .await;
        }
        Ok(handle.finish().await?)
    }

    async fn finish(
        &self,
        id: &AppId,
        kind: OperationKind,
        outcome: Result<InstalledApp, ManagerError>,
    ) -> Result<InstalledApp, ManagerError> {
        match &outcome {
            Ok(_) => {
                info!(app_id = %id, ?kind, "installation manager: completed");
                self.publish(id, kind, OperationState::Completed).await;
            }
            Err(err) => {
                warn!(app_id = %id, ?kind, "installation manager: failed: {err:#}");
                self.publish(id, kind, OperationState::Failed { error: err.into() })
                    .await;
            }
        }
        outcome
    }

    async fn publish(&self, id: &AppId, kind: OperationKind, state: OperationState) {
        let snapshot = OperationSnapshot {
            app_id: id.clone(),
            kind,
            state,
        };
        self.operations
            .lock()
            .await
            .insert(id.clone(), snapshot.clone());
        let _ = self.events.send(snapshot);
    }
}

#[cfg(test)]
#[path = "tests/installation_manager_tests.rs"]
mod tests;
