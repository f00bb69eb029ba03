use serde::{Deserialize, Serialize};

use crate::{domain::AppId, error::OperationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Install,
    Update,
}

/// A single step reported by a running install or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub app_id: AppId,
    pub kind: OperationKind,
    pub percent: u8,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OperationState {
    Running { percent: u8, status: String },
    Completed,
    Failed { error: OperationError },
}

impl OperationState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn needs_dismiss(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub app_id: AppId,
    pub kind: OperationKind,
    pub state: OperationState,
}
