//! Chore domain: who is asking, what they may see, and how an open task
//! becomes a history record plus a currency credit.
//!
//! Every operation takes the store and an explicit parent (or session)
//! instead of reaching for ambient state.

mod identity;
mod lifecycle;
mod registry;

pub use identity::{resolve_kid, resolve_parent};
pub use lifecycle::{
    Completion, TaskDraft, complete_task, create_task, delete_task, recover_stalled_completions,
};
pub use registry::{
    get_currency, kid_for_parent, list_history, list_kid_tasks, list_kids, list_open_tasks,
    list_rewards,
};

use crate::storage::{SettleError, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ChoreError {
    #[error("not authenticated")]
    NotAuthenticated,

    /// A valid login with no parent row behind it (sign-up incomplete).
    #[error("no parent registered for login {0}")]
    ParentNotFound(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("store call failed: {0}")]
    RemoteCallFailed(#[from] StorageError),

    #[error("history write failed: {0}")]
    HistoryWriteFailed(String),

    #[error("currency read failed: {0}")]
    CurrencyReadFailed(String),

    #[error("currency write failed: {0}")]
    CurrencyWriteFailed(String),

    #[error("task delete failed: {0}")]
    TaskDeleteFailed(String),

    /// Another request holds the completion claim for this task.
    #[error("task {0} is already being completed")]
    CompletionInProgress(i32),
}

impl From<SettleError> for ChoreError {
    fn from(value: SettleError) -> Self {
        match value {
            SettleError::HistoryWrite(m) => ChoreError::HistoryWriteFailed(m),
            SettleError::CurrencyRead(m) => ChoreError::CurrencyReadFailed(m),
            SettleError::CurrencyWrite(m) => ChoreError::CurrencyWriteFailed(m),
            SettleError::TaskDelete(m) => ChoreError::TaskDeleteFailed(m),
            SettleError::Storage(e) => ChoreError::RemoteCallFailed(e),
        }
    }
}
