use chorecoin_shared::domain::Assignee;
use tracing::{error, info, warn};

use super::ChoreError;
use crate::storage::models::{HistoryRecord, Parent, Task};
use crate::storage::{Claim, StorageError, Store};

/// A task as submitted by a parent, before validation.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub name: String,
    pub reward_value: i32,
    pub assignee: Assignee,
}

impl TaskDraft {
    /// Returns the trimmed task name if the draft may be stored.
    pub fn validate(&self) -> Result<&str, ChoreError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ChoreError::Validation("task name must not be empty".into()));
        }
        if self.reward_value < 1 {
            return Err(ChoreError::Validation(
                "reward_value must be at least 1".into(),
            ));
        }
        Ok(name)
    }
}

/// Outcome of a successful completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub history: HistoryRecord,
    pub kid_id: i32,
    /// Kid balance right after the credit was committed.
    pub currency: i32,
}

/// Creates one open task per assignee: the named kid, or every kid of the
/// parent for [`Assignee::All`]. Nothing is written if validation fails.
pub async fn create_task(
    store: &Store,
    parent: &Parent,
    draft: &TaskDraft,
) -> Result<Vec<Task>, ChoreError> {
    let name = draft.validate()?;
    let created = store
        .create_tasks(parent.id, draft.assignee, name, draft.reward_value)
        .await?
        .ok_or_else(|| ChoreError::NotFound(format!("kid not found: {}", draft.assignee)))?;
    info!(
        parent_id = parent.id,
        assignee = %draft.assignee,
        count = created.len(),
        reward = draft.reward_value,
        "create_task: tasks created"
    );
    Ok(created)
}

pub async fn delete_task(store: &Store, parent: &Parent, task_id: i32) -> Result<(), ChoreError> {
    if store.delete_task(parent.id, task_id).await? {
        info!(parent_id = parent.id, task_id, "delete_task: removed");
        Ok(())
    } else {
        Err(ChoreError::NotFound(format!("task not found: {task_id}")))
    }
}

/// Completes an open task: history record, currency credit, task removal.
///
/// The claim (`open -> completing`) admits exactly one caller per task; the
/// settlement then commits all three writes in one transaction. If the
/// settlement fails the claim is released and the task is open again, with
/// no history row and no credit.
///
/// Claim, settlement and release run on their own task: dropping the
/// returned future does not stop them halfway.
pub async fn complete_task(
    store: &Store,
    parent: &Parent,
    task_id: i32,
) -> Result<Completion, ChoreError> {
    let store = store.clone();
    let parent_id = parent.id;
    tokio::spawn(async move { claim_and_settle(&store, parent_id, task_id).await })
        .await
        .map_err(|e| ChoreError::RemoteCallFailed(StorageError::Task(e)))?
}

async fn claim_and_settle(
    store: &Store,
    parent_id: i32,
    task_id: i32,
) -> Result<Completion, ChoreError> {
    let task = match store.claim_task(parent_id, task_id).await? {
        Claim::Claimed(t) => t,
        Claim::InProgress => {
            info!(task_id, "complete_task: claim held by another request");
            return Err(ChoreError::CompletionInProgress(task_id));
        }
        Claim::Missing => {
            return Err(ChoreError::NotFound(format!("task not found: {task_id}")));
        }
    };

    match store.settle_completion(&task).await {
        Ok((history, currency)) => {
            info!(
                task_id,
                kid_id = task.assigned_to,
                reward = task.reward_value,
                currency,
                "complete_task: settled"
            );
            Ok(Completion {
                history,
                kid_id: task.assigned_to,
                currency,
            })
        }
        Err(err) => {
            warn!(task_id, error = %err, "complete_task: settlement failed, releasing claim");
            match store.release_claim(task_id).await {
                Ok(true) => {}
                Ok(false) => warn!(task_id, "complete_task: claim was already released"),
                Err(e) => error!(
                    task_id,
                    error = %e,
                    "complete_task: release failed, task stays claimed until recovery"
                ),
            }
            Err(err.into())
        }
    }
}

/// Reopens tasks left claimed by a crash. Run once at startup.
pub async fn recover_stalled_completions(store: &Store) -> Result<usize, ChoreError> {
    let reopened = store.recover_stalled_completions().await?;
    if reopened > 0 {
        warn!(reopened, "recovered tasks stuck in completing state");
    }
    Ok(reopened)
}
