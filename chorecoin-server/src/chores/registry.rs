use super::ChoreError;
use crate::storage::Store;
use crate::storage::models::{HistoryRecord, Kid, Parent, Reward, Task};

pub async fn list_kids(store: &Store, parent: &Parent) -> Result<Vec<Kid>, ChoreError> {
    Ok(store.list_kids(parent.id).await?)
}

/// The kid, provided it belongs to `parent`. Foreign kids look absent.
pub async fn kid_for_parent(
    store: &Store,
    parent: &Parent,
    kid_id: i32,
) -> Result<Kid, ChoreError> {
    store
        .get_kid(kid_id)
        .await?
        .filter(|k| k.parent_id == parent.id)
        .ok_or_else(|| ChoreError::NotFound(format!("kid not found: {kid_id}")))
}

pub async fn get_currency(store: &Store, kid_id: i32) -> Result<i32, ChoreError> {
    store
        .get_currency(kid_id)
        .await?
        .ok_or_else(|| ChoreError::NotFound(format!("kid not found: {kid_id}")))
}

pub async fn list_open_tasks(
    store: &Store,
    parent: &Parent,
) -> Result<Vec<(Task, Kid)>, ChoreError> {
    Ok(store.list_open_tasks(parent.id).await?)
}

pub async fn list_kid_tasks(store: &Store, kid_id: i32) -> Result<Vec<Task>, ChoreError> {
    Ok(store.list_open_tasks_for_kid(kid_id).await?)
}

pub async fn list_history(
    store: &Store,
    parent: &Parent,
) -> Result<Vec<(HistoryRecord, String)>, ChoreError> {
    Ok(store.list_history(parent.id).await?)
}

pub async fn list_rewards(store: &Store) -> Result<Vec<Reward>, ChoreError> {
    Ok(store.list_rewards().await?)
}
