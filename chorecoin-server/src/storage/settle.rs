use diesel::prelude::*;
use tracing::debug;

use super::models::{HistoryRecord, NewHistoryRecord, STATUS_COMPLETING, Task};
use super::{Store, StorageError, configure_sqlite_conn, schema};

/// Which settlement step failed. Any of these rolls the whole settlement
/// back: no history row, no credit, task row untouched.
#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("history write failed: {0}")]
    HistoryWrite(String),

    #[error("currency read failed: {0}")]
    CurrencyRead(String),

    #[error("currency write failed: {0}")]
    CurrencyWrite(String),

    #[error("task delete failed: {0}")]
    TaskDelete(String),

    /// Pool, join, begin/commit failures outside the four steps.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<diesel::result::Error> for SettleError {
    fn from(value: diesel::result::Error) -> Self {
        SettleError::Storage(StorageError::Database(value))
    }
}

impl Store {
    /// Settles a claimed task in one immediate transaction: append history,
    /// read the assignee's balance, write the credited balance, delete the
    /// task row. Returns the history row and the new balance.
    ///
    /// The delete only matches a row still in `completing`, so a task
    /// whose claim was released in the meantime is never settled.
    pub async fn settle_completion(
        &self,
        task: &Task,
    ) -> Result<(HistoryRecord, i32), SettleError> {
        use schema::{kids, task_history, tasks};
        let pool = self.pool.clone();
        let task = task.clone();
        tokio::task::spawn_blocking(move || -> Result<(HistoryRecord, i32), SettleError> {
            let mut conn = pool.get().map_err(StorageError::from)?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<(HistoryRecord, i32), SettleError> {
                let record = NewHistoryRecord {
                    task_id: task.id,
                    name: &task.name,
                    completed_by: task.assigned_to,
                    reward_value: task.reward_value,
                };
                let history = diesel::insert_into(task_history::table)
                    .values(&record)
                    .returning(HistoryRecord::as_returning())
                    .get_result::<HistoryRecord>(conn)
                    .map_err(|e| SettleError::HistoryWrite(e.to_string()))?;

                let current = kids::table
                    .filter(kids::id.eq(task.assigned_to))
                    .select(kids::currency)
                    .first::<i32>(conn)
                    .optional()
                    .map_err(|e| SettleError::CurrencyRead(e.to_string()))?
                    .ok_or_else(|| {
                        SettleError::CurrencyRead(format!("kid {} not found", task.assigned_to))
                    })?;

                let credited = current.checked_add(task.reward_value).ok_or_else(|| {
                    SettleError::CurrencyWrite(format!(
                        "balance {} + {} overflows",
                        current, task.reward_value
                    ))
                })?;
                let updated = diesel::update(kids::table.filter(kids::id.eq(task.assigned_to)))
                    .set(kids::currency.eq(credited))
                    .execute(conn)
                    .map_err(|e| SettleError::CurrencyWrite(e.to_string()))?;
                if updated != 1 {
                    return Err(SettleError::CurrencyWrite(format!(
                        "kid {} not updated",
                        task.assigned_to
                    )));
                }

                let deleted = diesel::delete(
                    tasks::table
                        .filter(tasks::id.eq(task.id))
                        .filter(tasks::status.eq(STATUS_COMPLETING)),
                )
                .execute(conn)
                .map_err(|e| SettleError::TaskDelete(e.to_string()))?;
                if deleted != 1 {
                    return Err(SettleError::TaskDelete(format!(
                        "task {} is no longer claimed",
                        task.id
                    )));
                }

                debug!(
                    task_id = task.id,
                    kid_id = task.assigned_to,
                    reward = task.reward_value,
                    balance = credited,
                    "settle_completion committed"
                );
                Ok((history, credited))
            })
        })
        .await
        .map_err(StorageError::from)?
    }
}

#[cfg(test)]
mod tests {
    use super::super::Claim;
    use super::super::testing::{KID_ALICE, PARENT_MUM, TestStore};
    use super::*;

    async fn claimed(ts: &TestStore, name: &str, reward: i32) -> Task {
        let task = ts.create_one(KID_ALICE, name, reward).await;
        match ts.store.claim_task(PARENT_MUM, task.id).await.unwrap() {
            Claim::Claimed(t) => t,
            other => panic!("expected claim, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settle_credits_records_and_deletes() {
        let ts = TestStore::new().await;
        let task = claimed(&ts, "Clean room", 5).await;

        let (history, balance) = ts.store.settle_completion(&task).await.unwrap();
        assert_eq!(balance, 15);
        assert_eq!(history.task_id, task.id);
        assert_eq!(history.completed_by, KID_ALICE);
        assert_eq!(history.reward_value, 5);
        assert_eq!(ts.store.get_currency(KID_ALICE).await.unwrap(), Some(15));
        assert!(ts.store.list_open_tasks(PARENT_MUM).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unclaimed_task_is_not_settled() {
        let ts = TestStore::new().await;
        let task = claimed(&ts, "Clean room", 5).await;
        ts.store.release_claim(task.id).await.unwrap();

        let err = ts.store.settle_completion(&task).await.unwrap_err();
        assert!(matches!(err, SettleError::TaskDelete(_)), "{err:?}");
        assert_eq!(ts.store.get_currency(KID_ALICE).await.unwrap(), Some(10));
        assert!(ts.store.list_history(PARENT_MUM).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_settlement_of_same_task_is_rejected() {
        let ts = TestStore::new().await;
        let task = claimed(&ts, "Clean room", 5).await;
        ts.store.settle_completion(&task).await.unwrap();

        let err = ts.store.settle_completion(&task).await.unwrap_err();
        assert!(matches!(err, SettleError::HistoryWrite(_)), "{err:?}");
        assert_eq!(ts.store.get_currency(KID_ALICE).await.unwrap(), Some(15));
        assert_eq!(ts.store.list_history(PARENT_MUM).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overflowing_credit_rolls_back() {
        let ts = TestStore::new().await;
        ts.store
            .execute_raw(&format!(
                "UPDATE kids SET currency = {} WHERE id = {KID_ALICE}",
                i32::MAX
            ))
            .await
            .unwrap();
        let task = claimed(&ts, "Clean room", 5).await;

        let err = ts.store.settle_completion(&task).await.unwrap_err();
        assert!(matches!(err, SettleError::CurrencyWrite(_)), "{err:?}");
        assert!(ts.store.list_history(PARENT_MUM).await.unwrap().is_empty());
        assert_eq!(ts.store.list_open_tasks(PARENT_MUM).await.unwrap().len(), 1);
    }
}
