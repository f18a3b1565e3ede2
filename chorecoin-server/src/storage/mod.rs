pub mod models;
pub mod schema;
mod settle;
#[cfg(test)]
pub(crate) mod testing;

use chorecoin_shared::domain::Assignee;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    HistoryRecord, Kid, NewKid, NewParent, NewReward, NewSession, NewTask, Parent, Reward,
    STATUS_COMPLETING, STATUS_OPEN, Task,
};
use tracing::{debug, trace};

use crate::server::{KidConfig, ParentConfig, RewardConfig};

pub use settle::SettleError;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A spawned or `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Result of trying to move a task from `open` to `completing`.
#[derive(Debug)]
pub enum Claim {
    /// This caller now owns the completion; the row is returned as claimed.
    Claimed(Task),
    /// The task is visible to the parent but someone else holds the claim.
    InProgress,
    /// No such task for this parent (never existed, or already completed).
    Missing,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Upserts parents, kids and rewards declared in the config.
    ///
    /// A kid's `currency` is only written when the row is first inserted;
    /// afterwards it belongs to task settlement.
    pub async fn seed_from_config(
        &self,
        cfg_parents: &[ParentConfig],
        cfg_kids: &[KidConfig],
        cfg_rewards: &[RewardConfig],
    ) -> Result<(), StorageError> {
        use schema::{kids, parents, rewards};

        let pool = self.pool.clone();
        let parents_owned = cfg_parents.to_owned();
        let kids_owned = cfg_kids.to_owned();
        let rewards_owned = cfg_rewards.to_owned();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;

            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                for p in &parents_owned {
                    let new_parent = NewParent {
                        id: p.id,
                        name: &p.name,
                        email: &p.email,
                        auth_id: &p.auth_id,
                    };
                    diesel::insert_into(parents::table)
                        .values(&new_parent)
                        .on_conflict(parents::id)
                        .do_update()
                        .set((
                            parents::name.eq(new_parent.name),
                            parents::email.eq(new_parent.email),
                            parents::auth_id.eq(new_parent.auth_id),
                        ))
                        .execute(conn)?;
                }

                for k in &kids_owned {
                    let new_kid = NewKid {
                        id: k.id,
                        parent_id: k.parent_id,
                        name: &k.name,
                        currency: k.currency,
                    };
                    diesel::insert_into(kids::table)
                        .values(&new_kid)
                        .on_conflict(kids::id)
                        .do_update()
                        .set((
                            kids::parent_id.eq(new_kid.parent_id),
                            kids::name.eq(new_kid.name),
                        ))
                        .execute(conn)?;
                }

                for r in &rewards_owned {
                    let new_reward = NewReward {
                        id: r.id,
                        name: &r.name,
                        cost: r.cost,
                    };
                    diesel::insert_into(rewards::table)
                        .values(&new_reward)
                        .on_conflict(rewards::id)
                        .do_update()
                        .set((
                            rewards::name.eq(new_reward.name),
                            rewards::cost.eq(new_reward.cost),
                        ))
                        .execute(conn)?;
                }
                Ok(())
            })
        })
        .await?
    }

    pub async fn find_parent_by_auth_id(
        &self,
        auth_id_: &str,
    ) -> Result<Option<Parent>, StorageError> {
        use schema::parents::dsl::*;
        let pool = self.pool.clone();
        let wanted = auth_id_.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Parent>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(parents
                .filter(auth_id.eq(&wanted))
                .select(Parent::as_select())
                .first::<Parent>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn list_kids(&self, parent: i32) -> Result<Vec<Kid>, StorageError> {
        use schema::kids::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Kid>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(kids
                .filter(parent_id.eq(parent))
                .order((name.asc(), id.asc()))
                .select(Kid::as_select())
                .load::<Kid>(&mut conn)?)
        })
        .await?
    }

    pub async fn get_kid(&self, kid: i32) -> Result<Option<Kid>, StorageError> {
        use schema::kids::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Kid>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(kids
                .filter(id.eq(kid))
                .select(Kid::as_select())
                .first::<Kid>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn get_currency(&self, kid: i32) -> Result<Option<i32>, StorageError> {
        use schema::kids::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<i32>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(kids
                .filter(id.eq(kid))
                .select(currency)
                .first::<i32>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Inserts one open task per target kid, all in one transaction.
    ///
    /// Targets are the creator's kids: all of them for [`Assignee::All`], or
    /// the single named kid. Returns `None` when a named kid is not one of
    /// the creator's kids.
    pub async fn create_tasks(
        &self,
        creator: i32,
        assignee: Assignee,
        task_name: &str,
        reward_value: i32,
    ) -> Result<Option<Vec<Task>>, StorageError> {
        use schema::{kids, tasks};
        let pool = self.pool.clone();
        let task_name = task_name.to_string();
        trace!(creator, %assignee, task_name = %task_name, "create_tasks starting");
        tokio::task::spawn_blocking(move || -> Result<Option<Vec<Task>>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<Option<Vec<Task>>, StorageError> {
                let targets: Vec<i32> = match assignee {
                    Assignee::All => kids::table
                        .filter(kids::parent_id.eq(creator))
                        .order(kids::id.asc())
                        .select(kids::id)
                        .load(conn)?,
                    Assignee::Kid(kid_id) => kids::table
                        .filter(kids::parent_id.eq(creator))
                        .filter(kids::id.eq(kid_id))
                        .select(kids::id)
                        .load(conn)?,
                };
                if matches!(assignee, Assignee::Kid(_)) && targets.is_empty() {
                    return Ok(None);
                }
                let mut created = Vec::with_capacity(targets.len());
                for kid_id in targets {
                    let row = NewTask {
                        name: &task_name,
                        created_by: creator,
                        assigned_to: kid_id,
                        reward_value,
                    };
                    let task = diesel::insert_into(tasks::table)
                        .values(&row)
                        .returning(Task::as_returning())
                        .get_result::<Task>(conn)?;
                    created.push(task);
                }
                Ok(Some(created))
            })
        })
        .await?
    }

    /// Open tasks whose assignee belongs to `parent`, with the assignee row.
    pub async fn list_open_tasks(&self, parent: i32) -> Result<Vec<(Task, Kid)>, StorageError> {
        use schema::{kids, tasks};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(Task, Kid)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(tasks::table
                .inner_join(kids::table)
                .filter(kids::parent_id.eq(parent))
                .order((tasks::created_at.asc(), tasks::id.asc()))
                .select((Task::as_select(), Kid::as_select()))
                .load::<(Task, Kid)>(&mut conn)?)
        })
        .await?
    }

    pub async fn list_open_tasks_for_kid(&self, kid: i32) -> Result<Vec<Task>, StorageError> {
        use schema::tasks::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Task>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(tasks
                .filter(assigned_to.eq(kid))
                .order((created_at.asc(), id.asc()))
                .select(Task::as_select())
                .load::<Task>(&mut conn)?)
        })
        .await?
    }

    /// Deletes an open task visible to `parent`. Tasks mid-completion are
    /// left alone. Returns whether a row was removed.
    pub async fn delete_task(&self, parent: i32, task: i32) -> Result<bool, StorageError> {
        use schema::{kids, tasks};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let owned = kids::table
                .filter(kids::parent_id.eq(parent))
                .select(kids::id);
            let deleted = diesel::delete(
                tasks::table
                    .filter(tasks::id.eq(task))
                    .filter(tasks::status.eq(STATUS_OPEN))
                    .filter(tasks::assigned_to.eq_any(owned)),
            )
            .execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Atomically moves a task visible to `parent` from `open` to
    /// `completing`. Exactly one concurrent caller gets [`Claim::Claimed`].
    pub async fn claim_task(&self, parent: i32, task: i32) -> Result<Claim, StorageError> {
        use schema::{kids, tasks};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Claim, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| -> Result<Claim, StorageError> {
                let now = Utc::now().naive_utc();
                let claimed = diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(task))
                        .filter(tasks::status.eq(STATUS_OPEN))
                        .filter(
                            tasks::assigned_to.eq_any(
                                kids::table
                                    .filter(kids::parent_id.eq(parent))
                                    .select(kids::id),
                            ),
                        ),
                )
                .set((
                    tasks::status.eq(STATUS_COMPLETING),
                    tasks::claimed_at.eq(Some(now)),
                ))
                .returning(Task::as_returning())
                .get_result::<Task>(conn)
                .optional()?;
                if let Some(t) = claimed {
                    return Ok(Claim::Claimed(t));
                }
                let visible: i64 = tasks::table
                    .filter(tasks::id.eq(task))
                    .filter(
                        tasks::assigned_to.eq_any(
                            kids::table
                                .filter(kids::parent_id.eq(parent))
                                .select(kids::id),
                        ),
                    )
                    .count()
                    .get_result(conn)?;
                Ok(if visible > 0 {
                    Claim::InProgress
                } else {
                    Claim::Missing
                })
            })
        })
        .await?
    }

    /// Gives a claimed task back to `open`. Returns whether the claim existed.
    pub async fn release_claim(&self, task: i32) -> Result<bool, StorageError> {
        use schema::tasks::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let updated = diesel::update(
                tasks
                    .filter(id.eq(task))
                    .filter(status.eq(STATUS_COMPLETING)),
            )
            .set((
                status.eq(STATUS_OPEN),
                claimed_at.eq(None::<chrono::NaiveDateTime>),
            ))
            .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }

    /// Resets every task stuck in `completing` back to `open`.
    ///
    /// Settlement commits history, credit and deletion together, so a task
    /// still claimed after a restart has neither a history row nor a credit.
    pub async fn recover_stalled_completions(&self) -> Result<usize, StorageError> {
        use schema::tasks::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let updated = diesel::update(tasks.filter(status.eq(STATUS_COMPLETING)))
                .set((
                    status.eq(STATUS_OPEN),
                    claimed_at.eq(None::<chrono::NaiveDateTime>),
                ))
                .execute(&mut conn)?;
            debug!(updated, "recover_stalled_completions done");
            Ok(updated)
        })
        .await?
    }

    /// History rows whose completing kid belongs to `parent`, newest first,
    /// each with the kid's name.
    pub async fn list_history(
        &self,
        parent: i32,
    ) -> Result<Vec<(HistoryRecord, String)>, StorageError> {
        use schema::{kids, task_history};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(HistoryRecord, String)>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(task_history::table
                .inner_join(kids::table)
                .filter(kids::parent_id.eq(parent))
                .order((task_history::completed_at.desc(), task_history::id.desc()))
                .select((HistoryRecord::as_select(), kids::name))
                .load::<(HistoryRecord, String)>(&mut conn)?)
        })
        .await?
    }

    pub async fn list_rewards(&self) -> Result<Vec<Reward>, StorageError> {
        use schema::rewards::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Reward>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(rewards
                .order((cost.asc(), name.asc()))
                .select(Reward::as_select())
                .load::<Reward>(&mut conn)?)
        })
        .await?
    }

    // Session helpers for JWT inactivity windows
    pub async fn create_session(&self, jti_: &str, username_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        let u = username_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession {
                jti: &j,
                username: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    #[cfg(test)]
    pub(crate) async fn get_session(
        &self,
        jti_: &str,
    ) -> Result<Option<models::Session>, StorageError> {
        use models::Session;
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Session>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(sessions
                .filter(jti.eq(&j))
                .select(Session::as_select())
                .first::<Session>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn delete_session(&self, jti_: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let deleted = diesel::delete(sessions.filter(jti.eq(&j))).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }

    /// Runs raw SQL; lets tests install failure-injection triggers.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), StorageError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            diesel::sql_query(sql).execute(&mut conn)?;
            Ok(())
        })
        .await?
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::testing::{KID_ALICE, KID_BOB, KID_CAROL, PARENT_MUM, PARENT_ZED, TestStore};
    use super::*;

    #[tokio::test]
    async fn seeding_keeps_existing_balances() {
        let ts = TestStore::new().await;
        ts.store
            .execute_raw(&format!("UPDATE kids SET currency = 42 WHERE id = {KID_ALICE}"))
            .await
            .unwrap();
        ts.reseed().await;
        assert_eq!(ts.store.get_currency(KID_ALICE).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn parent_lookup_by_auth_id() {
        let ts = TestStore::new().await;
        let p = ts.store.find_parent_by_auth_id("mum").await.unwrap().unwrap();
        assert_eq!(p.id, PARENT_MUM);
        assert!(
            ts.store
                .find_parent_by_auth_id("nobody")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn list_kids_is_scoped_to_parent() {
        let ts = TestStore::new().await;
        let kids = ts.store.list_kids(PARENT_MUM).await.unwrap();
        let ids: Vec<i32> = kids.iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![KID_ALICE, KID_BOB]);
        let kids = ts.store.list_kids(PARENT_ZED).await.unwrap();
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].id, KID_CAROL);
    }

    #[tokio::test]
    async fn create_for_all_inserts_one_row_per_kid() {
        let ts = TestStore::new().await;
        let created = ts
            .store
            .create_tasks(PARENT_MUM, Assignee::All, "Dishes", 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|t| t.name == "Dishes" && t.reward_value == 3));
        let mut assignees: Vec<i32> = created.iter().map(|t| t.assigned_to).collect();
        assignees.sort();
        assert_eq!(assignees, vec![KID_ALICE, KID_BOB]);
    }

    #[tokio::test]
    async fn create_for_foreign_kid_returns_none() {
        let ts = TestStore::new().await;
        let out = ts
            .store
            .create_tasks(PARENT_MUM, Assignee::Kid(KID_CAROL), "Dishes", 3)
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(ts.store.list_open_tasks(PARENT_ZED).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_tasks_never_leak_across_parents() {
        let ts = TestStore::new().await;
        ts.store
            .create_tasks(PARENT_MUM, Assignee::All, "Dishes", 3)
            .await
            .unwrap();
        ts.store
            .create_tasks(PARENT_ZED, Assignee::All, "Laundry", 2)
            .await
            .unwrap();
        let mum = ts.store.list_open_tasks(PARENT_MUM).await.unwrap();
        assert_eq!(mum.len(), 2);
        assert!(mum.iter().all(|(_, kid)| kid.parent_id == PARENT_MUM));
        let zed = ts.store.list_open_tasks(PARENT_ZED).await.unwrap();
        assert_eq!(zed.len(), 1);
        assert_eq!(zed[0].1.id, KID_CAROL);
    }

    #[tokio::test]
    async fn delete_is_scoped_and_reports_absence() {
        let ts = TestStore::new().await;
        let task = ts.create_one(KID_ALICE, "Bins", 1).await;
        assert!(!ts.store.delete_task(PARENT_ZED, task.id).await.unwrap());
        assert!(ts.store.delete_task(PARENT_MUM, task.id).await.unwrap());
        assert!(!ts.store.delete_task(PARENT_MUM, task.id).await.unwrap());
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_releasable() {
        let ts = TestStore::new().await;
        let task = ts.create_one(KID_BOB, "Bins", 1).await;

        assert!(matches!(
            ts.store.claim_task(PARENT_ZED, task.id).await.unwrap(),
            Claim::Missing
        ));
        let claimed = match ts.store.claim_task(PARENT_MUM, task.id).await.unwrap() {
            Claim::Claimed(t) => t,
            other => panic!("expected claim, got {other:?}"),
        };
        assert!(claimed.is_completing());
        assert!(claimed.claimed_at.is_some());
        assert!(matches!(
            ts.store.claim_task(PARENT_MUM, task.id).await.unwrap(),
            Claim::InProgress
        ));
        // a claimed task cannot be deleted from under the claimant
        assert!(!ts.store.delete_task(PARENT_MUM, task.id).await.unwrap());

        assert!(ts.store.release_claim(task.id).await.unwrap());
        assert!(!ts.store.release_claim(task.id).await.unwrap());
        assert!(matches!(
            ts.store.claim_task(PARENT_MUM, task.id).await.unwrap(),
            Claim::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn recovery_reopens_stalled_claims() {
        let ts = TestStore::new().await;
        let a = ts.create_one(KID_ALICE, "Bins", 1).await;
        let b = ts.create_one(KID_BOB, "Bins", 1).await;
        ts.store.claim_task(PARENT_MUM, a.id).await.unwrap();

        assert_eq!(ts.store.recover_stalled_completions().await.unwrap(), 1);
        let open = ts.store.list_open_tasks(PARENT_MUM).await.unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|(t, _)| !t.is_completing()));
        assert!(open.iter().any(|(t, _)| t.id == b.id));
    }

    #[tokio::test]
    async fn sessions_expire_by_cutoff_and_delete() {
        let ts = TestStore::new().await;
        ts.store.create_session("j1", "mum").await.unwrap();
        assert!(ts.store.get_session("j1").await.unwrap().is_some());

        let past = (Utc::now() - chrono::Duration::days(1)).naive_utc();
        assert!(ts.store.touch_session_with_cutoff("j1", past).await.unwrap());
        let future = (Utc::now() + chrono::Duration::days(1)).naive_utc();
        assert!(!ts.store.touch_session_with_cutoff("j1", future).await.unwrap());

        assert!(ts.store.delete_session("j1").await.unwrap());
        assert!(ts.store.get_session("j1").await.unwrap().is_none());
        assert!(!ts.store.touch_session_with_cutoff("j1", past).await.unwrap());
    }

    async fn complete(ts: &TestStore, parent: i32, kid: i32, name: &str) -> i32 {
        let task = ts.create_one(kid, name, 1).await;
        let claimed = match ts.store.claim_task(parent, task.id).await.unwrap() {
            Claim::Claimed(t) => t,
            other => panic!("expected claim, got {other:?}"),
        };
        ts.store.settle_completion(&claimed).await.unwrap().0.id
    }

    #[tokio::test]
    async fn history_is_scoped_to_parent_newest_first() {
        let ts = TestStore::new().await;
        let first = complete(&ts, PARENT_MUM, KID_ALICE, "Dishes").await;
        let older = complete(&ts, PARENT_MUM, KID_BOB, "Bins").await;
        complete(&ts, PARENT_ZED, KID_CAROL, "Laundry").await;
        let last = complete(&ts, PARENT_MUM, KID_ALICE, "Hoover").await;
        ts.store
            .execute_raw(&format!(
                "UPDATE task_history SET completed_at = '2024-05-01 08:00:00' \
                 WHERE id IN ({first}, {last})"
            ))
            .await
            .unwrap();
        ts.store
            .execute_raw(&format!(
                "UPDATE task_history SET completed_at = '2023-01-01 08:00:00' WHERE id = {older}"
            ))
            .await
            .unwrap();

        let mum = ts.store.list_history(PARENT_MUM).await.unwrap();
        let ids: Vec<i32> = mum.iter().map(|(h, _)| h.id).collect();
        // same timestamp falls back to id, descending
        assert_eq!(ids, vec![last, first, older]);
        let names: Vec<&str> = mum.iter().map(|(_, kid)| kid.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Alice", "Bob"]);

        let zed = ts.store.list_history(PARENT_ZED).await.unwrap();
        assert_eq!(zed.len(), 1);
        assert_eq!(zed[0].0.completed_by, KID_CAROL);
        assert_eq!(zed[0].1, "Carol");
    }

    #[tokio::test]
    async fn rewards_are_listed_cheapest_first() {
        let ts = TestStore::new().await;
        let rewards = ts.store.list_rewards().await.unwrap();
        let names: Vec<&str> = rewards.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Sticker", "Movie night"]);
    }
}
