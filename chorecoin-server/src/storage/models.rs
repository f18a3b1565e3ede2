use crate::storage::schema::{kids, parents, rewards, sessions, task_history, tasks};
use chrono::NaiveDateTime;
use diesel::prelude::*;

/// `tasks.status` of a task nobody is settling.
pub const STATUS_OPEN: &str = "open";
/// `tasks.status` while one caller holds the completion claim.
pub const STATUS_COMPLETING: &str = "completing";

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = parents)]
pub struct Parent {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub auth_id: String,
}

#[derive(Insertable)]
#[diesel(table_name = parents)]
pub struct NewParent<'a> {
    pub id: i32,
    pub name: &'a str,
    pub email: &'a str,
    pub auth_id: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = kids)]
#[diesel(belongs_to(Parent, foreign_key = parent_id))]
pub struct Kid {
    pub id: i32,
    pub parent_id: i32,
    pub name: String,
    pub currency: i32,
}

#[derive(Insertable)]
#[diesel(table_name = kids)]
pub struct NewKid<'a> {
    pub id: i32,
    pub parent_id: i32,
    pub name: &'a str,
    pub currency: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(belongs_to(Kid, foreign_key = assigned_to))]
pub struct Task {
    pub id: i32,
    pub name: String,
    pub created_by: i32,
    pub assigned_to: i32,
    pub reward_value: i32,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub claimed_at: Option<NaiveDateTime>,
}

impl Task {
    pub fn is_completing(&self) -> bool {
        self.status == STATUS_COMPLETING
    }
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub name: &'a str,
    pub created_by: i32,
    pub assigned_to: i32,
    pub reward_value: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = task_history)]
#[diesel(belongs_to(Kid, foreign_key = completed_by))]
pub struct HistoryRecord {
    pub id: i32,
    pub task_id: i32,
    pub name: String,
    pub completed_by: i32,
    pub reward_value: i32,
    pub completed_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = task_history)]
pub struct NewHistoryRecord<'a> {
    pub task_id: i32,
    pub name: &'a str,
    pub completed_by: i32,
    pub reward_value: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = rewards)]
pub struct Reward {
    pub id: i32,
    pub name: String,
    pub cost: i32,
}

#[derive(Insertable)]
#[diesel(table_name = rewards)]
pub struct NewReward<'a> {
    pub id: i32,
    pub name: &'a str,
    pub cost: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub username: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub username: &'a str,
}
