use serde::{Deserialize, Serialize};

use crate::domain::Assignee;

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionDto {
    pub version: String,
}

// Parents/Kids
#[derive(Debug, Serialize, Deserialize)]
pub struct ParentDto {
    pub id: i32,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KidDto {
    pub id: i32,
    pub name: String,
    pub currency: i32,
}

/// Returned by the "give access" flow; `profile_path` is what a client
/// encodes into the QR code.
#[derive(Debug, Serialize, Deserialize)]
pub struct KidAccessResp {
    pub token: String,
    pub kid_id: i32,
    pub profile_path: String,
}

// Tasks
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskReq {
    pub name: String,
    pub reward_value: i32,
    pub assignee: Assignee,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDto {
    pub id: i32,
    pub name: String,
    pub reward_value: i32,
    pub assigned_to: i32,
    pub assignee_name: String,
    /// True while another request is settling this task.
    pub completing: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteTaskResp {
    pub history: HistoryItemDto,
    pub kid_id: i32,
    pub currency: i32,
}

// History
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryItemDto {
    pub id: i32,
    pub task_id: i32,
    pub name: String,
    pub completed_by: i32,
    pub kid_name: String,
    pub reward_value: i32,
    pub completed_at: String, // RFC3339 UTC
}

// Rewards
#[derive(Debug, Serialize, Deserialize)]
pub struct RewardDto {
    pub id: i32,
    pub name: String,
    pub cost: i32,
}
