//! Types shared between the ChoreCoin server and its clients: roles, JWT
//! claims, REST DTOs and endpoint paths.

pub mod api;
pub mod auth;
pub mod domain;
pub mod jwt;
