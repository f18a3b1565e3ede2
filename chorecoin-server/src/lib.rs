pub mod chores;
pub mod server;
pub mod storage;
