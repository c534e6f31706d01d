//! Activity logging: JSONL file writer fed by a dedicated logger thread.

pub mod activity;
pub mod jsonl;
