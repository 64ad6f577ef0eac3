//! Activity logging: JSONL append-only log behind a non-blocking channel.

pub mod events;
pub mod jsonl;
