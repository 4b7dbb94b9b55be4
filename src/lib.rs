//! deskpipe - support ticket unification and embedding pipelines
//!
//! This crate provides:
//! - Normalization of forms, chats, emails and call transcripts into tickets
//! - A rebuildable unified tickets table with a completeness gate
//! - Incremental text and image embedding backfills over warehouse tables
//! - A staged orchestrator with single-flight locking and run history

pub mod audio;
pub mod backfill;
pub mod capability;
pub mod commands;
pub mod config;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod unify;
pub mod warehouse;

pub use config::Config;
pub use error::{Error, Result};
