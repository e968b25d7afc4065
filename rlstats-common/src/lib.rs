//! # rlstats Common Library
//!
//! Shared code for the rlstats services including:
//! - Common error type
//! - Replay status and its transition table
//! - Event types (SyncEvent enum) and the broadcast EventBus
//! - Root folder and config file resolution

pub mod config;
pub mod error;
pub mod events;
pub mod status;

pub use error::{Error, Result};
pub use status::ReplayStatus;
