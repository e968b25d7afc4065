//! Data models for rlstats-sync

pub mod entities;
pub mod payload;
pub mod replay;

pub use entities::{GlobalPlayer, PlayerRecord, ReplayGroup, TeamDetail, TeamRecord, Uploader};
pub use payload::{ReplayPayload, TeamColor, TeamPayload};
pub use replay::{Replay, ReplayMetadata};
