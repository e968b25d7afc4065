//! Utility modules

pub mod db_retry;
