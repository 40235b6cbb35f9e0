//! Application services orchestrating domain logic, caches and adapters.

pub mod blocks;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod link_preview;
pub mod login_attempts;
pub mod presence;
pub mod repos;
pub mod search;
pub mod services;
pub mod weather;
