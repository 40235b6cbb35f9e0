//! CRUNEVO core: decayed feed scoring, tagged query caching with profiling,
//! failed-login throttling and cached link previews.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
