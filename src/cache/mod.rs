//! In-process caching for CRUNEVO.
//!
//! - [`TtlCache`]: bounded key/value store with per-entry expiry, used by
//!   link previews, weather and presence.
//! - [`QueryCache`]: cached reads keyed by query arguments, invalidated by
//!   tag, with a rolling [`QueryProfiler`].
//!
//! Every cache is an explicit value built once at startup with an injected
//! [`Clock`] and shared by `Arc`. Caches are process-local; separate
//! processes do not see each other's invalidations.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! query_capacity = 2000
//! query_ttl_seconds = 300
//! preview_capacity = 1000
//! ```

pub mod clock;
mod config;
mod error;
mod keys;
mod lock;
mod profiler;
mod query;
mod registry;
mod ttl;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::CacheConfig;
pub use error::CacheError;
pub use keys::{KeyBuilder, QueryKey, Tag, TagSet};
pub use profiler::{ProfilerConfig, QueryProfiler, QueryReport, QuerySample, SlowKey};
pub use query::{QueryCache, QuerySpec};
pub use registry::TagIndex;
pub use ttl::TtlCache;

pub(crate) use lock::mutex_lock;
