//! Timeline synchronization engine
//!
//! Platform-independent building blocks: providers, normalization, the
//! per-account circuit breaker, filtering, combination and background
//! dispatch. Services in `crate::service` compose them.

pub mod background;
pub mod circuit_breaker;
pub mod combine;
pub mod filter;
pub mod item;
pub mod normalize;
pub mod providers;
pub mod settings;

pub use background::{BackgroundDispatcher, BackgroundJob, JobRunner};
pub use circuit_breaker::{BreakerPolicy, CircuitPhase};
pub use combine::{DateGroup, combine, group_by_date};
pub use filter::ProfileFilterEngine;
pub use item::{ItemPayload, RawPayload, TimelineItem};
pub use normalize::normalize;
pub use providers::{FetchContext, MemoryProvider, Provider, ProviderError, ProviderRegistry};
pub use settings::AccountSettings;

/// User agent sent to platform APIs
pub const USER_AGENT: &str = concat!("chronofeed/", env!("CARGO_PKG_VERSION"));
