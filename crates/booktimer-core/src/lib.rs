//! booktimer-core: the pure half of the reading-time tracker.
//! Page classification, title stabilization, the per-tab session state
//! machine and the day-keyed ledger. No async, no I/O; every operation
//! takes `now` explicitly.

pub mod error;
pub mod ledger;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod stabilizer;
pub mod types;
pub mod urls;

pub use error::{InvalidTabId, ResolveError, SettingsError};
pub use ledger::{CommitRecord, DayPart, Ledger, LedgerStats, day_key, split_across_days};
pub use resolver::{catalog_code, meta_matches_url, resolve};
pub use session::{
    CommitReason, CommitRequest, DropReason, Events, PauseReason, PendingKind, PendingSegment,
    PromoteBlock, SessionEvent, StopReason, TabState,
};
pub use settings::Settings;
pub use stabilizer::{StabilityContext, StabilityOutput, TitleStabilizer};
pub use types::{CatalogInfo, Certificate, ContentIdentity, Site, TabId, WindowId};

/// Milliseconds elapsed from `from` to `to`, clamped at zero.
pub fn elapsed_ms(from: chrono::DateTime<chrono::Utc>, to: chrono::DateTime<chrono::Utc>) -> u64 {
    u64::try_from(to.signed_duration_since(from).num_milliseconds()).unwrap_or(0)
}

/// A millisecond setting as a signed span.
pub fn span(ms: u64) -> chrono::TimeDelta {
    chrono::TimeDelta::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}
