//! # Ringflow Scheduler
//!
//! Turns "call these contacts, this way" into a timeline of call attempts and
//! drives each attempt from `Pending` to `Completed` or `Failed`.
//!
//! ## Architecture
//! ```text
//! submit_campaign_dispatch(campaign, contacts, policy, repeat, message)
//!   ├── policy::resolve_fire_time   Immediate / ScheduledForLater / Staggered
//!   ├── builder::build_attempts     one Pending attempt per contact, ordinal order
//!   └── DispatchEngine::admit
//!         ├── Timeline              min-heap on (scheduled_time, ordinal)
//!         └── BatchLane             per submission, spacing guard (3s default)
//!
//! worker loop (tokio timers, idle when nothing is due)
//!   ├── due entries → lane ready queue
//!   ├── lane release → Calling → spawned CallInvoker task (timeout-bounded)
//!   └── outcome channel → Completed / Failed → broadcast StatusChange
//! ```
//!
//! Persistence (`persistence`) and the JSON contact store (`store`) are
//! optional plumbing for callers that want state to survive restarts.

pub mod attempt;
pub mod builder;
pub mod campaign;
pub mod engine;
pub mod events;
pub mod lanes;
pub mod persistence;
pub mod policy;
pub mod stats;
pub mod store;
pub mod timeline;
mod worker;

pub use attempt::{Attempt, AttemptStatus};
pub use builder::{DispatchParams, build_attempts};
pub use campaign::{Campaign, CampaignRegistry, CampaignStatus};
pub use engine::DispatchEngine;
pub use events::{EventLog, StatusChange};
pub use lanes::{BatchLane, LaneStats};
pub use persistence::{DispatchDb, spawn_snapshot_writer};
pub use policy::{DispatchPolicy, clamp_interval, resolve_fire_time};
pub use stats::DispatchStats;
pub use store::ContactStore;
pub use timeline::{Timeline, TimelineEntry};
