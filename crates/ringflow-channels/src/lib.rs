//! # Ringflow Channels
//! Call invoker implementations.
//!
//! - `twilio`: places real voice calls through the Twilio REST API.
//! - `dry_run`: logs the call and reports success without dialing anyone.

pub mod dry_run;
pub mod twilio;

pub use dry_run::DryRunInvoker;
pub use twilio::TwilioInvoker;
