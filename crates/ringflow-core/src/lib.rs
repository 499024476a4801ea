//! # Ringflow Core
//!
//! Shared building blocks for the Ringflow call dispatcher:
//! - `types`: contacts and the outbound credential bundle
//! - `traits`: the external collaborators the scheduler talks to
//!   (contact directory, credential provider, call invoker)
//! - `error`: one error taxonomy for every crate
//! - `config`: TOML configuration (`~/.ringflow/config.toml`)

pub mod config;
pub mod directory;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RingflowConfig;
pub use directory::MemoryDirectory;
pub use error::{Result, RingflowError};
pub use traits::{CallInvoker, ContactDirectory, CredentialProvider};
pub use types::{CallReceipt, CallRequest, Contact, CredentialBundle, Region};
