//! Collaborator seams. The scheduler never reaches past these traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CallReceipt, CallRequest, Contact, CredentialBundle};

/// Read-only contact lookup.
pub trait ContactDirectory: Send + Sync {
    /// Returns `RingflowError::NotFound` for unknown ids.
    fn get_contact(&self, id: &str) -> Result<Contact>;
}

/// Source of the outbound endpoint identity.
pub trait CredentialProvider: Send + Sync {
    /// Returns `RingflowError::Config` when any required field is blank.
    fn credential_bundle(&self) -> Result<CredentialBundle>;
}

/// Places the actual call.
#[async_trait]
pub trait CallInvoker: Send + Sync {
    /// Invoker name, for logs.
    fn name(&self) -> &str;

    /// Perform the call. `Err` means the attempt failed; the scheduler
    /// records it and never retries.
    async fn invoke(&self, request: CallRequest<'_>) -> Result<CallReceipt>;
}

/// A fixed bundle, checked on every read.
impl CredentialProvider for CredentialBundle {
    fn credential_bundle(&self) -> Result<CredentialBundle> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(self.clone())
        } else {
            Err(crate::error::RingflowError::Config(format!(
                "credential bundle incomplete: missing {}",
                missing.join(", ")
            )))
        }
    }
}
