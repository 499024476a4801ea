//! Dry-run invoker: logs the call it would have placed and succeeds.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ringflow_core::error::Result;
use ringflow_core::traits::CallInvoker;
use ringflow_core::types::{CallReceipt, CallRequest};

#[derive(Default)]
pub struct DryRunInvoker {
    placed: AtomicU64,
}

impl DryRunInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls "placed" so far.
    pub fn placed(&self) -> u64 {
        self.placed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CallInvoker for DryRunInvoker {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn invoke(&self, request: CallRequest<'_>) -> Result<CallReceipt> {
        let n = self.placed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            "🧪 [dry-run] {} → {} ({}) x{}: {}",
            request.credentials.source_number,
            request.contact.display_name,
            request.contact.phone_number,
            request.repeat_count,
            request.message.unwrap_or("<default greeting>")
        );
        Ok(CallReceipt {
            provider_ref: Some(format!("dry-run-{n}")),
        })
    }
}
