//! Twilio Programmable Voice invoker.
//!
//! Creates an outbound call with inline TwiML. The call SID returned by the
//! API becomes the attempt's provider reference.
//! Requires: Account SID + Auth Token + a Twilio-owned caller number.

use async_trait::async_trait;
use ringflow_core::error::{Result, RingflowError};
use ringflow_core::traits::CallInvoker;
use ringflow_core::types::{CallReceipt, CallRequest};

/// Spoken when the dispatch carries no message.
pub const DEFAULT_GREETING: &str =
    "Hello, this is an automated call. Thank you for your time. Goodbye.";

/// Twilio voice invoker.
pub struct TwilioInvoker {
    api_base: String,
    client: reqwest::Client,
}

impl TwilioInvoker {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn calls_url(&self, account_sid: &str) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls.json", self.api_base, account_sid)
    }
}

impl Default for TwilioInvoker {
    fn default() -> Self {
        Self::new("https://api.twilio.com")
    }
}

/// Build the inline TwiML document for a call.
pub fn build_twiml(message: Option<&str>, repeat_count: u32) -> String {
    let text = message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_GREETING);
    format!(
        "<Response><Say loop=\"{}\">{}</Say></Response>",
        repeat_count.max(1),
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[async_trait]
impl CallInvoker for TwilioInvoker {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn invoke(&self, request: CallRequest<'_>) -> Result<CallReceipt> {
        let creds = request.credentials;
        if !creds.is_complete() {
            return Err(RingflowError::Config(format!(
                "Twilio credentials incomplete: missing {}",
                creds.missing_fields().join(", ")
            )));
        }

        let twiml = build_twiml(request.message, request.repeat_count);
        let form = [
            ("To", request.contact.phone_number.as_str()),
            ("From", creds.source_number.as_str()),
            ("Twiml", twiml.as_str()),
        ];

        let response = self
            .client
            .post(self.calls_url(&creds.account_id))
            .basic_auth(&creds.account_id, Some(&creds.secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| RingflowError::Http(format!("Twilio request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&error_text)
                .ok()
                .and_then(|v| v["message"].as_str().map(String::from))
                .unwrap_or(error_text);
            return Err(RingflowError::Invocation(format!(
                "Twilio API error {status}: {detail}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RingflowError::Http(format!("Invalid Twilio response: {e}")))?;

        let sid = result["sid"].as_str().map(String::from);
        tracing::debug!(
            "Twilio call created: {} → {} (attempt {})",
            sid.as_deref().unwrap_or("unknown"),
            request.contact.phone_number,
            request.attempt_id
        );
        Ok(CallReceipt { provider_ref: sid })
    }
}
