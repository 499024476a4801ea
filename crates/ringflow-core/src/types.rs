//! Domain types supplied by external collaborators.

use serde::{Deserialize, Serialize};

/// A contact owned by the address book. The scheduler only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(alias = "name")]
    pub display_name: String,
    /// Passed through to the invoker verbatim; format is not validated.
    #[serde(alias = "phone")]
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Coarse location metadata for a contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Contact {
    pub fn new(id: &str, display_name: &str, phone_number: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            phone_number: phone_number.to_string(),
            region: None,
            notes: None,
        }
    }

    /// "City, State", whichever parts are known.
    pub fn location(&self) -> Option<String> {
        let region = self.region.as_ref()?;
        match (&region.city, &region.state) {
            (Some(city), Some(state)) => Some(format!("{city}, {state}")),
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        }
    }
}

/// Outbound-call endpoint identity.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub account_id: String,
    pub secret: String,
    /// Caller ID presented to the callee.
    pub source_number: String,
}

impl CredentialBundle {
    pub fn new(account_id: &str, secret: &str, source_number: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            secret: secret.to_string(),
            source_number: source_number.to_string(),
        }
    }

    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.account_id.trim().is_empty() {
            missing.push("account_id");
        }
        if self.secret.trim().is_empty() {
            missing.push("secret");
        }
        if self.source_number.trim().is_empty() {
            missing.push("source_number");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("account_id", &self.account_id)
            .field("secret", &"***")
            .field("source_number", &self.source_number)
            .finish()
    }
}

/// Everything the invoker needs to place one call.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub attempt_id: &'a str,
    pub contact: &'a Contact,
    pub credentials: &'a CredentialBundle,
    pub message: Option<&'a str>,
    /// Forwarded as-is; the invoker decides what repeating means.
    pub repeat_count: u32,
}

/// What a successful invocation hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallReceipt {
    /// Provider-side call identifier (e.g. a Twilio call SID).
    pub provider_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields() {
        let bundle = CredentialBundle::new("AC123", "", " ");
        assert_eq!(bundle.missing_fields(), vec!["secret", "source_number"]);
        assert!(!bundle.is_complete());
        assert!(CredentialBundle::new("AC123", "tok", "+15550001").is_complete());
    }

    #[test]
    fn test_debug_hides_secret() {
        let bundle = CredentialBundle::new("AC123", "super-secret", "+15550001");
        let printed = format!("{bundle:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("AC123"));
    }

    #[test]
    fn test_contact_accepts_short_field_names() {
        let json = r#"{"id":"c1","name":"Asha","phone":"+919800000001","region":{"state":"MH","city":"Pune"}}"#;
        let contact: Contact = serde_json::from_str(json).unwrap();
        assert_eq!(contact.display_name, "Asha");
        assert_eq!(contact.phone_number, "+919800000001");
        assert_eq!(contact.location().as_deref(), Some("Pune, MH"));
    }
}
