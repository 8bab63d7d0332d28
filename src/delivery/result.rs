//! Outcome of one send.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::MailError;

/// What happened to one `send` call. Built once, never mutated by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// The message reached at least one recipient.
    pub success: bool,
    /// Recipients that were refused or could not be parsed, with the reason.
    pub recipient_errors: BTreeMap<String, String>,
    /// Error text when the send failed, or a summary of refused recipients.
    pub error_info: String,
    /// Message-ID of the composed message, when composition got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl DeliveryResult {
    /// A successful send. Refused recipients are summarized in `error_info`.
    pub fn delivered(message_id: String, recipient_errors: BTreeMap<String, String>) -> Self {
        let error_info = if recipient_errors.is_empty() {
            String::new()
        } else {
            format!(
                "The following recipients failed: {}",
                recipient_errors.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        };
        Self {
            success: true,
            recipient_errors,
            error_info,
            message_id: Some(message_id),
        }
    }

    /// A failed send.
    pub fn failed(error: &MailError, recipient_errors: BTreeMap<String, String>, message_id: Option<String>) -> Self {
        Self {
            success: false,
            recipient_errors,
            error_info: error.to_string(),
            message_id,
        }
    }

    /// JSON form for hosting applications.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivered_with_partial_failure() {
        let mut errors = BTreeMap::new();
        errors.insert("bad@example.com".to_string(), "550 5.1.1 unknown".to_string());
        let result = DeliveryResult::delivered("<id@host>".into(), errors);
        assert!(result.success);
        assert_eq!(result.recipient_errors.len(), 1);
        assert!(result.error_info.contains("bad@example.com"));
    }

    #[test]
    fn test_failed_carries_error_text() {
        let result = DeliveryResult::failed(&MailError::NoRecipients, BTreeMap::new(), None);
        assert!(!result.success);
        assert_eq!(result.error_info, MailError::NoRecipients.to_string());
        let json = result.to_json();
        assert!(json.contains("\"success\":false"));
        assert!(!json.contains("message_id"));
    }
}
