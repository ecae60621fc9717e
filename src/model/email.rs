use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Urgency scores at or above this are classed as urgent.
pub const URGENT_THRESHOLD: f32 = 0.6;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Forward-only: pending -> processed -> sent. The derived `Ord` encodes
/// that order so the store can reject backward transitions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Processed,
    Sent,
}

/// Two-level urgency class used by the queue and by the list filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyClass {
    Urgent,
    Normal,
}

/// Structured details pulled out of the email body. Absent fields are
/// omitted from JSON rather than serialized as null/empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub product_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.alternate_email.is_none()
            && self.order_ids.is_empty()
            && self.product_names.is_empty()
            && self.keywords.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: Uuid,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub sentiment: Option<Sentiment>,
    pub urgency: f32,
    pub is_urgent: bool,
    #[serde(default)]
    pub extracted_data: ExtractedData,
    pub ai_response: Option<String>,
    pub status: EmailStatus,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Email {
    /// Whether a non-empty drafted reply is present.
    pub fn has_response(&self) -> bool {
        self.ai_response
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    pub fn urgency_class(&self) -> UrgencyClass {
        if self.is_urgent {
            UrgencyClass::Urgent
        } else {
            UrgencyClass::Normal
        }
    }
}

/// Fields captured at creation. `urgency` is the raw score; the store
/// derives `is_urgent` from it so the two can never disagree.
#[derive(Debug, Clone)]
pub struct InsertEmail {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub sentiment: Option<Sentiment>,
    pub urgency: f32,
    pub extracted_data: ExtractedData,
    /// Parsed message date from ingestion; defaults to now.
    pub received_at: Option<DateTime<Utc>>,
}

/// Partial update. `id`, `sender`, `subject`, `body`, `receivedAt` and the
/// urgency fields are immutable after creation.
#[derive(Debug, Clone, Default)]
pub struct UpdateEmail {
    pub sentiment: Option<Sentiment>,
    pub extracted_data: Option<ExtractedData>,
    pub ai_response: Option<String>,
    pub status: Option<EmailStatus>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order_is_forward() {
        assert!(EmailStatus::Pending < EmailStatus::Processed);
        assert!(EmailStatus::Processed < EmailStatus::Sent);
    }

    #[test]
    fn test_extracted_data_omits_absent_fields() {
        let data = ExtractedData {
            phone: Some("+1-555-0123".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json, serde_json::json!({ "phone": "+1-555-0123" }));
    }

    #[test]
    fn test_has_response_rejects_blank() {
        let email = Email {
            id: Uuid::new_v4(),
            sender: "a@b.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            received_at: Utc::now(),
            sentiment: None,
            urgency: 0.0,
            is_urgent: false,
            extracted_data: ExtractedData::default(),
            ai_response: Some("   ".to_string()),
            status: EmailStatus::Pending,
            processed_at: None,
        };
        assert!(!email.has_response());
    }
}
