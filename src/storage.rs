use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    model::{Email, EmailStatus, InsertEmail, Sentiment, UpdateEmail, UrgencyClass, URGENT_THRESHOLD},
};

pub type SharedStore = Arc<dyn EmailStore>;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailFilter {
    pub sentiment: Option<Sentiment>,
    pub urgency: Option<UrgencyClass>,
    pub status: Option<EmailStatus>,
}

impl EmailFilter {
    pub fn is_empty(&self) -> bool {
        self.sentiment.is_none() && self.urgency.is_none() && self.status.is_none()
    }

    fn matches(&self, email: &Email) -> bool {
        if let Some(sentiment) = self.sentiment {
            if email.sentiment != Some(sentiment) {
                return false;
            }
        }
        if let Some(urgency) = self.urgency {
            if email.urgency_class() != urgency {
                return false;
            }
        }
        if let Some(status) = self.status {
            if email.status != status {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SentimentDistribution {
    pub positive: u32,
    pub neutral: u32,
    pub negative: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct ProcessingStats {
    pub pending: usize,
    pub processed: usize,
    pub sent: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_emails: usize,
    pub urgent_emails: usize,
    /// Mean hours from receipt to reply generation.
    pub avg_response_time: f64,
    /// Percentage of emails that are no longer pending.
    pub resolution_rate: u32,
    /// Percentages, rounded.
    pub sentiment_distribution: SentimentDistribution,
    pub processing_stats: ProcessingStats,
}

/// Record store seam. The in-process implementation below holds records in
/// memory; a database-backed implementation fills the same trait.
#[async_trait]
pub trait EmailStore: Send + Sync {
    async fn all(&self) -> AppResult<Vec<Email>>;
    async fn get(&self, id: Uuid) -> AppResult<Option<Email>>;
    async fn create(&self, new: InsertEmail) -> AppResult<Email>;
    async fn update(&self, id: Uuid, updates: UpdateEmail) -> AppResult<Option<Email>>;
    async fn filtered(&self, filter: &EmailFilter) -> AppResult<Vec<Email>>;
    async fn analytics(&self) -> AppResult<Analytics>;
}

#[derive(Default)]
pub struct MemoryStore {
    emails: RwLock<IndexMap<Uuid, Email>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

fn newest_first(mut emails: Vec<Email>) -> Vec<Email> {
    emails.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    emails
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u32
}

#[async_trait]
impl EmailStore for MemoryStore {
    async fn all(&self) -> AppResult<Vec<Email>> {
        let emails = self.emails.read().await;
        Ok(newest_first(emails.values().cloned().collect()))
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Email>> {
        let emails = self.emails.read().await;
        Ok(emails.get(&id).cloned())
    }

    async fn create(&self, new: InsertEmail) -> AppResult<Email> {
        let urgency = new.urgency.clamp(0.0, 1.0);
        let email = Email {
            id: Uuid::new_v4(),
            sender: new.sender,
            subject: new.subject,
            body: new.body,
            received_at: new.received_at.unwrap_or_else(Utc::now),
            sentiment: new.sentiment,
            urgency,
            // Derived here so the flag and the score can never disagree
            is_urgent: urgency >= URGENT_THRESHOLD,
            extracted_data: new.extracted_data,
            ai_response: None,
            status: EmailStatus::Pending,
            processed_at: None,
        };

        let mut emails = self.emails.write().await;
        emails.insert(email.id, email.clone());
        Ok(email)
    }

    async fn update(&self, id: Uuid, updates: UpdateEmail) -> AppResult<Option<Email>> {
        let mut emails = self.emails.write().await;
        let Some(email) = emails.get_mut(&id) else {
            return Ok(None);
        };

        // Validate before touching anything so a rejected update leaves
        // the record untouched
        if let Some(status) = updates.status {
            if status < email.status {
                return Err(AppError::Conflict(format!(
                    "Cannot move email {} from {} back to {}",
                    id, email.status, status
                )));
            }
            let incoming_reply = updates
                .ai_response
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
            if status == EmailStatus::Sent && !incoming_reply && !email.has_response() {
                return Err(AppError::Conflict(format!(
                    "Cannot mark email {} as sent without a reply",
                    id
                )));
            }
        }

        if let Some(sentiment) = updates.sentiment {
            email.sentiment = Some(sentiment);
        }
        if let Some(extracted_data) = updates.extracted_data {
            email.extracted_data = extracted_data;
        }
        if let Some(ai_response) = updates.ai_response {
            email.ai_response = Some(ai_response);
        }
        if let Some(status) = updates.status {
            email.status = status;
        }
        if let Some(processed_at) = updates.processed_at {
            email.processed_at = Some(processed_at);
        }

        Ok(Some(email.clone()))
    }

    async fn filtered(&self, filter: &EmailFilter) -> AppResult<Vec<Email>> {
        let emails = self.emails.read().await;
        Ok(newest_first(
            emails
                .values()
                .filter(|email| filter.matches(email))
                .cloned()
                .collect(),
        ))
    }

    async fn analytics(&self) -> AppResult<Analytics> {
        let emails = self.emails.read().await;
        let total = emails.len();

        let mut urgent = 0;
        let mut distribution = [0usize; 3];
        let mut stats = ProcessingStats::default();
        let mut response_hours = 0.0;
        let mut responded = 0usize;

        for email in emails.values() {
            if email.is_urgent {
                urgent += 1;
            }
            match email.sentiment {
                Some(Sentiment::Positive) => distribution[0] += 1,
                Some(Sentiment::Neutral) => distribution[1] += 1,
                Some(Sentiment::Negative) => distribution[2] += 1,
                None => {}
            }
            match email.status {
                EmailStatus::Pending => stats.pending += 1,
                EmailStatus::Processed => stats.processed += 1,
                EmailStatus::Sent => stats.sent += 1,
            }
            if let Some(processed_at) = email.processed_at {
                response_hours +=
                    (processed_at - email.received_at).num_seconds().max(0) as f64 / 3600.0;
                responded += 1;
            }
        }

        let avg_response_time = if responded > 0 {
            response_hours / responded as f64
        } else {
            0.0
        };

        Ok(Analytics {
            total_emails: total,
            urgent_emails: urgent,
            avg_response_time,
            resolution_rate: percent(stats.processed + stats.sent, total),
            sentiment_distribution: SentimentDistribution {
                positive: percent(distribution[0], total),
                neutral: percent(distribution[1], total),
                negative: percent(distribution[2], total),
            },
            processing_stats: stats,
        })
    }
}
