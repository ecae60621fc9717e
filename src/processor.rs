use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    ai::respond::{generate_reply, ReplyContext},
    error::AppResult,
    knowledge::KnowledgeBase,
    model::{EmailStatus, UpdateEmail},
    queue::{ProcessEmail, ProcessOutcome},
    storage::SharedStore,
    HttpClient,
};

/// The queue's per-item processing step: fetch the record, generate a
/// reply grounded in the knowledge base, persist it and advance the
/// status. Skips records that vanished or already carry a reply, which
/// makes duplicate enqueues harmless.
#[derive(Clone)]
pub struct ReplyProcessor {
    store: SharedStore,
    http_client: HttpClient,
    knowledge: Arc<KnowledgeBase>,
}

impl ReplyProcessor {
    pub fn new(store: SharedStore, http_client: HttpClient, knowledge: Arc<KnowledgeBase>) -> Self {
        Self {
            store,
            http_client,
            knowledge,
        }
    }
}

#[async_trait]
impl ProcessEmail for ReplyProcessor {
    async fn process(&self, email_id: Uuid) -> AppResult<ProcessOutcome> {
        let Some(email) = self.store.get(email_id).await? else {
            tracing::warn!("Email {} no longer exists, dropping queue item", email_id);
            return Ok(ProcessOutcome::RecordMissing);
        };

        if email.has_response() {
            return Ok(ProcessOutcome::AlreadyAnswered);
        }

        let reply =
            generate_reply(&self.http_client, &self.knowledge, &ReplyContext::from(&email)).await?;

        self.store
            .update(
                email_id,
                UpdateEmail {
                    ai_response: Some(reply),
                    status: Some(EmailStatus::Processed),
                    processed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!("Generated reply for email {}", email_id);
        Ok(ProcessOutcome::Generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{ExtractedData, InsertEmail, Sentiment},
        storage::MemoryStore,
    };

    fn processor(store: SharedStore) -> ReplyProcessor {
        ReplyProcessor::new(
            store,
            reqwest::Client::new(),
            Arc::new(KnowledgeBase::default()),
        )
    }

    // Both skip paths return before any capability call is made, so these
    // run without a reachable endpoint.

    #[tokio::test]
    async fn test_missing_record_is_dropped_not_fatal() {
        let store: SharedStore = MemoryStore::new_shared();
        let outcome = processor(store).process(Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::RecordMissing);
    }

    #[tokio::test]
    async fn test_existing_reply_is_left_untouched() {
        let store: SharedStore = MemoryStore::new_shared();
        let email = store
            .create(InsertEmail {
                sender: "customer@example.com".to_string(),
                subject: "Refund".to_string(),
                body: "Please refund my order".to_string(),
                sentiment: Some(Sentiment::Negative),
                urgency: 0.7,
                extracted_data: ExtractedData::default(),
                received_at: None,
            })
            .await
            .unwrap();
        store
            .update(
                email.id,
                UpdateEmail {
                    ai_response: Some("existing reply".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = processor(store.clone()).process(email.id).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::AlreadyAnswered);

        let stored = store.get(email.id).await.unwrap().unwrap();
        assert_eq!(stored.ai_response.as_deref(), Some("existing reply"));
        assert_eq!(stored.status, crate::model::EmailStatus::Pending);
    }
}
