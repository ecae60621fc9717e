use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mail_parser::MessageParser;

use crate::{
    ai::classify,
    error::AppResult,
    model::InsertEmail,
    queue::ResponseQueue,
    server_config::cfg,
    storage::SharedStore,
    HttpClient,
};

/// Two ingestion runs seeing the same message within this window treat it
/// as a duplicate.
const DEDUPE_WINDOW_SECS: i64 = 60;

/// Seam for the mailbox protocol. Implementations pull raw RFC 822
/// messages and mark them consumed; connection handling stays outside
/// this crate.
#[async_trait]
pub trait MailboxSource: Send + Sync {
    async fn collect(&self) -> AppResult<Vec<Vec<u8>>>;
}

/// Reads `.eml` files dropped into a spool directory and moves them into
/// an `ingested/` subdirectory once read.
pub struct SpoolDirSource {
    dir: PathBuf,
}

impl SpoolDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailboxSource for SpoolDirSource {
    async fn collect(&self) -> AppResult<Vec<Vec<u8>>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let ingested_dir = self.dir.join("ingested");
        tokio::fs::create_dir_all(&ingested_dir)
            .await
            .map_err(anyhow::Error::from)?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(anyhow::Error::from)?;
        while let Some(entry) = entries.next_entry().await.map_err(anyhow::Error::from)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "eml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read(&path).await.map_err(anyhow::Error::from)?;
            let file_name = path.file_name().expect("spool entries have file names");
            tokio::fs::rename(&path, ingested_dir.join(file_name))
                .await
                .map_err(anyhow::Error::from)?;
            messages.push(raw);
        }

        Ok(messages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub date: Option<DateTime<Utc>>,
}

/// Parses a raw message into the fields the record captures. HTML-only
/// bodies are degraded to plain text.
pub fn parse_raw_message(raw: &[u8]) -> Option<ParsedEmail> {
    let msg = MessageParser::default().parse(raw)?;

    let subject = msg.subject().unwrap_or("No Subject").to_string();
    let sender = msg
        .from()
        .and_then(|f| f.first())
        .map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(address)) => format!("{} <{}>", name, address),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => "Unknown Sender".to_string(),
        })
        .unwrap_or_else(|| "Unknown Sender".to_string());

    let body = msg
        .body_text(0)
        .map(|b| b.to_string())
        .or_else(|| {
            msg.body_html(0)
                .map(|h| html2text::from_read(h.as_bytes(), 400))
        })
        .unwrap_or_default();

    let date = msg
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());

    Some(ParsedEmail {
        sender,
        subject,
        body,
        date,
    })
}

/// Only mail that looks support-related enters the triage store.
pub fn is_support_email(keywords: &[String], subject: &str, body: &str) -> bool {
    let text = format!("{} {}", subject, body).to_lowercase();
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Same sender and subject arriving within the dedupe window of an
/// existing record counts as a re-delivery.
pub(crate) async fn is_duplicate(store: &SharedStore, parsed: &ParsedEmail) -> AppResult<bool> {
    let received = parsed.date.unwrap_or_else(Utc::now);
    let existing = store.all().await?;
    Ok(existing.iter().any(|email| {
        email.sender == parsed.sender
            && email.subject == parsed.subject
            && (email.received_at - received).num_seconds().abs() < DEDUPE_WINDOW_SECS
    }))
}

/// Pulls raw mail from a source, classifies it and feeds the triage
/// pipeline: parse, filter, dedupe, classify (with fallbacks), persist,
/// enqueue. Per-message failures are logged and skipped.
pub struct IngestionService {
    store: SharedStore,
    http_client: HttpClient,
    queue: ResponseQueue,
}

impl IngestionService {
    pub fn new(store: SharedStore, http_client: HttpClient, queue: ResponseQueue) -> Self {
        Self {
            store,
            http_client,
            queue,
        }
    }

    pub async fn ingest_from(&self, source: &dyn MailboxSource) -> AppResult<usize> {
        let raw_messages = source.collect().await?;
        let mut ingested = 0;

        for raw in &raw_messages {
            match self.ingest_one(raw).await {
                Ok(true) => ingested += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Error ingesting message: {:?}", e);
                }
            }
        }

        if ingested > 0 {
            tracing::info!("Ingested {} new support emails", ingested);
        }
        Ok(ingested)
    }

    async fn ingest_one(&self, raw: &[u8]) -> AppResult<bool> {
        let Some(parsed) = parse_raw_message(raw) else {
            tracing::warn!("Skipping unparseable message ({} bytes)", raw.len());
            return Ok(false);
        };

        if !is_support_email(&cfg.ingestion.support_keywords, &parsed.subject, &parsed.body) {
            return Ok(false);
        }
        if is_duplicate(&self.store, &parsed).await? {
            return Ok(false);
        }

        let classification = classify::classify_email(&self.http_client, &parsed.body).await;
        let email = self
            .store
            .create(InsertEmail {
                sender: parsed.sender,
                subject: parsed.subject,
                body: parsed.body,
                sentiment: Some(classification.sentiment.sentiment),
                urgency: classification.urgency.urgency,
                extracted_data: classification.extracted_data,
                received_at: parsed.date,
            })
            .await?;

        self.queue.enqueue(email.id, email.is_urgent);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{ExtractedData, Sentiment},
        storage::MemoryStore,
    };

    const RAW_SUPPORT_EMAIL: &[u8] = b"From: Sarah Johnson <sarah.johnson@techcorp.com>\r\n\
To: support@company.com\r\n\
Subject: Critical System Outage - Need Immediate Support\r\n\
Date: Mon, 24 Aug 2026 14:00:00 +0000\r\n\
\r\n\
Our customer portal is down with error 500. Please help immediately.\r\n";

    fn keywords() -> Vec<String> {
        ["support", "help", "issue", "problem"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_raw_message() {
        let parsed = parse_raw_message(RAW_SUPPORT_EMAIL).unwrap();
        assert_eq!(
            parsed.sender,
            "Sarah Johnson <sarah.johnson@techcorp.com>"
        );
        assert_eq!(
            parsed.subject,
            "Critical System Outage - Need Immediate Support"
        );
        assert!(parsed.body.contains("error 500"));
        assert!(parsed.date.is_some());
    }

    #[test]
    fn test_parse_html_only_body() {
        let raw = b"From: a@b.com\r\n\
Subject: Help\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>My order is <b>missing</b>.</p></body></html>\r\n";
        let parsed = parse_raw_message(raw).unwrap();
        assert!(parsed.body.contains("missing"));
        assert!(!parsed.body.contains("<b>"));
    }

    #[test]
    fn test_support_filter() {
        let keywords = keywords();
        assert!(is_support_email(&keywords, "Need help", "body"));
        assert!(is_support_email(&keywords, "Hi", "there is a problem with my order"));
        assert!(!is_support_email(&keywords, "Newsletter", "this week in products"));
    }

    #[tokio::test]
    async fn test_duplicate_detection_window() {
        let store: SharedStore = MemoryStore::new_shared();
        let parsed = parse_raw_message(RAW_SUPPORT_EMAIL).unwrap();

        store
            .create(InsertEmail {
                sender: parsed.sender.clone(),
                subject: parsed.subject.clone(),
                body: parsed.body.clone(),
                sentiment: Some(Sentiment::Negative),
                urgency: 0.9,
                extracted_data: ExtractedData::default(),
                received_at: parsed.date,
            })
            .await
            .unwrap();

        assert!(is_duplicate(&store, &parsed).await.unwrap());

        let mut later = parsed.clone();
        later.date = parsed.date.map(|d| d + chrono::Duration::seconds(DEDUPE_WINDOW_SECS + 5));
        assert!(!is_duplicate(&store, &later).await.unwrap());

        let mut other = parsed.clone();
        other.subject = "Different subject".to_string();
        assert!(!is_duplicate(&store, &other).await.unwrap());
    }

    #[tokio::test]
    async fn test_spool_dir_source_consumes_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.eml"), RAW_SUPPORT_EMAIL).unwrap();
        std::fs::write(dir.path().join("ignored.txt"), b"not mail").unwrap();

        let source = SpoolDirSource::new(dir.path());
        let messages = source.collect().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], RAW_SUPPORT_EMAIL);

        // Consumed files are moved aside, not re-read
        let again = source.collect().await.unwrap();
        assert!(again.is_empty());
        assert!(dir.path().join("ingested/one.eml").exists());
    }

    #[tokio::test]
    async fn test_spool_dir_source_missing_dir_is_empty() {
        let source = SpoolDirSource::new("/nonexistent/spool/path");
        assert!(source.collect().await.unwrap().is_empty());
    }
}
