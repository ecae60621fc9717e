use anyhow::Context;
use futures::join;
use indoc::indoc;
use serde::Deserialize;

use crate::{
    error::AppResult,
    model::{ExtractedData, Sentiment, URGENT_THRESHOLD},
    HttpClient,
};

use super::send_chat;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentAnalysis {
    pub sentiment: Sentiment,
    pub confidence: f32,
}

impl SentimentAnalysis {
    /// Applied when the capability is unreachable or returns garbage.
    pub fn fallback() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UrgencyAnalysis {
    pub urgency: f32,
    pub is_urgent: bool,
}

impl UrgencyAnalysis {
    /// The only place the urgent flag is derived from the score.
    pub fn from_score(score: f32) -> Self {
        let urgency = score.clamp(0.0, 1.0);
        Self {
            urgency,
            is_urgent: urgency >= URGENT_THRESHOLD,
        }
    }

    pub fn fallback() -> Self {
        Self::from_score(0.3)
    }
}

/// Combined classification results for a newly arrived email.
#[derive(Debug, Clone)]
pub struct Classification {
    pub sentiment: SentimentAnalysis,
    pub urgency: UrgencyAnalysis,
    pub extracted_data: ExtractedData,
}

const SENTIMENT_SYSTEM_PROMPT: &str = indoc! {r#"
    You are a sentiment analysis expert. Analyze the sentiment of the email
    text and provide a sentiment classification (positive, neutral, or
    negative) and a confidence score between 0 and 1. Respond with JSON in
    this format: { "sentiment": "positive|neutral|negative", "confidence": number }
"#};

const URGENCY_SYSTEM_PROMPT: &str = indoc! {r#"
    You are an urgency analysis expert for customer support emails. Analyze
    the urgency of the email based on keywords like "immediately",
    "critical", "cannot access", "outage", "refund", "down", "not working",
    "emergency", etc. Provide an urgency score between 0 and 1, where
    scores >= 0.6 indicate urgent emails. Respond with JSON in this format:
    { "urgency": number }
"#};

const EXTRACTION_SYSTEM_PROMPT: &str = indoc! {r#"
    You are an information extraction expert. Extract key information from
    customer support emails including phone numbers, alternate emails,
    order IDs, product names, and important keywords. Respond with JSON in
    this format: { "phone": string|null, "alternateEmail": string|null,
    "orderIds": string[], "productNames": string[], "keywords": string[] }
"#};

#[derive(Debug, Deserialize)]
struct SentimentAnswer {
    sentiment: Sentiment,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct UrgencyAnswer {
    urgency: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExtractionAnswer {
    phone: Option<String>,
    alternate_email: Option<String>,
    order_ids: Option<Vec<String>>,
    product_names: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
}

fn parse_sentiment_answer(content: &str) -> AppResult<SentimentAnalysis> {
    let answer: SentimentAnswer = serde_json::from_str(content)
        .context(format!("Could not parse sentiment answer: {}", content))?;
    Ok(SentimentAnalysis {
        sentiment: answer.sentiment,
        confidence: answer.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
    })
}

fn parse_urgency_answer(content: &str) -> AppResult<UrgencyAnalysis> {
    let answer: UrgencyAnswer = serde_json::from_str(content)
        .context(format!("Could not parse urgency answer: {}", content))?;
    Ok(UrgencyAnalysis::from_score(answer.urgency))
}

fn parse_extraction_answer(content: &str) -> AppResult<ExtractedData> {
    let answer: ExtractionAnswer = serde_json::from_str(content)
        .context(format!("Could not parse extraction answer: {}", content))?;
    Ok(ExtractedData {
        phone: answer.phone,
        alternate_email: answer.alternate_email,
        order_ids: answer.order_ids.unwrap_or_default(),
        product_names: answer.product_names.unwrap_or_default(),
        keywords: answer.keywords.unwrap_or_default(),
    })
}

pub async fn analyze_sentiment(http_client: &HttpClient, text: &str) -> AppResult<SentimentAnalysis> {
    let content = send_chat(http_client, SENTIMENT_SYSTEM_PROMPT, text, true).await?;
    parse_sentiment_answer(&content)
}

pub async fn analyze_urgency(http_client: &HttpClient, text: &str) -> AppResult<UrgencyAnalysis> {
    let content = send_chat(http_client, URGENCY_SYSTEM_PROMPT, text, true).await?;
    parse_urgency_answer(&content)
}

pub async fn extract_information(http_client: &HttpClient, text: &str) -> AppResult<ExtractedData> {
    let content = send_chat(http_client, EXTRACTION_SYSTEM_PROMPT, text, true).await?;
    parse_extraction_answer(&content)
}

/// Runs the three analysis prompts concurrently. Individual failures are
/// logged and replaced with their documented fallbacks so ingestion and
/// record creation keep working through a capability outage.
pub async fn classify_email(http_client: &HttpClient, text: &str) -> Classification {
    let (sentiment, urgency, extracted_data) = join!(
        analyze_sentiment(http_client, text),
        analyze_urgency(http_client, text),
        extract_information(http_client, text),
    );

    let sentiment = sentiment.unwrap_or_else(|e| {
        tracing::warn!("Sentiment analysis failed, using fallback: {:?}", e);
        SentimentAnalysis::fallback()
    });
    let urgency = urgency.unwrap_or_else(|e| {
        tracing::warn!("Urgency analysis failed, using fallback: {:?}", e);
        UrgencyAnalysis::fallback()
    });
    let extracted_data = extracted_data.unwrap_or_else(|e| {
        tracing::warn!("Information extraction failed, using fallback: {:?}", e);
        ExtractedData::default()
    });

    Classification {
        sentiment,
        urgency,
        extracted_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_flag_derivation() {
        assert!(UrgencyAnalysis::from_score(0.6).is_urgent);
        assert!(UrgencyAnalysis::from_score(0.95).is_urgent);
        assert!(!UrgencyAnalysis::from_score(0.59).is_urgent);
    }

    #[test]
    fn test_urgency_score_is_clamped() {
        let analysis = UrgencyAnalysis::from_score(1.7);
        assert_eq!(analysis.urgency, 1.0);
        assert!(analysis.is_urgent);

        let analysis = UrgencyAnalysis::from_score(-0.2);
        assert_eq!(analysis.urgency, 0.0);
        assert!(!analysis.is_urgent);
    }

    #[test]
    fn test_parse_sentiment_answer() {
        let parsed =
            parse_sentiment_answer(r#"{"sentiment": "negative", "confidence": 0.92}"#).unwrap();
        assert_eq!(parsed.sentiment, Sentiment::Negative);
        assert_eq!(parsed.confidence, 0.92);

        // Missing confidence defaults rather than erroring
        let parsed = parse_sentiment_answer(r#"{"sentiment": "positive"}"#).unwrap();
        assert_eq!(parsed.confidence, 0.5);

        assert!(parse_sentiment_answer("not json").is_err());
        assert!(parse_sentiment_answer(r#"{"sentiment": "angry"}"#).is_err());
    }

    #[test]
    fn test_parse_urgency_answer() {
        let parsed = parse_urgency_answer(r#"{"urgency": 0.8, "isUrgent": true}"#).unwrap();
        assert_eq!(parsed.urgency, 0.8);
        assert!(parsed.is_urgent);

        assert!(parse_urgency_answer(r#"{}"#).is_err());
    }

    #[test]
    fn test_parse_extraction_answer() {
        let parsed = parse_extraction_answer(
            r#"{
                "phone": "+1-555-0123",
                "alternateEmail": null,
                "orderIds": ["TC-2024-1891"],
                "productNames": [],
                "keywords": ["outage", "critical"]
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.phone.as_deref(), Some("+1-555-0123"));
        assert!(parsed.alternate_email.is_none());
        assert_eq!(parsed.order_ids, vec!["TC-2024-1891"]);
        assert_eq!(parsed.keywords.len(), 2);

        // An empty object is a valid, empty bag
        let parsed = parse_extraction_answer("{}").unwrap();
        assert!(parsed.is_empty());
    }
}
