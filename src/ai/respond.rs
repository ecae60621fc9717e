use indoc::formatdoc;

use crate::{
    error::AppResult,
    knowledge::KnowledgeBase,
    model::{Email, ExtractedData, Sentiment},
    HttpClient,
};

use super::send_chat;

/// Generic reply used when the model returns empty content.
pub const FALLBACK_REPLY: &str =
    "Thank you for contacting us. We'll review your request and get back to you soon.";

/// How many knowledge documents are folded into the reply prompt.
const KNOWLEDGE_TOP_K: usize = 3;

#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub sentiment: Sentiment,
    pub extracted_data: &'a ExtractedData,
}

impl<'a> From<&'a Email> for ReplyContext<'a> {
    fn from(email: &'a Email) -> Self {
        Self {
            sender: &email.sender,
            subject: &email.subject,
            body: &email.body,
            sentiment: email.sentiment.unwrap_or(Sentiment::Neutral),
            extracted_data: &email.extracted_data,
        }
    }
}

fn reply_system_prompt(ctx: &ReplyContext<'_>, knowledge_context: &str) -> String {
    let extracted = serde_json::to_string(ctx.extracted_data).unwrap_or_else(|_| "{}".to_string());

    formatdoc! {r#"
        You are an empathetic customer support assistant with access to the
        company knowledge base. Generate professional, context-aware
        responses using the provided knowledge base information.

        IMPORTANT GUIDELINES:
        - Always reference relevant policies and procedures from the knowledge base
        - Be empathetic and understanding, especially for negative sentiment emails
        - Reference specific information from the email (order IDs, product names, etc.)
        - Provide clear next steps based on company policies
        - If you cannot find relevant information in the knowledge base, acknowledge this and offer to escalate
        - Always include a case reference number in format: CASE-2025-XXXX (use random 4 digits)
        - Stay grounded in the provided knowledge - don't make up policies or procedures

        KNOWLEDGE BASE CONTEXT:
        {knowledge_context}

        Customer sentiment: {sentiment}
        Extracted data: {extracted}"#,
        sentiment = ctx.sentiment,
    }
}

fn reply_user_prompt(ctx: &ReplyContext<'_>) -> String {
    formatdoc! {r#"
        Customer email from {sender}:
        Subject: {subject}

        {body}

        Please generate an appropriate response using the knowledge base information."#,
        sender = ctx.sender,
        subject = ctx.subject,
        body = ctx.body,
    }
}

/// Drafts a reply conditioned on the most relevant knowledge documents.
/// Capability failures propagate to the caller; the queue drops the item
/// and the synchronous route surfaces the error.
pub async fn generate_reply(
    http_client: &HttpClient,
    knowledge: &KnowledgeBase,
    ctx: &ReplyContext<'_>,
) -> AppResult<String> {
    let query = format!("{} {}", ctx.subject, ctx.body);
    let knowledge_context = knowledge.format_context(&query, KNOWLEDGE_TOP_K);

    let system = reply_system_prompt(ctx, &knowledge_context);
    let user = reply_user_prompt(ctx);

    let content = send_chat(http_client, &system, &user, false).await?;
    let content = content.trim();
    if content.is_empty() {
        return Ok(FALLBACK_REPLY.to_string());
    }
    Ok(content.to_string())
}
