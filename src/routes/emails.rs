use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ai::{
        classify,
        respond::{generate_reply, ReplyContext},
    },
    error::{AppError, AppJsonResult, AppResult},
    model::{Email, EmailStatus, InsertEmail, UpdateEmail},
    queue::{Priority, QueueStats},
    storage::EmailFilter,
    ServerState,
};

/// # GET /api/emails
///
/// All emails, newest first, optionally filtered by sentiment, urgency
/// class or status.
pub async fn get_all(
    State(state): State<ServerState>,
    Query(filter): Query<EmailFilter>,
) -> AppJsonResult<Vec<Email>> {
    let emails = if filter.is_empty() {
        state.store.all().await?
    } else {
        state.store.filtered(&filter).await?
    };
    Ok(Json(emails))
}

pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> AppJsonResult<Email> {
    let email = fetch_email(&state, id).await?;
    Ok(Json(email))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmailRequest {
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// # POST /api/emails
///
/// Manual entry: classify, persist and queue the new email.
pub async fn create(
    State(state): State<ServerState>,
    Json(req): Json<CreateEmailRequest>,
) -> AppResult<(StatusCode, Json<Email>)> {
    if req.sender.trim().is_empty() || req.subject.trim().is_empty() || req.body.trim().is_empty() {
        return Err(AppError::BadRequest(
            "sender, subject and body are required".to_string(),
        ));
    }

    let email = classify_and_store(&state, req.sender, req.subject, req.body).await?;
    Ok((StatusCode::CREATED, Json(email)))
}

/// # POST /api/emails/:id/generate-response
///
/// Synchronous generation for the "generate now" button. Capability
/// failures surface as request errors here, unlike the queue path.
pub async fn generate_response(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> AppJsonResult<Email> {
    let email = fetch_email(&state, id).await?;

    let reply = generate_reply(
        &state.http_client,
        &state.knowledge,
        &ReplyContext::from(&email),
    )
    .await?;

    let mut updates = UpdateEmail {
        ai_response: Some(reply),
        ..Default::default()
    };
    // Regenerating for an already-processed email must not move status
    if email.status == EmailStatus::Pending {
        updates.status = Some(EmailStatus::Processed);
        updates.processed_at = Some(Utc::now());
    }

    let updated = apply_update(&state, id, updates).await?;
    Ok(Json(updated))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendRequest {
    /// Human-edited reply text; replaces the drafted one when present.
    pub edited_response: Option<String>,
}

/// # POST /api/emails/:id/send
pub async fn send(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    body: Option<Json<SendRequest>>,
) -> AppJsonResult<Email> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let email = fetch_email(&state, id).await?;

    let edited = req.edited_response.filter(|r| !r.trim().is_empty());
    if edited.is_none() && !email.has_response() {
        return Err(AppError::BadRequest(
            "No AI response generated yet".to_string(),
        ));
    }

    let updated = apply_update(
        &state,
        id,
        UpdateEmail {
            ai_response: edited,
            status: Some(EmailStatus::Sent),
            ..Default::default()
        },
    )
    .await?;
    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub email_id: Uuid,
    pub priority: Priority,
    pub stats: QueueStats,
}

/// # POST /api/emails/:id/enqueue
///
/// Manual re-queue trigger, e.g. after a dropped generation failure.
pub async fn enqueue(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<EnqueueResponse>)> {
    let email = fetch_email(&state, id).await?;
    state.queue.enqueue(email.id, email.is_urgent);

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            email_id: email.id,
            priority: Priority::from_urgent_flag(email.is_urgent),
            stats: state.queue.stats(),
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub message: String,
    pub emails: Vec<Email>,
}

const SAMPLE_EMAILS: [(&str, &str, &str); 3] = [
    (
        "sarah.johnson@techcorp.com",
        "Critical System Outage - Need Immediate Support",
        "Dear Support Team,\n\nOur entire customer portal is down since 2 PM today and we're losing revenue by the minute. This is absolutely critical as we have hundreds of customers trying to place orders.\n\nOur system shows error 500 on all pages. Order ID that was affected: #TC-2024-1891\n\nPlease contact me immediately at +1-555-0123.\n\nBest regards,\nSarah Johnson\nTechCorp Inc.",
    ),
    (
        "dev.team@startupco.io",
        "Question About API Rate Limits",
        "Hi,\n\nWe're integrating your API and wondering about the rate limits for our enterprise plan. Can you provide documentation or clarify the current limits?\n\nAlternate contact: tech@startupco.io\n\nThanks!",
    ),
    (
        "mike.rodriguez@gmail.com",
        "Refund Request - Account Charged Incorrectly",
        "I was charged twice for my subscription renewal. Please process a refund immediately as this is affecting my business operations. Invoice #INV-2024-3421. My phone is +1-555-0456.",
    ),
];

/// # POST /api/emails/sync
///
/// Demo seed: runs three sample support emails through the same
/// classify/persist/queue path as real ingestion.
pub async fn sync_demo(State(state): State<ServerState>) -> AppJsonResult<SyncResponse> {
    let mut created = Vec::new();
    for (sender, subject, body) in SAMPLE_EMAILS {
        match classify_and_store(
            &state,
            sender.to_string(),
            subject.to_string(),
            body.to_string(),
        )
        .await
        {
            Ok(email) => created.push(email),
            Err(e) => {
                tracing::error!("Error seeding sample email: {:?}", e);
            }
        }
    }

    Ok(Json(SyncResponse {
        message: format!("Synced {} emails", created.len()),
        emails: created,
    }))
}

async fn fetch_email(state: &ServerState, id: Uuid) -> AppResult<Email> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Email {} not found", id)))
}

async fn apply_update(state: &ServerState, id: Uuid, updates: UpdateEmail) -> AppResult<Email> {
    state
        .store
        .update(id, updates)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Email {} not found", id)))
}

async fn classify_and_store(
    state: &ServerState,
    sender: String,
    subject: String,
    body: String,
) -> AppResult<Email> {
    let classification = classify::classify_email(&state.http_client, &body).await;
    let email = state
        .store
        .create(InsertEmail {
            sender,
            subject,
            body,
            sentiment: Some(classification.sentiment.sentiment),
            urgency: classification.urgency.urgency,
            extracted_data: classification.extracted_data,
            received_at: None,
        })
        .await?;

    state.queue.enqueue(email.id, email.is_urgent);
    Ok(email)
}
