//! Support ticket route handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use orchard_core::TicketId;

use super::checkout::enforce_limit;
use crate::db::TicketRepository;
use crate::error::{AppError, Result};
use crate::middleware::ClientIdentity;
use crate::models::NewTicket;
use crate::services::abuse_guard::GuardedAction;
use crate::state::AppState;

/// Support ticket form data.
#[derive(Debug, Deserialize)]
pub struct TicketForm {
    pub email: String,
    pub subject: String,
    pub message: String,
}

/// Response for ticket submission.
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub success: bool,
    pub ticket_id: TicketId,
}

/// Open a support ticket.
///
/// POST /support/tickets
#[instrument(skip_all, fields(client = %identity.as_str()))]
pub async fn create_ticket(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Json(form): Json<TicketForm>,
) -> Result<(StatusCode, Json<TicketResponse>)> {
    enforce_limit(&state, &identity, GuardedAction::TicketCreate)?;

    let ticket = NewTicket::parse(&form.email, &form.subject, &form.message)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let stored = TicketRepository::new(state.pool()).create(ticket).await?;
    tracing::info!(ticket_id = %stored.id, email = %stored.email, "Support ticket created");

    Ok((
        StatusCode::CREATED,
        Json(TicketResponse {
            success: true,
            ticket_id: stored.id,
        }),
    ))
}
