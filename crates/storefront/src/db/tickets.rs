//! Support ticket persistence.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use orchard_core::TicketId;

use super::RepositoryError;
use crate::models::{NewTicket, SupportTicket};

#[derive(Debug, FromRow)]
struct InsertedTicket {
    id: TicketId,
    created_at: DateTime<Utc>,
}

/// Repository for support tickets.
pub struct TicketRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> TicketRepository<'a> {
    /// Create a new ticket repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Store a validated ticket.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    #[instrument(skip(self, ticket), fields(email = %ticket.email))]
    pub async fn create(&self, ticket: NewTicket) -> Result<SupportTicket, RepositoryError> {
        let inserted = sqlx::query_as::<_, InsertedTicket>(
            r"
            INSERT INTO storefront.support_ticket (email, subject, message)
            VALUES ($1, $2, $3)
            RETURNING id, created_at
            ",
        )
        .bind(ticket.email.as_str())
        .bind(&ticket.subject)
        .bind(&ticket.message)
        .fetch_one(self.pool)
        .await?;

        Ok(SupportTicket {
            id: inserted.id,
            email: ticket.email,
            subject: ticket.subject,
            message: ticket.message,
            created_at: inserted.created_at,
        })
    }
}
