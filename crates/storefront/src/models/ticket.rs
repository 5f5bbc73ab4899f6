//! Support ticket domain types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use orchard_core::{Email, EmailError, TicketId};

const MAX_SUBJECT_LENGTH: usize = 200;
const MAX_MESSAGE_LENGTH: usize = 5000;

/// Reasons a ticket submission is refused before it reaches the database.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TicketValidationError {
    #[error("invalid email: {0}")]
    Email(#[from] EmailError),
    #[error("subject is required")]
    EmptySubject,
    #[error("subject must be at most {max} characters")]
    SubjectTooLong { max: usize },
    #[error("message is required")]
    EmptyMessage,
    #[error("message must be at most {max} characters")]
    MessageTooLong { max: usize },
}

/// A validated ticket ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub email: Email,
    pub subject: String,
    pub message: String,
}

impl NewTicket {
    /// Validate raw form input. Subject and message are trimmed.
    ///
    /// # Errors
    ///
    /// Returns `TicketValidationError` for a malformed email or an empty or
    /// oversized subject or message.
    pub fn parse(email: &str, subject: &str, message: &str) -> Result<Self, TicketValidationError> {
        let email = Email::parse(email)?;

        let subject = subject.trim();
        if subject.is_empty() {
            return Err(TicketValidationError::EmptySubject);
        }
        if subject.chars().count() > MAX_SUBJECT_LENGTH {
            return Err(TicketValidationError::SubjectTooLong {
                max: MAX_SUBJECT_LENGTH,
            });
        }

        let message = message.trim();
        if message.is_empty() {
            return Err(TicketValidationError::EmptyMessage);
        }
        if message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(TicketValidationError::MessageTooLong {
                max: MAX_MESSAGE_LENGTH,
            });
        }

        Ok(Self {
            email,
            subject: subject.to_string(),
            message: message.to_string(),
        })
    }
}

/// A stored support ticket.
#[derive(Debug, Clone)]
pub struct SupportTicket {
    pub id: TicketId,
    pub email: Email,
    pub subject: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
