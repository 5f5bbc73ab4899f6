//! Domain models for storefront.
//!
//! These types represent validated domain objects separate from database row types.

pub mod account;
pub mod ticket;

pub use account::Account;
pub use ticket::{NewTicket, SupportTicket, TicketValidationError};
