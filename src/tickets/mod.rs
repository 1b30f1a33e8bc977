//! Ticket lifecycle: status graph, capability checks, audit trail and the
//! transactional store that ties them together.

use std::fmt;

use thiserror::Error;

use crate::jobs::JobQueueError;

pub mod audit;
pub mod commands;
pub mod store;
pub mod transitions;

crate::text_enum! {
    pub enum Priority {
        High => "HIGH",
        Middle => "MIDDLE",
        Low => "LOW",
    }
}

crate::text_enum! {
    pub enum TicketStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        InProgress => "IN_PROGRESS",
        Review => "REVIEW",
        Done => "DONE",
        Rejected => "REJECTED",
    }
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Done | TicketStatus::Rejected)
    }
}

crate::text_enum! {
    /// Classification of a single accepted mutation in the audit trail.
    pub enum UpdateType {
        TicketCreated => "TICKET_CREATED",
        TicketApproved => "TICKET_APPROVED",
        TicketEdited => "TICKET_EDITED",
        TypeChange => "TYPE_CHANGE",
        StatusChange => "STATUS_CHANGE",
        ManagerChange => "MANAGER_CHANGE",
        PriorityChange => "PRIORITY_CHANGE",
        CategoryChange => "CATEGORY_CHANGE",
        DeadlineChange => "DEADLINE_CHANGE",
        TicketDelete => "TICKET_DELETE",
        Other => "OTHER",
    }
}

/// Why a requested change was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// The edge is not part of the status graph, or the ticket cannot take
    /// this kind of change in its current status.
    InvalidTransition(String),
    /// The edge exists but the actor's role may not take it.
    Unauthorized(String),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::InvalidTransition(detail) => write!(f, "invalid transition: {detail}"),
            Denial::Unauthorized(detail) => write!(f, "unauthorized: {detail}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("{0}")]
    Validation(String),
    #[error("transition denied: {0}")]
    TransitionDenied(Denial),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("job queue error: {0}")]
    Queue(#[from] JobQueueError),
}

impl From<Denial> for TicketError {
    fn from(value: Denial) -> Self {
        TicketError::TransitionDenied(value)
    }
}

impl TicketError {
    pub fn validation(message: impl Into<String>) -> Self {
        TicketError::Validation(message.into())
    }
}

pub type TicketResult<T> = Result<T, TicketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in TicketStatus::ALL {
            let parsed: TicketStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, *status);
        }
        assert_eq!("in_progress".parse::<TicketStatus>(), Ok(TicketStatus::InProgress));
        assert!("ARCHIVED".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn only_done_and_rejected_are_terminal() {
        let terminal: Vec<_> = TicketStatus::ALL
            .iter()
            .filter(|status| status.is_terminal())
            .collect();
        assert_eq!(terminal, vec![&TicketStatus::Done, &TicketStatus::Rejected]);
    }

    #[test]
    fn update_type_serializes_as_label() {
        let json = serde_json::to_string(&UpdateType::ManagerChange).unwrap();
        assert_eq!(json, "\"MANAGER_CHANGE\"");
    }
}
