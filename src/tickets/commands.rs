//! Ticket commands built on [`store::apply_mutation`](super::store::apply_mutation).

use chrono::{Datelike, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::directory;
use crate::jobs::{enqueue_unique_job, JOB_RECOMPUTE_MONTHLY_STATISTICS};
use crate::models::{NewTicketComment, TicketComment};
use crate::notifications::{NotificationEvent, NotificationQueue};
use crate::schema::ticket_comments;

use super::store::{
    apply_mutation, ensure_categories, find_visible_ticket, normalize_description,
    normalize_title, AppliedMutation,
};
use super::transitions::{
    can_comment, validate_content_edit, validate_settings_edit, validate_status_change,
};
use super::{Denial, Priority, TicketError, TicketResult, TicketStatus, UpdateType};

pub const MAX_COMMENT_CHARS: usize = 4000;

/// Fields the requester owns. `None` leaves a field untouched; for the
/// nullable second category `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ContentChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub type_id: Option<Uuid>,
    pub first_category_id: Option<Uuid>,
    pub second_category_id: Option<Option<Uuid>>,
    pub urgent: Option<bool>,
}

impl ContentChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.type_id.is_none()
            && self.first_category_id.is_none()
            && self.second_category_id.is_none()
            && self.urgent.is_none()
    }
}

/// Fields only staff may change.
#[derive(Debug, Clone, Default)]
pub struct SettingsChanges {
    pub manager_id: Option<Option<Uuid>>,
    pub priority: Option<Priority>,
    pub deadline: Option<Option<NaiveDateTime>>,
}

impl SettingsChanges {
    pub fn is_empty(&self) -> bool {
        self.manager_id.is_none() && self.priority.is_none() && self.deadline.is_none()
    }
}

pub fn edit_content(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    ticket_id: Uuid,
    actor: &Actor,
    changes: ContentChanges,
) -> TicketResult<AppliedMutation> {
    if changes.is_empty() {
        return Err(TicketError::validation("no changes provided"));
    }
    let title = changes.title.as_deref().map(normalize_title).transpose()?;
    let description = changes
        .description
        .as_deref()
        .map(normalize_description)
        .transpose()?;

    apply_mutation(conn, queue, ticket_id, actor, |conn, ticket, _| {
        validate_content_edit(ticket, actor)?;

        if let Some(title) = title {
            ticket.title = title;
        }
        if let Some(description) = description {
            ticket.description = description;
        }
        if let Some(type_id) = changes.type_id {
            if type_id != ticket.type_id {
                directory::ensure_ticket_type_exists(conn, type_id)?;
            }
            ticket.type_id = type_id;
        }
        if let Some(urgent) = changes.urgent {
            ticket.urgent = urgent;
        }

        let first = changes.first_category_id.unwrap_or(ticket.first_category_id);
        let second = match changes.second_category_id {
            Some(second) => second,
            // moving to another first category drops a second category that
            // no longer fits under it
            None if first != ticket.first_category_id => None,
            None => ticket.second_category_id,
        };
        if first != ticket.first_category_id || second != ticket.second_category_id {
            ensure_categories(conn, first, second)?;
            ticket.first_category_id = first;
            ticket.second_category_id = second;
        }

        Ok(None)
    })
}

pub fn edit_settings(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    ticket_id: Uuid,
    actor: &Actor,
    changes: SettingsChanges,
) -> TicketResult<AppliedMutation> {
    if changes.is_empty() {
        return Err(TicketError::validation("no changes provided"));
    }

    apply_mutation(conn, queue, ticket_id, actor, |conn, ticket, _| {
        validate_settings_edit(ticket, actor)?;

        if let Some(manager_id) = changes.manager_id {
            if let Some(manager_id) = manager_id {
                if ticket.manager_id != Some(manager_id) {
                    directory::ensure_assignable_manager(conn, manager_id)?;
                }
            }
            ticket.manager_id = manager_id;
        }
        if let Some(priority) = changes.priority {
            ticket.priority = priority;
        }
        if let Some(deadline) = changes.deadline {
            ticket.deadline = deadline;
        }

        Ok(None)
    })
}

/// Moves the ticket along the status graph.
///
/// A manager approving an unassigned ticket takes it. Reaching DONE stamps
/// `completed_at` and queues a statistics recompute for the creation month.
pub fn change_status(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    ticket_id: Uuid,
    actor: &Actor,
    requested: TicketStatus,
) -> TicketResult<AppliedMutation> {
    apply_mutation(conn, queue, ticket_id, actor, |conn, ticket, now| {
        let (status, update_type) = validate_status_change(ticket, requested, actor)?;
        ticket.status = status;

        if update_type == UpdateType::TicketApproved
            && actor.role == Role::Manager
            && ticket.manager_id.is_none()
        {
            ticket.manager_id = Some(actor.user_id);
        }

        if status == TicketStatus::Done {
            ticket.completed_at = Some(now);
            let created = ticket.created_at;
            enqueue_unique_job(
                conn,
                JOB_RECOMPUTE_MONTHLY_STATISTICS,
                json!({ "year": created.year(), "month": created.month() }),
            )?;
        } else {
            ticket.completed_at = None;
        }

        Ok(Some(update_type))
    })
}

/// Comments are not ticket mutations: no history row, only a notification.
pub fn add_comment(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    ticket_id: Uuid,
    actor: &Actor,
    body: &str,
) -> TicketResult<TicketComment> {
    let body = body.trim();
    if body.is_empty() {
        return Err(TicketError::validation("comment must not be empty"));
    }
    if body.chars().count() > MAX_COMMENT_CHARS {
        return Err(TicketError::validation(format!(
            "comment must be at most {MAX_COMMENT_CHARS} characters"
        )));
    }

    let ticket = find_visible_ticket(conn, ticket_id, actor)?;
    if ticket.status.is_terminal() {
        return Err(Denial::InvalidTransition(format!(
            "ticket is {} and no longer takes comments",
            ticket.status
        ))
        .into());
    }
    if !can_comment(&ticket, actor) {
        return Err(Denial::Unauthorized("you may not comment on this ticket".into()).into());
    }

    let comment: TicketComment = diesel::insert_into(ticket_comments::table)
        .values(&NewTicketComment {
            id: Uuid::new_v4(),
            ticket_id,
            author_id: actor.user_id,
            body: body.to_string(),
            created_at: Utc::now().naive_utc(),
        })
        .get_result(conn)?;

    info!(ticket_id = %ticket_id, author_id = %actor.user_id, "comment added");
    queue.publish_or_record(conn, NotificationEvent::from_comment(&comment));
    Ok(comment)
}

pub fn list_comments(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor: &Actor,
) -> TicketResult<Vec<TicketComment>> {
    find_visible_ticket(conn, ticket_id, actor)?;
    let comments = ticket_comments::table
        .filter(ticket_comments::ticket_id.eq(ticket_id))
        .order((ticket_comments::created_at.asc(), ticket_comments::id.asc()))
        .load(conn)?;
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_change_sets_are_detected() {
        assert!(ContentChanges::default().is_empty());
        assert!(SettingsChanges::default().is_empty());

        let clear_second = ContentChanges {
            second_category_id: Some(None),
            ..ContentChanges::default()
        };
        assert!(!clear_second.is_empty());

        let clear_manager = SettingsChanges {
            manager_id: Some(None),
            ..SettingsChanges::default()
        };
        assert!(!clear_manager.is_empty());
    }
}
