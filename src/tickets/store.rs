//! Transactional wrapper around every ticket mutation.
//!
//! Each accepted mutation runs in a single diesel transaction that locks the
//! ticket row, applies the change, persists it and appends exactly one history
//! row. The notification event is published only after the commit.

use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::directory;
use crate::models::{NewTicket, Ticket, TicketChangeset, TicketHistory};
use crate::notifications::{NotificationEvent, NotificationQueue};
use crate::schema::tickets;

use super::audit::{classify_change, record_history, PageRequest};
use super::transitions::{can_view, validate_delete};
use super::{Priority, TicketError, TicketResult, TicketStatus, UpdateType};

pub const MAX_TITLE_CHARS: usize = 255;

/// Result of a committed mutation.
#[derive(Debug, Clone)]
pub struct AppliedMutation {
    pub ticket: Ticket,
    pub history: TicketHistory,
}

#[derive(Debug, Clone)]
pub struct NewTicketInput {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub type_id: Uuid,
    pub first_category_id: Uuid,
    pub second_category_id: Option<Uuid>,
    pub deadline: Option<NaiveDateTime>,
    pub manager_id: Option<Uuid>,
    pub urgent: bool,
}

pub(crate) fn normalize_title(title: &str) -> TicketResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TicketError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TicketError::validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

pub(crate) fn normalize_description(description: &str) -> TicketResult<String> {
    let description = description.trim();
    if description.is_empty() {
        return Err(TicketError::validation("description must not be empty"));
    }
    Ok(description.to_string())
}

/// Checks that the category ids exist and that the second category hangs
/// under the first.
pub(crate) fn ensure_categories(
    conn: &mut PgConnection,
    first_category_id: Uuid,
    second_category_id: Option<Uuid>,
) -> TicketResult<()> {
    directory::ensure_category_exists(conn, first_category_id)?;
    if let Some(second) = second_category_id {
        directory::ensure_subcategory(conn, first_category_id, second)?;
    }
    Ok(())
}

pub fn create_ticket(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    actor: &Actor,
    input: NewTicketInput,
) -> TicketResult<AppliedMutation> {
    let title = normalize_title(&input.title)?;
    let description = normalize_description(&input.description)?;

    let applied = conn.transaction::<_, TicketError, _>(|conn| {
        ensure_categories(conn, input.first_category_id, input.second_category_id)?;
        directory::ensure_ticket_type_exists(conn, input.type_id)?;
        if let Some(manager_id) = input.manager_id {
            directory::ensure_assignable_manager(conn, manager_id)?;
        }

        let now = Utc::now().naive_utc();
        let new_ticket = NewTicket {
            id: Uuid::new_v4(),
            title,
            description,
            priority: input.priority,
            status: TicketStatus::Pending,
            type_id: input.type_id,
            first_category_id: input.first_category_id,
            second_category_id: input.second_category_id,
            deadline: input.deadline,
            requester_id: actor.user_id,
            manager_id: input.manager_id,
            urgent: input.urgent,
            created_at: now,
            updated_at: now,
        };

        let ticket: Ticket = diesel::insert_into(tickets::table)
            .values(&new_ticket)
            .get_result(conn)?;
        let history = record_history(conn, &ticket, actor, UpdateType::TicketCreated, now)?;
        Ok(AppliedMutation { ticket, history })
    })?;

    info!(
        ticket_id = %applied.ticket.id,
        requester_id = %actor.user_id,
        "ticket created"
    );
    queue.publish_or_record(conn, NotificationEvent::from_history(&applied.history));
    Ok(applied)
}

/// Runs `mutation` against the locked ticket and records the outcome.
///
/// The closure receives the connection, the ticket to modify and the
/// timestamp this mutation will be stamped with. It may return an explicit
/// classification; otherwise the before/after diff is classified. A mutation
/// that changes nothing is rejected.
pub fn apply_mutation<F>(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    ticket_id: Uuid,
    actor: &Actor,
    mutation: F,
) -> TicketResult<AppliedMutation>
where
    F: FnOnce(&mut PgConnection, &mut Ticket, NaiveDateTime) -> TicketResult<Option<UpdateType>>,
{
    let applied = conn.transaction::<_, TicketError, _>(|conn| {
        let before = tickets::table
            .filter(tickets::id.eq(ticket_id))
            .filter(tickets::deleted_at.is_null())
            .for_update()
            .first::<Ticket>(conn)
            .optional()?
            .filter(|ticket| can_view(ticket, actor))
            .ok_or(TicketError::NotFound("ticket"))?;

        // taken under the row lock so history is ordered by commit
        let now = Utc::now().naive_utc();

        let mut after = before.clone();
        let explicit = mutation(conn, &mut after, now)?;
        let update_type = explicit
            .or_else(|| classify_change(&before, &after))
            .ok_or_else(|| TicketError::validation("no changes provided"))?;

        after.updated_at = now;
        let ticket: Ticket = diesel::update(tickets::table.find(ticket_id))
            .set(&TicketChangeset::from(&after))
            .get_result(conn)?;
        let history = record_history(conn, &ticket, actor, update_type, now)?;
        Ok(AppliedMutation { ticket, history })
    })?;

    info!(
        ticket_id = %applied.ticket.id,
        actor_id = %actor.user_id,
        update_type = %applied.history.update_type,
        status = %applied.ticket.status,
        "ticket mutation committed"
    );
    queue.publish_or_record(conn, NotificationEvent::from_history(&applied.history));
    Ok(applied)
}

/// Marks the ticket deleted. No other column changes besides `updated_at`.
pub fn soft_delete(
    conn: &mut PgConnection,
    queue: &NotificationQueue,
    ticket_id: Uuid,
    actor: &Actor,
) -> TicketResult<AppliedMutation> {
    apply_mutation(conn, queue, ticket_id, actor, |_, ticket, now| {
        validate_delete(ticket, actor)?;
        ticket.deleted_at = Some(now);
        Ok(Some(UpdateType::TicketDelete))
    })
}

/// Loads a ticket that has not been soft-deleted.
pub fn find_active_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> TicketResult<Ticket> {
    tickets::table
        .filter(tickets::id.eq(ticket_id))
        .filter(tickets::deleted_at.is_null())
        .first(conn)
        .optional()?
        .ok_or(TicketError::NotFound("ticket"))
}

/// Like [`find_active_ticket`], but tickets the actor may not see are
/// reported as missing.
pub fn find_visible_ticket(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor: &Actor,
) -> TicketResult<Ticket> {
    let ticket = find_active_ticket(conn, ticket_id)?;
    if can_view(&ticket, actor) {
        Ok(ticket)
    } else {
        Err(TicketError::NotFound("ticket"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub urgent: Option<bool>,
}

#[derive(Debug)]
pub struct TicketPage {
    pub items: Vec<Ticket>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

fn visible_tickets<'a>(
    actor: &Actor,
    filter: &TicketFilter,
) -> tickets::BoxedQuery<'a, diesel::pg::Pg> {
    let mut query = tickets::table
        .filter(tickets::deleted_at.is_null())
        .into_boxed();

    match actor.role {
        Role::Admin => {}
        Role::Manager => {
            query = query.filter(
                tickets::manager_id
                    .eq(actor.user_id)
                    .or(tickets::manager_id.is_null()),
            );
        }
        Role::User => {
            query = query.filter(tickets::requester_id.eq(actor.user_id));
        }
    }
    if let Some(status) = filter.status {
        query = query.filter(tickets::status.eq(status));
    }
    if let Some(urgent) = filter.urgent {
        query = query.filter(tickets::urgent.eq(urgent));
    }
    query
}

pub fn list_tickets(
    conn: &mut PgConnection,
    actor: &Actor,
    filter: &TicketFilter,
    page: PageRequest,
) -> TicketResult<TicketPage> {
    let total: i64 = visible_tickets(actor, filter).count().get_result(conn)?;
    let items = visible_tickets(actor, filter)
        .order((tickets::created_at.desc(), tickets::id.asc()))
        .limit(page.page_size)
        .offset(page.offset())
        .load::<Ticket>(conn)?;

    Ok(TicketPage {
        items,
        total,
        page: page.page,
        page_size: page.page_size,
    })
}
