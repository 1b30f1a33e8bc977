use chrono::NaiveDateTime;
use diesel::pg::Pg;
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::Actor;
use crate::models::{NewTicketHistory, Ticket, TicketHistory};
use crate::schema::{ticket_histories, tickets};

use super::{TicketStatus, UpdateType};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Description,
    Priority,
    Category,
    Type,
    Deadline,
    Manager,
    Urgent,
    Deleted,
}

fn changed_fields(before: &Ticket, after: &Ticket) -> Vec<Field> {
    let mut fields = Vec::new();
    if before.title != after.title {
        fields.push(Field::Title);
    }
    if before.description != after.description {
        fields.push(Field::Description);
    }
    if before.priority != after.priority {
        fields.push(Field::Priority);
    }
    if before.first_category_id != after.first_category_id
        || before.second_category_id != after.second_category_id
    {
        fields.push(Field::Category);
    }
    if before.type_id != after.type_id {
        fields.push(Field::Type);
    }
    if before.deadline != after.deadline {
        fields.push(Field::Deadline);
    }
    if before.manager_id != after.manager_id {
        fields.push(Field::Manager);
    }
    if before.urgent != after.urgent {
        fields.push(Field::Urgent);
    }
    if before.deleted_at.is_none() && after.deleted_at.is_some() {
        fields.push(Field::Deleted);
    }
    fields
}

/// Classifies the difference between two versions of a ticket, or returns
/// `None` when nothing observable changed. The first matching rule wins:
/// approval, other status changes, manager reassignment, a lone priority,
/// category or deadline change, a type change, soft deletion, then any
/// multi-field edit; whatever remains is `OTHER`.
pub fn classify_change(before: &Ticket, after: &Ticket) -> Option<UpdateType> {
    if before.status != after.status {
        return Some(
            if before.status == TicketStatus::Pending && after.status == TicketStatus::Approved {
                UpdateType::TicketApproved
            } else {
                UpdateType::StatusChange
            },
        );
    }

    let fields = changed_fields(before, after);
    let only = |field: Field| fields.len() == 1 && fields[0] == field;

    let update_type = if fields.is_empty() {
        return None;
    } else if fields.contains(&Field::Manager) {
        UpdateType::ManagerChange
    } else if only(Field::Priority) {
        UpdateType::PriorityChange
    } else if only(Field::Category) {
        UpdateType::CategoryChange
    } else if only(Field::Deadline) {
        UpdateType::DeadlineChange
    } else if fields.contains(&Field::Type) {
        UpdateType::TypeChange
    } else if fields.contains(&Field::Deleted) {
        UpdateType::TicketDelete
    } else if fields.len() > 1 {
        UpdateType::TicketEdited
    } else {
        UpdateType::Other
    };
    Some(update_type)
}

/// Appends one history row. Callers run this inside the mutation's
/// transaction so an insert failure rolls the mutation back.
pub fn record_history(
    conn: &mut PgConnection,
    ticket: &Ticket,
    actor: &Actor,
    update_type: UpdateType,
    at: NaiveDateTime,
) -> QueryResult<TicketHistory> {
    let entry = NewTicketHistory {
        id: Uuid::new_v4(),
        ticket_id: ticket.id,
        updated_by: actor.user_id,
        update_type,
        status: ticket.status,
        created_at: at,
    };

    diesel::insert_into(ticket_histories::table)
        .values(&entry)
        .get_result(conn)
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub ticket_id: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub update_type: Option<UpdateType>,
    /// Restricts results to tickets requested by this user.
    pub requester_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            page_size: page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug)]
pub struct HistoryPage {
    pub items: Vec<TicketHistory>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

fn filtered(filter: &HistoryFilter) -> ticket_histories::BoxedQuery<'static, Pg> {
    let mut query = ticket_histories::table.into_boxed();
    if let Some(ticket_id) = filter.ticket_id {
        query = query.filter(ticket_histories::ticket_id.eq(ticket_id));
    }
    if let Some(user_id) = filter.updated_by {
        query = query.filter(ticket_histories::updated_by.eq(user_id));
    }
    if let Some(update_type) = filter.update_type {
        query = query.filter(ticket_histories::update_type.eq(update_type));
    }
    if let Some(requester_id) = filter.requester_id {
        query = query.filter(
            ticket_histories::ticket_id.eq_any(
                tickets::table
                    .select(tickets::id)
                    .filter(tickets::requester_id.eq(requester_id)),
            ),
        );
    }
    query
}

/// History is read regardless of the ticket's soft-delete state: the audit
/// trail outlives the ticket.
pub fn query_history(
    conn: &mut PgConnection,
    filter: &HistoryFilter,
    page: PageRequest,
) -> QueryResult<HistoryPage> {
    let total: i64 = filtered(filter).count().get_result(conn)?;
    let items = filtered(filter)
        .order((ticket_histories::created_at.asc(), ticket_histories::id.asc()))
        .limit(page.page_size)
        .offset(page.offset())
        .load::<TicketHistory>(conn)?;

    Ok(HistoryPage {
        items,
        total,
        page: page.page,
        page_size: page.page_size,
    })
}
