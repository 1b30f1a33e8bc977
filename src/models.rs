use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::Role;
use crate::notifications::{NotificationStatus, NotificationType};
use crate::schema::*;
use crate::tickets::{Priority, TicketStatus, UpdateType};

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = categories)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = categories)]
pub struct NewCategory {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = ticket_types)]
pub struct TicketType {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_types)]
pub struct NewTicketType {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TicketStatus,
    pub type_id: Uuid,
    pub first_category_id: Uuid,
    pub second_category_id: Option<Uuid>,
    pub deadline: Option<NaiveDateTime>,
    pub requester_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub urgent: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: TicketStatus,
    pub type_id: Uuid,
    pub first_category_id: Uuid,
    pub second_category_id: Option<Uuid>,
    pub deadline: Option<NaiveDateTime>,
    pub requester_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub urgent: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Every column a mutation may touch; `None` clears nullable columns.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = tickets, treat_none_as_null = true)]
pub struct TicketChangeset<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub priority: Priority,
    pub status: TicketStatus,
    pub type_id: Uuid,
    pub first_category_id: Uuid,
    pub second_category_id: Option<Uuid>,
    pub deadline: Option<NaiveDateTime>,
    pub manager_id: Option<Uuid>,
    pub urgent: bool,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl<'a> From<&'a Ticket> for TicketChangeset<'a> {
    fn from(ticket: &'a Ticket) -> Self {
        Self {
            title: &ticket.title,
            description: &ticket.description,
            priority: ticket.priority,
            status: ticket.status,
            type_id: ticket.type_id,
            first_category_id: ticket.first_category_id,
            second_category_id: ticket.second_category_id,
            deadline: ticket.deadline,
            manager_id: ticket.manager_id,
            urgent: ticket.urgent,
            updated_at: ticket.updated_at,
            completed_at: ticket.completed_at,
            deleted_at: ticket.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_histories)]
#[diesel(belongs_to(Ticket))]
pub struct TicketHistory {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub updated_by: Uuid,
    pub update_type: UpdateType,
    pub status: TicketStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_histories)]
pub struct NewTicketHistory {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub updated_by: Uuid,
    pub update_type: UpdateType,
    pub status: TicketStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_comments)]
#[diesel(belongs_to(Ticket))]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_comments)]
pub struct NewTicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub receiver_id: Uuid,
    pub message_json: serde_json::Value,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub receiver_id: Uuid,
    pub message_json: serde_json::Value,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = monthly_statistics)]
pub struct MonthlyStatistics {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub type_id: Uuid,
    pub total_created: i64,
    pub total_completed: i64,
    pub urgent_tickets: i64,
    pub in_progress_count: i64,
    pub completion_ratio: f64,
    pub average_completion_hours: Option<f64>,
    pub last_updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = monthly_statistics)]
pub struct NewMonthlyStatistics {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub type_id: Uuid,
    pub total_created: i64,
    pub total_completed: i64,
    pub urgent_tickets: i64,
    pub in_progress_count: i64,
    pub completion_ratio: f64,
    pub average_completion_hours: Option<f64>,
    pub last_updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
