//! Best-effort chat notifications for ticket activity.
//!
//! The ticket store publishes a [`NotificationEvent`] once its transaction has
//! committed. The [`dispatcher::NotificationDispatcher`] consumes the queue on
//! its own task, records a `notifications` row per recipient and talks to the
//! chat service. Nothing on this path can fail a ticket mutation: an event
//! the queue refuses is written straight to the log as FAILED.

use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::models::{NewNotification, Notification, TicketComment, TicketHistory};
use crate::schema::notifications;
use crate::tickets::UpdateType;

use builders::BuilderRegistry;

pub mod builders;
pub mod chat;
pub mod dispatcher;

crate::text_enum! {
    pub enum NotificationType {
        TicketCreated => "TICKET_CREATED",
        TicketApproved => "TICKET_APPROVED",
        StatusChanged => "STATUS_CHANGED",
        ManagerChanged => "MANAGER_CHANGED",
        TicketEdited => "TICKET_EDITED",
        TicketDeleted => "TICKET_DELETED",
        CommentAdded => "COMMENT_ADDED",
    }
}

impl From<UpdateType> for NotificationType {
    fn from(value: UpdateType) -> Self {
        match value {
            UpdateType::TicketCreated => NotificationType::TicketCreated,
            UpdateType::TicketApproved => NotificationType::TicketApproved,
            UpdateType::StatusChange => NotificationType::StatusChanged,
            UpdateType::ManagerChange => NotificationType::ManagerChanged,
            UpdateType::TicketDelete => NotificationType::TicketDeleted,
            UpdateType::TicketEdited
            | UpdateType::TypeChange
            | UpdateType::PriorityChange
            | UpdateType::CategoryChange
            | UpdateType::DeadlineChange
            | UpdateType::Other => NotificationType::TicketEdited,
        }
    }
}

crate::text_enum! {
    pub enum NotificationStatus {
        Pending => "PENDING",
        Sent => "SENT",
        Failed => "FAILED",
    }
}

/// A committed piece of ticket activity waiting to be announced.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub ticket_id: Uuid,
    pub actor_id: Uuid,
    pub notification_type: NotificationType,
    pub update_type: Option<UpdateType>,
    pub comment_body: Option<String>,
    pub occurred_at: NaiveDateTime,
}

impl NotificationEvent {
    pub fn from_history(history: &TicketHistory) -> Self {
        Self {
            ticket_id: history.ticket_id,
            actor_id: history.updated_by,
            notification_type: history.update_type.into(),
            update_type: Some(history.update_type),
            comment_body: None,
            occurred_at: history.created_at,
        }
    }

    pub fn from_comment(comment: &TicketComment) -> Self {
        Self {
            ticket_id: comment.ticket_id,
            actor_id: comment.author_id,
            notification_type: NotificationType::CommentAdded,
            update_type: None,
            comment_body: Some(comment.body.clone()),
            occurred_at: comment.created_at,
        }
    }
}

pub type NotificationReceiver = mpsc::Receiver<NotificationEvent>;

/// Sending half of the outbound notification channel.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationEvent>,
}

impl NotificationQueue {
    pub fn channel(capacity: usize) -> (Self, NotificationReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueues without waiting. A full or closed queue hands the event back.
    pub fn publish(&self, event: NotificationEvent) -> Result<(), Rejected> {
        let (event, reason) = match self.sender.try_send(event) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(event)) => (event, QUEUE_FULL),
            Err(TrySendError::Closed(event)) => (event, DISPATCHER_STOPPED),
        };
        warn!(
            ticket_id = %event.ticket_id,
            notification_type = %event.notification_type,
            reason,
            "notification event not queued"
        );
        Err(Rejected { event, reason })
    }

    /// Publishes a committed event. When the queue refuses it, every recipient
    /// gets a FAILED row carrying the reason instead.
    pub fn publish_or_record(&self, conn: &mut PgConnection, event: NotificationEvent) {
        if let Err(rejected) = self.publish(event) {
            dispatcher::record_undelivered(
                conn,
                &BuilderRegistry::default(),
                &rejected.event,
                rejected.reason,
            );
        }
    }
}

pub const QUEUE_FULL: &str = "notification queue full";
pub const DISPATCHER_STOPPED: &str = "notification dispatcher stopped";

/// An event the dispatcher never received.
#[derive(Debug)]
pub struct Rejected {
    pub event: NotificationEvent,
    pub reason: &'static str,
}

pub fn record_pending(
    conn: &mut PgConnection,
    ticket_id: Option<Uuid>,
    receiver_id: Uuid,
    notification_type: NotificationType,
    message_json: serde_json::Value,
) -> QueryResult<Notification> {
    let new_notification = NewNotification {
        id: Uuid::new_v4(),
        ticket_id,
        receiver_id,
        message_json,
        notification_type,
        status: NotificationStatus::Pending,
    };

    diesel::insert_into(notifications::table)
        .values(&new_notification)
        .get_result(conn)
}

pub fn mark_sent(conn: &mut PgConnection, notification_id: Uuid) -> QueryResult<()> {
    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::status.eq(NotificationStatus::Sent),
            notifications::error_message.eq::<Option<String>>(None),
            notifications::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn mark_failed(
    conn: &mut PgConnection,
    notification_id: Uuid,
    error_message: &str,
) -> QueryResult<()> {
    diesel::update(notifications::table.find(notification_id))
        .set((
            notifications::status.eq(NotificationStatus::Failed),
            notifications::error_message.eq(Some(error_message.to_string())),
            notifications::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub receiver_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub status: Option<NotificationStatus>,
    pub limit: Option<i64>,
}

pub fn list_notifications(
    conn: &mut PgConnection,
    filter: &NotificationFilter,
) -> QueryResult<Vec<Notification>> {
    let mut query = notifications::table.into_boxed();
    if let Some(receiver_id) = filter.receiver_id {
        query = query.filter(notifications::receiver_id.eq(receiver_id));
    }
    if let Some(ticket_id) = filter.ticket_id {
        query = query.filter(notifications::ticket_id.eq(ticket_id));
    }
    if let Some(status) = filter.status {
        query = query.filter(notifications::status.eq(status));
    }

    query
        .order(notifications::created_at.desc())
        .limit(filter.limit.unwrap_or(100).clamp(1, 500))
        .load(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::TicketStatus;

    fn history(update_type: UpdateType) -> TicketHistory {
        TicketHistory {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            updated_by: Uuid::new_v4(),
            update_type,
            status: TicketStatus::Pending,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn single_field_updates_notify_as_edits() {
        for update_type in [
            UpdateType::PriorityChange,
            UpdateType::CategoryChange,
            UpdateType::DeadlineChange,
            UpdateType::TypeChange,
            UpdateType::Other,
        ] {
            assert_eq!(
                NotificationType::from(update_type),
                NotificationType::TicketEdited
            );
        }
        assert_eq!(
            NotificationType::from(UpdateType::TicketApproved),
            NotificationType::TicketApproved
        );
    }

    #[tokio::test]
    async fn publish_hands_back_the_event_when_full() {
        let (queue, mut receiver) = NotificationQueue::channel(1);
        assert!(queue
            .publish(NotificationEvent::from_history(&history(
                UpdateType::TicketCreated
            )))
            .is_ok());

        let rejected = queue
            .publish(NotificationEvent::from_history(&history(
                UpdateType::StatusChange,
            )))
            .unwrap_err();
        assert_eq!(rejected.reason, QUEUE_FULL);
        assert_eq!(rejected.event.notification_type, NotificationType::StatusChanged);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.notification_type, NotificationType::TicketCreated);
    }

    #[tokio::test]
    async fn publish_reports_closed_queue() {
        let (queue, receiver) = NotificationQueue::channel(4);
        drop(receiver);
        let rejected = queue
            .publish(NotificationEvent::from_history(&history(
                UpdateType::TicketCreated,
            )))
            .unwrap_err();
        assert_eq!(rejected.reason, DISPATCHER_STOPPED);
    }
}
