use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use diesel::pg::PgConnection;
use diesel::prelude::*;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::db::PgPool;
use crate::directory;
use crate::models::{Ticket, User};
use crate::schema::tickets;

use super::builders::{BuilderRegistry, MessageContext};
use super::chat::{ChatClient, ChatError, ChatMessage, ChatStage};
use super::{
    mark_failed, mark_sent, record_pending, NotificationEvent, NotificationReceiver,
    NotificationStatus, NotificationType,
};

/// Who should hear about an event, before the actor is filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    Users(Vec<Uuid>),
    AllManagers,
}

/// The counterpart of the actor on a ticket: the manager when the requester
/// acted, the requester otherwise.
fn counterpart(event: &NotificationEvent, ticket: &Ticket) -> Vec<Uuid> {
    if event.actor_id == ticket.requester_id {
        ticket.manager_id.into_iter().collect()
    } else {
        vec![ticket.requester_id]
    }
}

pub fn recipients_for(event: &NotificationEvent, ticket: &Ticket) -> Recipients {
    match event.notification_type {
        NotificationType::TicketCreated => match ticket.manager_id {
            Some(manager_id) => Recipients::Users(vec![manager_id]),
            None => Recipients::AllManagers,
        },
        NotificationType::TicketApproved => Recipients::Users(vec![ticket.requester_id]),
        NotificationType::ManagerChanged | NotificationType::TicketDeleted => {
            Recipients::Users(ticket.manager_id.into_iter().collect())
        }
        NotificationType::StatusChanged
        | NotificationType::TicketEdited
        | NotificationType::CommentAdded => Recipients::Users(counterpart(event, ticket)),
    }
}

/// What happened to one recipient of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub receiver_id: Uuid,
    pub notification_id: Option<Uuid>,
    pub status: NotificationStatus,
    pub error: Option<String>,
}

struct DispatchContext {
    ticket: Ticket,
    actor: User,
    recipients: Vec<User>,
}

/// Consumes [`NotificationEvent`]s and delivers them through the chat API.
///
/// Failures end here: they are written to the notification row and logged,
/// never returned to whoever produced the event.
pub struct NotificationDispatcher {
    pool: PgPool,
    chat: Arc<dyn ChatClient>,
    builders: BuilderRegistry,
    call_timeout: Duration,
    // chat user id -> conversation id
    conversations: Mutex<HashMap<String, String>>,
}

impl NotificationDispatcher {
    pub fn new(
        pool: PgPool,
        chat: Arc<dyn ChatClient>,
        builders: BuilderRegistry,
        call_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            chat,
            builders,
            call_timeout,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn(self: Arc<Self>, receiver: NotificationReceiver) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(receiver).await })
    }

    pub async fn run(&self, mut receiver: NotificationReceiver) {
        info!("notification dispatcher started");
        while let Some(event) = receiver.recv().await {
            let outcomes = self.dispatch(&event).await;
            debug!(
                ticket_id = %event.ticket_id,
                notification_type = %event.notification_type,
                recipients = outcomes.len(),
                "notification event dispatched"
            );
        }
        info!("notification queue closed; dispatcher stopping");
    }

    pub async fn dispatch(&self, event: &NotificationEvent) -> Vec<DeliveryOutcome> {
        let pool = self.pool.clone();
        let owned = event.clone();
        let loaded = task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| format!("database pool error: {err}"))?;
            load_context(&mut conn, &owned)
        })
        .await;
        let context = match loaded {
            Ok(Ok(Some(context))) => context,
            Ok(Ok(None)) => {
                warn!(ticket_id = %event.ticket_id, "ticket for notification no longer exists");
                return Vec::new();
            }
            Ok(Err(err)) => {
                error!(ticket_id = %event.ticket_id, error = %err, "failed to load notification context");
                return Vec::new();
            }
            Err(join_err) => {
                error!(ticket_id = %event.ticket_id, error = %join_err, "notification context task panicked");
                return Vec::new();
            }
        };

        let Some(builder) = self.builders.get(event.notification_type) else {
            error!(notification_type = %event.notification_type, "no message builder registered");
            return Vec::new();
        };
        let message = builder.build(&MessageContext {
            event,
            ticket: &context.ticket,
            actor: &context.actor,
        });

        let mut outcomes = Vec::with_capacity(context.recipients.len());
        for recipient in &context.recipients {
            outcomes.push(self.deliver(event, recipient, &message).await);
        }
        outcomes
    }

    async fn deliver(
        &self,
        event: &NotificationEvent,
        recipient: &User,
        message: &ChatMessage,
    ) -> DeliveryOutcome {
        let message_json = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(err) => return self.unrecorded(recipient, format!("failed to encode message: {err}")),
        };

        let ticket_id = event.ticket_id;
        let receiver_id = recipient.id;
        let notification_type = event.notification_type;
        let notification = match self
            .with_conn(move |conn| {
                record_pending(conn, Some(ticket_id), receiver_id, notification_type, message_json)
            })
            .await
        {
            Ok(notification) => notification,
            Err(err) => return self.unrecorded(recipient, err),
        };

        let notification_id = notification.id;
        match self.send_to(&recipient.email, message).await {
            Ok(()) => {
                if let Err(err) = self.with_conn(move |conn| mark_sent(conn, notification_id)).await {
                    error!(%notification_id, error = %err, "failed to mark notification sent");
                }
                info!(
                    %notification_id,
                    %ticket_id,
                    receiver_id = %recipient.id,
                    %notification_type,
                    "notification sent"
                );
                DeliveryOutcome {
                    receiver_id: recipient.id,
                    notification_id: Some(notification_id),
                    status: NotificationStatus::Sent,
                    error: None,
                }
            }
            Err(chat_err) => {
                let reason = chat_err.to_string();
                warn!(
                    %notification_id,
                    %ticket_id,
                    receiver_id = %recipient.id,
                    error = %reason,
                    "notification delivery failed"
                );
                let stored = reason.clone();
                if let Err(err) = self
                    .with_conn(move |conn| mark_failed(conn, notification_id, &stored))
                    .await
                {
                    error!(%notification_id, error = %err, "failed to mark notification failed");
                }
                DeliveryOutcome {
                    receiver_id: recipient.id,
                    notification_id: Some(notification_id),
                    status: NotificationStatus::Failed,
                    error: Some(reason),
                }
            }
        }
    }

    fn unrecorded(&self, recipient: &User, error: String) -> DeliveryOutcome {
        error!(receiver_id = %recipient.id, %error, "failed to record notification");
        DeliveryOutcome {
            receiver_id: recipient.id,
            notification_id: None,
            status: NotificationStatus::Failed,
            error: Some(error),
        }
    }

    /// Lookup, open (cached per chat user) and send, each under the call timeout.
    pub async fn send_to(&self, email: &str, message: &ChatMessage) -> Result<(), ChatError> {
        let chat_user_id = self
            .timed(ChatStage::UserLookup, self.chat.find_user_by_email(email))
            .await?;

        let cached = self
            .conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_user_id)
            .cloned();
        let conversation_id = match cached {
            Some(id) => id,
            None => {
                let id = self
                    .timed(
                        ChatStage::ConversationOpen,
                        self.chat.open_conversation(&chat_user_id),
                    )
                    .await?;
                self.conversations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(chat_user_id.clone(), id.clone());
                id
            }
        };

        let sent = self
            .timed(
                ChatStage::MessageSend,
                self.chat.send_message(&conversation_id, message),
            )
            .await;
        if sent.is_err() {
            // the conversation may have been closed on the chat side
            self.conversations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&chat_user_id);
        }
        sent
    }

    async fn timed<T>(
        &self,
        stage: ChatStage,
        call: impl Future<Output = Result<T, ChatError>>,
    ) -> Result<T, ChatError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout {
                stage,
                after: self.call_timeout,
            }),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| format!("database pool error: {err}"))?;
            f(&mut conn).map_err(|err| err.to_string())
        })
        .await
        .map_err(|join_err| format!("notification task panicked: {join_err}"))?
    }
}

/// Records an event that never reached the dispatcher as FAILED for each of
/// its recipients. Errors are logged and swallowed.
pub fn record_undelivered(
    conn: &mut PgConnection,
    builders: &BuilderRegistry,
    event: &NotificationEvent,
    reason: &str,
) -> Vec<DeliveryOutcome> {
    let context = match load_context(conn, event) {
        Ok(Some(context)) => context,
        Ok(None) => return Vec::new(),
        Err(err) => {
            error!(ticket_id = %event.ticket_id, error = %err, "failed to load notification context");
            return Vec::new();
        }
    };

    let message_json = builders
        .get(event.notification_type)
        .map(|builder| {
            builder.build(&MessageContext {
                event,
                ticket: &context.ticket,
                actor: &context.actor,
            })
        })
        .and_then(|message| serde_json::to_value(message).ok())
        .unwrap_or(serde_json::Value::Null);

    let mut outcomes = Vec::with_capacity(context.recipients.len());
    for recipient in &context.recipients {
        let recorded = record_pending(
            conn,
            Some(event.ticket_id),
            recipient.id,
            event.notification_type,
            message_json.clone(),
        )
        .and_then(|notification| mark_failed(conn, notification.id, reason).map(|()| notification.id));

        let notification_id = match recorded {
            Ok(id) => Some(id),
            Err(err) => {
                error!(receiver_id = %recipient.id, error = %err, "failed to record notification");
                None
            }
        };
        warn!(
            ticket_id = %event.ticket_id,
            receiver_id = %recipient.id,
            notification_type = %event.notification_type,
            reason,
            "notification recorded as failed without delivery"
        );
        outcomes.push(DeliveryOutcome {
            receiver_id: recipient.id,
            notification_id,
            status: NotificationStatus::Failed,
            error: Some(reason.to_string()),
        });
    }
    outcomes
}

/// Deleted tickets are still loaded: their deletion is itself announced.
fn load_context(
    conn: &mut PgConnection,
    event: &NotificationEvent,
) -> Result<Option<DispatchContext>, String> {
    let Some(ticket) = tickets::table
        .find(event.ticket_id)
        .first::<Ticket>(conn)
        .optional()
        .map_err(|err| err.to_string())?
    else {
        return Ok(None);
    };
    let actor = directory::find_user_by_id(conn, event.actor_id).map_err(|err| err.to_string())?;

    let recipients = match recipients_for(event, &ticket) {
        Recipients::Users(ids) => directory::find_users_by_ids(conn, &ids),
        Recipients::AllManagers => directory::users_with_role(conn, Role::Manager),
    }
    .map_err(|err| err.to_string())?
    .into_iter()
    .filter(|user| user.id != event.actor_id)
    .collect();

    Ok(Some(DispatchContext {
        ticket,
        actor,
        recipients,
    }))
}
