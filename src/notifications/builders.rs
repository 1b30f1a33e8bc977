use std::{collections::HashMap, sync::Arc};

use crate::models::{Ticket, User};
use crate::tickets::UpdateType;

use super::chat::{Block, ChatMessage};
use super::{NotificationEvent, NotificationType};

const COMMENT_PREVIEW_CHARS: usize = 200;

/// Everything a builder may render from.
pub struct MessageContext<'a> {
    pub event: &'a NotificationEvent,
    pub ticket: &'a Ticket,
    pub actor: &'a User,
}

pub trait MessageBuilder: Send + Sync {
    fn notification_type(&self) -> NotificationType;
    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage;
}

/// Strategy lookup from notification type to its message builder.
pub struct BuilderRegistry {
    builders: HashMap<NotificationType, Arc<dyn MessageBuilder>>,
}

impl BuilderRegistry {
    pub fn new(builders: Vec<Arc<dyn MessageBuilder>>) -> Self {
        let builders = builders
            .into_iter()
            .map(|builder| (builder.notification_type(), builder))
            .collect();
        Self { builders }
    }

    pub fn get(&self, notification_type: NotificationType) -> Option<&dyn MessageBuilder> {
        self.builders.get(&notification_type).map(|b| b.as_ref())
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::new(default_builders())
    }
}

pub fn default_builders() -> Vec<Arc<dyn MessageBuilder>> {
    vec![
        Arc::new(TicketCreatedMessage),
        Arc::new(TicketApprovedMessage),
        Arc::new(StatusChangedMessage),
        Arc::new(ManagerChangedMessage),
        Arc::new(TicketEditedMessage),
        Arc::new(TicketDeletedMessage),
        Arc::new(CommentAddedMessage),
    ]
}

fn ticket_blocks(headline: &str, ctx: &MessageContext<'_>) -> Vec<Block> {
    let ticket = ctx.ticket;
    let mut blocks = vec![
        Block::header(headline),
        Block::text(format!("*{}*", ticket.title)),
        Block::Divider,
        Block::description("Status", ticket.status.as_str()),
        Block::description("Priority", ticket.priority.as_str()),
        Block::description("By", ctx.actor.username.as_str()),
    ];
    if let Some(deadline) = ticket.deadline {
        blocks.push(Block::description(
            "Deadline",
            deadline.format("%Y-%m-%d %H:%M").to_string(),
        ));
    }
    if ticket.urgent {
        blocks.push(Block::description("Urgent", "yes"));
    }
    blocks
}

fn message(text: String, blocks: Vec<Block>) -> ChatMessage {
    ChatMessage { text, blocks }
}

pub struct TicketCreatedMessage;

impl MessageBuilder for TicketCreatedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::TicketCreated
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        message(
            format!("New ticket from {}: {}", ctx.actor.username, ctx.ticket.title),
            ticket_blocks("New ticket", ctx),
        )
    }
}

pub struct TicketApprovedMessage;

impl MessageBuilder for TicketApprovedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::TicketApproved
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        message(
            format!("Your ticket was approved: {}", ctx.ticket.title),
            ticket_blocks("Ticket approved", ctx),
        )
    }
}

pub struct StatusChangedMessage;

impl MessageBuilder for StatusChangedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::StatusChanged
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        message(
            format!(
                "Ticket \"{}\" is now {}",
                ctx.ticket.title, ctx.ticket.status
            ),
            ticket_blocks("Status changed", ctx),
        )
    }
}

pub struct ManagerChangedMessage;

impl MessageBuilder for ManagerChangedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::ManagerChanged
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        message(
            format!("You were assigned ticket \"{}\"", ctx.ticket.title),
            ticket_blocks("Ticket assigned", ctx),
        )
    }
}

pub struct TicketEditedMessage;

impl TicketEditedMessage {
    fn change_label(update_type: Option<UpdateType>) -> &'static str {
        match update_type {
            Some(UpdateType::PriorityChange) => "priority",
            Some(UpdateType::CategoryChange) => "category",
            Some(UpdateType::DeadlineChange) => "deadline",
            Some(UpdateType::TypeChange) => "type",
            _ => "details",
        }
    }
}

impl MessageBuilder for TicketEditedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::TicketEdited
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        let label = Self::change_label(ctx.event.update_type);
        message(
            format!(
                "{} updated the {label} of \"{}\"",
                ctx.actor.username, ctx.ticket.title
            ),
            ticket_blocks("Ticket updated", ctx),
        )
    }
}

pub struct TicketDeletedMessage;

impl MessageBuilder for TicketDeletedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::TicketDeleted
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        message(
            format!(
                "{} deleted ticket \"{}\"",
                ctx.actor.username, ctx.ticket.title
            ),
            vec![
                Block::header("Ticket deleted"),
                Block::text(format!("*{}*", ctx.ticket.title)),
            ],
        )
    }
}

pub struct CommentAddedMessage;

impl MessageBuilder for CommentAddedMessage {
    fn notification_type(&self) -> NotificationType {
        NotificationType::CommentAdded
    }

    fn build(&self, ctx: &MessageContext<'_>) -> ChatMessage {
        let body = ctx.event.comment_body.as_deref().unwrap_or_default();
        let preview: String = body.chars().take(COMMENT_PREVIEW_CHARS).collect();
        let mut blocks = ticket_blocks("New comment", ctx);
        blocks.push(Block::Divider);
        blocks.push(Block::text(preview));
        message(
            format!(
                "{} commented on \"{}\"",
                ctx.actor.username, ctx.ticket.title
            ),
            blocks,
        )
    }
}
