use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Role};
use crate::error::{AppError, AppResult};
use crate::models::Notification;
use crate::notifications::{list_notifications, NotificationFilter, NotificationStatus, NotificationType};
use crate::state::AppState;

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub ticket_id: Option<Uuid>,
    pub receiver_id: Uuid,
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub message: Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            ticket_id: notification.ticket_id,
            receiver_id: notification.receiver_id,
            notification_type: notification.notification_type,
            status: notification.status,
            error_message: notification.error_message,
            message: notification.message_json,
            created_at: notification.created_at,
            updated_at: notification.updated_at,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct NotificationQuery {
    pub receiver_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// Admins may read anyone's notifications; everyone else reads their own.
pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<NotificationStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let receiver_id = match user.role {
        Role::Admin => query.receiver_id,
        _ => Some(user.user_id),
    };
    let filter = NotificationFilter {
        receiver_id,
        ticket_id: query.ticket_id,
        status,
        limit: query.limit,
    };

    let mut conn = state.db()?;
    let notifications = list_notifications(&mut conn, &filter)?;
    Ok(Json(
        notifications
            .into_iter()
            .map(NotificationResponse::from)
            .collect(),
    ))
}
