use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Ticket, TicketComment};
use crate::routes::history::HistoryEntryResponse;
use crate::state::AppState;
use crate::tickets::{
    audit::PageRequest,
    commands::{self, ContentChanges, SettingsChanges},
    store::{self, AppliedMutation, NewTicketInput, TicketFilter},
    Priority, TicketStatus,
};
use crate::utils::json::{patch_field, PatchField};

#[derive(Serialize)]
pub struct TicketResponse {
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
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            id: ticket.id,
            title: ticket.title,
            description: ticket.description,
            priority: ticket.priority,
            status: ticket.status,
            type_id: ticket.type_id,
            first_category_id: ticket.first_category_id,
            second_category_id: ticket.second_category_id,
            deadline: ticket.deadline,
            requester_id: ticket.requester_id,
            manager_id: ticket.manager_id,
            urgent: ticket.urgent,
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
            completed_at: ticket.completed_at,
        }
    }
}

/// A committed mutation together with the audit entry it produced.
#[derive(Serialize)]
pub struct MutationResponse {
    pub ticket: TicketResponse,
    pub history: HistoryEntryResponse,
}

impl From<AppliedMutation> for MutationResponse {
    fn from(applied: AppliedMutation) -> Self {
        Self {
            ticket: applied.ticket.into(),
            history: applied.history.into(),
        }
    }
}

#[derive(Serialize)]
pub struct TicketListResponse {
    pub items: Vec<TicketResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Deserialize, Default)]
pub struct ListTicketsQuery {
    pub status: Option<String>,
    pub urgent: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub type_id: Uuid,
    pub first_category_id: Uuid,
    pub second_category_id: Option<Uuid>,
    pub deadline: Option<String>,
    pub manager_id: Option<Uuid>,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Deserialize)]
pub struct ChangeStatusRequest {
    pub status: TicketStatus,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: NaiveDateTime,
}

impl From<TicketComment> for CommentResponse {
    fn from(comment: TicketComment) -> Self {
        Self {
            id: comment.id,
            ticket_id: comment.ticket_id,
            author_id: comment.author_id,
            body: comment.body,
            created_at: comment.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub body: String,
}

/// Accepts RFC 3339 (converted to UTC) or a bare `YYYY-MM-DDTHH:MM:SS` in UTC.
fn parse_timestamp(field: &str, raw: &str) -> AppResult<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| AppError::bad_request(format!("{field} must be an RFC 3339 timestamp")))
}

fn parse_uuid(field: &str, raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request(format!("{field} must be a UUID")))
}

fn string_field(body: &Value, field: &str) -> AppResult<Option<String>> {
    match body.get(field) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(AppError::bad_request(format!("{field} must be a string"))),
    }
}

fn uuid_field(body: &Value, field: &str) -> AppResult<Option<Uuid>> {
    string_field(body, field)?
        .map(|raw| parse_uuid(field, &raw))
        .transpose()
}

/// `Omitted -> None`, `null -> Some(None)`, value -> `Some(Some(parsed))`.
fn nullable_field<T>(
    body: &Value,
    field: &str,
    parse: impl Fn(&str, &str) -> AppResult<T>,
) -> AppResult<Option<Option<T>>> {
    let value =
        patch_field(body, field).map_err(|err| AppError::bad_request(format!("{field}: {err}")))?;
    match value {
        PatchField::Absent => Ok(None),
        PatchField::Clear => Ok(Some(None)),
        PatchField::Set(raw) => Ok(Some(Some(parse(field, &raw)?))),
    }
}

pub async fn list_tickets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListTicketsQuery>,
) -> AppResult<Json<TicketListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TicketStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let filter = TicketFilter {
        status,
        urgent: query.urgent,
    };

    let mut conn = state.db()?;
    let page = store::list_tickets(
        &mut conn,
        &user.actor(),
        &filter,
        PageRequest::new(query.page, query.page_size),
    )?;

    Ok(Json(TicketListResponse {
        items: page.items.into_iter().map(TicketResponse::from).collect(),
        total: page.total,
        page: page.page,
        page_size: page.page_size,
    }))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketRequest>,
) -> AppResult<(StatusCode, Json<MutationResponse>)> {
    let deadline = payload
        .deadline
        .as_deref()
        .map(|raw| parse_timestamp("deadline", raw))
        .transpose()?;

    let input = NewTicketInput {
        title: payload.title,
        description: payload.description,
        priority: payload.priority,
        type_id: payload.type_id,
        first_category_id: payload.first_category_id,
        second_category_id: payload.second_category_id,
        deadline,
        manager_id: payload.manager_id,
        urgent: payload.urgent,
    };

    let mut conn = state.db()?;
    let applied = store::create_ticket(&mut conn, &state.notifications, &user.actor(), input)?;
    Ok((StatusCode::CREATED, Json(applied.into())))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<TicketResponse>> {
    let mut conn = state.db()?;
    let ticket = store::find_visible_ticket(&mut conn, ticket_id, &user.actor())?;
    Ok(Json(ticket.into()))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    store::soft_delete(&mut conn, &state.notifications, ticket_id, &user.actor())?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_ticket(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<MutationResponse>> {
    let urgent = match body.get("urgent") {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err(AppError::bad_request("urgent must be a boolean")),
    };
    let changes = ContentChanges {
        title: string_field(&body, "title")?,
        description: string_field(&body, "description")?,
        type_id: uuid_field(&body, "type_id")?,
        first_category_id: uuid_field(&body, "first_category_id")?,
        second_category_id: nullable_field(&body, "second_category_id", parse_uuid)?,
        urgent,
    };

    let mut conn = state.db()?;
    let applied = commands::edit_content(
        &mut conn,
        &state.notifications,
        ticket_id,
        &user.actor(),
        changes,
    )?;
    Ok(Json(applied.into()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<MutationResponse>> {
    let priority = string_field(&body, "priority")?
        .map(|raw| raw.parse::<Priority>())
        .transpose()
        .map_err(AppError::bad_request)?;
    let changes = SettingsChanges {
        manager_id: nullable_field(&body, "manager_id", parse_uuid)?,
        priority,
        deadline: nullable_field(&body, "deadline", parse_timestamp)?,
    };

    let mut conn = state.db()?;
    let applied = commands::edit_settings(
        &mut conn,
        &state.notifications,
        ticket_id,
        &user.actor(),
        changes,
    )?;
    Ok(Json(applied.into()))
}

pub async fn change_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<ChangeStatusRequest>,
) -> AppResult<Json<MutationResponse>> {
    let mut conn = state.db()?;
    let applied = commands::change_status(
        &mut conn,
        &state.notifications,
        ticket_id,
        &user.actor(),
        payload.status,
    )?;
    Ok(Json(applied.into()))
}

pub async fn list_comments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;
    let comments = commands::list_comments(&mut conn, ticket_id, &user.actor())?;
    Ok(Json(comments.into_iter().map(CommentResponse::from).collect()))
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let mut conn = state.db()?;
    let comment = commands::add_comment(
        &mut conn,
        &state.notifications,
        ticket_id,
        &user.actor(),
        &payload.body,
    )?;
    Ok((StatusCode::CREATED, Json(comment.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nullable_fields_distinguish_null_from_missing() {
        let body = json!({ "manager_id": null, "deadline": "2024-05-01T10:00:00Z" });

        assert_eq!(
            nullable_field(&body, "manager_id", parse_uuid).unwrap(),
            Some(None)
        );
        assert_eq!(
            nullable_field(&body, "second_category_id", parse_uuid).unwrap(),
            None
        );
        let deadline = nullable_field(&body, "deadline", parse_timestamp)
            .unwrap()
            .flatten()
            .unwrap();
        assert_eq!(deadline.to_string(), "2024-05-01 10:00:00");
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let parsed = parse_timestamp("deadline", "2024-05-01T19:00:00+09:00").unwrap();
        assert_eq!(parsed.to_string(), "2024-05-01 10:00:00");
        assert!(parse_timestamp("deadline", "next friday").is_err());
    }

    #[test]
    fn non_string_ids_are_rejected() {
        let body = json!({ "type_id": 12 });
        assert_eq!(
            uuid_field(&body, "type_id").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
