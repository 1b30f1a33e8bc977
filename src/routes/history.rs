use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Role};
use crate::error::{AppError, AppResult};
use crate::models::TicketHistory;
use crate::state::AppState;
use crate::tickets::{
    audit::{query_history, HistoryFilter, HistoryPage, PageRequest},
    store::find_visible_ticket,
    TicketStatus, UpdateType,
};

#[derive(Serialize)]
pub struct HistoryEntryResponse {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub updated_by: Uuid,
    pub update_type: UpdateType,
    pub status: TicketStatus,
    pub created_at: NaiveDateTime,
}

impl From<TicketHistory> for HistoryEntryResponse {
    fn from(entry: TicketHistory) -> Self {
        Self {
            id: entry.id,
            ticket_id: entry.ticket_id,
            updated_by: entry.updated_by,
            update_type: entry.update_type,
            status: entry.status,
            created_at: entry.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct HistoryPageResponse {
    pub items: Vec<HistoryEntryResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl From<HistoryPage> for HistoryPageResponse {
    fn from(page: HistoryPage) -> Self {
        Self {
            items: page.items.into_iter().map(HistoryEntryResponse::from).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct HistoryQuery {
    pub ticket_id: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub update_type: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn ticket_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(ticket_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<HistoryPageResponse>> {
    let mut conn = state.db()?;
    find_visible_ticket(&mut conn, ticket_id, &user.actor())?;

    let filter = HistoryFilter {
        ticket_id: Some(ticket_id),
        ..HistoryFilter::default()
    };
    let page = query_history(
        &mut conn,
        &filter,
        PageRequest::new(query.page, query.page_size),
    )?;
    Ok(Json(page.into()))
}

/// Staff query across tickets, deleted ones included; users are limited to
/// tickets they requested.
pub async fn search_history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<HistoryPageResponse>> {
    let update_type = query
        .update_type
        .as_deref()
        .map(str::parse::<UpdateType>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let filter = HistoryFilter {
        ticket_id: query.ticket_id,
        updated_by: query.updated_by,
        update_type,
        requester_id: (user.role == Role::User).then_some(user.user_id),
    };

    let mut conn = state.db()?;
    let page = query_history(
        &mut conn,
        &filter,
        PageRequest::new(query.page, query.page_size),
    )?;
    Ok(Json(page.into()))
}
