use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::MonthlyStatistics;
use crate::state::AppState;
use crate::statistics::{list_statistics, recompute_month, StatisticsFilter};

#[derive(Serialize)]
pub struct StatisticsResponse {
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

impl From<MonthlyStatistics> for StatisticsResponse {
    fn from(row: MonthlyStatistics) -> Self {
        Self {
            year: row.year,
            month: row.month,
            category_id: row.category_id,
            user_id: row.user_id,
            type_id: row.type_id,
            total_created: row.total_created,
            total_completed: row.total_completed,
            urgent_tickets: row.urgent_tickets,
            in_progress_count: row.in_progress_count,
            completion_ratio: row.completion_ratio,
            average_completion_hours: row.average_completion_hours,
            last_updated_at: row.last_updated_at,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct StatisticsQuery {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub user_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct RecomputeRequest {
    pub year: i32,
    pub month: u32,
}

#[derive(Serialize)]
pub struct RecomputeResponse {
    pub year: i32,
    pub month: u32,
    pub updated: usize,
    pub zeroed: usize,
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<StatisticsQuery>,
) -> AppResult<Json<Vec<StatisticsResponse>>> {
    user.require_staff()?;
    if let Some(month) = query.month {
        if !(1..=12).contains(&month) {
            return Err(AppError::bad_request("month must be between 1 and 12"));
        }
    }

    let filter = StatisticsFilter {
        year: query.year,
        month: query.month,
        user_id: query.user_id,
        category_id: query.category_id,
    };
    let mut conn = state.db()?;
    let rows = list_statistics(&mut conn, &filter)?;
    Ok(Json(rows.into_iter().map(StatisticsResponse::from).collect()))
}

pub async fn recompute(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<RecomputeRequest>,
) -> AppResult<Json<RecomputeResponse>> {
    user.require_admin()?;

    let mut conn = state.db()?;
    let summary = recompute_month(&mut conn, payload.year, payload.month)?;
    Ok(Json(RecomputeResponse {
        year: payload.year,
        month: payload.month,
        updated: summary.updated,
        zeroed: summary.zeroed,
    }))
}
