use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Category, NewCategory, NewTicketType, TicketType};
use crate::schema::{categories, ticket_types};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CategoryResponse {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

impl From<Category> for CategoryResponse {
    fn from(category: Category) -> Self {
        Self {
            id: category.id,
            name: category.name,
            parent_id: category.parent_id,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct TicketTypeResponse {
    pub id: Uuid,
    pub name: String,
}

impl From<TicketType> for TicketTypeResponse {
    fn from(ticket_type: TicketType) -> Self {
        Self {
            id: ticket_type.id,
            name: ticket_type.name,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateTicketTypeRequest {
    pub name: String,
}

fn required_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn duplicate_as_bad_request(err: DieselError, what: &str) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::bad_request(format!("{what} name already exists"))
        }
        other => AppError::from(other),
    }
}

pub async fn list_categories(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<CategoryResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Category> = categories::table
        .order(categories::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(CategoryResponse::from).collect()))
}

/// Categories are two levels deep: a parent must itself be top level.
pub async fn create_category(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<CategoryResponse>)> {
    user.require_admin()?;
    let name = required_name(&payload.name)?;

    let mut conn = state.db()?;
    if let Some(parent_id) = payload.parent_id {
        let parent: Category = categories::table
            .find(parent_id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::bad_request("parent category does not exist"))?;
        if parent.parent_id.is_some() {
            return Err(AppError::bad_request(
                "parent category must be a top-level category",
            ));
        }
    }

    let category: Category = diesel::insert_into(categories::table)
        .values(&NewCategory {
            id: Uuid::new_v4(),
            name,
            parent_id: payload.parent_id,
        })
        .get_result(&mut conn)
        .map_err(|err| duplicate_as_bad_request(err, "category"))?;
    Ok((StatusCode::CREATED, Json(category.into())))
}

pub async fn list_ticket_types(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<TicketTypeResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<TicketType> = ticket_types::table
        .order(ticket_types::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(TicketTypeResponse::from).collect()))
}

pub async fn create_ticket_type(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTicketTypeRequest>,
) -> AppResult<(StatusCode, Json<TicketTypeResponse>)> {
    user.require_admin()?;
    let name = required_name(&payload.name)?;

    let mut conn = state.db()?;
    let ticket_type: TicketType = diesel::insert_into(ticket_types::table)
        .values(&NewTicketType {
            id: Uuid::new_v4(),
            name,
        })
        .get_result(&mut conn)
        .map_err(|err| duplicate_as_bad_request(err, "ticket type"))?;
    Ok((StatusCode::CREATED, Json(ticket_type.into())))
}
