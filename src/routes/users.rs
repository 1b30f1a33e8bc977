use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{password, AuthenticatedUser, Role};
use crate::directory;
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::schema::users;
use crate::state::AppState;

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct UserQuery {
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

pub const MIN_PASSWORD_CHARS: usize = 8;

/// Staff browse the directory, e.g. to pick a manager to assign.
pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    user.require_staff()?;
    let role = query
        .role
        .as_deref()
        .map(str::parse::<Role>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let rows = match role {
        Some(role) => directory::users_with_role(&mut conn, role)?,
        None => users::table.order(users::username.asc()).load(&mut conn)?,
    };
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    user.require_admin()?;
    if payload.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }

    let password_hash = password::hash_password(&payload.password)?;
    let mut conn = state.db()?;
    let created = directory::create_user(
        &mut conn,
        &payload.username,
        &payload.email,
        password_hash,
        payload.role,
    )?;
    Ok((StatusCode::CREATED, Json(created.into())))
}
