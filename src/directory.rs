//! Lookups into users and the ticket catalog that the ticket core relies on.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{dsl::exists, prelude::*, select};
use uuid::Uuid;

use crate::auth::Role;
use crate::models::{NewUser, User};
use crate::schema::{categories, ticket_types, users};
use crate::tickets::{TicketError, TicketResult};

pub fn find_user_by_id(conn: &mut PgConnection, user_id: Uuid) -> TicketResult<User> {
    users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or(TicketError::NotFound("user"))
}

pub fn find_user_by_email(conn: &mut PgConnection, email: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::email.eq(email.trim().to_lowercase()))
        .first(conn)
        .optional()
}

pub fn find_users_by_ids(conn: &mut PgConnection, ids: &[Uuid]) -> QueryResult<Vec<User>> {
    users::table.filter(users::id.eq_any(ids)).load(conn)
}

pub fn users_with_role(conn: &mut PgConnection, role: Role) -> QueryResult<Vec<User>> {
    users::table
        .filter(users::role.eq(role))
        .order(users::username.asc())
        .load(conn)
}

pub fn ensure_category_exists(conn: &mut PgConnection, category_id: Uuid) -> TicketResult<()> {
    let found: bool =
        select(exists(categories::table.filter(categories::id.eq(category_id)))).get_result(conn)?;
    if found {
        Ok(())
    } else {
        Err(TicketError::NotFound("category"))
    }
}

/// `child` must exist and be filed under `parent`.
pub fn ensure_subcategory(conn: &mut PgConnection, parent: Uuid, child: Uuid) -> TicketResult<()> {
    let parent_of_child: Option<Option<Uuid>> = categories::table
        .find(child)
        .select(categories::parent_id)
        .first(conn)
        .optional()?;

    match parent_of_child {
        None => Err(TicketError::NotFound("category")),
        Some(Some(found)) if found == parent => Ok(()),
        Some(_) => Err(TicketError::validation(
            "second category must belong to the first category",
        )),
    }
}

pub fn ensure_ticket_type_exists(conn: &mut PgConnection, type_id: Uuid) -> TicketResult<()> {
    let found: bool = select(exists(ticket_types::table.filter(ticket_types::id.eq(type_id))))
        .get_result(conn)?;
    if found {
        Ok(())
    } else {
        Err(TicketError::NotFound("ticket type"))
    }
}

/// A ticket can only be assigned to staff.
pub fn ensure_assignable_manager(conn: &mut PgConnection, user_id: Uuid) -> TicketResult<User> {
    let user = find_user_by_id(conn, user_id)?;
    if !user.role.is_staff() {
        return Err(TicketError::validation(format!(
            "user {} cannot be assigned tickets",
            user.username
        )));
    }
    Ok(user)
}

/// Inserts a user. Emails are stored lowercased so lookups by email match
/// regardless of how the address was typed.
pub fn create_user(
    conn: &mut PgConnection,
    username: &str,
    email: &str,
    password_hash: String,
    role: Role,
) -> TicketResult<User> {
    let username = username.trim();
    let email = email.trim().to_lowercase();
    if username.is_empty() {
        return Err(TicketError::validation("username must not be empty"));
    }
    if !email.contains('@') {
        return Err(TicketError::validation("email must be an email address"));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email,
        password_hash,
        role,
    };
    match diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(conn)
    {
        Ok(user) => Ok(user),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Err(
            TicketError::validation("username or email already exists"),
        ),
        Err(err) => Err(err.into()),
    }
}
