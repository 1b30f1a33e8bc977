//! Pure capability checks over the ticket status graph.
//!
//! Nothing here touches the database: every decision is a function of the
//! current status, the requested change and the actor, so the rules can be
//! exercised without a web layer or a connection.

use crate::auth::{Actor, Role};
use crate::models::Ticket;

use super::{Denial, TicketStatus, UpdateType};

const STAFF: &[Role] = &[Role::Admin, Role::Manager];
const STAFF_AND_REQUESTER: &[Role] = &[Role::Admin, Role::Manager, Role::User];

/// Statuses reachable in one step from `from`.
pub fn next_statuses(from: TicketStatus) -> &'static [TicketStatus] {
    match from {
        TicketStatus::Pending => &[TicketStatus::Approved, TicketStatus::Rejected],
        TicketStatus::Approved => &[TicketStatus::InProgress],
        TicketStatus::InProgress => &[TicketStatus::Review],
        TicketStatus::Review => &[TicketStatus::Done, TicketStatus::InProgress],
        TicketStatus::Done | TicketStatus::Rejected => &[],
    }
}

/// Roles allowed to take the edge `from -> to`, or `None` when the edge is
/// not part of the graph.
pub fn roles_for_edge(from: TicketStatus, to: TicketStatus) -> Option<&'static [Role]> {
    if !next_statuses(from).contains(&to) {
        return None;
    }
    match (from, to) {
        // the requester signs off on reviewed work or sends it back
        (TicketStatus::Review, TicketStatus::Done)
        | (TicketStatus::Review, TicketStatus::InProgress) => Some(STAFF_AND_REQUESTER),
        _ => Some(STAFF),
    }
}

pub fn validate_transition(
    current: TicketStatus,
    requested: TicketStatus,
    role: Role,
) -> Result<(), Denial> {
    if current == requested {
        return Err(Denial::InvalidTransition(format!(
            "ticket is already {current}"
        )));
    }

    let roles = roles_for_edge(current, requested).ok_or_else(|| {
        Denial::InvalidTransition(format!("{current} -> {requested} is not a permitted edge"))
    })?;

    if !roles.contains(&role) {
        return Err(Denial::Unauthorized(format!(
            "{role} may not move a ticket from {current} to {requested}"
        )));
    }

    Ok(())
}

/// Validates the edge and returns the new status with its audit classification.
pub fn transition(
    current: TicketStatus,
    requested: TicketStatus,
    role: Role,
) -> Result<(TicketStatus, UpdateType), Denial> {
    validate_transition(current, requested, role)?;
    let update_type = match (current, requested) {
        (TicketStatus::Pending, TicketStatus::Approved) => UpdateType::TicketApproved,
        _ => UpdateType::StatusChange,
    };
    Ok((requested, update_type))
}

/// Admins see everything, managers see their own and the unassigned queue,
/// users see what they requested.
pub fn can_view(ticket: &Ticket, actor: &Actor) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Manager => ticket.manager_id.map_or(true, |id| id == actor.user_id),
        Role::User => ticket.requester_id == actor.user_id,
    }
}

pub fn can_comment(ticket: &Ticket, actor: &Actor) -> bool {
    actor.role.is_staff()
        || ticket.requester_id == actor.user_id
        || ticket.manager_id == Some(actor.user_id)
}

/// Manager, priority and deadline belong to staff.
pub fn validate_settings_edit(ticket: &Ticket, actor: &Actor) -> Result<(), Denial> {
    ensure_open(ticket)?;
    if !actor.role.is_staff() {
        return Err(Denial::Unauthorized(
            "only managers and admins may change ticket settings".into(),
        ));
    }
    Ok(())
}

/// Title, description, categories, type and the urgent flag.
pub fn validate_content_edit(ticket: &Ticket, actor: &Actor) -> Result<(), Denial> {
    ensure_open(ticket)?;
    if actor.role.is_staff() {
        return Ok(());
    }
    if ticket.requester_id != actor.user_id {
        return Err(Denial::Unauthorized(
            "only the requester may edit this ticket".into(),
        ));
    }
    if ticket.status != TicketStatus::Pending {
        return Err(Denial::Unauthorized(format!(
            "requesters may only edit PENDING tickets, this one is {}",
            ticket.status
        )));
    }
    Ok(())
}

pub fn validate_delete(ticket: &Ticket, actor: &Actor) -> Result<(), Denial> {
    match actor.role {
        Role::Admin => Ok(()),
        _ if ticket.requester_id == actor.user_id && ticket.status == TicketStatus::Pending => {
            Ok(())
        }
        _ => Err(Denial::Unauthorized(
            "only admins, or the requester of a PENDING ticket, may delete it".into(),
        )),
    }
}

/// A status change requested by a user must come from the ticket's requester.
pub fn validate_status_change(
    ticket: &Ticket,
    requested: TicketStatus,
    actor: &Actor,
) -> Result<(TicketStatus, UpdateType), Denial> {
    let outcome = transition(ticket.status, requested, actor.role)?;
    if actor.role == Role::User && ticket.requester_id != actor.user_id {
        return Err(Denial::Unauthorized(
            "only the requester may review this ticket".into(),
        ));
    }
    Ok(outcome)
}

fn ensure_open(ticket: &Ticket) -> Result<(), Denial> {
    if ticket.status.is_terminal() {
        return Err(Denial::InvalidTransition(format!(
            "ticket is {} and can no longer change",
            ticket.status
        )));
    }
    Ok(())
}
