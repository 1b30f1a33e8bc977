//! Monthly ticket statistics per (category, manager, ticket type).
//!
//! Rows are recomputed from the tickets table and overwritten, so running a
//! recompute twice leaves the same counters behind.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{MonthlyStatistics, NewMonthlyStatistics, Ticket};
use crate::schema::{monthly_statistics, tickets};
use crate::tickets::TicketStatus;

const MAX_UPSERT_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("invalid statistics month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

pub type StatisticsResult<T> = Result<T, StatisticsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatisticsKey {
    pub year: i32,
    pub month: i32,
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub type_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatisticsCounts {
    pub total_created: i64,
    pub total_completed: i64,
    pub urgent_tickets: i64,
    pub in_progress_count: i64,
    /// Completed over created, as a percentage.
    pub completion_ratio: f64,
    pub average_completion_hours: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Groups one month's tickets by key. Unassigned tickets belong to no one
/// and are skipped.
pub fn aggregate(tickets: &[Ticket]) -> BTreeMap<StatisticsKey, StatisticsCounts> {
    let mut grouped: BTreeMap<StatisticsKey, (StatisticsCounts, f64, i64)> = BTreeMap::new();

    for ticket in tickets {
        let Some(user_id) = ticket.manager_id else {
            continue;
        };
        let key = StatisticsKey {
            year: ticket.created_at.year(),
            month: ticket.created_at.month() as i32,
            category_id: ticket.first_category_id,
            user_id,
            type_id: ticket.type_id,
        };
        let (counts, hours_sum, timed) = grouped.entry(key).or_default();

        counts.total_created += 1;
        if ticket.urgent {
            counts.urgent_tickets += 1;
        }
        match ticket.status {
            TicketStatus::InProgress | TicketStatus::Review => counts.in_progress_count += 1,
            TicketStatus::Done => {
                counts.total_completed += 1;
                if let Some(completed_at) = ticket.completed_at {
                    let seconds = (completed_at - ticket.created_at).num_seconds().max(0);
                    *hours_sum += seconds as f64 / 3600.0;
                    *timed += 1;
                }
            }
            _ => {}
        }
    }

    grouped
        .into_iter()
        .map(|(key, (mut counts, hours_sum, timed))| {
            counts.completion_ratio = if counts.total_created == 0 {
                0.0
            } else {
                round2(counts.total_completed as f64 * 100.0 / counts.total_created as f64)
            };
            counts.average_completion_hours = (timed > 0).then(|| round2(hours_sum / timed as f64));
            (key, counts)
        })
        .collect()
}

fn month_bounds(year: i32, month: u32) -> StatisticsResult<(NaiveDateTime, NaiveDateTime)> {
    let invalid = || StatisticsError::InvalidMonth { year, month };
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    Ok((
        start.and_hms_opt(0, 0, 0).ok_or_else(invalid)?,
        end.and_hms_opt(0, 0, 0).ok_or_else(invalid)?,
    ))
}

pub fn compute_month(
    conn: &mut PgConnection,
    year: i32,
    month: u32,
) -> StatisticsResult<BTreeMap<StatisticsKey, StatisticsCounts>> {
    let (start, end) = month_bounds(year, month)?;
    let month_tickets: Vec<Ticket> = tickets::table
        .filter(tickets::deleted_at.is_null())
        .filter(tickets::manager_id.is_not_null())
        .filter(tickets::created_at.ge(start))
        .filter(tickets::created_at.lt(end))
        .load(conn)?;
    Ok(aggregate(&month_tickets))
}

fn find_row(
    conn: &mut PgConnection,
    key: &StatisticsKey,
) -> QueryResult<Option<MonthlyStatistics>> {
    monthly_statistics::table
        .filter(monthly_statistics::year.eq(key.year))
        .filter(monthly_statistics::month.eq(key.month))
        .filter(monthly_statistics::category_id.eq(key.category_id))
        .filter(monthly_statistics::user_id.eq(key.user_id))
        .filter(monthly_statistics::type_id.eq(key.type_id))
        .first(conn)
        .optional()
}

fn overwrite(
    conn: &mut PgConnection,
    row_id: Uuid,
    counts: &StatisticsCounts,
    now: NaiveDateTime,
) -> QueryResult<MonthlyStatistics> {
    diesel::update(monthly_statistics::table.find(row_id))
        .set((
            monthly_statistics::total_created.eq(counts.total_created),
            monthly_statistics::total_completed.eq(counts.total_completed),
            monthly_statistics::urgent_tickets.eq(counts.urgent_tickets),
            monthly_statistics::in_progress_count.eq(counts.in_progress_count),
            monthly_statistics::completion_ratio.eq(counts.completion_ratio),
            monthly_statistics::average_completion_hours.eq(counts.average_completion_hours),
            monthly_statistics::last_updated_at.eq(now),
        ))
        .get_result(conn)
}

/// Find-then-update, else insert. Losing an insert race to a concurrent run
/// falls back to updating the row that won.
pub fn upsert_statistics(
    conn: &mut PgConnection,
    key: &StatisticsKey,
    counts: &StatisticsCounts,
) -> StatisticsResult<MonthlyStatistics> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let now = Utc::now().naive_utc();
        let result = conn.transaction::<_, DieselError, _>(|conn| {
            if let Some(existing) = find_row(conn, key)? {
                return overwrite(conn, existing.id, counts, now);
            }
            diesel::insert_into(monthly_statistics::table)
                .values(&NewMonthlyStatistics {
                    id: Uuid::new_v4(),
                    year: key.year,
                    month: key.month,
                    category_id: key.category_id,
                    user_id: key.user_id,
                    type_id: key.type_id,
                    total_created: counts.total_created,
                    total_completed: counts.total_completed,
                    urgent_tickets: counts.urgent_tickets,
                    in_progress_count: counts.in_progress_count,
                    completion_ratio: counts.completion_ratio,
                    average_completion_hours: counts.average_completion_hours,
                    last_updated_at: now,
                })
                .get_result(conn)
        });

        match result {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
                if attempt < MAX_UPSERT_ATTEMPTS =>
            {
                warn!(
                    year = key.year,
                    month = key.month,
                    attempt,
                    "statistics row inserted concurrently; retrying as update"
                );
            }
            other => return other.map_err(StatisticsError::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecomputeSummary {
    pub updated: usize,
    pub zeroed: usize,
}

/// Recomputes every key of the month. Rows whose key no longer has any
/// ticket are reset to zero rather than deleted.
pub fn recompute_month(
    conn: &mut PgConnection,
    year: i32,
    month: u32,
) -> StatisticsResult<RecomputeSummary> {
    let computed = compute_month(conn, year, month)?;

    let mut summary = RecomputeSummary::default();
    for (key, counts) in &computed {
        upsert_statistics(conn, key, counts)?;
        summary.updated += 1;
    }

    let live: BTreeSet<&StatisticsKey> = computed.keys().collect();
    let stale: Vec<MonthlyStatistics> = monthly_statistics::table
        .filter(monthly_statistics::year.eq(year))
        .filter(monthly_statistics::month.eq(month as i32))
        .load(conn)?;
    let now = Utc::now().naive_utc();
    for row in stale {
        let key = StatisticsKey {
            year: row.year,
            month: row.month,
            category_id: row.category_id,
            user_id: row.user_id,
            type_id: row.type_id,
        };
        if !live.contains(&key) && row.total_created != 0 {
            overwrite(conn, row.id, &StatisticsCounts::default(), now)?;
            summary.zeroed += 1;
        }
    }

    info!(
        year,
        month,
        updated = summary.updated,
        zeroed = summary.zeroed,
        "monthly statistics recomputed"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Default)]
pub struct StatisticsFilter {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub user_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
}

pub fn list_statistics(
    conn: &mut PgConnection,
    filter: &StatisticsFilter,
) -> QueryResult<Vec<MonthlyStatistics>> {
    let mut query = monthly_statistics::table.into_boxed();
    if let Some(year) = filter.year {
        query = query.filter(monthly_statistics::year.eq(year));
    }
    if let Some(month) = filter.month {
        query = query.filter(monthly_statistics::month.eq(month));
    }
    if let Some(user_id) = filter.user_id {
        query = query.filter(monthly_statistics::user_id.eq(user_id));
    }
    if let Some(category_id) = filter.category_id {
        query = query.filter(monthly_statistics::category_id.eq(category_id));
    }
    query
        .order((
            monthly_statistics::year.desc(),
            monthly_statistics::month.desc(),
            monthly_statistics::total_created.desc(),
        ))
        .load(conn)
}
