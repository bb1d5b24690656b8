/// Department queues
///
/// Writes happen inside the caller's transaction; `publish` runs after the
/// commit to mirror the change into the cache and announce it to the
/// department's audience.
use chrono::{FixedOffset, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::queue_cache::{CachedQueue, QueueCache};
use crate::config::QueueConfig;
use crate::db::{next_sequence, queue_scope};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{QueueEntry, QueueEntryStatus, QueueItem, QueuePosition, Visit};
use crate::realtime::{ChannelHub, QueueAction, RealtimeEvent};

const ENTRY_COLUMNS: &str = "e.*, p.first_name || ' ' || p.last_name AS patient_name";

/// A committed queue write waiting to be mirrored and announced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueChange {
    Added(QueueEntry),
    StatusChanged(QueueEntry),
    Removed(QueueEntry),
}

/// Order active entries of `today` by (priority rank, joined_at, queue_number)
/// and attach positions and the linear wait estimate.
pub fn rank_queue(
    entries: Vec<QueueEntry>,
    today: NaiveDate,
    minutes_per_patient: i64,
) -> Vec<QueueItem> {
    let mut live: Vec<QueueEntry> = entries
        .into_iter()
        .filter(|e| e.status.is_active() && e.queue_date == today)
        .collect();
    live.sort_by(|a, b| {
        (a.priority.rank(), a.joined_at, a.queue_number)
            .cmp(&(b.priority.rank(), b.joined_at, b.queue_number))
    });

    live.into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let position = idx as u32 + 1;
            QueueItem {
                entry,
                position,
                estimated_wait_minutes: i64::from(position) * minutes_per_patient,
            }
        })
        .collect()
}

/// Place of a visit among the waiting entries of a ranked queue.
///
/// An entry already being served reports position 0.
pub fn waiting_position(
    items: &[QueueItem],
    visit_id: Uuid,
    minutes_per_patient: i64,
) -> Option<QueuePosition> {
    let target = items.iter().find(|i| i.entry.visit_id == visit_id)?;

    let position = match target.entry.status {
        QueueEntryStatus::InProgress => 0,
        _ => {
            let ahead = items
                .iter()
                .take_while(|i| i.entry.visit_id != visit_id)
                .filter(|i| i.entry.status == QueueEntryStatus::Waiting)
                .count();
            ahead as u32 + 1
        }
    };

    Some(QueuePosition {
        visit_id,
        department: target.entry.department.clone(),
        status: target.entry.status,
        position,
        estimated_wait_minutes: i64::from(position) * minutes_per_patient,
    })
}

pub struct QueueService {
    db: PgPool,
    cache: Arc<dyn QueueCache>,
    hub: ChannelHub,
    minutes_per_patient: i64,
    local_offset: FixedOffset,
}

impl QueueService {
    pub fn new(db: PgPool, cache: Arc<dyn QueueCache>, hub: ChannelHub, config: &QueueConfig) -> Self {
        Self {
            db,
            cache,
            hub,
            minutes_per_patient: config.minutes_per_patient,
            local_offset: config.local_offset(),
        }
    }

    /// The hospital's current calendar day; queues and visit numbers reset on it.
    pub fn service_date(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.local_offset).date_naive()
    }

    /// Append a waiting entry for the visit with the department's next number.
    pub async fn enqueue(
        &self,
        conn: &mut PgConnection,
        visit: &Visit,
        department: &str,
    ) -> Result<QueueEntry> {
        let date = self.service_date();
        let number = next_sequence(conn, &queue_scope(department, date)).await?;

        let entry = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            WITH e AS (
                INSERT INTO queue_entries
                    (visit_id, patient_id, queue_number, department, priority, status, queue_date)
                VALUES ($1, $2, $3, $4, $5, 'waiting', $6)
                RETURNING *
            )
            SELECT {ENTRY_COLUMNS} FROM e JOIN patients p ON p.id = e.patient_id
            "#
        ))
        .bind(visit.id)
        .bind(visit.patient_id)
        .bind(number)
        .bind(department)
        .bind(visit.priority)
        .bind(date)
        .fetch_one(&mut *conn)
        .await?;

        debug!(
            visit_id = %visit.id,
            department = %department,
            queue_number = number,
            "Queue entry created"
        );
        Ok(entry)
    }

    /// Move the visit's active entry to `status`. `None` when the visit has no
    /// active entry.
    pub async fn set_status(
        &self,
        conn: &mut PgConnection,
        visit_id: Uuid,
        status: QueueEntryStatus,
    ) -> Result<Option<QueueEntry>> {
        let entry = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            WITH e AS (
                UPDATE queue_entries
                SET status = $2,
                    called_at = CASE WHEN $3 THEN COALESCE(called_at, NOW()) ELSE called_at END,
                    completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END
                WHERE visit_id = $1 AND status IN ('waiting', 'in_progress')
                RETURNING *
            )
            SELECT {ENTRY_COLUMNS} FROM e JOIN patients p ON p.id = e.patient_id
            "#
        ))
        .bind(visit_id)
        .bind(status)
        .bind(status == QueueEntryStatus::InProgress)
        .bind(!status.is_active())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(entry)
    }

    /// Take the visit out of its current queue.
    pub async fn remove(&self, conn: &mut PgConnection, visit_id: Uuid) -> Result<Option<QueueEntry>> {
        self.set_status(conn, visit_id, QueueEntryStatus::Completed).await
    }

    /// Mirror committed changes into the cache and announce them.
    ///
    /// A failed write drops the department's mirror so that reads go to
    /// PostgreSQL until the next refill.
    pub async fn publish(&self, changes: &[QueueChange]) {
        for change in changes {
            match change {
                QueueChange::Added(entry) => {
                    if let Err(e) = self.cache.upsert(entry).await {
                        self.discard_mirror(entry, e).await;
                    }
                    let item = self.item_for(entry).await;
                    let event = RealtimeEvent::QueueUpdated {
                        department: entry.department.clone(),
                        action: QueueAction::Added,
                        visit_id: entry.visit_id,
                        item,
                    };
                    self.hub.publish_department(&entry.department, &event).await;
                }
                QueueChange::StatusChanged(entry) => {
                    let written = if entry.status.is_active() {
                        self.cache.upsert(entry).await
                    } else {
                        self.cache.remove(&entry.department, entry.visit_id).await
                    };
                    if let Err(e) = written {
                        self.discard_mirror(entry, e).await;
                    }
                    let event = RealtimeEvent::QueueStatusChanged {
                        department: entry.department.clone(),
                        visit_id: entry.visit_id,
                        status: entry.status,
                    };
                    self.hub.publish_department(&entry.department, &event).await;
                }
                QueueChange::Removed(entry) => {
                    if let Err(e) = self.cache.remove(&entry.department, entry.visit_id).await {
                        self.discard_mirror(entry, e).await;
                    }
                    let event = RealtimeEvent::QueueUpdated {
                        department: entry.department.clone(),
                        action: QueueAction::Removed,
                        visit_id: entry.visit_id,
                        item: None,
                    };
                    self.hub.publish_department(&entry.department, &event).await;
                }
            }
        }
    }

    async fn discard_mirror(&self, entry: &QueueEntry, cause: anyhow::Error) {
        warn!(visit_id = %entry.visit_id, department = %entry.department, error = %cause, "Queue cache write-through failed");
        if let Err(e) = self.cache.invalidate(&entry.department).await {
            warn!(department = %entry.department, error = %e, "Stale queue mirror could not be dropped");
        }
    }

    /// Live queue of a department, cache first.
    pub async fn live_queue(&self, department: &str) -> Result<Vec<QueueItem>> {
        let today = self.service_date();

        let generation = match self.cache.load(department).await {
            Ok(CachedQueue::Complete(entries)) => {
                metrics::record_queue_cache_read("hit");
                return Ok(rank_queue(entries, today, self.minutes_per_patient));
            }
            Ok(CachedQueue::Missing { generation }) => {
                metrics::record_queue_cache_read("miss");
                Some(generation)
            }
            Err(e) => {
                metrics::record_queue_cache_read("error");
                warn!(department = %department, error = %e, "Queue cache read failed, using database");
                None
            }
        };

        let entries = self.active_entries(department, today).await?;
        if let Some(generation) = generation {
            match self.cache.fill(department, generation, &entries).await {
                Ok(true) => {}
                Ok(false) => debug!(department = %department, "Queue changed during refill, mirror left empty"),
                Err(e) => warn!(department = %department, error = %e, "Queue cache refill failed"),
            }
        }

        Ok(rank_queue(entries, today, self.minutes_per_patient))
    }

    /// Position of a visit among its department's waiting entries.
    pub async fn position(&self, visit_id: Uuid) -> Result<QueuePosition> {
        let department: Option<String> = sqlx::query_scalar(
            "SELECT department FROM queue_entries WHERE visit_id = $1 AND status IN ('waiting', 'in_progress')",
        )
        .bind(visit_id)
        .fetch_optional(&self.db)
        .await?;

        let department = department
            .ok_or_else(|| AppError::NotFound("visit is not in any queue".to_string()))?;

        let items = self.live_queue(&department).await?;
        if let Some(position) = waiting_position(&items, visit_id, self.minutes_per_patient) {
            return Ok(position);
        }

        // Mirror is behind the database; rank straight from the table
        let today = self.service_date();
        let entries = self.active_entries(&department, today).await?;
        let items = rank_queue(entries, today, self.minutes_per_patient);
        waiting_position(&items, visit_id, self.minutes_per_patient)
            .ok_or_else(|| AppError::NotFound("visit is not in any queue".to_string()))
    }

    async fn active_entries(&self, department: &str, today: NaiveDate) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM queue_entries e
            JOIN patients p ON p.id = e.patient_id
            WHERE e.department = $1
              AND e.queue_date = $2
              AND e.status IN ('waiting', 'in_progress')
            "#
        ))
        .bind(department)
        .bind(today)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }

    async fn item_for(&self, entry: &QueueEntry) -> Option<QueueItem> {
        match self.live_queue(&entry.department).await {
            Ok(items) => items.into_iter().find(|i| i.entry.visit_id == entry.visit_id),
            Err(e) => {
                warn!(department = %entry.department, error = %e, "Could not rank new queue entry");
                None
            }
        }
    }
}
