//! Redis mirror of the live department queues.
//!
//! Each department is one hash, `queue:{department}`, keyed by visit id with
//! the JSON-encoded entry as value. A hash only counts as the department's
//! queue once a refill from PostgreSQL has stamped it with [`COMPLETE_FIELD`];
//! write-through never creates one.
//!
//! Every write bumps `queue:{department}:generation`. A refill carries the
//! generation observed before its snapshot was read and is dropped when the
//! counter has moved since. PostgreSQL stays the source of truth: every
//! failure here is reported to the caller, which falls back to the database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use redis_utils::{with_timeout, RedisPool};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::models::QueueEntry;

/// Marker field of a hash that holds a department's whole queue.
pub const COMPLETE_FIELD: &str = "complete";

// KEYS: queue hash, generation. ARGV: field, payload, ttl, marker
static UPSERT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('INCR', KEYS[2])
        redis.call('EXPIRE', KEYS[2], ARGV[3])
        if redis.call('HEXISTS', KEYS[1], ARGV[4]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
        redis.call('EXPIRE', KEYS[1], ARGV[3])
        return 1
        "#,
    )
});

// KEYS: queue hash, generation. ARGV: expected generation, ttl, marker,
// then field/payload pairs
static FILL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = tonumber(redis.call('GET', KEYS[2]) or '0')
        if current ~= tonumber(ARGV[1]) then
            return 0
        end
        redis.call('DEL', KEYS[1])
        redis.call('HSET', KEYS[1], ARGV[3], '1')
        for i = 4, #ARGV, 2 do
            redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
        end
        redis.call('EXPIRE', KEYS[1], ARGV[2])
        return 1
        "#,
    )
});

pub fn queue_key(department: &str) -> String {
    format!("queue:{}", department)
}

pub fn generation_key(department: &str) -> String {
    format!("queue:{}:generation", department)
}

/// What the mirror holds for one department.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedQueue {
    /// Every active entry of the department.
    Complete(Vec<QueueEntry>),
    /// Nothing trustworthy. A refill must pass the generation seen here.
    Missing { generation: u64 },
}

/// Interpret a raw `HGETALL` reply.
pub fn decode_mirror(department: &str, raw: HashMap<String, String>, generation: u64) -> CachedQueue {
    if !raw.contains_key(COMPLETE_FIELD) {
        return CachedQueue::Missing { generation };
    }

    let mut entries = Vec::with_capacity(raw.len() - 1);
    for (field, value) in raw {
        if field == COMPLETE_FIELD {
            continue;
        }
        match serde_json::from_str::<QueueEntry>(&value) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                // A partial view would misreport positions
                tracing::warn!(department = %department, field = %field, error = %e, "Corrupt queue cache entry");
                return CachedQueue::Missing { generation };
            }
        }
    }
    CachedQueue::Complete(entries)
}

/// Field/payload pairs for a refill. Entries that already left the queue are
/// not written back.
pub fn fill_fields(entries: &[QueueEntry]) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .filter(|entry| entry.status.is_active())
        .map(|entry| {
            let payload = serde_json::to_string(entry).context("encode queue entry")?;
            Ok((entry.visit_id.to_string(), payload))
        })
        .collect()
}

#[async_trait]
pub trait QueueCache: Send + Sync {
    /// Write one entry through to a complete mirror. A missing mirror is
    /// left missing.
    async fn upsert(&self, entry: &QueueEntry) -> Result<()>;

    async fn remove(&self, department: &str, visit_id: Uuid) -> Result<()>;

    async fn load(&self, department: &str) -> Result<CachedQueue>;

    /// Replace the mirror with a database snapshot unless the department
    /// changed after `generation` was read. Returns whether it was written.
    async fn fill(&self, department: &str, generation: u64, entries: &[QueueEntry]) -> Result<bool>;

    /// Drop the mirror so the next read goes to PostgreSQL.
    async fn invalidate(&self, department: &str) -> Result<()>;
}

pub struct RedisQueueCache {
    redis: ConnectionManager,
    ttl_secs: i64,
    timeout: Duration,
}

impl RedisQueueCache {
    pub fn new(pool: &RedisPool, ttl_secs: u64, timeout: Duration) -> Self {
        Self {
            redis: pool.manager(),
            ttl_secs: ttl_secs as i64,
            timeout,
        }
    }
}

#[async_trait]
impl QueueCache for RedisQueueCache {
    async fn upsert(&self, entry: &QueueEntry) -> Result<()> {
        let payload = serde_json::to_string(entry).context("encode queue entry")?;
        let mut conn = self.redis.clone();

        let _: i64 = with_timeout(
            self.timeout,
            UPSERT
                .key(queue_key(&entry.department))
                .key(generation_key(&entry.department))
                .arg(entry.visit_id.to_string())
                .arg(payload)
                .arg(self.ttl_secs)
                .arg(COMPLETE_FIELD)
                .invoke_async::<_, i64>(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn remove(&self, department: &str, visit_id: Uuid) -> Result<()> {
        let generation = generation_key(department);
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(&generation, 1)
            .ignore()
            .expire(&generation, self.ttl_secs)
            .ignore()
            .hdel(queue_key(department), visit_id.to_string())
            .ignore();

        with_timeout(self.timeout, pipe.query_async::<_, ()>(&mut conn)).await
    }

    async fn load(&self, department: &str) -> Result<CachedQueue> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hgetall(queue_key(department))
            .get(generation_key(department));

        let (raw, generation): (HashMap<String, String>, Option<u64>) =
            with_timeout(self.timeout, pipe.query_async(&mut conn)).await?;

        Ok(decode_mirror(department, raw, generation.unwrap_or(0)))
    }

    async fn fill(&self, department: &str, generation: u64, entries: &[QueueEntry]) -> Result<bool> {
        let fields = fill_fields(entries)?;
        let mut conn = self.redis.clone();

        let mut invocation = FILL.prepare_invoke();
        invocation
            .key(queue_key(department))
            .key(generation_key(department))
            .arg(generation)
            .arg(self.ttl_secs)
            .arg(COMPLETE_FIELD);
        for (field, payload) in &fields {
            invocation.arg(field).arg(payload);
        }

        let written: i64 =
            with_timeout(self.timeout, invocation.invoke_async::<_, i64>(&mut conn)).await?;
        Ok(written == 1)
    }

    async fn invalidate(&self, department: &str) -> Result<()> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(generation_key(department), 1)
            .ignore()
            .del(queue_key(department))
            .ignore();

        with_timeout(self.timeout, pipe.query_async::<_, ()>(&mut conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QueueEntryStatus, QueuePriority};
    use chrono::Utc;

    fn entry(status: QueueEntryStatus) -> QueueEntry {
        QueueEntry {
            id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            queue_number: 1,
            department: "general".into(),
            priority: QueuePriority::Normal,
            status,
            queue_date: Utc::now().date_naive(),
            joined_at: Utc::now(),
            called_at: None,
            completed_at: None,
            patient_name: "Test Patient".into(),
        }
    }

    #[test]
    fn keys_are_per_department() {
        assert_eq!(queue_key("laboratory"), "queue:laboratory");
        assert_eq!(generation_key("laboratory"), "queue:laboratory:generation");
    }

    #[test]
    fn hash_without_marker_is_a_miss() {
        let waiting = entry(QueueEntryStatus::Waiting);
        let mut raw = HashMap::new();
        raw.insert(
            waiting.visit_id.to_string(),
            serde_json::to_string(&waiting).unwrap(),
        );

        assert_eq!(
            decode_mirror("general", raw, 4),
            CachedQueue::Missing { generation: 4 }
        );
    }

    #[test]
    fn marked_hash_is_the_whole_queue() {
        let waiting = entry(QueueEntryStatus::Waiting);
        let mut raw = HashMap::new();
        raw.insert(COMPLETE_FIELD.to_string(), "1".to_string());

        assert_eq!(decode_mirror("general", raw.clone(), 0), CachedQueue::Complete(vec![]));

        raw.insert(
            waiting.visit_id.to_string(),
            serde_json::to_string(&waiting).unwrap(),
        );
        assert_eq!(
            decode_mirror("general", raw, 0),
            CachedQueue::Complete(vec![waiting])
        );
    }

    #[test]
    fn corrupt_field_discards_the_mirror() {
        let mut raw = HashMap::new();
        raw.insert(COMPLETE_FIELD.to_string(), "1".to_string());
        raw.insert(Uuid::new_v4().to_string(), "{not json".to_string());

        assert_eq!(
            decode_mirror("general", raw, 2),
            CachedQueue::Missing { generation: 2 }
        );
    }

    #[test]
    fn refill_skips_entries_that_left_the_queue() {
        let waiting = entry(QueueEntryStatus::Waiting);
        let served = entry(QueueEntryStatus::InProgress);
        let done = entry(QueueEntryStatus::Completed);

        let fields = fill_fields(&[waiting.clone(), done, served.clone()]).unwrap();
        let ids: Vec<&str> = fields.iter().map(|(field, _)| field.as_str()).collect();

        assert_eq!(ids, vec![waiting.visit_id.to_string(), served.visit_id.to_string()]);
    }
}
