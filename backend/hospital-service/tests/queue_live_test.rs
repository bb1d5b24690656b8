//! Live queue reads and change publication against an in-memory mirror.

mod common;

use chrono::{Duration, Utc};
use anyhow::anyhow;
use async_trait::async_trait;
use common::{MemoryQueueCache, OFFLINE_DATABASE_URL};
use hospital_service::config::QueueConfig;
use hospital_service::middleware::AuthUser;
use hospital_service::models::{QueueEntry, QueueEntryStatus, QueuePriority, UserRole};
use hospital_service::realtime::{QueueAction, RealtimeEvent};
use hospital_service::services::{CachedQueue, QueueCache, QueueChange, QueueService};
use hospital_service::ChannelHub;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn entry(service: &QueueService, number: i64, priority: QueuePriority, minutes_ago: i64) -> QueueEntry {
    QueueEntry {
        id: Uuid::new_v4(),
        visit_id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        queue_number: number,
        department: "general".to_string(),
        priority,
        status: QueueEntryStatus::Waiting,
        queue_date: service.service_date(),
        joined_at: Utc::now() - Duration::minutes(minutes_ago),
        called_at: None,
        completed_at: None,
        patient_name: format!("Patient {}", number),
    }
}

fn service(cache: Arc<dyn QueueCache>, hub: ChannelHub) -> QueueService {
    QueueService::new(
        common::lazy_pool(OFFLINE_DATABASE_URL),
        cache,
        hub,
        &QueueConfig::default(),
    )
}

#[tokio::test]
async fn live_queue_ranks_cached_entries() {
    let cache = Arc::new(MemoryQueueCache::primed(&["general"]));
    let queue = service(cache.clone(), ChannelHub::new());

    let early = entry(&queue, 1, QueuePriority::Normal, 30);
    let late = entry(&queue, 2, QueuePriority::Normal, 10);
    let urgent = entry(&queue, 3, QueuePriority::Emergency, 1);
    let mut yesterday = entry(&queue, 4, QueuePriority::Normal, 40);
    yesterday.queue_date = yesterday.queue_date.pred_opt().expect("previous day");

    let changes: Vec<QueueChange> = [&late, &urgent, &early, &yesterday]
        .into_iter()
        .map(|e| QueueChange::Added(e.clone()))
        .collect();
    for change in &changes {
        queue.publish(std::slice::from_ref(change)).await;
    }

    let items = queue.live_queue("general").await.expect("cache hit");
    let order: Vec<i64> = items.iter().map(|i| i.entry.queue_number).collect();
    assert_eq!(order, vec![3, 1, 2]);
    assert_eq!(items[0].position, 1);
    assert_eq!(items[2].estimated_wait_minutes, 45);
}

#[tokio::test]
async fn publish_announces_changes_to_the_department() {
    let cache = Arc::new(MemoryQueueCache::primed(&["general"]));
    let hub = ChannelHub::new();
    let queue = service(cache.clone(), hub.clone());

    let nurse = AuthUser {
        id: Uuid::new_v4(),
        email: "nurse@hospital.test".to_string(),
        role: UserRole::Nurse,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.connect(&nurse, Some("general"), tx).await;

    let mut waiting = entry(&queue, 7, QueuePriority::Urgent, 5);
    queue.publish(&[QueueChange::Added(waiting.clone())]).await;

    match rx.recv().await.expect("added event") {
        RealtimeEvent::QueueUpdated {
            department,
            action,
            visit_id,
            item,
        } => {
            assert_eq!(department, "general");
            assert_eq!(action, QueueAction::Added);
            assert_eq!(visit_id, waiting.visit_id);
            assert_eq!(item.expect("ranked item").position, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(cache.len("general"), 1);

    waiting.status = QueueEntryStatus::Completed;
    waiting.completed_at = Some(Utc::now());
    queue.publish(&[QueueChange::StatusChanged(waiting.clone())]).await;

    match rx.recv().await.expect("status event") {
        RealtimeEvent::QueueStatusChanged { visit_id, status, .. } => {
            assert_eq!(visit_id, waiting.visit_id);
            assert_eq!(status, QueueEntryStatus::Completed);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(cache.len("general"), 0);
}

#[tokio::test]
async fn other_departments_do_not_hear_queue_changes() {
    let cache = Arc::new(MemoryQueueCache::default());
    let hub = ChannelHub::new();
    let queue = service(cache, hub.clone());

    let pharmacist = AuthUser {
        id: Uuid::new_v4(),
        email: "pharmacist@hospital.test".to_string(),
        role: UserRole::Pharmacist,
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.connect(&pharmacist, Some("pharmacy"), tx).await;

    let waiting = entry(&queue, 1, QueuePriority::Normal, 2);
    queue.publish(&[QueueChange::Removed(waiting)]).await;

    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn write_through_does_not_stand_in_for_a_lost_mirror() {
    let cache = Arc::new(MemoryQueueCache::default());
    let queue = service(cache.clone(), ChannelHub::new());

    let late_arrival = entry(&queue, 17, QueuePriority::Normal, 0);
    queue.publish(&[QueueChange::Added(late_arrival)]).await;

    assert!(!cache.is_mirrored("general"));
    // The morning backlog only lives in PostgreSQL, which is offline here
    assert!(queue.live_queue("general").await.is_err());
}

/// Mirror whose writes fail, as when Redis drops the connection mid-command.
struct FailingWrites {
    inner: MemoryQueueCache,
}

#[async_trait]
impl QueueCache for FailingWrites {
    async fn upsert(&self, _entry: &QueueEntry) -> anyhow::Result<()> {
        Err(anyhow!("connection reset by peer"))
    }

    async fn remove(&self, _department: &str, _visit_id: Uuid) -> anyhow::Result<()> {
        Err(anyhow!("connection reset by peer"))
    }

    async fn load(&self, department: &str) -> anyhow::Result<CachedQueue> {
        self.inner.load(department).await
    }

    async fn fill(
        &self,
        department: &str,
        generation: u64,
        entries: &[QueueEntry],
    ) -> anyhow::Result<bool> {
        self.inner.fill(department, generation, entries).await
    }

    async fn invalidate(&self, department: &str) -> anyhow::Result<()> {
        self.inner.invalidate(department).await
    }
}

#[tokio::test]
async fn failed_write_through_drops_the_mirror() {
    let cache = Arc::new(FailingWrites {
        inner: MemoryQueueCache::primed(&["general"]),
    });
    let queue = service(cache.clone(), ChannelHub::new());

    let mut served = entry(&queue, 2, QueuePriority::Normal, 5);
    served.status = QueueEntryStatus::Completed;
    queue.publish(&[QueueChange::StatusChanged(served)]).await;

    assert!(!cache.inner.is_mirrored("general"));
    assert!(matches!(
        cache.load("general").await.expect("load"),
        CachedQueue::Missing { .. }
    ));
}

#[tokio::test]
async fn refill_is_refused_after_a_concurrent_change() {
    let cache = MemoryQueueCache::default();

    let CachedQueue::Missing { generation } = cache.load("general").await.expect("load") else {
        panic!("nothing has been mirrored yet");
    };

    // A visit leaves the queue between the snapshot read and the refill
    let snapshot = vec![entry_without_service(1)];
    cache
        .remove("general", snapshot[0].visit_id)
        .await
        .expect("remove");

    assert!(!cache.fill("general", generation, &snapshot).await.expect("fill"));
    assert!(!cache.is_mirrored("general"));

    let CachedQueue::Missing { generation } = cache.load("general").await.expect("load") else {
        panic!("refused refill must leave the mirror missing");
    };
    assert!(cache.fill("general", generation, &[]).await.expect("fill"));
    assert_eq!(cache.load("general").await.expect("load"), CachedQueue::Complete(vec![]));
}

fn entry_without_service(number: i64) -> QueueEntry {
    QueueEntry {
        id: Uuid::new_v4(),
        visit_id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        queue_number: number,
        department: "general".to_string(),
        priority: QueuePriority::Normal,
        status: QueueEntryStatus::Waiting,
        queue_date: Utc::now().date_naive(),
        joined_at: Utc::now(),
        called_at: None,
        completed_at: None,
        patient_name: format!("Patient {}", number),
    }
}
