//! Queue mirror against a live Redis.
//!
//! Skipped unless REDIS_URL is set. Every test works on its own department
//! name so runs do not interfere.

use chrono::Utc;
use hospital_service::models::{QueueEntry, QueueEntryStatus, QueuePriority};
use hospital_service::services::{CachedQueue, QueueCache, RedisQueueCache};
use redis_utils::RedisPool;
use std::time::Duration;
use uuid::Uuid;

async fn cache() -> Option<(RedisQueueCache, String)> {
    let Some(url) = std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty()) else {
        eprintln!("REDIS_URL not set, skipping");
        return None;
    };
    let pool = RedisPool::connect(&url).await.expect("redis");
    let department = format!("test-{}", Uuid::new_v4());
    Some((RedisQueueCache::new(&pool, 60, Duration::from_secs(2)), department))
}

fn entry(department: &str, number: i64) -> QueueEntry {
    QueueEntry {
        id: Uuid::new_v4(),
        visit_id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        queue_number: number,
        department: department.to_string(),
        priority: QueuePriority::Normal,
        status: QueueEntryStatus::Waiting,
        queue_date: Utc::now().date_naive(),
        joined_at: Utc::now(),
        called_at: None,
        completed_at: None,
        patient_name: format!("Patient {}", number),
    }
}

async fn missing_generation(cache: &RedisQueueCache, department: &str) -> u64 {
    match cache.load(department).await.expect("load") {
        CachedQueue::Missing { generation } => generation,
        CachedQueue::Complete(entries) => panic!("unexpected mirror: {:?}", entries),
    }
}

#[tokio::test]
async fn upsert_alone_does_not_create_a_mirror() {
    let Some((cache, department)) = cache().await else {
        return;
    };

    cache.upsert(&entry(&department, 17)).await.expect("upsert");

    missing_generation(&cache, &department).await;
}

#[tokio::test]
async fn refill_then_write_through() {
    let Some((cache, department)) = cache().await else {
        return;
    };

    let first = entry(&department, 1);
    let generation = missing_generation(&cache, &department).await;
    assert!(cache
        .fill(&department, generation, std::slice::from_ref(&first))
        .await
        .expect("fill"));

    let second = entry(&department, 2);
    cache.upsert(&second).await.expect("upsert");
    cache.remove(&department, first.visit_id).await.expect("remove");

    match cache.load(&department).await.expect("load") {
        CachedQueue::Complete(entries) => assert_eq!(entries, vec![second]),
        CachedQueue::Missing { .. } => panic!("filled mirror should be complete"),
    }

    cache.invalidate(&department).await.expect("invalidate");
    missing_generation(&cache, &department).await;
}

#[tokio::test]
async fn stale_snapshot_is_not_written_back() {
    let Some((cache, department)) = cache().await else {
        return;
    };

    let departed = entry(&department, 3);
    let generation = missing_generation(&cache, &department).await;
    cache
        .remove(&department, departed.visit_id)
        .await
        .expect("remove");

    assert!(!cache
        .fill(&department, generation, &[departed])
        .await
        .expect("fill"));
    missing_generation(&cache, &department).await;
}
