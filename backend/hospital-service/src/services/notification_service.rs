/// Staff notifications
///
/// Notifications are persisted one row per recipient and pushed to the
/// recipient's `user:{id}` channel. Recipients are resolved from the active
/// staff accounts at send time.
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{Notification, NotificationType, Pagination, UserRole};
use crate::realtime::{ChannelHub, RealtimeEvent};

/// Who receives a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    Roles(Vec<UserRole>),
    User(Uuid),
}

#[derive(Debug, Clone)]
pub struct NotifyStaff {
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

#[derive(Clone)]
pub struct NotificationService {
    db: PgPool,
    hub: ChannelHub,
}

impl NotificationService {
    pub fn new(db: PgPool, hub: ChannelHub) -> Self {
        Self { db, hub }
    }

    /// Persist and push a notification; returns the number of recipients.
    pub async fn notify_staff(&self, request: NotifyStaff) -> Result<usize> {
        let (roles, user_id): (Vec<&str>, Option<Uuid>) = match &request.audience {
            Audience::Roles(roles) => (roles.iter().map(|r| r.as_str()).collect(), None),
            Audience::User(id) => (Vec::new(), Some(*id)),
        };

        let rows = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications
                (notification_type, recipient_id, recipient_role, title, message, data)
            SELECT $1, u.id, u.role, $2, $3, $4
            FROM users u
            WHERE u.is_active AND (u.role = ANY($5) OR u.id = $6)
            RETURNING *
            "#,
        )
        .bind(request.kind)
        .bind(&request.title)
        .bind(&request.message)
        .bind(&request.data)
        .bind(&roles)
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        for notification in &rows {
            self.hub
                .send_to_user(notification.recipient_id, &RealtimeEvent::from(notification))
                .await;
        }

        metrics::record_notifications(request.kind.as_str(), rows.len());
        if rows.is_empty() {
            debug!(kind = %request.kind, audience = ?request.audience, "Notification had no active recipients");
        } else {
            info!(kind = %request.kind, recipients = rows.len(), "Notification sent");
        }

        Ok(rows.len())
    }

    /// A user's notifications, newest first.
    pub async fn list(&self, user_id: Uuid, page: Option<i64>, limit: Option<i64>) -> Result<NotificationPage> {
        let (page, limit) = Pagination::clamp(page, limit);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE recipient_id = $1")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        let pagination = Pagination::new(page, limit, total);

        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(NotificationPage {
            notifications,
            total,
            page,
            pages: pagination.pages,
        })
    }

    /// Mark one notification read. Only its recipient may do so.
    pub async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Notification> {
        sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
            WHERE id = $1 AND recipient_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("notification not found".to_string()))
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }
}
