//! Visit status pipeline.
//!
//! A transition locks the visit row, applies the guarded status update, the
//! patient's `current_status` and the queue movement in one transaction.
//! Cache writes, realtime events and notifications only happen after the
//! commit, and only for transitions that changed something.

use serde_json::json;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::notification_service::{Audience, NotificationService, NotifyStaff};
use super::queue_service::{QueueChange, QueueService};
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    NotificationType, PatientStatus, QueueEntryStatus, QueueMove, UserRole, Visit,
};
use crate::realtime::{ChannelHub, RealtimeEvent};

const POOL_LABEL: &str = "hospital-service";

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub visit_id: Uuid,
    pub target: PatientStatus,
    /// Assigned to the visit when set; the current doctor is kept otherwise.
    pub doctor_id: Option<Uuid>,
    pub actor: Uuid,
    /// Only accept the transition from this exact status.
    pub require_from: Option<PatientStatus>,
}

impl TransitionRequest {
    pub fn new(visit_id: Uuid, target: PatientStatus, actor: Uuid) -> Self {
        Self {
            visit_id,
            target,
            doctor_id: None,
            actor,
            require_from: None,
        }
    }

    pub fn with_doctor(mut self, doctor_id: Uuid) -> Self {
        self.doctor_id = Some(doctor_id);
        self
    }

    pub fn from_status(mut self, status: PatientStatus) -> Self {
        self.require_from = Some(status);
        self
    }
}

/// A committed transition and the side effects it still owes.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub visit: Visit,
    pub previous: PatientStatus,
    pub actor: Uuid,
    pub queue_changes: Vec<QueueChange>,
}

#[derive(Debug, Clone)]
pub enum Step {
    Applied(AppliedTransition),
    /// The visit already had the target status.
    Unchanged(Visit),
    /// The visit's status does not allow the transition.
    Rejected(Visit),
}

impl Step {
    pub fn visit(&self) -> &Visit {
        match self {
            Step::Applied(applied) => &applied.visit,
            Step::Unchanged(visit) | Step::Rejected(visit) => visit,
        }
    }

    /// Turn a rejection into a `Conflict` for callers that asked for the
    /// transition explicitly.
    pub fn strict(self, target: PatientStatus) -> Result<Step> {
        match self {
            Step::Rejected(visit) => Err(AppError::Conflict(format!(
                "visit {} cannot move from {} to {}",
                visit.visit_number, visit.status, target
            ))),
            step => Ok(step),
        }
    }
}

pub struct VisitPipeline {
    db: PgPool,
    queue: Arc<QueueService>,
    notifications: NotificationService,
    hub: ChannelHub,
}

impl VisitPipeline {
    pub fn new(
        db: PgPool,
        queue: Arc<QueueService>,
        notifications: NotificationService,
        hub: ChannelHub,
    ) -> Self {
        Self {
            db,
            queue,
            notifications,
            hub,
        }
    }

    /// Pooled connection for a pipeline transaction, with acquisition metrics.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
        Ok(db_pool::acquire_with_metrics(&self.db, POOL_LABEL).await?)
    }

    /// Run a single transition in its own transaction and propagate it.
    pub async fn transition(&self, request: TransitionRequest) -> Result<Visit> {
        let mut conn = self.acquire().await?;
        let mut tx = conn.begin().await?;
        let step = self.apply_in_tx(&mut tx, &request).await?.strict(request.target)?;
        tx.commit().await?;

        Ok(self.settle(step).await)
    }

    /// Apply a transition inside the caller's transaction.
    ///
    /// Nothing outside PostgreSQL is touched; hand the returned step to
    /// [`VisitPipeline::settle`] after the commit.
    pub async fn apply_in_tx(
        &self,
        conn: &mut PgConnection,
        request: &TransitionRequest,
    ) -> Result<Step> {
        let visit = sqlx::query_as::<_, Visit>("SELECT * FROM visits WHERE id = $1 FOR UPDATE")
            .bind(request.visit_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("visit not found".to_string()))?;

        let target = request.target;
        if visit.status == target {
            return Ok(Step::Unchanged(visit));
        }
        if let Some(required) = request.require_from {
            if visit.status != required {
                return Ok(Step::Rejected(visit));
            }
        }
        if !visit.status.can_transition_to(target) {
            return Ok(Step::Rejected(visit));
        }

        let previous = visit.status;
        let allowed: Vec<&str> = target.predecessors().iter().map(|s| s.as_str()).collect();

        let updated = sqlx::query_as::<_, Visit>(
            r#"
            UPDATE visits
            SET status = $2,
                doctor_id = COALESCE($3, doctor_id),
                check_out_time = CASE WHEN $4 THEN NOW() ELSE check_out_time END,
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(visit.id)
        .bind(target)
        .bind(request.doctor_id)
        .bind(target.is_terminal())
        .bind(&allowed)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(visit) = updated else {
            return Ok(Step::Rejected(visit));
        };

        sqlx::query("UPDATE patients SET current_status = $2, updated_at = NOW() WHERE id = $1")
            .bind(visit.patient_id)
            .bind(target)
            .execute(&mut *conn)
            .await?;

        let queue_changes = self.move_queue(conn, &visit).await?;

        Ok(Step::Applied(AppliedTransition {
            visit,
            previous,
            actor: request.actor,
            queue_changes,
        }))
    }

    /// Propagate a committed step and hand back the visit.
    pub async fn settle(&self, step: Step) -> Visit {
        match step {
            Step::Applied(applied) => {
                self.propagate(&applied).await;
                applied.visit
            }
            Step::Unchanged(visit) | Step::Rejected(visit) => visit,
        }
    }

    async fn move_queue(&self, conn: &mut PgConnection, visit: &Visit) -> Result<Vec<QueueChange>> {
        let Some(movement) = visit.status.queue_move() else {
            return Ok(Vec::new());
        };

        let mut changes = Vec::new();
        match movement {
            QueueMove::JoinClinical | QueueMove::Join(_) => {
                let department = match movement {
                    QueueMove::Join(department) => department,
                    _ => visit.department.as_str(),
                };
                if let Some(left) = self.queue.remove(conn, visit.id).await? {
                    changes.push(QueueChange::Removed(left));
                }
                let joined = self.queue.enqueue(conn, visit, department).await?;
                changes.push(QueueChange::Added(joined));
            }
            QueueMove::Start => {
                match self
                    .queue
                    .set_status(conn, visit.id, QueueEntryStatus::InProgress)
                    .await?
                {
                    Some(entry) => changes.push(QueueChange::StatusChanged(entry)),
                    None => warn!(
                        visit_id = %visit.id,
                        status = %visit.status,
                        "Visit has no active queue entry to start"
                    ),
                }
            }
            QueueMove::Close => {
                if let Some(left) = self.queue.remove(conn, visit.id).await? {
                    changes.push(QueueChange::Removed(left));
                }
            }
        }
        Ok(changes)
    }

    async fn propagate(&self, applied: &AppliedTransition) {
        let visit = &applied.visit;

        self.queue.publish(&applied.queue_changes).await;

        let event = RealtimeEvent::PatientStatusChanged {
            patient_id: visit.patient_id,
            visit_id: Some(visit.id),
            previous: Some(applied.previous),
            status: visit.status,
            changed_by: applied.actor,
        };
        self.hub.broadcast(&event).await;

        if visit.status == PatientStatus::AtBilling {
            let notice = NotifyStaff {
                kind: NotificationType::BillingPending,
                title: "Billing pending".to_string(),
                message: format!("Visit {} is ready for billing", visit.visit_number),
                audience: Audience::Roles(vec![UserRole::Billing]),
                data: Some(json!({
                    "visit_id": visit.id,
                    "patient_id": visit.patient_id,
                    "visit_number": visit.visit_number,
                })),
            };
            if let Err(e) = self.notifications.notify_staff(notice).await {
                warn!(visit_id = %visit.id, error = %e, "Failed to notify billing staff");
            }
        }

        metrics::record_transition(applied.previous.as_str(), visit.status.as_str());
        info!(
            visit_id = %visit.id,
            patient_id = %visit.patient_id,
            from = %applied.previous,
            to = %visit.status,
            "Visit status changed"
        );
    }
}
