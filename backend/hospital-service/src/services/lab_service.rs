use serde_json::json;
use sqlx::{Connection, PgConnection, PgPool};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::notification_service::{Audience, NotificationService, NotifyStaff};
use super::patient_service::LAB_TEST_VIEW;
use super::pipeline::{Step, TransitionRequest, VisitPipeline};
use crate::error::{AppError, Result};
use crate::models::{
    LabTest, LabTestView, NotificationType, PatientStatus, TestStatus, UpdateLabTestRequest,
};

/// Visit status a lab update should push the visit towards, if any.
pub fn lab_progress(updated: TestStatus, all_finished: bool) -> Option<PatientStatus> {
    if all_finished {
        Some(PatientStatus::AwaitingResults)
    } else if updated.is_started() {
        Some(PatientStatus::TestsInProgress)
    } else {
        None
    }
}

/// Whether the ordering doctor has to hear about this update. Only a change
/// into a reported or critical result counts; re-saving one does not.
pub fn result_notice(
    previous: TestStatus,
    was_critical: bool,
    status: TestStatus,
    is_critical: bool,
) -> Option<NotificationType> {
    let critical_before = was_critical || previous == TestStatus::Critical;
    let critical_now = is_critical || status == TestStatus::Critical;

    if critical_now {
        (!critical_before).then_some(NotificationType::CriticalResult)
    } else if status == TestStatus::Reported && previous != TestStatus::Reported {
        Some(NotificationType::TestResultReady)
    } else {
        None
    }
}

/// Updated row plus the result state it replaced.
#[derive(Debug, sqlx::FromRow)]
struct UpdatedLabTest {
    #[sqlx(flatten)]
    test: LabTest,
    previous_status: TestStatus,
    previously_critical: bool,
}

pub struct LabService {
    db: PgPool,
    pipeline: Arc<VisitPipeline>,
    notifications: NotificationService,
}

impl LabService {
    pub fn new(db: PgPool, pipeline: Arc<VisitPipeline>, notifications: NotificationService) -> Self {
        Self {
            db,
            pipeline,
            notifications,
        }
    }

    /// Tests in one status (default `ordered`), oldest first.
    pub async fn pending(&self, status: Option<TestStatus>) -> Result<Vec<LabTestView>> {
        let status = status.unwrap_or(TestStatus::Ordered);
        let tests = sqlx::query_as::<_, LabTestView>(&format!(
            "{LAB_TEST_VIEW} WHERE t.status = $1 ORDER BY t.ordered_at ASC, t.id"
        ))
        .bind(status)
        .fetch_all(&self.db)
        .await?;
        Ok(tests)
    }

    pub async fn details(&self, test_id: Uuid) -> Result<LabTestView> {
        sqlx::query_as::<_, LabTestView>(&format!("{LAB_TEST_VIEW} WHERE t.id = $1"))
            .bind(test_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("lab test not found".to_string()))
    }

    pub async fn for_patient(&self, patient_id: Uuid) -> Result<Vec<LabTestView>> {
        let tests = sqlx::query_as::<_, LabTestView>(&format!(
            "{LAB_TEST_VIEW} WHERE t.patient_id = $1 ORDER BY t.ordered_at DESC"
        ))
        .bind(patient_id)
        .fetch_all(&self.db)
        .await?;
        Ok(tests)
    }

    /// Record lab progress and move the visit along when the lab work allows.
    pub async fn update(
        &self,
        test_id: Uuid,
        technician_id: Uuid,
        request: UpdateLabTestRequest,
    ) -> Result<LabTest> {
        let mut conn = self.pipeline.acquire().await?;
        let mut tx = conn.begin().await?;

        let updated = sqlx::query_as::<_, UpdatedLabTest>(
            r#"
            WITH prev AS (
                SELECT id, status AS previous_status, is_critical AS previously_critical
                FROM lab_tests
                WHERE id = $1
                FOR UPDATE
            )
            UPDATE lab_tests t SET
                status = $2,
                performed_by = $3,
                results = COALESCE($4, results),
                normal_range = COALESCE($5, normal_range),
                is_critical = COALESCE($6, is_critical) OR $2 = 'critical',
                notes = COALESCE($7, notes),
                sample_collected_at = CASE WHEN $2 = 'sample_collected'
                    THEN COALESCE(sample_collected_at, NOW()) ELSE sample_collected_at END,
                completed_at = CASE WHEN $2 = 'completed'
                    THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
                reported_at = CASE WHEN $2 IN ('reported', 'critical')
                    THEN COALESCE(reported_at, NOW()) ELSE reported_at END,
                updated_at = NOW()
            FROM prev
            WHERE t.id = prev.id
            RETURNING t.*, prev.previous_status, prev.previously_critical
            "#,
        )
        .bind(test_id)
        .bind(request.status)
        .bind(technician_id)
        .bind(&request.results)
        .bind(&request.normal_range)
        .bind(request.is_critical)
        .bind(&request.notes)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("lab test not found".to_string()))?;
        let test = updated.test;

        let step = self.progress_visit(&mut tx, &test, technician_id).await?;
        tx.commit().await?;

        let doctor_id = match step {
            Some(step) => {
                let visit = self.pipeline.settle(step).await;
                visit.doctor_id
            }
            None => {
                sqlx::query_scalar::<_, Option<Uuid>>("SELECT doctor_id FROM visits WHERE id = $1")
                    .bind(test.visit_id)
                    .fetch_optional(&self.db)
                    .await?
                    .flatten()
            }
        }
        .unwrap_or(test.ordered_by);

        let notice = result_notice(
            updated.previous_status,
            updated.previously_critical,
            test.status,
            test.is_critical,
        );
        if let Some(kind) = notice {
            let critical = kind == NotificationType::CriticalResult;
            let notice = NotifyStaff {
                kind,
                title: (if critical { "CRITICAL lab result" } else { "Lab result ready" }).to_string(),
                message: format!(
                    "{} result is {}ready for review",
                    test.test_name,
                    if critical { "CRITICAL and " } else { "" }
                ),
                audience: Audience::User(doctor_id),
                data: Some(json!({
                    "test_id": test.id,
                    "visit_id": test.visit_id,
                    "patient_id": test.patient_id,
                    "test_name": test.test_name,
                    "is_critical": test.is_critical,
                })),
            };
            if let Err(e) = self.notifications.notify_staff(notice).await {
                warn!(test_id = %test.id, error = %e, "Failed to notify doctor of lab result");
            }
        }

        info!(test_id = %test.id, visit_id = %test.visit_id, status = %test.status, "Lab test updated");
        Ok(test)
    }

    /// Opportunistic visit transition; a visit that has moved on is left alone.
    async fn progress_visit(
        &self,
        conn: &mut PgConnection,
        test: &LabTest,
        actor: Uuid,
    ) -> Result<Option<Step>> {
        let finished: Vec<&str> = TestStatus::FINISHED.iter().map(|s| s.as_str()).collect();
        let all_finished: Option<bool> = sqlx::query_scalar(
            "SELECT bool_and(status = ANY($2)) FROM lab_tests WHERE visit_id = $1",
        )
        .bind(test.visit_id)
        .bind(&finished)
        .fetch_one(&mut *conn)
        .await?;

        let Some(target) = lab_progress(test.status, all_finished.unwrap_or(false)) else {
            return Ok(None);
        };

        let step = self
            .pipeline
            .apply_in_tx(conn, &TransitionRequest::new(test.visit_id, target, actor))
            .await?;
        if let Step::Rejected(visit) = &step {
            debug!(
                visit_id = %visit.id,
                status = %visit.status,
                target = %target,
                "Visit not moved by lab update"
            );
        }
        Ok(Some(step))
    }
}
