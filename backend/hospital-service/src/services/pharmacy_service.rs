use serde_json::json;
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::notification_service::{Audience, NotificationService, NotifyStaff};
use super::patient_service::PRESCRIPTION_VIEW;
use super::pipeline::{Step, TransitionRequest, VisitPipeline};
use crate::error::{AppError, Result};
use crate::models::{
    DispenseRequest, NotificationType, PatientStatus, Prescription, PrescriptionStatus,
    PrescriptionView, UserRole,
};

pub struct PharmacyService {
    db: PgPool,
    pipeline: Arc<VisitPipeline>,
    notifications: NotificationService,
}

impl PharmacyService {
    pub fn new(db: PgPool, pipeline: Arc<VisitPipeline>, notifications: NotificationService) -> Self {
        Self {
            db,
            pipeline,
            notifications,
        }
    }

    /// Prescriptions in one status (default `pending`), oldest first.
    pub async fn pending(&self, status: Option<PrescriptionStatus>) -> Result<Vec<PrescriptionView>> {
        let status = status.unwrap_or(PrescriptionStatus::Pending);
        let prescriptions = sqlx::query_as::<_, PrescriptionView>(&format!(
            "{PRESCRIPTION_VIEW} WHERE rx.status = $1 ORDER BY rx.issued_at ASC, rx.id"
        ))
        .bind(status)
        .fetch_all(&self.db)
        .await?;
        Ok(prescriptions)
    }

    pub async fn details(&self, id: Uuid) -> Result<PrescriptionView> {
        sqlx::query_as::<_, PrescriptionView>(&format!("{PRESCRIPTION_VIEW} WHERE rx.id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("prescription not found".to_string()))
    }

    /// Hand out a prescription. Once nothing is outstanding for a visit that
    /// waits at the pharmacy, the visit moves on to billing.
    pub async fn dispense(
        &self,
        id: Uuid,
        pharmacist_id: Uuid,
        request: DispenseRequest,
    ) -> Result<Prescription> {
        let outcome = request.outcome()?;
        let outstanding: Vec<&str> = PrescriptionStatus::OUTSTANDING.iter().map(|s| s.as_str()).collect();

        let mut conn = self.pipeline.acquire().await?;
        let mut tx = conn.begin().await?;

        let updated = sqlx::query_as::<_, Prescription>(
            r#"
            UPDATE prescriptions SET
                status = $2,
                dispensed_by = $3,
                dispensed_at = NOW(),
                notes = COALESCE($4, notes),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(outcome)
        .bind(pharmacist_id)
        .bind(&request.notes)
        .bind(&outstanding)
        .fetch_optional(&mut *tx)
        .await?;

        let prescription = match updated {
            Some(prescription) => prescription,
            None => {
                let current: Option<PrescriptionStatus> =
                    sqlx::query_scalar("SELECT status FROM prescriptions WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match current {
                    Some(status) => AppError::Conflict(format!("prescription is already {}", status)),
                    None => AppError::NotFound("prescription not found".to_string()),
                });
            }
        };

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM prescriptions WHERE visit_id = $1 AND status = ANY($2)",
        )
        .bind(prescription.visit_id)
        .bind(&outstanding)
        .fetch_one(&mut *tx)
        .await?;

        let step = if remaining == 0 {
            let transition =
                TransitionRequest::new(prescription.visit_id, PatientStatus::AtBilling, pharmacist_id)
                    .from_status(PatientStatus::AtPharmacy);
            let step = self.pipeline.apply_in_tx(&mut tx, &transition).await?;
            if let Step::Rejected(visit) = &step {
                debug!(visit_id = %visit.id, status = %visit.status, "Visit not waiting at pharmacy");
            }
            Some(step)
        } else {
            None
        };

        tx.commit().await?;
        if let Some(step) = step {
            self.pipeline.settle(step).await;
        }

        let notice = NotifyStaff {
            kind: NotificationType::MedicationReady,
            title: "Medication dispensed".to_string(),
            message: format!("Prescription {} has been {}", prescription.id, prescription.status),
            audience: Audience::Roles(vec![UserRole::Billing]),
            data: Some(json!({
                "prescription_id": prescription.id,
                "visit_id": prescription.visit_id,
                "patient_id": prescription.patient_id,
            })),
        };
        if let Err(e) = self.notifications.notify_staff(notice).await {
            warn!(prescription_id = %prescription.id, error = %e, "Failed to notify billing");
        }

        info!(
            prescription_id = %prescription.id,
            visit_id = %prescription.visit_id,
            status = %prescription.status,
            "Prescription dispensed"
        );
        Ok(prescription)
    }
}
