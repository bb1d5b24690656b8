use serde_json::json;
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::notification_service::{Audience, NotificationService, NotifyStaff};
use super::pipeline::{Step, TransitionRequest, VisitPipeline};
use crate::error::{AppError, Result};
use crate::models::{
    CompleteConsultationQuery, DoctorVisit, IssuePrescriptionRequest, LabTest, MyPatientsQuery,
    NotificationType, OrderLabTestsRequest, PatientStatus, Prescription, PrescriptionStatus,
    UpdateConsultationRequest, UserRole, Visit,
};

/// Where a finished consultation sends the visit next.
pub fn completion_target(discharge: bool, outstanding_prescriptions: i64) -> PatientStatus {
    if discharge {
        PatientStatus::Completed
    } else if outstanding_prescriptions > 0 {
        PatientStatus::AtPharmacy
    } else {
        PatientStatus::AtBilling
    }
}

async fn lock_visit(conn: &mut PgConnection, visit_id: Uuid) -> Result<Visit> {
    sqlx::query_as::<_, Visit>("SELECT * FROM visits WHERE id = $1 FOR UPDATE")
        .bind(visit_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("visit not found".to_string()))
}

fn require_consultation(visit: &Visit, action: &str) -> Result<()> {
    if visit.status != PatientStatus::InConsultation {
        return Err(AppError::Conflict(format!(
            "cannot {} while visit {} is {}",
            action, visit.visit_number, visit.status
        )));
    }
    Ok(())
}

pub struct ConsultationService {
    db: PgPool,
    pipeline: Arc<VisitPipeline>,
    notifications: NotificationService,
}

impl ConsultationService {
    pub fn new(db: PgPool, pipeline: Arc<VisitPipeline>, notifications: NotificationService) -> Self {
        Self {
            db,
            pipeline,
            notifications,
        }
    }

    /// Visits assigned to a doctor, newest first.
    pub async fn my_patients(&self, doctor_id: Uuid, query: &MyPatientsQuery) -> Result<Vec<DoctorVisit>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            SELECT v.*,
                   p.first_name AS patient_first_name,
                   p.last_name AS patient_last_name,
                   p.registration_number,
                   p.date_of_birth,
                   p.gender,
                   p.phone,
                   p.allergies
            FROM visits v
            JOIN patients p ON p.id = v.patient_id
            WHERE v.doctor_id = "#,
        );
        builder.push_bind(doctor_id);
        if let Some(status) = query.status {
            builder.push(" AND v.status = ").push_bind(status);
        }
        if let Some(date) = query.date {
            builder.push(" AND v.check_in_time::date = ").push_bind(date);
        }
        builder.push(" ORDER BY v.check_in_time DESC");

        Ok(builder.build_query_as::<DoctorVisit>().fetch_all(&self.db).await?)
    }

    pub async fn start(&self, visit_id: Uuid, doctor_id: Uuid) -> Result<Visit> {
        self.pipeline
            .transition(
                TransitionRequest::new(visit_id, PatientStatus::InConsultation, doctor_id)
                    .with_doctor(doctor_id),
            )
            .await
    }

    /// Record clinical notes; only the supplied fields change.
    pub async fn update(&self, visit_id: Uuid, request: UpdateConsultationRequest) -> Result<Visit> {
        let visit = sqlx::query_as::<_, Visit>(
            r#"
            UPDATE visits SET
                diagnosis = COALESCE($2, diagnosis),
                notes = COALESCE($3, notes),
                vitals = COALESCE($4, vitals),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(visit_id)
        .bind(&request.diagnosis)
        .bind(&request.notes)
        .bind(request.vitals.as_ref().map(Json))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("visit not found".to_string()))?;

        if visit.status.is_terminal() {
            warn!(visit_id = %visit.id, status = %visit.status, "Consultation notes changed on a closed visit");
        }
        Ok(visit)
    }

    pub async fn issue_prescription(
        &self,
        visit_id: Uuid,
        doctor_id: Uuid,
        request: IssuePrescriptionRequest,
    ) -> Result<Prescription> {
        request.validate()?;

        let mut tx = self.db.begin().await?;
        let visit = lock_visit(&mut tx, visit_id).await?;
        require_consultation(&visit, "prescribe")?;

        let prescription = sqlx::query_as::<_, Prescription>(
            r#"
            INSERT INTO prescriptions (visit_id, patient_id, doctor_id, medications, notes, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
            "#,
        )
        .bind(visit.id)
        .bind(visit.patient_id)
        .bind(doctor_id)
        .bind(Json(&request.medications))
        .bind(&request.notes)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let notice = NotifyStaff {
            kind: NotificationType::PrescriptionIssued,
            title: "New prescription".to_string(),
            message: format!(
                "{} medication(s) prescribed for visit {}",
                request.medications.len(),
                visit.visit_number
            ),
            audience: Audience::Roles(vec![UserRole::Pharmacist]),
            data: Some(json!({
                "prescription_id": prescription.id,
                "visit_id": visit.id,
                "patient_id": visit.patient_id,
            })),
        };
        if let Err(e) = self.notifications.notify_staff(notice).await {
            warn!(prescription_id = %prescription.id, error = %e, "Failed to notify pharmacy");
        }

        info!(prescription_id = %prescription.id, visit_id = %visit.id, "Prescription issued");
        Ok(prescription)
    }

    /// Insert the ordered tests and send the visit to the laboratory.
    pub async fn order_lab_tests(
        &self,
        visit_id: Uuid,
        doctor_id: Uuid,
        request: OrderLabTestsRequest,
    ) -> Result<Vec<LabTest>> {
        request.validate()?;

        let mut conn = self.pipeline.acquire().await?;
        let mut tx = conn.begin().await?;

        let transition = TransitionRequest::new(visit_id, PatientStatus::AwaitingTests, doctor_id)
            .from_status(PatientStatus::InConsultation);
        let step = self.pipeline.apply_in_tx(&mut tx, &transition).await?;
        if !matches!(step, Step::Applied(_)) {
            return Err(AppError::Conflict(format!(
                "cannot order tests while visit {} is {}",
                step.visit().visit_number,
                step.visit().status
            )));
        }
        let (patient_id, visit_number) = (step.visit().patient_id, step.visit().visit_number.clone());

        let names: Vec<&str> = request.tests.iter().map(|t| t.test_name.trim()).collect();
        let categories: Vec<&str> = request.tests.iter().map(|t| t.test_category.trim()).collect();
        let tests = sqlx::query_as::<_, LabTest>(
            r#"
            INSERT INTO lab_tests (visit_id, patient_id, ordered_by, test_name, test_category, status)
            SELECT $1, $2, $3, t.name, t.category, 'ordered'
            FROM UNNEST($4::text[], $5::text[]) AS t(name, category)
            RETURNING *
            "#,
        )
        .bind(visit_id)
        .bind(patient_id)
        .bind(doctor_id)
        .bind(&names)
        .bind(&categories)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        self.pipeline.settle(step).await;

        let notice = NotifyStaff {
            kind: NotificationType::TestOrdered,
            title: "New lab tests ordered".to_string(),
            message: format!("{} lab test(s) ordered for visit {}", tests.len(), visit_number),
            audience: Audience::Roles(vec![UserRole::LabTechnician]),
            data: Some(json!({
                "visit_id": visit_id,
                "patient_id": patient_id,
                "test_ids": tests.iter().map(|t| t.id).collect::<Vec<_>>(),
            })),
        };
        if let Err(e) = self.notifications.notify_staff(notice).await {
            warn!(visit_id = %visit_id, error = %e, "Failed to notify laboratory");
        }

        info!(visit_id = %visit_id, count = tests.len(), "Lab tests ordered");
        Ok(tests)
    }

    /// Close the consultation and route the visit onward.
    pub async fn complete(
        &self,
        visit_id: Uuid,
        doctor_id: Uuid,
        query: &CompleteConsultationQuery,
    ) -> Result<Visit> {
        let outstanding: Vec<&str> = PrescriptionStatus::OUTSTANDING.iter().map(|s| s.as_str()).collect();
        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM prescriptions WHERE visit_id = $1 AND status = ANY($2)",
        )
        .bind(visit_id)
        .bind(&outstanding)
        .fetch_one(&self.db)
        .await?;

        let target = completion_target(query.discharge, pending);
        self.pipeline
            .transition(
                TransitionRequest::new(visit_id, target, doctor_id)
                    .from_status(PatientStatus::InConsultation),
            )
            .await
    }
}
