use chrono::Datelike;
use serde_json::json;
use sqlx::types::Json;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::notification_service::{Audience, NotificationService, NotifyStaff};
use super::pipeline::{TransitionRequest, VisitPipeline};
use super::queue_service::QueueService;
use crate::db::{next_sequence, patient_scope, registration_number, visit_number, visit_scope};
use crate::error::{AppError, Result};
use crate::models::department::is_service_department;
use crate::models::{
    normalize_department, CheckInRequest, LabTestView, NotificationType, Pagination, Patient,
    PatientHistory, PatientListQuery, PatientStatus, PrescriptionView, RegisterPatientRequest,
    UpdatePatientRequest, UserRole, Visit, VisitWithDoctor, DEFAULT_CLINICAL,
};

/// Joins shared by every lab test read model.
pub(crate) const LAB_TEST_VIEW: &str = r#"
    SELECT t.*,
           p.first_name AS patient_first_name,
           p.last_name AS patient_last_name,
           p.registration_number,
           d.first_name AS doctor_first_name,
           d.last_name AS doctor_last_name
    FROM lab_tests t
    JOIN patients p ON p.id = t.patient_id
    JOIN users d ON d.id = t.ordered_by
"#;

/// Joins shared by every prescription read model.
pub(crate) const PRESCRIPTION_VIEW: &str = r#"
    SELECT rx.*,
           p.first_name AS patient_first_name,
           p.last_name AS patient_last_name,
           p.registration_number,
           p.allergies,
           d.first_name AS doctor_first_name,
           d.last_name AS doctor_last_name
    FROM prescriptions rx
    JOIN patients p ON p.id = rx.patient_id
    JOIN users d ON d.id = rx.doctor_id
"#;

fn push_list_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &PatientListQuery) {
    builder.push(" WHERE TRUE");
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        builder
            .push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR (first_name || ' ' || last_name) ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR registration_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = query.status {
        builder.push(" AND current_status = ").push_bind(status);
    }
}

pub struct PatientService {
    db: PgPool,
    pipeline: Arc<VisitPipeline>,
    queue: Arc<QueueService>,
    notifications: NotificationService,
}

impl PatientService {
    pub fn new(
        db: PgPool,
        pipeline: Arc<VisitPipeline>,
        queue: Arc<QueueService>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db,
            pipeline,
            queue,
            notifications,
        }
    }

    pub async fn register(&self, request: RegisterPatientRequest, actor: Uuid) -> Result<Patient> {
        request.validate()?;

        let year = self.queue.service_date().year();
        let mut tx = self.db.begin().await?;
        let number = next_sequence(&mut tx, &patient_scope(year)).await?;

        let patient = sqlx::query_as::<_, Patient>(
            r#"
            INSERT INTO patients (
                registration_number, first_name, last_name, date_of_birth, gender,
                email, phone, address, blood_group, allergies, emergency_contact,
                insurance_info, medical_history, current_status, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'registered', $14)
            RETURNING *
            "#,
        )
        .bind(registration_number(year, number))
        .bind(request.first_name.trim())
        .bind(request.last_name.trim())
        .bind(request.date_of_birth)
        .bind(request.gender)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(&request.address)
        .bind(&request.blood_group)
        .bind(Json(&request.allergies))
        .bind(Json(&request.emergency_contact))
        .bind(request.insurance_info.as_ref().map(Json))
        .bind(&request.medical_history)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            patient_id = %patient.id,
            registration_number = %patient.registration_number,
            "Patient registered"
        );
        Ok(patient)
    }

    /// Open a visit, move the patient to `waiting` and queue them.
    pub async fn check_in(&self, patient_id: Uuid, request: CheckInRequest, actor: Uuid) -> Result<Visit> {
        if request.chief_complaint.trim().is_empty() {
            return Err(AppError::BadRequest("chief_complaint is required".to_string()));
        }
        let department = match request.department.as_deref() {
            Some(raw) => normalize_department(raw)?,
            None => DEFAULT_CLINICAL.to_string(),
        };
        if is_service_department(&department) {
            return Err(AppError::BadRequest(format!(
                "{} cannot be chosen at check-in",
                department
            )));
        }
        let priority = request.priority.unwrap_or_default();
        let date = self.queue.service_date();

        let mut conn = self.pipeline.acquire().await?;
        let mut tx = conn.begin().await?;

        let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1 FOR UPDATE")
            .bind(patient_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("patient not found".to_string()))?;

        let open: Option<String> = sqlx::query_scalar(
            "SELECT visit_number FROM visits WHERE patient_id = $1 AND status NOT IN ('completed', 'admitted')",
        )
        .bind(patient_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(open) = open {
            return Err(AppError::Conflict(format!(
                "patient already has an open visit ({})",
                open
            )));
        }

        let number = next_sequence(&mut tx, &visit_scope(date)).await?;
        let visit = sqlx::query_as::<_, Visit>(
            r#"
            INSERT INTO visits (
                patient_id, visit_number, department, priority, status,
                chief_complaint, vitals, created_by
            )
            VALUES ($1, $2, $3, $4, 'registered', $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(patient_id)
        .bind(visit_number(date, number))
        .bind(&department)
        .bind(priority)
        .bind(request.chief_complaint.trim())
        .bind(request.vitals.as_ref().map(Json))
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        let step = self
            .pipeline
            .apply_in_tx(&mut tx, &TransitionRequest::new(visit.id, PatientStatus::Waiting, actor))
            .await?
            .strict(PatientStatus::Waiting)?;
        tx.commit().await?;

        let visit = self.pipeline.settle(step).await;

        let notice = NotifyStaff {
            kind: NotificationType::PatientRegistered,
            title: "Patient checked in".to_string(),
            message: format!(
                "{} is waiting in {} ({})",
                patient.full_name(),
                visit.department,
                visit.priority
            ),
            audience: Audience::Roles(vec![UserRole::Doctor, UserRole::Nurse]),
            data: Some(json!({
                "patient_id": patient.id,
                "visit_id": visit.id,
                "department": visit.department,
                "priority": visit.priority,
            })),
        };
        if let Err(e) = self.notifications.notify_staff(notice).await {
            warn!(visit_id = %visit.id, error = %e, "Failed to notify clinical staff of check-in");
        }

        info!(
            visit_id = %visit.id,
            patient_id = %patient_id,
            department = %visit.department,
            "Patient checked in"
        );
        Ok(visit)
    }

    pub async fn list(&self, query: &PatientListQuery) -> Result<(Vec<Patient>, Pagination)> {
        let (page, limit) = Pagination::clamp(query.page, query.limit);

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM patients");
        push_list_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;
        let pagination = Pagination::new(page, limit, total);

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM patients");
        push_list_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());
        let patients = select.build_query_as::<Patient>().fetch_all(&self.db).await?;

        Ok((patients, pagination))
    }

    pub async fn get(&self, id: Uuid) -> Result<Patient> {
        sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("patient not found".to_string()))
    }

    /// Visits, prescriptions and lab tests of a patient, newest first.
    pub async fn history(&self, id: Uuid) -> Result<PatientHistory> {
        self.get(id).await?;

        let visits = sqlx::query_as::<_, VisitWithDoctor>(
            r#"
            SELECT v.*, d.first_name AS doctor_first_name, d.last_name AS doctor_last_name
            FROM visits v
            LEFT JOIN users d ON d.id = v.doctor_id
            WHERE v.patient_id = $1
            ORDER BY v.check_in_time DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        let prescriptions = sqlx::query_as::<_, PrescriptionView>(&format!(
            "{PRESCRIPTION_VIEW} WHERE rx.patient_id = $1 ORDER BY rx.issued_at DESC"
        ))
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        let lab_tests = sqlx::query_as::<_, LabTestView>(&format!(
            "{LAB_TEST_VIEW} WHERE t.patient_id = $1 ORDER BY t.ordered_at DESC"
        ))
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(PatientHistory {
            visits,
            prescriptions,
            lab_tests,
        })
    }

    /// Change whitelisted demographic fields; absent fields keep their value.
    pub async fn update(&self, id: Uuid, request: UpdatePatientRequest) -> Result<Patient> {
        if request.is_empty() {
            return Err(AppError::BadRequest("no updatable fields supplied".to_string()));
        }
        for (field, value) in [
            ("first_name", &request.first_name),
            ("last_name", &request.last_name),
            ("phone", &request.phone),
            ("address", &request.address),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(AppError::BadRequest(format!("{} must not be empty", field)));
            }
        }

        sqlx::query_as::<_, Patient>(
            r#"
            UPDATE patients SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                phone = COALESCE($5, phone),
                address = COALESCE($6, address),
                blood_group = COALESCE($7, blood_group),
                allergies = COALESCE($8, allergies),
                emergency_contact = COALESCE($9, emergency_contact),
                insurance_info = COALESCE($10, insurance_info),
                medical_history = COALESCE($11, medical_history),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(&request.address)
        .bind(&request.blood_group)
        .bind(request.allergies.as_ref().map(Json))
        .bind(request.emergency_contact.as_ref().map(Json))
        .bind(request.insurance_info.as_ref().map(Json))
        .bind(&request.medical_history)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("patient not found".to_string()))
    }
}
