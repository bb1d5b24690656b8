use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::enums::{
    Gender, NotificationType, PrescriptionStatus, QueueEntryStatus, QueuePriority, TestStatus,
    UserRole,
};
use super::status::PatientStatus;

/// Staff account, read-only from this service's point of view.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub department: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
    pub relationship: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsuranceInfo {
    pub provider: String,
    pub policy_number: String,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    pub temperature: Option<f64>,
    pub blood_pressure: Option<String>,
    pub heart_rate: Option<i32>,
    pub respiratory_rate: Option<i32>,
    pub oxygen_saturation: Option<f64>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    #[serde(default)]
    pub instructions: Option<String>,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Patient {
    pub id: Uuid,
    /// `PAT-YYYY-NNNN`
    pub registration_number: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    pub blood_group: Option<String>,
    pub allergies: Json<Vec<String>>,
    pub emergency_contact: Json<EmergencyContact>,
    pub insurance_info: Option<Json<InsuranceInfo>>,
    pub medical_history: Option<String>,
    pub current_status: PatientStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Visit {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    /// `VIS-YYYY-MM-DD-NNNN`
    pub visit_number: String,
    /// Clinical department chosen at check-in
    pub department: String,
    pub priority: QueuePriority,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub status: PatientStatus,
    pub chief_complaint: Option<String>,
    pub vitals: Option<Json<Vitals>>,
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A queue row joined with the patient's display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub queue_number: i64,
    pub department: String,
    pub priority: QueuePriority,
    pub status: QueueEntryStatus,
    pub queue_date: NaiveDate,
    pub joined_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub patient_name: String,
}

/// Live queue read model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(flatten)]
    pub entry: QueueEntry,
    /// 1-based place in the department's live queue
    pub position: u32,
    pub estimated_wait_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub visit_id: Uuid,
    pub department: String,
    pub status: QueueEntryStatus,
    /// Waiting entries ahead plus one; zero while the visit is being served
    pub position: u32,
    pub estimated_wait_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LabTest {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub ordered_by: Uuid,
    pub performed_by: Option<Uuid>,
    pub test_name: String,
    pub test_category: String,
    pub status: TestStatus,
    pub results: Option<serde_json::Value>,
    pub normal_range: Option<String>,
    pub is_critical: bool,
    pub notes: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub sample_collected_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LabTestView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub test: LabTest,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub registration_number: String,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prescription {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub medications: Json<Vec<Medication>>,
    pub status: PrescriptionStatus,
    pub notes: Option<String>,
    pub dispensed_by: Option<Uuid>,
    pub dispensed_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PrescriptionView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub prescription: Prescription,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub registration_number: String,
    pub allergies: Json<Vec<String>>,
    pub doctor_first_name: String,
    pub doctor_last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VisitWithDoctor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub visit: Visit,
    pub doctor_first_name: Option<String>,
    pub doctor_last_name: Option<String>,
}

/// A doctor's visit joined with the patient columns the worklist shows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DoctorVisit {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub visit: Visit,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub registration_number: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: String,
    pub allergies: Json<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub recipient_id: Uuid,
    pub recipient_role: UserRole,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientHistory {
    pub visits: Vec<VisitWithDoctor>,
    pub prescriptions: Vec<PrescriptionView>,
    pub lab_tests: Vec<LabTestView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Highest page whose offset still fits an `i64` at the largest limit.
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_LIMIT;

    /// Clamp raw query values: page in 1..=MAX_PAGE, limit in 1..=100 (default 20).
    pub fn clamp(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
        let page = page.unwrap_or(1).clamp(1, Self::MAX_PAGE);
        let limit = limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        (page, limit)
    }

    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            page,
            limit,
            total,
            pages,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}
