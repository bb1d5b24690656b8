use chrono::NaiveDate;
use serde::Deserialize;

use super::enums::{Gender, PrescriptionStatus, QueuePriority, TestStatus};
use super::records::{EmergencyContact, InsuranceInfo, Medication, Vitals};
use super::status::PatientStatus;
use crate::error::{AppError, Result};

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub email: Option<String>,
    pub phone: String,
    pub address: String,
    pub blood_group: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub emergency_contact: EmergencyContact,
    pub insurance_info: Option<InsuranceInfo>,
    pub medical_history: Option<String>,
}

impl RegisterPatientRequest {
    pub fn validate(&self) -> Result<()> {
        require_text("first_name", &self.first_name)?;
        require_text("last_name", &self.last_name)?;
        require_text("phone", &self.phone)?;
        require_text("address", &self.address)?;
        require_text("emergency_contact.name", &self.emergency_contact.name)?;
        require_text("emergency_contact.phone", &self.emergency_contact.phone)
    }
}

/// Only the listed fields may be changed; anything else in the body is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub blood_group: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub emergency_contact: Option<EmergencyContact>,
    pub insurance_info: Option<InsuranceInfo>,
    pub medical_history: Option<String>,
}

impl UpdatePatientRequest {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.address.is_none()
            && self.blood_group.is_none()
            && self.allergies.is_none()
            && self.emergency_contact.is_none()
            && self.insurance_info.is_none()
            && self.medical_history.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckInRequest {
    pub chief_complaint: String,
    pub vitals: Option<Vitals>,
    pub department: Option<String>,
    pub priority: Option<QueuePriority>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientListQuery {
    pub search: Option<String>,
    pub status: Option<PatientStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MyPatientsQuery {
    pub status: Option<PatientStatus>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConsultationRequest {
    pub diagnosis: Option<String>,
    pub notes: Option<String>,
    pub vitals: Option<Vitals>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePrescriptionRequest {
    pub medications: Vec<Medication>,
    pub notes: Option<String>,
}

impl IssuePrescriptionRequest {
    pub fn validate(&self) -> Result<()> {
        if self.medications.is_empty() {
            return Err(AppError::BadRequest(
                "at least one medication is required".to_string(),
            ));
        }
        for medication in &self.medications {
            require_text("medication_name", &medication.medication_name)?;
            if medication.quantity <= 0 {
                return Err(AppError::BadRequest(format!(
                    "quantity for {} must be positive",
                    medication.medication_name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabTestOrder {
    pub test_name: String,
    pub test_category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLabTestsRequest {
    pub tests: Vec<LabTestOrder>,
}

impl OrderLabTestsRequest {
    pub fn validate(&self) -> Result<()> {
        if self.tests.is_empty() {
            return Err(AppError::BadRequest("at least one test is required".to_string()));
        }
        for test in &self.tests {
            require_text("test_name", &test.test_name)?;
            require_text("test_category", &test.test_category)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteConsultationQuery {
    #[serde(default)]
    pub discharge: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateLabTestRequest {
    pub status: TestStatus,
    pub results: Option<serde_json::Value>,
    pub normal_range: Option<String>,
    pub is_critical: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabQueueQuery {
    pub status: Option<TestStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrescriptionQueueQuery {
    pub status: Option<PrescriptionStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispenseRequest {
    pub status: Option<PrescriptionStatus>,
    pub notes: Option<String>,
}

impl DispenseRequest {
    /// Target status; `pending` is not a dispensing outcome.
    pub fn outcome(&self) -> Result<PrescriptionStatus> {
        match self.status.unwrap_or(PrescriptionStatus::Dispensed) {
            PrescriptionStatus::Pending => Err(AppError::BadRequest(
                "dispense status must be dispensed, partially_dispensed or completed".to_string(),
            )),
            status => Ok(status),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
