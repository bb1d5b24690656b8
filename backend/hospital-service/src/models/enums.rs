use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Generates `as_str`, `Display` and `FromStr` for a snake_case enum that is
/// stored as VARCHAR.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Doctor,
    Nurse,
    Receptionist,
    Pharmacist,
    LabTechnician,
    Radiologist,
    Billing,
}

string_enum!(UserRole {
    Admin => "admin",
    Doctor => "doctor",
    Nurse => "nurse",
    Receptionist => "receptionist",
    Pharmacist => "pharmacist",
    LabTechnician => "lab_technician",
    Radiologist => "radiologist",
    Billing => "billing",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

string_enum!(Gender {
    Male => "male",
    Female => "female",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum QueuePriority {
    Emergency,
    Urgent,
    #[default]
    Normal,
}

string_enum!(QueuePriority {
    Emergency => "emergency",
    Urgent => "urgent",
    Normal => "normal",
});

impl QueuePriority {
    /// Lower ranks are served first.
    pub fn rank(&self) -> u8 {
        match self {
            QueuePriority::Emergency => 1,
            QueuePriority::Urgent => 2,
            QueuePriority::Normal => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

string_enum!(QueueEntryStatus {
    Waiting => "waiting",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl QueueEntryStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, QueueEntryStatus::Waiting | QueueEntryStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TestStatus {
    Ordered,
    SampleCollected,
    InProgress,
    Completed,
    Reported,
    Critical,
}

string_enum!(TestStatus {
    Ordered => "ordered",
    SampleCollected => "sample_collected",
    InProgress => "in_progress",
    Completed => "completed",
    Reported => "reported",
    Critical => "critical",
});

impl TestStatus {
    /// Statuses after which the result is available to the doctor.
    pub const FINISHED: &'static [TestStatus] = &[
        TestStatus::Completed,
        TestStatus::Reported,
        TestStatus::Critical,
    ];

    pub fn is_finished(&self) -> bool {
        Self::FINISHED.contains(self)
    }

    /// The lab has started working on the sample.
    pub fn is_started(&self) -> bool {
        matches!(self, TestStatus::SampleCollected | TestStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Pending,
    Dispensed,
    PartiallyDispensed,
    Completed,
}

string_enum!(PrescriptionStatus {
    Pending => "pending",
    Dispensed => "dispensed",
    PartiallyDispensed => "partially_dispensed",
    Completed => "completed",
});

impl PrescriptionStatus {
    /// Prescriptions the pharmacy still has to hand out.
    pub const OUTSTANDING: &'static [PrescriptionStatus] = &[
        PrescriptionStatus::Pending,
        PrescriptionStatus::PartiallyDispensed,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    PatientRegistered,
    PatientWaiting,
    ConsultationStarted,
    PrescriptionIssued,
    TestOrdered,
    TestResultReady,
    CriticalResult,
    MedicationReady,
    BillingPending,
}

string_enum!(NotificationType {
    PatientRegistered => "patient_registered",
    PatientWaiting => "patient_waiting",
    ConsultationStarted => "consultation_started",
    PrescriptionIssued => "prescription_issued",
    TestOrdered => "test_ordered",
    TestResultReady => "test_result_ready",
    CriticalResult => "critical_result",
    MedicationReady => "medication_ready",
    BillingPending => "billing_pending",
});
