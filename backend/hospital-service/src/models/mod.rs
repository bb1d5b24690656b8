//! Domain types shared by the services, handlers and realtime gateway.

pub mod department;
pub mod enums;
pub mod records;
pub mod requests;
pub mod status;

pub use department::{audience_roles, normalize_department, BILLING, DEFAULT_CLINICAL, LABORATORY, PHARMACY};
pub use enums::{
    Gender, NotificationType, PrescriptionStatus, QueueEntryStatus, QueuePriority, TestStatus,
    UserRole,
};
pub use records::*;
pub use requests::*;
pub use status::{PatientStatus, QueueMove};
