/// Service layer for the hospital flow
///
/// - `pipeline`: visit status transitions and their side effects
/// - `queue_service` / `queue_cache`: department queues and their Redis mirror
/// - `notification_service`: persisted staff notifications
/// - one service per desk: patients, consultation, lab, pharmacy, billing
pub mod billing_service;
pub mod consultation_service;
pub mod lab_service;
pub mod notification_service;
pub mod patient_service;
pub mod pharmacy_service;
pub mod pipeline;
pub mod queue_cache;
pub mod queue_service;
pub mod user_directory;

pub use billing_service::BillingService;
pub use consultation_service::ConsultationService;
pub use lab_service::LabService;
pub use notification_service::{Audience, NotificationPage, NotificationService, NotifyStaff};
pub use patient_service::PatientService;
pub use pharmacy_service::PharmacyService;
pub use pipeline::{Step, TransitionRequest, VisitPipeline};
pub use queue_cache::{CachedQueue, QueueCache, RedisQueueCache};
pub use queue_service::{QueueChange, QueueService};
pub use user_directory::UserDirectory;
