use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::realtime::ChannelHub;
use crate::services::{
    BillingService, ConsultationService, LabService, NotificationService, PatientService,
    PharmacyService, QueueCache, QueueService, UserDirectory, VisitPipeline,
};

/// Shared handles passed to every handler through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub patients: Arc<PatientService>,
    pub consultations: Arc<ConsultationService>,
    pub lab: Arc<LabService>,
    pub pharmacy: Arc<PharmacyService>,
    pub billing: Arc<BillingService>,
    pub queue: Arc<QueueService>,
    pub notifications: NotificationService,
    pub users: UserDirectory,
    pub hub: ChannelHub,
}

impl AppState {
    pub fn build(db: PgPool, cache: Arc<dyn QueueCache>, queue_config: &QueueConfig) -> Self {
        let hub = ChannelHub::new();
        let notifications = NotificationService::new(db.clone(), hub.clone());
        let queue = Arc::new(QueueService::new(db.clone(), cache, hub.clone(), queue_config));
        let pipeline = Arc::new(VisitPipeline::new(
            db.clone(),
            queue.clone(),
            notifications.clone(),
            hub.clone(),
        ));

        Self {
            patients: Arc::new(PatientService::new(
                db.clone(),
                pipeline.clone(),
                queue.clone(),
                notifications.clone(),
            )),
            consultations: Arc::new(ConsultationService::new(
                db.clone(),
                pipeline.clone(),
                notifications.clone(),
            )),
            lab: Arc::new(LabService::new(db.clone(), pipeline.clone(), notifications.clone())),
            pharmacy: Arc::new(PharmacyService::new(
                db.clone(),
                pipeline.clone(),
                notifications.clone(),
            )),
            billing: Arc::new(BillingService::new(pipeline, queue.clone())),
            queue,
            notifications,
            users: UserDirectory::new(db),
            hub,
        }
    }

    /// Account check policy for token holders; see [`UserDirectory::ensure_active`].
    pub fn account_checks(mut self, ttl: Option<Duration>) -> Self {
        self.users = self.users.account_checks(ttl);
        self
    }
}
