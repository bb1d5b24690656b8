//! Billing desk hand-off. Charges are settled elsewhere; the desk only sees
//! its queue and closes visits it has cleared.

use std::sync::Arc;
use uuid::Uuid;

use super::pipeline::{TransitionRequest, VisitPipeline};
use super::queue_service::QueueService;
use crate::error::Result;
use crate::models::{PatientStatus, QueueItem, Visit, BILLING};

pub struct BillingService {
    pipeline: Arc<VisitPipeline>,
    queue: Arc<QueueService>,
}

impl BillingService {
    pub fn new(pipeline: Arc<VisitPipeline>, queue: Arc<QueueService>) -> Self {
        Self { pipeline, queue }
    }

    pub async fn queue(&self) -> Result<Vec<QueueItem>> {
        self.queue.live_queue(BILLING).await
    }

    pub async fn clear(&self, visit_id: Uuid, actor: Uuid) -> Result<Visit> {
        self.pipeline
            .transition(
                TransitionRequest::new(visit_id, PatientStatus::Completed, actor)
                    .from_status(PatientStatus::AtBilling),
            )
            .await
    }
}
