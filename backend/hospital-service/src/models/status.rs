//! Visit status machine.
//!
//! A visit moves reception → doctor → lab → pharmacy → billing. Each status
//! names the states it may be entered from and what happens to the visit's
//! queue entry when it is entered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::department::{BILLING, LABORATORY, PHARMACY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PatientStatus {
    Registered,
    Waiting,
    InConsultation,
    AwaitingTests,
    TestsInProgress,
    AwaitingResults,
    AtPharmacy,
    AtBilling,
    Completed,
    Admitted,
}

/// Where the visit's queue entry goes when a status is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMove {
    /// Leave the current queue and join the visit's clinical department.
    JoinClinical,
    /// Leave the current queue and join a fixed service department.
    Join(&'static str),
    /// The current entry is being served.
    Start,
    /// Leave the queue for good.
    Close,
}

impl PatientStatus {
    pub const OPEN: &'static [PatientStatus] = &[
        PatientStatus::Registered,
        PatientStatus::Waiting,
        PatientStatus::InConsultation,
        PatientStatus::AwaitingTests,
        PatientStatus::TestsInProgress,
        PatientStatus::AwaitingResults,
        PatientStatus::AtPharmacy,
        PatientStatus::AtBilling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatientStatus::Registered => "registered",
            PatientStatus::Waiting => "waiting",
            PatientStatus::InConsultation => "in_consultation",
            PatientStatus::AwaitingTests => "awaiting_tests",
            PatientStatus::TestsInProgress => "tests_in_progress",
            PatientStatus::AwaitingResults => "awaiting_results",
            PatientStatus::AtPharmacy => "at_pharmacy",
            PatientStatus::AtBilling => "at_billing",
            PatientStatus::Completed => "completed",
            PatientStatus::Admitted => "admitted",
        }
    }

    /// States this status may be entered from. Empty for `Registered`, which
    /// is only ever the initial state.
    pub fn predecessors(&self) -> &'static [PatientStatus] {
        use PatientStatus::*;
        match self {
            Registered => &[],
            Waiting => &[Registered],
            InConsultation => &[Waiting, AwaitingResults],
            AwaitingTests => &[InConsultation],
            TestsInProgress => &[AwaitingTests],
            AwaitingResults => &[AwaitingTests, TestsInProgress],
            AtPharmacy => &[InConsultation],
            AtBilling => &[InConsultation, AtPharmacy],
            Completed => &[InConsultation, AtBilling],
            Admitted => &[InConsultation],
        }
    }

    pub fn can_transition_to(&self, next: PatientStatus) -> bool {
        next.predecessors().contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PatientStatus::Completed | PatientStatus::Admitted)
    }

    pub fn queue_move(&self) -> Option<QueueMove> {
        use PatientStatus::*;
        match self {
            Registered => None,
            Waiting | AwaitingResults => Some(QueueMove::JoinClinical),
            InConsultation | TestsInProgress => Some(QueueMove::Start),
            AwaitingTests => Some(QueueMove::Join(LABORATORY)),
            AtPharmacy => Some(QueueMove::Join(PHARMACY)),
            AtBilling => Some(QueueMove::Join(BILLING)),
            Completed | Admitted => Some(QueueMove::Close),
        }
    }
}

impl fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatientStatus::OPEN
            .iter()
            .chain([PatientStatus::Completed, PatientStatus::Admitted].iter())
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown patient status: {}", s))
    }
}
