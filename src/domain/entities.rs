//! Records mirrored from the career platform API.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::types::{ApplicationId, ApplicationStatus, HospitalId, JobId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub status: ApplicationStatus,
    pub applied_at: OffsetDateTime,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub hospital_id: HospitalId,
    pub title: String,
    /// Drives the "already applied" indicator on job listings.
    pub applied: bool,
    pub bookmarked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalRecord {
    pub id: HospitalId,
    pub name: String,
}

/// Counters shown on the dashboard, derived server-side from applications and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_applications: u64,
    pub pending: u64,
    pub withdrawn: u64,
    pub bookmarked_jobs: u64,
}
