//! Cached payload variants.

use std::collections::HashSet;

use crate::domain::entities::{ApplicationRecord, DashboardSummary, HospitalRecord, JobRecord};
use crate::domain::pagination::{PagedList, PaginationError};
use crate::domain::types::{ApplicationId, JobId};

use super::keys::ResourceRef;

/// Data stored under one query key.
///
/// Payloads are shared through `Arc` once stored; producing a changed
/// payload always means building a new value and writing it back.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    Application(ApplicationRecord),
    Job(JobRecord),
    Hospital(HospitalRecord),
    Dashboard(DashboardSummary),
    Applications(PagedList<ApplicationRecord>),
    Jobs(PagedList<JobRecord>),
}

impl CachePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            CachePayload::Application(_) => "application",
            CachePayload::Job(_) => "job",
            CachePayload::Hospital(_) => "hospital",
            CachePayload::Dashboard(_) => "dashboard",
            CachePayload::Applications(_) => "application list",
            CachePayload::Jobs(_) => "job list",
        }
    }

    /// Every resource whose record appears in this payload.
    pub fn resource_refs(&self) -> HashSet<ResourceRef> {
        match self {
            CachePayload::Application(record) => {
                HashSet::from([ResourceRef::Application(record.id)])
            }
            CachePayload::Job(record) => HashSet::from([ResourceRef::Job(record.id)]),
            CachePayload::Hospital(record) => HashSet::from([ResourceRef::Hospital(record.id)]),
            CachePayload::Dashboard(_) => HashSet::new(),
            CachePayload::Applications(list) => list
                .items()
                .map(|record| ResourceRef::Application(record.id))
                .collect(),
            CachePayload::Jobs(list) => list.items().map(|record| ResourceRef::Job(record.id)).collect(),
        }
    }

    pub fn find_application(&self, id: ApplicationId) -> Option<&ApplicationRecord> {
        match self {
            CachePayload::Application(record) if record.id == id => Some(record),
            CachePayload::Applications(list) => list.items().find(|record| record.id == id),
            _ => None,
        }
    }

    pub fn find_job(&self, id: JobId) -> Option<&JobRecord> {
        match self {
            CachePayload::Job(record) if record.id == id => Some(record),
            CachePayload::Jobs(list) => list.items().find(|record| record.id == id),
            _ => None,
        }
    }

    /// Resources one hop away from `target` in the relationship graph,
    /// as far as this payload can tell.
    ///
    /// Application → Job → Hospital.
    pub fn related_refs(&self, target: ResourceRef) -> HashSet<ResourceRef> {
        match target {
            ResourceRef::Application(id) => self
                .find_application(id)
                .map(|record| HashSet::from([ResourceRef::Job(record.job_id)]))
                .unwrap_or_default(),
            ResourceRef::Job(id) => self
                .find_job(id)
                .map(|record| HashSet::from([ResourceRef::Hospital(record.hospital_id)]))
                .unwrap_or_default(),
            ResourceRef::Hospital(_) => HashSet::new(),
        }
    }

    /// Append the pages of a single-page list payload of the same kind.
    pub fn append_pages(&self, next: CachePayload) -> Result<CachePayload, AppendError> {
        match (self, next) {
            (CachePayload::Applications(list), CachePayload::Applications(more)) => {
                Ok(CachePayload::Applications(list.extend(more)?))
            }
            (CachePayload::Jobs(list), CachePayload::Jobs(more)) => {
                Ok(CachePayload::Jobs(list.extend(more)?))
            }
            (_, other) => Err(AppendError::Mismatch {
                received: other.kind(),
            }),
        }
    }

    /// Page number the next forward fetch should request, for list payloads.
    pub fn next_page_number(&self) -> Option<u32> {
        match self {
            CachePayload::Applications(list) => list.next_page_number(),
            CachePayload::Jobs(list) => list.next_page_number(),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum AppendError {
    Mismatch { received: &'static str },
    Pagination(PaginationError),
}

impl From<PaginationError> for AppendError {
    fn from(error: PaginationError) -> Self {
        AppendError::Pagination(error)
    }
}
