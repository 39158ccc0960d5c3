//! In-process career platform backend.
//!
//! Implements both network collaborator traits over seeded in-memory records
//! so the CLI and the integration tests can drive the cache end to end.
//! Failures are injected per call: each queued [`Injected`] fault is consumed
//! by the next mutation (or fetch, for the fetch queue).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use time::OffsetDateTime;
use time::macros::datetime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::remote::{MutationData, RemoteError, RemoteOperations, ResourceFetcher};
use crate::cache::{CachePayload, Mutation, ParamValue, QueryKey, Resource, Scope};
use crate::domain::entities::{ApplicationRecord, DashboardSummary, HospitalRecord, JobRecord};
use crate::domain::pagination::{Page, PagedList};
use crate::domain::types::{ApplicationId, ApplicationStatus, HospitalId, JobId};

const DEFAULT_PAGE_SIZE: usize = 20;

/// Fault served in place of the next response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injected {
    /// Connection dropped before a response arrived.
    Network,
    /// The server never answers.
    Hang,
    /// Precondition rejected with the given reason.
    Validation(String),
    /// The record changed on the server since the client last saw it.
    Conflict,
    /// Unexpected server-side failure.
    ServerError,
}

impl Injected {
    fn into_error(self) -> RemoteError {
        match self {
            Injected::Network => RemoteError::transport("connection reset by peer"),
            Injected::Hang => RemoteError::other("hang is served by waiting forever"),
            Injected::Validation(reason) => RemoteError::status(422, Some(reason)),
            Injected::Conflict => RemoteError::status(
                409,
                Some("The record was changed elsewhere.".to_string()),
            ),
            Injected::ServerError => RemoteError::status(500, None),
        }
    }
}

#[derive(Debug, Clone)]
struct ServerState {
    applications: BTreeMap<ApplicationId, ApplicationRecord>,
    jobs: BTreeMap<JobId, JobRecord>,
    hospitals: BTreeMap<HospitalId, HospitalRecord>,
}

impl ServerState {
    fn seeded() -> Self {
        let hospitals = [
            HospitalRecord {
                id: HospitalId(3),
                name: "St. Mary's General".to_string(),
            },
            HospitalRecord {
                id: HospitalId(4),
                name: "Riverside Clinic".to_string(),
            },
        ];
        let jobs = [
            job(6, 3, "Night shift RN", true, false),
            job(7, 3, "ICU nurse", true, false),
            job(8, 4, "Ward clerk", false, false),
            job(9, 4, "Pediatric nurse", false, true),
            job(10, 3, "Radiology technician", true, false),
        ];
        let applications = [
            ApplicationRecord {
                id: ApplicationId(40),
                job_id: JobId(10),
                status: ApplicationStatus::Rejected,
                applied_at: datetime!(2026-02-11 14:30 UTC),
                note: None,
            },
            ApplicationRecord {
                id: ApplicationId(41),
                job_id: JobId(6),
                status: ApplicationStatus::Reviewing,
                applied_at: datetime!(2026-02-20 08:15 UTC),
                note: Some("Available from April".to_string()),
            },
            ApplicationRecord {
                id: ApplicationId(42),
                job_id: JobId(7),
                status: ApplicationStatus::Pending,
                applied_at: datetime!(2026-03-01 09:00 UTC),
                note: None,
            },
        ];

        Self {
            applications: applications
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
            jobs: jobs.into_iter().map(|record| (record.id, record)).collect(),
            hospitals: hospitals
                .into_iter()
                .map(|record| (record.id, record))
                .collect(),
        }
    }

    fn dashboard(&self) -> DashboardSummary {
        let count = |status: ApplicationStatus| {
            self.applications
                .values()
                .filter(|record| record.status == status)
                .count() as u64
        };
        DashboardSummary {
            total_applications: self.applications.len() as u64,
            pending: count(ApplicationStatus::Pending),
            withdrawn: count(ApplicationStatus::Withdrawn),
            bookmarked_jobs: self.jobs.values().filter(|record| record.bookmarked).count() as u64,
        }
    }

    fn application_list(&self, key: &QueryKey) -> Vec<ApplicationRecord> {
        let status = match key.param("status") {
            Some(ParamValue::Str(status)) => Some(status.as_str()),
            _ => None,
        };
        // Newest first, as the applications screen lists them.
        self.applications
            .values()
            .rev()
            .filter(|record| status.is_none_or(|status| record.status.as_str() == status))
            .cloned()
            .collect()
    }

    fn job_list(&self, key: &QueryKey) -> Vec<JobRecord> {
        let hospital = match key.param("hospital_id") {
            Some(ParamValue::Int(id)) => Some(HospitalId(*id)),
            _ => None,
        };
        let bookmarked_only = matches!(key.param("bookmarked"), Some(ParamValue::Bool(true)));
        let keyword = match key.param("keyword") {
            Some(ParamValue::Str(keyword)) => Some(keyword.as_str()),
            _ => None,
        };
        self.jobs
            .values()
            .filter(|record| hospital.is_none_or(|id| record.hospital_id == id))
            .filter(|record| !bookmarked_only || record.bookmarked)
            .filter(|record| {
                keyword.is_none_or(|keyword| record.title.to_lowercase().contains(keyword))
            })
            .cloned()
            .collect()
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<MutationData, RemoteError> {
        match mutation {
            Mutation::WithdrawApplication { application_id } => {
                let record = self
                    .applications
                    .get_mut(application_id)
                    .ok_or_else(|| not_found("application", application_id.0))?;
                if !record.status.is_withdrawable() {
                    return Err(RemoteError::status(
                        422,
                        Some(format!("Application is already {}.", record.status)),
                    ));
                }
                record.status = ApplicationStatus::Withdrawn;
                Ok(json!({ "id": record.id, "status": record.status }))
            }
            Mutation::ApplyToJob { job_id } => {
                let job = self
                    .jobs
                    .get_mut(job_id)
                    .ok_or_else(|| not_found("job", job_id.0))?;
                if job.applied {
                    return Err(RemoteError::status(
                        422,
                        Some("You have already applied to this job.".to_string()),
                    ));
                }
                job.applied = true;
                let id = ApplicationId(
                    self.applications
                        .keys()
                        .next_back()
                        .map_or(1, |last| last.0 + 1),
                );
                let record = ApplicationRecord {
                    id,
                    job_id: *job_id,
                    status: ApplicationStatus::Pending,
                    applied_at: OffsetDateTime::now_utc(),
                    note: None,
                };
                self.applications.insert(id, record);
                Ok(json!({ "id": id, "job_id": job_id, "status": ApplicationStatus::Pending }))
            }
            Mutation::SetJobBookmark { job_id, bookmarked } => {
                let job = self
                    .jobs
                    .get_mut(job_id)
                    .ok_or_else(|| not_found("job", job_id.0))?;
                job.bookmarked = *bookmarked;
                Ok(json!({ "id": job.id, "bookmarked": job.bookmarked }))
            }
        }
    }
}

fn job(id: i64, hospital: i64, title: &str, applied: bool, bookmarked: bool) -> JobRecord {
    JobRecord {
        id: JobId(id),
        hospital_id: HospitalId(hospital),
        title: title.to_string(),
        applied,
        bookmarked,
    }
}

fn not_found(resource: &str, id: i64) -> RemoteError {
    RemoteError::status(404, Some(format!("No {resource} with id {id}.")))
}

fn paginate<T: Clone>(items: Vec<T>, page: u32, page_size: usize) -> Result<Page<T>, RemoteError> {
    let total = items.len() as u64;
    let start = (page.saturating_sub(1) as usize).saturating_mul(page_size);
    if page == 0 || (page > 1 && start >= items.len()) {
        return Err(RemoteError::status(
            404,
            Some(format!("page {page} is out of range")),
        ));
    }
    let end = (start + page_size).min(items.len());
    let has_next = end < items.len();
    Ok(Page::new(items[start..end].to_vec(), page, has_next, total))
}

/// Seeded in-memory server with per-call failure injection.
pub struct SimulatedBackend {
    state: Mutex<ServerState>,
    page_size: usize,
    fetch_latency: Option<Duration>,
    mutation_latency: Option<Duration>,
    mutation_faults: Mutex<VecDeque<Injected>>,
    fetch_faults: Mutex<VecDeque<Injected>>,
    fetches: DashMap<QueryKey, usize>,
    mutations: AtomicUsize,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::seeded()),
            page_size: DEFAULT_PAGE_SIZE,
            fetch_latency: None,
            mutation_latency: None,
            mutation_faults: Mutex::new(VecDeque::new()),
            fetch_faults: Mutex::new(VecDeque::new()),
            fetches: DashMap::new(),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Items per list page, at least one. A `page_size` key parameter wins.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every fetch response. The response reflects server state at
    /// the moment the request arrived, so writes landing meanwhile make it stale.
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = Some(latency);
        self
    }

    /// Delay every mutation response.
    pub fn with_mutation_latency(mut self, latency: Duration) -> Self {
        self.mutation_latency = Some(latency);
        self
    }

    /// Fail the next mutation.
    pub fn inject(&self, fault: Injected) {
        lock(&self.mutation_faults).push_back(fault);
    }

    /// Fail the next fetch.
    pub fn inject_fetch(&self, fault: Injected) {
        lock(&self.fetch_faults).push_back(fault);
    }

    /// Change a record behind the client's back, as another device would.
    pub fn update_application<F>(&self, id: ApplicationId, update: F) -> bool
    where
        F: FnOnce(&mut ApplicationRecord),
    {
        match lock(&self.state).applications.get_mut(&id) {
            Some(record) => {
                update(record);
                true
            }
            None => false,
        }
    }

    pub fn application(&self, id: ApplicationId) -> Option<ApplicationRecord> {
        lock(&self.state).applications.get(&id).cloned()
    }

    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        lock(&self.state).jobs.get(&id).cloned()
    }

    /// Number of full or page fetches served for `key`.
    pub fn fetch_count(&self, key: &QueryKey) -> usize {
        self.fetches.get(key).map_or(0, |count| *count)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.iter().map(|entry| *entry.value()).sum()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn page_size_for(&self, key: &QueryKey) -> usize {
        match key.param("page_size") {
            Some(ParamValue::Int(size)) if *size > 0 => *size as usize,
            _ => self.page_size,
        }
    }

    async fn serve_fault(fault: Option<Injected>) -> Result<(), RemoteError> {
        match fault {
            None => Ok(()),
            Some(Injected::Hang) => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Some(fault) => Err(fault.into_error()),
        }
    }

    async fn serve_fetch(&self, key: &QueryKey, page: u32) -> Result<CachePayload, RemoteError> {
        *self.fetches.entry(key.clone()).or_insert(0) += 1;
        let fault = lock(&self.fetch_faults).pop_front();
        Self::serve_fault(fault).await?;
        let payload = self.load(key, page)?;
        if let Some(latency) = self.fetch_latency {
            tokio::time::sleep(latency).await;
        }
        Ok(payload)
    }

    fn load(&self, key: &QueryKey, page: u32) -> Result<CachePayload, RemoteError> {
        let state = lock(&self.state);
        let page_size = self.page_size_for(key);
        let unknown = || RemoteError::status(404, Some(format!("no route for `{key}`")));

        match (key.resource(), key.scope()) {
            (Resource::Application, Scope::Detail) => {
                let id = key.id().ok_or_else(unknown)?;
                state
                    .applications
                    .get(&ApplicationId(id))
                    .cloned()
                    .map(CachePayload::Application)
                    .ok_or_else(|| not_found("application", id))
            }
            (Resource::Job, Scope::Detail) => {
                let id = key.id().ok_or_else(unknown)?;
                state
                    .jobs
                    .get(&JobId(id))
                    .cloned()
                    .map(CachePayload::Job)
                    .ok_or_else(|| not_found("job", id))
            }
            (Resource::Hospital, Scope::Detail) => {
                let id = key.id().ok_or_else(unknown)?;
                state
                    .hospitals
                    .get(&HospitalId(id))
                    .cloned()
                    .map(CachePayload::Hospital)
                    .ok_or_else(|| not_found("hospital", id))
            }
            (Resource::Application, Scope::List) => {
                let page = paginate(state.application_list(key), page, page_size)?;
                Ok(CachePayload::Applications(PagedList::first(page)))
            }
            (Resource::Job, Scope::List) => {
                let page = paginate(state.job_list(key), page, page_size)?;
                Ok(CachePayload::Jobs(PagedList::first(page)))
            }
            (Resource::Dashboard, Scope::Aggregate) => Ok(CachePayload::Dashboard(state.dashboard())),
            _ => Err(unknown()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovered poisoned simulated backend lock");
        poisoned.into_inner()
    })
}

#[async_trait]
impl ResourceFetcher for SimulatedBackend {
    async fn fetch(&self, key: &QueryKey) -> Result<CachePayload, RemoteError> {
        let payload = self.serve_fetch(key, 1).await?;
        debug!(key = %key, kind = payload.kind(), "Simulated fetch served");
        Ok(payload)
    }

    async fn fetch_page(&self, key: &QueryKey, page: u32) -> Result<CachePayload, RemoteError> {
        if !key.is_list() {
            return Err(RemoteError::status(
                400,
                Some(format!("`{key}` is not paginated")),
            ));
        }
        let payload = self.serve_fetch(key, page).await?;
        debug!(key = %key, page, "Simulated page fetch served");
        Ok(payload)
    }
}

#[async_trait]
impl RemoteOperations for SimulatedBackend {
    async fn perform(
        &self,
        mutation: &Mutation,
        correlation_id: Uuid,
    ) -> Result<MutationData, RemoteError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.mutation_latency {
            tokio::time::sleep(latency).await;
        }
        let fault = lock(&self.mutation_faults).pop_front();
        if let Some(fault) = fault.as_ref() {
            debug!(%correlation_id, mutation = %mutation, fault = ?fault, "Serving injected fault");
        }
        Self::serve_fault(fault).await?;

        let data = lock(&self.state).apply(mutation)?;
        debug!(%correlation_id, mutation = %mutation, "Simulated mutation applied");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::filters::{ApplicationFilter, JobFilter};

    #[tokio::test]
    async fn lists_paginate_and_filter() {
        let backend = SimulatedBackend::new().with_page_size(2);
        let key = QueryKey::application_list(&ApplicationFilter::default());

        let CachePayload::Applications(first) = backend.fetch(&key).await.expect("page 1") else {
            panic!("expected an application list");
        };
        let page = first.last_page().expect("page");
        assert_eq!((page.current_page, page.has_next, page.total), (1, true, 3));

        let CachePayload::Applications(second) =
            backend.fetch_page(&key, 2).await.expect("page 2")
        else {
            panic!("expected an application list");
        };
        assert_eq!(second.items().count(), 1);
        assert!(backend.fetch_page(&key, 3).await.is_err());
        assert_eq!(backend.fetch_count(&key), 3);

        let pending = QueryKey::application_list(&ApplicationFilter::with_status(
            ApplicationStatus::Pending,
        ));
        let CachePayload::Applications(list) = backend.fetch(&pending).await.expect("pending")
        else {
            panic!("expected an application list");
        };
        let ids: Vec<_> = list.items().map(|record| record.id).collect();
        assert_eq!(ids, vec![ApplicationId(42)]);
    }

    #[tokio::test]
    async fn bookmarked_job_filter() {
        let backend = SimulatedBackend::new();
        let key = QueryKey::job_list(&JobFilter {
            bookmarked_only: true,
            ..Default::default()
        });
        let CachePayload::Jobs(list) = backend.fetch(&key).await.expect("jobs") else {
            panic!("expected a job list");
        };
        let ids: Vec<_> = list.items().map(|record| record.id).collect();
        assert_eq!(ids, vec![JobId(9)]);
    }

    #[tokio::test]
    async fn withdraw_twice_is_a_validation_failure() {
        let backend = SimulatedBackend::new();
        let withdraw = Mutation::WithdrawApplication {
            application_id: ApplicationId(42),
        };

        backend
            .perform(&withdraw, Uuid::nil())
            .await
            .expect("first withdraw");
        let error = backend
            .perform(&withdraw, Uuid::nil())
            .await
            .expect_err("second withdraw");
        assert_eq!(error.server_reason(), Some("Application is already withdrawn."));
        assert_eq!(backend.mutation_count(), 2);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_once() {
        let backend = SimulatedBackend::new();
        backend.inject(Injected::Network);
        let bookmark = Mutation::SetJobBookmark {
            job_id: JobId(8),
            bookmarked: true,
        };

        assert!(matches!(
            backend.perform(&bookmark, Uuid::nil()).await,
            Err(RemoteError::Transport { .. })
        ));
        assert!(!backend.job(JobId(8)).expect("job").bookmarked);

        backend.perform(&bookmark, Uuid::nil()).await.expect("retry");
        assert!(backend.job(JobId(8)).expect("job").bookmarked);
    }

    #[tokio::test]
    async fn applying_creates_a_pending_application() {
        let backend = SimulatedBackend::new();
        let data = backend
            .perform(&Mutation::ApplyToJob { job_id: JobId(8) }, Uuid::nil())
            .await
            .expect("apply");
        assert_eq!(data["id"], 43);

        let CachePayload::Dashboard(summary) =
            backend.fetch(&QueryKey::dashboard()).await.expect("dashboard")
        else {
            panic!("expected the dashboard");
        };
        assert_eq!(summary.total_applications, 4);
        assert_eq!(summary.pending, 2);
    }
}
