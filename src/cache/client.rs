//! Query client facade.
//!
//! The one object the rendering layer holds. It wires the store, refetcher
//! and mutation coordinator together and exposes reads, subscriptions and
//! typed mutations.
//!
//! # Usage
//!
//! ```ignore
//! let client = QueryClient::from_backend(&config, backend);
//! client.fetch(&QueryKey::application_list(&filter)).await?;
//! let outcome = client.withdraw_application(ApplicationId(42)).await;
//! ```

use std::sync::Arc;

use crate::application::remote::{RemoteOperations, ResourceFetcher};
use crate::domain::types::{ApplicationId, JobId};

use super::config::CacheConfig;
use super::coordinator::MutationCoordinator;
use super::error::FetchError;
use super::events::{ChangeCallback, Subscription};
use super::keys::{KeyPattern, QueryKey};
use super::mutation::{Mutation, MutationOutcome};
use super::refetch::{RefetchReport, Refetcher};
use super::store::{CacheRead, CacheStore, FetchOutcome};

pub struct QueryClient {
    config: CacheConfig,
    store: Arc<CacheStore>,
    refetcher: Arc<Refetcher>,
    coordinator: MutationCoordinator,
}

impl QueryClient {
    pub fn new(
        config: &CacheConfig,
        fetcher: Arc<dyn ResourceFetcher>,
        remote: Arc<dyn RemoteOperations>,
    ) -> Self {
        let store = Arc::new(CacheStore::new(config));
        let refetcher = Arc::new(Refetcher::new(config, Arc::clone(&store), fetcher));
        let coordinator =
            MutationCoordinator::new(config, Arc::clone(&store), Arc::clone(&refetcher), remote);
        Self {
            config: config.clone(),
            store,
            refetcher,
            coordinator,
        }
    }

    /// Build a client whose reads and writes both go to one backend.
    pub fn from_backend<B>(config: &CacheConfig, backend: Arc<B>) -> Self
    where
        B: ResourceFetcher + RemoteOperations + 'static,
    {
        let fetcher: Arc<dyn ResourceFetcher> = backend.clone();
        let remote: Arc<dyn RemoteOperations> = backend;
        Self::new(config, fetcher, remote)
    }

    pub fn subscribe(&self, key: QueryKey, callback: ChangeCallback) -> Subscription {
        self.store.subscribe(key, callback)
    }

    /// Render-time read: cached payload and its staleness.
    pub fn read(&self, key: &QueryKey) -> Option<CacheRead> {
        self.store.read(key)
    }

    pub async fn fetch(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        self.refetcher.fetch(key).await
    }

    pub async fn fetch_next_page(&self, key: &QueryKey) -> Result<FetchOutcome, FetchError> {
        self.refetcher.fetch_next_page(key).await
    }

    pub async fn mutate(&self, mutation: Mutation) -> MutationOutcome {
        self.coordinator.mutate(mutation).await
    }

    pub async fn withdraw_application(&self, application_id: ApplicationId) -> MutationOutcome {
        self.mutate(Mutation::WithdrawApplication { application_id })
            .await
    }

    pub async fn apply_to_job(&self, job_id: JobId) -> MutationOutcome {
        self.mutate(Mutation::ApplyToJob { job_id }).await
    }

    pub async fn set_job_bookmark(&self, job_id: JobId, bookmarked: bool) -> MutationOutcome {
        self.mutate(Mutation::SetJobBookmark { job_id, bookmarked })
            .await
    }

    pub fn invalidate_and_refetch(&self, pattern: &KeyPattern) -> Vec<QueryKey> {
        self.refetcher.invalidate_and_refetch(pattern)
    }

    /// Wait until every background refetch has landed or failed.
    pub async fn settle(&self) -> RefetchReport {
        self.refetcher.settle().await
    }

    /// Drop all cached state, e.g. on logout.
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
