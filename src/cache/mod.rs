//! Client-side query cache.
//!
//! Keeps independently fetched, paginated views of server state coherent
//! while the user writes:
//!
//! - **Store**: keyed entries with staleness, versions and fetch tickets
//! - **Keys**: structural query keys and category patterns
//! - **Coordinator**: snapshot, optimistic write, remote call, commit or rollback
//! - **Resolver**: static invalidation regions per mutation kind
//! - **Reporter**: failure classification and user messages
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_entries = 256
//! mutation_timeout_ms = 15000
//! refetch_concurrency = 4
//! # developer_diagnostics defaults to on in debug builds
//! ```

mod client;
mod config;
mod coordinator;
mod error;
mod events;
mod keys;
mod lock;
mod mutation;
mod payload;
mod refetch;
mod registry;
mod report;
mod resolver;
mod store;

pub use client::QueryClient;
pub use config::CacheConfig;
pub use coordinator::MutationCoordinator;
pub use error::{CacheError, FetchError, MutationError};
pub use events::{CacheChange, ChangeCallback, ChangeKind, Epoch, Subscription};
pub use keys::{KeyPattern, ParamValue, QueryKey, QueryParams, Resource, ResourceRef, Scope, matches};
pub use mutation::{Mutation, MutationKind, MutationOutcome, MutationSnapshot, MutationState};
pub use payload::CachePayload;
pub use refetch::{RefetchReport, Refetcher};
pub use registry::ResourceIndex;
pub use report::{ErrorReport, ErrorReporter, FailureClass, ReportContext, UserMessage};
pub use resolver::{ConsistencyResolver, InvalidationPlan, Region, Relation};
pub use store::{
    CacheEntry, CacheRead, CacheStore, CapturedEntry, DiscardReason, FetchOutcome, FetchTicket,
    Restoration, Staleness,
};
