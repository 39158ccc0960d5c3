//! User-triggered writes and their predicted effect on cached payloads.

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use crate::application::remote::MutationData;
use crate::domain::types::{ApplicationId, ApplicationStatus, JobId};

use super::error::MutationError;
use super::keys::ResourceRef;
use super::payload::CachePayload;
use super::report::UserMessage;
use super::store::CapturedEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    WithdrawApplication { application_id: ApplicationId },
    ApplyToJob { job_id: JobId },
    SetJobBookmark { job_id: JobId, bookmarked: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutationKind {
    WithdrawApplication,
    ApplyToJob,
    SetJobBookmark,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::WithdrawApplication => "withdraw_application",
            MutationKind::ApplyToJob => "apply_to_job",
            MutationKind::SetJobBookmark => "set_job_bookmark",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::WithdrawApplication { .. } => MutationKind::WithdrawApplication,
            Mutation::ApplyToJob { .. } => MutationKind::ApplyToJob,
            Mutation::SetJobBookmark { .. } => MutationKind::SetJobBookmark,
        }
    }

    /// Resource the write is about.
    pub fn target(&self) -> ResourceRef {
        match self {
            Mutation::WithdrawApplication { application_id } => {
                ResourceRef::Application(*application_id)
            }
            Mutation::ApplyToJob { job_id } | Mutation::SetJobBookmark { job_id, .. } => {
                ResourceRef::Job(*job_id)
            }
        }
    }

    /// Payload as it should look once the server accepts the write.
    ///
    /// Returns `None` when the payload holds no record of the target, so the
    /// entry is left untouched. List items are rewritten where they are and
    /// never moved between pages.
    pub fn predict(&self, payload: &CachePayload) -> Option<CachePayload> {
        match (self, payload) {
            (Mutation::WithdrawApplication { application_id }, CachePayload::Application(record))
                if record.id == *application_id =>
            {
                let mut record = record.clone();
                record.status = ApplicationStatus::Withdrawn;
                Some(CachePayload::Application(record))
            }
            (Mutation::WithdrawApplication { application_id }, CachePayload::Applications(list)) => {
                list.map_items(|record| {
                    (record.id == *application_id).then(|| {
                        let mut record = record.clone();
                        record.status = ApplicationStatus::Withdrawn;
                        record
                    })
                })
                .map(CachePayload::Applications)
            }
            (Mutation::ApplyToJob { job_id }, CachePayload::Job(record)) if record.id == *job_id => {
                let mut record = record.clone();
                record.applied = true;
                Some(CachePayload::Job(record))
            }
            (Mutation::ApplyToJob { job_id }, CachePayload::Jobs(list)) => list
                .map_items(|record| {
                    (record.id == *job_id).then(|| {
                        let mut record = record.clone();
                        record.applied = true;
                        record
                    })
                })
                .map(CachePayload::Jobs),
            (Mutation::SetJobBookmark { job_id, bookmarked }, CachePayload::Job(record))
                if record.id == *job_id =>
            {
                let mut record = record.clone();
                record.bookmarked = *bookmarked;
                Some(CachePayload::Job(record))
            }
            (Mutation::SetJobBookmark { job_id, bookmarked }, CachePayload::Jobs(list)) => list
                .map_items(|record| {
                    (record.id == *job_id).then(|| {
                        let mut record = record.clone();
                        record.bookmarked = *bookmarked;
                        record
                    })
                })
                .map(CachePayload::Jobs),
            _ => None,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.target())
    }
}

/// Lifecycle of one mutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Optimistic,
    InFlight,
    Committed,
    RolledBack,
}

impl MutationState {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationState::Idle => "idle",
            MutationState::Optimistic => "optimistic",
            MutationState::InFlight => "in_flight",
            MutationState::Committed => "committed",
            MutationState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Committed | MutationState::RolledBack)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (MutationState::Idle, MutationState::Optimistic)
                | (MutationState::Idle, MutationState::InFlight)
                | (MutationState::Optimistic, MutationState::InFlight)
                | (MutationState::InFlight, MutationState::Committed)
                | (MutationState::InFlight, MutationState::RolledBack)
        )
    }
}

/// Entries captured before an optimistic write.
#[derive(Debug, Clone)]
pub struct MutationSnapshot {
    pub correlation_id: Uuid,
    pub captured: Vec<CapturedEntry>,
    /// Resources related to the target as the captured payloads describe them.
    pub derived_refs: HashSet<ResourceRef>,
}

impl MutationSnapshot {
    pub fn new(correlation_id: Uuid, target: ResourceRef, captured: Vec<CapturedEntry>) -> Self {
        let derived_refs = captured
            .iter()
            .flat_map(|entry| entry.payload.related_refs(target))
            .collect();
        Self {
            correlation_id,
            captured,
            derived_refs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum MutationOutcome {
    Committed {
        correlation_id: Uuid,
        data: MutationData,
    },
    RolledBack {
        correlation_id: Uuid,
        error: MutationError,
        message: UserMessage,
    },
}

impl MutationOutcome {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            MutationOutcome::Committed { correlation_id, .. }
            | MutationOutcome::RolledBack { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed { .. })
    }

    pub fn state(&self) -> MutationState {
        match self {
            MutationOutcome::Committed { .. } => MutationState::Committed,
            MutationOutcome::RolledBack { .. } => MutationState::RolledBack,
        }
    }

    /// User message for a rolled-back run.
    pub fn message(&self) -> Option<&UserMessage> {
        match self {
            MutationOutcome::RolledBack { message, .. } => Some(message),
            MutationOutcome::Committed { .. } => None,
        }
    }
}
