//! Invalidation planning for completed mutations.
//!
//! Each mutation kind declares the regions of the cache it can make stale.
//! Regions become key patterns, and patterns become the concrete cached keys
//! to mark and refetch.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use super::keys::{KeyPattern, QueryKey, Resource, ResourceRef, Scope};
use super::mutation::{Mutation, MutationKind, MutationSnapshot};
use super::store::CacheStore;

/// Edge of the resource relationship graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Application → the job it was filed against.
    ApplicationJob,
}

/// Part of the cache a mutation kind may affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Detail entry of the mutated resource.
    Own,
    /// Every list of a resource, whatever its filters.
    Lists(Resource),
    /// A derived aggregate.
    Aggregate(Resource),
    /// Detail entries of resources one relation away from the target.
    Related(Relation),
}

const WITHDRAW_APPLICATION: &[Region] = &[
    Region::Own,
    Region::Lists(Resource::Application),
    Region::Aggregate(Resource::Dashboard),
    // Job listings show an "already applied" indicator.
    Region::Related(Relation::ApplicationJob),
];

const APPLY_TO_JOB: &[Region] = &[
    Region::Own,
    Region::Lists(Resource::Job),
    Region::Lists(Resource::Application),
    Region::Aggregate(Resource::Dashboard),
];

const SET_JOB_BOOKMARK: &[Region] = &[
    Region::Own,
    Region::Lists(Resource::Job),
    Region::Aggregate(Resource::Dashboard),
];

/// Key patterns a mutation invalidates, resolved against the live cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub kind: MutationKind,
    pub target: ResourceRef,
    /// Patterns that matched at least one cached key, with those keys.
    pub matched: BTreeMap<KeyPattern, BTreeSet<QueryKey>>,
    /// Declared patterns with nothing cached under them.
    pub dropped: BTreeSet<KeyPattern>,
}

impl InvalidationPlan {
    /// Every concrete key to mark stale and refetch.
    pub fn keys(&self) -> BTreeSet<QueryKey> {
        self.matched.values().flatten().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)?;
        for (pattern, keys) in &self.matched {
            let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
            write!(f, "\n  stale {pattern} -> {}", keys.join(", "))?;
        }
        for pattern in &self.dropped {
            write!(f, "\n  skip  {pattern}")?;
        }
        Ok(())
    }
}

/// Static dependency declarations per mutation kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencyResolver;

impl ConsistencyResolver {
    pub fn regions(kind: MutationKind) -> &'static [Region] {
        match kind {
            MutationKind::WithdrawApplication => WITHDRAW_APPLICATION,
            MutationKind::ApplyToJob => APPLY_TO_JOB,
            MutationKind::SetJobBookmark => SET_JOB_BOOKMARK,
        }
    }

    /// Resolve the regions of `mutation` against what the store holds now.
    ///
    /// Related resources come from the snapshot when there is one, otherwise
    /// from whatever cached payloads still describe the target. Patterns with
    /// nothing cached under them are dropped.
    pub fn affected_regions(
        &self,
        mutation: &Mutation,
        store: &CacheStore,
        snapshot: Option<&MutationSnapshot>,
    ) -> InvalidationPlan {
        let target = mutation.target();
        let mut declared = BTreeSet::new();

        for region in Self::regions(mutation.kind()) {
            match region {
                Region::Own => {
                    declared.insert(KeyPattern::exact(target.detail_key()));
                }
                Region::Lists(resource) => {
                    declared.insert(KeyPattern::category(*resource, Scope::List));
                }
                Region::Aggregate(resource) => {
                    declared.insert(KeyPattern::category(*resource, Scope::Aggregate));
                }
                Region::Related(relation) => {
                    for related in related_refs(*relation, target, store, snapshot) {
                        declared.insert(KeyPattern::exact(related.detail_key()));
                    }
                }
            }
        }

        let mut matched = BTreeMap::new();
        let mut dropped = BTreeSet::new();
        for pattern in declared {
            let keys: BTreeSet<QueryKey> = store.keys_matching(&pattern).into_iter().collect();
            if keys.is_empty() {
                dropped.insert(pattern);
            } else {
                matched.insert(pattern, keys);
            }
        }

        InvalidationPlan {
            kind: mutation.kind(),
            target,
            matched,
            dropped,
        }
    }
}

fn related_refs(
    relation: Relation,
    target: ResourceRef,
    store: &CacheStore,
    snapshot: Option<&MutationSnapshot>,
) -> HashSet<ResourceRef> {
    let candidates = match snapshot.filter(|snapshot| !snapshot.derived_refs.is_empty()) {
        Some(snapshot) => snapshot.derived_refs.clone(),
        None => store
            .keys_for_resource(&target)
            .iter()
            .filter_map(|key| store.peek(key))
            .flat_map(|entry| entry.payload.related_refs(target))
            .collect(),
    };

    candidates
        .into_iter()
        .filter(|candidate| match relation {
            Relation::ApplicationJob => {
                matches!(target, ResourceRef::Application(_))
                    && matches!(candidate, ResourceRef::Job(_))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use uuid::Uuid;

    use super::*;
    use crate::application::filters::ApplicationFilter;
    use crate::cache::config::CacheConfig;
    use crate::cache::payload::CachePayload;
    use crate::domain::entities::{ApplicationRecord, DashboardSummary, JobRecord};
    use crate::domain::pagination::{Page, PagedList};
    use crate::domain::types::{ApplicationId, ApplicationStatus, HospitalId, JobId};

    fn application(id: i64, job: i64) -> ApplicationRecord {
        ApplicationRecord {
            id: ApplicationId(id),
            job_id: JobId(job),
            status: ApplicationStatus::Pending,
            applied_at: datetime!(2026-03-01 09:00 UTC),
            note: None,
        }
    }

    fn seeded() -> CacheStore {
        let store = CacheStore::new(&CacheConfig::default());
        store.set(
            QueryKey::application_list(&ApplicationFilter::default()),
            CachePayload::Applications(PagedList::first(Page::new(
                vec![application(41, 6), application(42, 7)],
                1,
                false,
                2,
            ))),
        );
        store.set(
            QueryKey::application_list(&ApplicationFilter::with_status(
                ApplicationStatus::Pending,
            )),
            CachePayload::Applications(PagedList::first(Page::new(
                vec![application(42, 7)],
                1,
                false,
                1,
            ))),
        );
        store.set(
            QueryKey::dashboard(),
            CachePayload::Dashboard(DashboardSummary::default()),
        );
        store
    }

    fn withdraw() -> Mutation {
        Mutation::WithdrawApplication {
            application_id: ApplicationId(42),
        }
    }

    #[test]
    fn withdraw_plan_skips_uncached_regions() {
        let store = seeded();
        let plan = ConsistencyResolver.affected_regions(&withdraw(), &store, None);

        insta::assert_snapshot!(plan.to_string(), @r"
        withdraw_application application#42
          stale application:list* -> application:list, application:list{status=pending}
          stale dashboard:aggregate* -> dashboard:aggregate
          skip  application:detail{id=42}
          skip  job:detail{id=7}
        ");
    }

    #[test]
    fn related_job_is_included_once_cached() {
        let store = seeded();
        store.set(
            QueryKey::job_detail(JobId(7)),
            CachePayload::Job(JobRecord {
                id: JobId(7),
                hospital_id: HospitalId(3),
                title: "ICU nurse".to_string(),
                applied: true,
                bookmarked: false,
            }),
        );

        let plan = ConsistencyResolver.affected_regions(&withdraw(), &store, None);
        assert!(plan.keys().contains(&QueryKey::job_detail(JobId(7))));
        assert_eq!(plan.keys().len(), 4);
    }

    #[test]
    fn snapshot_supplies_relations_after_the_cache_moved_on() {
        let store = seeded();
        store.set(
            QueryKey::job_detail(JobId(9)),
            CachePayload::Job(JobRecord {
                id: JobId(9),
                hospital_id: HospitalId(3),
                title: "Ward clerk".to_string(),
                applied: true,
                bookmarked: false,
            }),
        );
        let snapshot = MutationSnapshot {
            correlation_id: Uuid::nil(),
            captured: Vec::new(),
            derived_refs: HashSet::from([ResourceRef::Job(JobId(9))]),
        };

        let plan = ConsistencyResolver.affected_regions(&withdraw(), &store, Some(&snapshot));
        assert!(plan.keys().contains(&QueryKey::job_detail(JobId(9))));
        assert!(plan.dropped.iter().all(|pattern| !pattern.matches(&QueryKey::job_detail(JobId(7)))));
    }

    #[test]
    fn nothing_cached_means_an_empty_plan() {
        let store = CacheStore::new(&CacheConfig::default());
        let plan = ConsistencyResolver.affected_regions(&withdraw(), &store, None);
        assert!(plan.is_empty());
        assert!(plan.keys().is_empty());
    }

    #[test]
    fn bookmark_plan_leaves_application_lists_alone() {
        let store = seeded();
        let plan = ConsistencyResolver.affected_regions(
            &Mutation::SetJobBookmark {
                job_id: JobId(7),
                bookmarked: true,
            },
            &store,
            None,
        );
        assert_eq!(plan.keys(), BTreeSet::from([QueryKey::dashboard()]));
    }
}
