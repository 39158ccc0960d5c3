//! Scripted sessions against the simulated backend.
//!
//! Each scenario warms the cache the way a screen would, subscribes to the
//! warmed keys, runs one mutation and lets background refetches settle. The
//! report shows the cache before and after, and every change notification in
//! between.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::application::error::AppError;
use crate::application::filters::{ApplicationFilter, JobFilter};
use crate::cache::{
    CacheChange, CacheConfig, CachePayload, Mutation, MutationState, QueryClient, QueryKey,
    RefetchReport, Subscription, UserMessage,
};
use crate::config::Scenario;
use crate::domain::types::{ApplicationId, ApplicationStatus, JobId};
use crate::infra::simulated::{Injected, SimulatedBackend};

/// Upper bound on the mutation timeout while simulating a hung server.
const SIMULATED_TIMEOUT_MS: u64 = 500;
const PAGE_SIZE: usize = 2;

const WITHDRAWN_APPLICATION: ApplicationId = ApplicationId(42);
const TARGET_JOB: JobId = JobId(8);

#[derive(Debug)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub outcome: MutationState,
    pub message: Option<UserMessage>,
    pub before: Vec<String>,
    pub events: Vec<String>,
    pub refetched: RefetchReport,
    pub after: Vec<String>,
    pub server_fetches: usize,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "scenario {}", self.scenario.as_str())?;
        write_section(f, "before", &self.before)?;
        write_section(f, "events", &self.events)?;
        match &self.message {
            Some(message) => writeln!(f, "outcome: {} ({message})", self.outcome.as_str())?,
            None => writeln!(f, "outcome: {}", self.outcome.as_str())?,
        }
        writeln!(
            f,
            "refetched: applied={} discarded={} failed={}",
            self.refetched.applied.len(),
            self.refetched.discarded.len(),
            self.refetched.failed.len()
        )?;
        write_section(f, "after", &self.after)?;
        write!(f, "server fetches: {}", self.server_fetches)
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, lines: &[String]) -> fmt::Result {
    writeln!(f, "{title}:")?;
    if lines.is_empty() {
        writeln!(f, "  (none)")?;
    }
    for line in lines {
        writeln!(f, "  {line}")?;
    }
    Ok(())
}

/// Run `scenario` against a fresh backend and cache.
pub async fn run(scenario: Scenario, config: &CacheConfig) -> Result<SimulationReport, AppError> {
    let mut config = config.clone();
    if scenario == Scenario::BookmarkTimeout {
        config.mutation_timeout_ms = config.mutation_timeout_ms.min(SIMULATED_TIMEOUT_MS);
    }

    let backend = Arc::new(SimulatedBackend::new().with_page_size(PAGE_SIZE));
    let client = QueryClient::from_backend(&config, Arc::clone(&backend));

    let watched = warm(scenario, &client).await?;
    let before = describe(&client, &watched);

    let events = Arc::new(Mutex::new(Vec::new()));
    let _subscriptions: Vec<Subscription> = watched
        .iter()
        .map(|key| {
            let sink = Arc::clone(&events);
            client.subscribe(
                key.clone(),
                Arc::new(move |change: &CacheChange| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(describe_change(change));
                }),
            )
        })
        .collect();

    let mutation = prepare(scenario, &backend);
    info!(scenario = scenario.as_str(), mutation = %mutation, "Running scenario");
    let outcome = client.mutate(mutation).await;
    let refetched = client.settle().await;

    let events = std::mem::take(&mut *events.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(SimulationReport {
        scenario,
        outcome: outcome.state(),
        message: outcome.message().cloned(),
        before,
        events,
        refetched,
        after: describe(&client, &watched),
        server_fetches: backend.total_fetches(),
    })
}

/// Load what the scenario's screens would show and return the keys to watch.
async fn warm(scenario: Scenario, client: &QueryClient) -> Result<Vec<QueryKey>, AppError> {
    let keys = match scenario {
        Scenario::WithdrawOk
        | Scenario::WithdrawNetwork
        | Scenario::WithdrawValidation
        | Scenario::WithdrawConflict => vec![
            QueryKey::application_list(&ApplicationFilter::default()),
            QueryKey::application_list(&ApplicationFilter::with_status(
                ApplicationStatus::Pending,
            )),
            QueryKey::application_detail(WITHDRAWN_APPLICATION),
            QueryKey::dashboard(),
        ],
        Scenario::ApplyOk => vec![
            QueryKey::job_list(&JobFilter::default()),
            QueryKey::application_list(&ApplicationFilter::default()),
            QueryKey::dashboard(),
        ],
        Scenario::BookmarkTimeout => vec![
            QueryKey::job_list(&JobFilter::default()),
            QueryKey::job_detail(TARGET_JOB),
            QueryKey::dashboard(),
        ],
    };

    for key in &keys {
        client.fetch(key).await?;
    }
    if matches!(scenario, Scenario::ApplyOk | Scenario::BookmarkTimeout) {
        // The target job sits on the second page of the listing.
        client
            .fetch_next_page(&QueryKey::job_list(&JobFilter::default()))
            .await?;
    }
    Ok(keys)
}

/// Arrange the server side of the scenario and return the mutation to run.
fn prepare(scenario: Scenario, backend: &SimulatedBackend) -> Mutation {
    let withdraw = Mutation::WithdrawApplication {
        application_id: WITHDRAWN_APPLICATION,
    };
    match scenario {
        Scenario::WithdrawOk => withdraw,
        Scenario::WithdrawNetwork => {
            backend.inject(Injected::Network);
            withdraw
        }
        Scenario::WithdrawValidation => {
            backend.update_application(WITHDRAWN_APPLICATION, |record| {
                record.status = ApplicationStatus::Accepted;
            });
            withdraw
        }
        Scenario::WithdrawConflict => {
            backend.update_application(WITHDRAWN_APPLICATION, |record| {
                record.status = ApplicationStatus::Reviewing;
            });
            backend.inject(Injected::Conflict);
            withdraw
        }
        Scenario::ApplyOk => Mutation::ApplyToJob { job_id: TARGET_JOB },
        Scenario::BookmarkTimeout => {
            backend.inject(Injected::Hang);
            Mutation::SetJobBookmark {
                job_id: TARGET_JOB,
                bookmarked: true,
            }
        }
    }
}

fn describe(client: &QueryClient, keys: &[QueryKey]) -> Vec<String> {
    keys.iter()
        .map(|key| match client.read(key) {
            Some(read) => format!(
                "{key} [{}] {}",
                read.staleness.as_str(),
                summarize(&read.payload)
            ),
            None => format!("{key} (not cached)"),
        })
        .collect()
}

fn describe_change(change: &CacheChange) -> String {
    let staleness = change
        .staleness
        .map_or("gone", |staleness| staleness.as_str());
    format!("{} {} -> {staleness}", change.key, change.kind.as_str())
}

fn summarize(payload: &CachePayload) -> String {
    match payload {
        CachePayload::Application(record) => format!("#{} {}", record.id, record.status),
        CachePayload::Job(record) => format!("#{}{}", record.id, job_flags(record.applied, record.bookmarked)),
        CachePayload::Hospital(record) => format!("#{} {}", record.id, record.name),
        CachePayload::Dashboard(summary) => format!(
            "total={} pending={} withdrawn={} bookmarked={}",
            summary.total_applications, summary.pending, summary.withdrawn, summary.bookmarked_jobs
        ),
        CachePayload::Applications(list) => {
            let items: Vec<String> = list
                .items()
                .map(|record| format!("#{} {}", record.id, record.status))
                .collect();
            format!("pages={} {}", list.page_count(), items.join(", "))
        }
        CachePayload::Jobs(list) => {
            let items: Vec<String> = list
                .items()
                .map(|record| format!("#{}{}", record.id, job_flags(record.applied, record.bookmarked)))
                .collect();
            format!("pages={} {}", list.page_count(), items.join(", "))
        }
    }
}

fn job_flags(applied: bool, bookmarked: bool) -> &'static str {
    match (applied, bookmarked) {
        (true, true) => "[applied,bookmarked]",
        (true, false) => "[applied]",
        (false, true) => "[bookmarked]",
        (false, false) => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FailureClass;

    fn config() -> CacheConfig {
        CacheConfig {
            developer_diagnostics: false,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn withdraw_ok_commits_and_refreshes_every_view() {
        let report = run(Scenario::WithdrawOk, &config()).await.expect("run");

        assert_eq!(report.outcome, MutationState::Committed);
        assert_eq!(report.refetched.applied.len(), 4);
        assert!(report.after.iter().all(|line| line.contains("[fresh]")));
        assert!(
            report
                .after
                .iter()
                .any(|line| line.starts_with("application:detail{id=42}") && line.ends_with("withdrawn"))
        );
        assert!(report.after.iter().any(|line| line.contains("withdrawn=1")));
        // The pending list no longer holds the application once refetched.
        assert!(
            report
                .after
                .iter()
                .any(|line| line.starts_with("application:list{status=pending}") && !line.contains("#42"))
        );
    }

    #[tokio::test]
    async fn withdraw_network_restores_the_previous_view() {
        let report = run(Scenario::WithdrawNetwork, &config()).await.expect("run");

        assert_eq!(report.outcome, MutationState::RolledBack);
        let message = report.message.as_ref().expect("message");
        assert_eq!(message.class, FailureClass::Network);
        assert!(message.retryable);
        assert_eq!(report.before, report.after);
        assert!(report.events.iter().any(|line| line.contains("patched")));
        assert!(report.events.iter().any(|line| line.contains("restored")));
        assert_eq!(report.refetched.total(), 0);
    }

    #[tokio::test]
    async fn withdraw_validation_shows_the_server_reason() {
        let report = run(Scenario::WithdrawValidation, &config()).await.expect("run");

        let message = report.message.as_ref().expect("message");
        assert_eq!(message.class, FailureClass::Validation);
        assert_eq!(message.body, "Application is already accepted.");
        assert_eq!(report.before, report.after);
    }

    #[tokio::test]
    async fn withdraw_conflict_reloads_server_truth() {
        let report = run(Scenario::WithdrawConflict, &config()).await.expect("run");

        assert_eq!(report.outcome, MutationState::RolledBack);
        assert!(report.refetched.applied.len() >= 3);
        assert!(
            report
                .after
                .iter()
                .any(|line| line.starts_with("application:detail{id=42}") && line.ends_with("reviewing"))
        );
    }

    #[tokio::test]
    async fn apply_ok_patches_the_second_page_in_place() {
        let report = run(Scenario::ApplyOk, &config()).await.expect("run");

        assert_eq!(report.outcome, MutationState::Committed);
        assert!(
            report
                .events
                .iter()
                .any(|line| line.starts_with("job:list patched"))
        );
        // A full refetch starts the listing over from page one.
        assert!(report.after[0].starts_with("job:list [fresh] pages=1"));
        assert!(report.after.iter().any(|line| line.contains("total=4")));
    }

    #[tokio::test(start_paused = true)]
    async fn bookmark_timeout_counts_as_a_network_failure() {
        let report = run(Scenario::BookmarkTimeout, &config()).await.expect("run");

        assert_eq!(report.outcome, MutationState::RolledBack);
        assert_eq!(
            report.message.as_ref().map(|message| message.class),
            Some(FailureClass::Network)
        );
        assert_eq!(report.before, report.after);
        assert!(report.to_string().starts_with("scenario bookmark-timeout\nbefore:\n"));
    }
}
