//! Run orchestration.
//!
//! ## Concurrency
//!
//! Every selected test gets its own task, but at most `jobs` pipelines are in flight at a time (a semaphore gates
//! them). Workers never share mutable state: each sends its finished [`RunRecord`] over a channel, and the task that
//! called [`Runner::run`] is the only consumer. It alone owns the [`RunSummary`] and the reporter.
//!
//! ## Cancellation
//!
//! [`cancel_on_interrupt`] turns Ctrl-C into a broadcast on the shared cancel token. In-flight stages kill their
//! process groups; tests that have not started yet resolve to `Skipped`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use rct_core::{ExitPolicy, FinishedRun, RunRecord, RunSummary, TestCase, classify};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::{MAX_JOBS, SuiteLayout};
use crate::pipeline::Pipeline;
use crate::process::CancelSource;
use crate::registry::{Lookup, Registry};
use crate::reporter::TestReporter;

/// Which tests a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every registered test, known failures included, optionally narrowed to paths containing `filter`.
    Suite { filter: Option<String> },
    /// Only the named tests. Names resolve through [`Registry::lookup`].
    Named(Vec<String>),
}

/// Resolved work for a run.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Ordered by group, then name.
    pub cases: Vec<TestCase>,
    pub not_found: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty() && self.not_found.is_empty()
    }
}

/// Resolve `selection` against the registry and the suite directories.
pub fn plan(registry: &Registry, layout: &SuiteLayout, selection: &Selection) -> Plan {
    let mut plan = Plan::default();
    match selection {
        Selection::Suite { filter } => {
            let matches = |case: &TestCase| match filter {
                Some(filter) => case.source.to_string_lossy().contains(filter.as_str()),
                None => true,
            };
            plan.cases = registry
                .regular_cases()
                .into_iter()
                .chain(registry.known_failure_cases())
                .filter(|case| matches(case))
                .collect();
        }
        Selection::Named(names) => {
            let mut seen = HashSet::new();
            for name in names {
                match registry.lookup(name, layout) {
                    Lookup::Registered(case) | Lookup::Unregistered(case) => {
                        if seen.insert(case.id.clone()) {
                            plan.cases.push(case);
                        }
                    }
                    Lookup::NotFound => plan.not_found.push(name.clone()),
                }
            }
        }
    }
    plan.cases.sort_by(|a, b| (a.group(), &a.name, &a.id).cmp(&(b.group(), &b.name, &b.id)));
    plan
}

/// Bounded worker pool over a shared [`Pipeline`].
pub struct Runner {
    pipeline: Arc<Pipeline>,
    jobs: usize,
    policy: ExitPolicy,
}

impl Runner {
    pub fn new(pipeline: Pipeline, jobs: usize, policy: ExitPolicy) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            jobs: jobs.clamp(1, MAX_JOBS),
            policy,
        }
    }

    /// Execute `plan` and return the finalized run.
    pub async fn run(&self, plan: Plan, reporter: &mut dyn TestReporter) -> FinishedRun {
        let started = Instant::now();
        let mut summary = RunSummary::new();

        reporter.on_not_found(&plan.not_found);
        for name in plan.not_found {
            summary.note_not_found(name);
        }
        reporter.on_collection_complete(plan.cases.len());
        tracing::debug!(tests = plan.cases.len(), jobs = self.jobs, "starting run");

        let (tx, mut rx) = mpsc::channel::<RunRecord>(self.jobs * 2);
        let permits = Arc::new(Semaphore::new(self.jobs));
        let mut workers = JoinSet::new();

        for case in plan.cases {
            let tx = tx.clone();
            let permits = Arc::clone(&permits);
            let pipeline = Arc::clone(&self.pipeline);
            workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let started = Instant::now();
                let result = pipeline.run(&case).await;
                let verdict = classify(&case, &result);
                let record = RunRecord {
                    case,
                    verdict,
                    duration: started.elapsed(),
                };
                if tx.send(record).await.is_err() {
                    tracing::warn!("result channel closed before a test finished");
                }
            });
        }
        drop(tx);

        while let Some(record) = rx.recv().await {
            reporter.on_test_complete(&record);
            summary.record(record);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "test worker did not finish");
            }
        }

        if self.pipeline.processes().cancel_token().is_cancelled() {
            summary.mark_cancelled();
        }

        let finished = summary.finish(self.policy, started.elapsed());
        reporter.on_run_complete(&finished);
        finished
    }
}

/// Cancel the run on the first Ctrl-C. Abort the returned handle once the run is over.
pub fn cancel_on_interrupt(source: CancelSource) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            source.cancel();
        }
    })
}
