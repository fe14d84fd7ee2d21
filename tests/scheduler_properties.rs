// tests/scheduler_properties.rs

mod common;
use crate::common::builders::job;

use std::collections::{BTreeSet, HashSet, VecDeque};

use betterci::dag::{Scheduler, SchedulerOptions};
use betterci::engine::{FailureKind, JobFailure, JobOutcome};
use betterci::errors::BetterciError;
use betterci::model::Job;
use betterci::types::JobStatus;
use proptest::prelude::*;

/// Random acyclic job sets: job N may only need jobs 0..N-1.
fn dag_strategy(max_jobs: usize) -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<bool>)> {
    (1..=max_jobs).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n),
            proptest::collection::vec(proptest::bool::weighted(0.25), n),
        )
            .prop_map(move |(raw, fails)| {
                let deps = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, candidates)| {
                        if i == 0 {
                            return Vec::new();
                        }
                        let set: BTreeSet<usize> = candidates.into_iter().map(|d| d % i).collect();
                        set.into_iter().collect()
                    })
                    .collect();
                (deps, fails)
            })
    })
}

fn name(i: usize) -> String {
    format!("job_{i}")
}

fn build_jobs(deps: &[Vec<usize>]) -> Vec<Job> {
    deps.iter()
        .enumerate()
        .map(|(i, needs)| {
            let needs: Vec<String> = needs.iter().map(|d| name(*d)).collect();
            let refs: Vec<&str> = needs.iter().map(String::as_str).collect();
            job(&name(i), &refs)
        })
        .collect()
}

/// Drive the pure scheduler to completion, completing jobs in FIFO order.
fn simulate(scheduler: &mut Scheduler, failing: &HashSet<String>) -> Vec<String> {
    let mut running: VecDeque<String> =
        scheduler.dispatch_ready().into_iter().map(|j| j.name).collect();
    let mut dispatched: Vec<String> = running.iter().cloned().collect();

    while let Some(done) = running.pop_front() {
        let outcome = if failing.contains(&done) {
            JobOutcome::Failed(JobFailure::new(FailureKind::StepFailed, &done, "scripted"))
        } else {
            JobOutcome::Succeeded { warnings: vec![] }
        };
        for next in scheduler.handle_completion(&done, &outcome) {
            dispatched.push(next.name.clone());
            running.push_back(next.name);
        }
    }
    dispatched
}

proptest! {
    #[test]
    fn ok_set_is_reachable_through_non_failing_dependencies(
        (deps, fails) in dag_strategy(12),
        workers in 1usize..4,
    ) {
        let jobs = build_jobs(&deps);
        let failing: HashSet<String> = fails
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| name(i))
            .collect();

        let mut scheduler = Scheduler::new(
            jobs,
            SchedulerOptions { max_workers: workers, fail_fast: false },
        )
        .unwrap();
        let dispatched = simulate(&mut scheduler, &failing);
        prop_assert!(scheduler.is_finished());

        // Each job is dispatched at most once.
        let unique: HashSet<&String> = dispatched.iter().collect();
        prop_assert_eq!(unique.len(), dispatched.len());

        // Deps have lower indices, so one forward pass computes reachability.
        let mut reachable = vec![false; deps.len()];
        for (i, needs) in deps.iter().enumerate() {
            reachable[i] = !failing.contains(&name(i)) && needs.iter().all(|d| reachable[*d]);
        }

        let results = scheduler.results();
        prop_assert_eq!(results.len(), deps.len());
        for (i, ok) in reachable.iter().enumerate() {
            let status = results[&name(i)];
            if *ok {
                prop_assert_eq!(status, JobStatus::Ok);
            } else if failing.contains(&name(i)) && deps[i].iter().all(|d| reachable[*d]) {
                prop_assert_eq!(status, JobStatus::Failed);
            } else {
                prop_assert_eq!(status, JobStatus::NotRun);
            }
        }
    }

    #[test]
    fn cycles_are_rejected_before_dispatch(len in 1usize..6) {
        // job_i needs job_{i+1}, the last needs job_0.
        let jobs: Vec<Job> = (0..len)
            .map(|i| job(&name(i), &[name((i + 1) % len).as_str()]))
            .collect();
        let built = Scheduler::new(jobs, SchedulerOptions::default());
        prop_assert!(matches!(built, Err(BetterciError::DagCycle(_))));
    }
}
