//! # Orchestrator: Job Dispatch & Correlation
//!
//! Single-threaded coordination over the worker protocol: spawns one
//! thread per job lane, correlates responses by job id, and enforces the
//! lifecycle rules: stale messages from superseded or cancelled jobs
//! are dropped, the first lane to complete a recovery tears its siblings
//! down, and a recovery whose lanes all report `not_found` ends in a
//! single terminal `not_found`.
//!
//! Workers share nothing with the orchestrator except the response
//! channel and a per-job cancel flag; teardown is idempotent because
//! cancelling an already-finished job is a map miss and a no-op.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::anyhow;
use rug::Integer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::generate::GenerateOptions;
use crate::recover::{build_recovery_ranges, precheck_factors};
use crate::rsa::{compute_phi, private_exponent};
use crate::worker::{run_worker, WorkerRequest, WorkerResponse};

struct JobState {
    cancel: Arc<AtomicBool>,
    lanes_outstanding: u32,
}

/// Owns the response channel and the registry of in-flight jobs.
pub struct Orchestrator {
    responses_tx: mpsc::Sender<WorkerResponse>,
    responses_rx: mpsc::Receiver<WorkerResponse>,
    jobs: HashMap<Uuid, JobState>,
    active_recovery: Option<Uuid>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        let (responses_tx, responses_rx) = mpsc::channel();
        Orchestrator {
            responses_tx,
            responses_rx,
            jobs: HashMap::new(),
            active_recovery: None,
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Dispatch a prime generation job; returns its correlation id.
    pub fn submit_generate(&mut self, options: GenerateOptions) -> Uuid {
        let job_id = Uuid::new_v4();
        let cancel = self.register(job_id, 1);
        info!(%job_id, size = options.size, count = options.count, "generate job submitted");
        self.spawn_worker(WorkerRequest::Generate { job_id, options }, cancel);
        job_id
    }

    /// Dispatch a factor recovery job, superseding any recovery already
    /// in flight (the superseded job is cancelled and its remaining
    /// messages dropped). Prechecks run inline; lanes only spin up when
    /// they miss.
    pub fn submit_recover(
        &mut self,
        n: &Integer,
        e: Option<&Integer>,
        candidates: &[Integer],
    ) -> Uuid {
        if let Some(previous) = self.active_recovery.take() {
            info!(%previous, "recovery superseded");
            self.cancel(previous);
        }
        let job_id = Uuid::new_v4();
        self.active_recovery = Some(job_id);

        if *n < 4u32 {
            self.register(job_id, 1);
            self.send_synthetic(WorkerResponse::Error {
                job_id,
                lane_id: None,
                message: format!("{n} is too small to factor into two primes"),
            });
            return job_id;
        }

        if let Some((p, q)) = precheck_factors(n, candidates) {
            info!(%job_id, %p, %q, "factors found in prechecks");
            let phi = compute_phi(&p, &q);
            let d = e.and_then(|e| private_exponent(e, &phi).ok());
            self.register(job_id, 1);
            self.send_synthetic(WorkerResponse::RecoverCompleted {
                job_id,
                lane_id: 0,
                p: p.to_string(),
                q: q.to_string(),
                phi: phi.to_string(),
                d: d.map(|d| d.to_string()),
            });
            return job_id;
        }

        let ranges = build_recovery_ranges(n);
        if ranges.is_empty() {
            self.register(job_id, 1);
            self.send_synthetic(WorkerResponse::Error {
                job_id,
                lane_id: None,
                message: format!("{n} is not a semiprime within range"),
            });
            return job_id;
        }

        let cancel = self.register(job_id, ranges.len() as u32);
        info!(
            %job_id,
            lanes = ranges.len(),
            digits = crate::estimate_digits(n),
            "recovery lanes dispatched"
        );
        for (lane_id, range) in ranges.iter().enumerate() {
            self.spawn_worker(
                WorkerRequest::Recover {
                    job_id,
                    lane_id: lane_id as u32,
                    n: n.to_string(),
                    start: range.start.to_string(),
                    end_exclusive: Some(range.end_exclusive.to_string()),
                    e: e.map(Integer::to_string),
                },
                Arc::clone(&cancel),
            );
        }
        job_id
    }

    /// Cancel a job: flag its lanes and forget it, so any message still
    /// in flight is dropped as stale. Cancelling an unknown or already
    /// finished job is a no-op.
    pub fn cancel(&mut self, job_id: Uuid) {
        if let Some(state) = self.jobs.remove(&job_id) {
            state.cancel.store(true, Ordering::Relaxed);
            info!(%job_id, "job cancelled");
        }
        if self.active_recovery == Some(job_id) {
            self.active_recovery = None;
        }
    }

    /// Block for the next routable event. Returns `None` once no job is
    /// in flight.
    pub fn next_event(&mut self) -> Option<WorkerResponse> {
        while !self.jobs.is_empty() {
            let msg = self.responses_rx.recv().ok()?;
            if let Some(event) = self.route(msg) {
                return Some(event);
            }
        }
        None
    }

    /// Drain without blocking; `None` when no routable event is queued.
    pub fn try_next_event(&mut self) -> Option<WorkerResponse> {
        while let Ok(msg) = self.responses_rx.try_recv() {
            if let Some(event) = self.route(msg) {
                return Some(event);
            }
        }
        None
    }

    /// Apply the lifecycle rules to one raw message; returns it when the
    /// caller should see it.
    fn route(&mut self, msg: WorkerResponse) -> Option<WorkerResponse> {
        let job_id = msg.job_id();
        let Some(state) = self.jobs.get_mut(&job_id) else {
            debug!(%job_id, "dropping stale message");
            return None;
        };

        let finish = match &msg {
            WorkerResponse::Progress { .. } | WorkerResponse::Heartbeat { .. } => {
                return Some(msg);
            }
            // One lane striking out only ends the job when it was the
            // last one still searching.
            WorkerResponse::NotFound { .. } => {
                state.lanes_outstanding = state.lanes_outstanding.saturating_sub(1);
                state.lanes_outstanding == 0
            }
            // Completion or error ends the job; siblings are flagged so
            // they stop burning CPU.
            _ => {
                state.cancel.store(true, Ordering::Relaxed);
                true
            }
        };

        if finish {
            self.finish_job(job_id);
            Some(msg)
        } else {
            None
        }
    }

    fn finish_job(&mut self, job_id: Uuid) {
        self.jobs.remove(&job_id);
        if self.active_recovery == Some(job_id) {
            self.active_recovery = None;
        }
    }

    fn register(&mut self, job_id: Uuid, lanes: u32) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.jobs.insert(
            job_id,
            JobState {
                cancel: Arc::clone(&cancel),
                lanes_outstanding: lanes,
            },
        );
        cancel
    }

    fn send_synthetic(&self, msg: WorkerResponse) {
        // The receiver lives in self, so this cannot fail.
        let _ = self.responses_tx.send(msg);
    }

    fn spawn_worker(&self, request: WorkerRequest, cancel: Arc<AtomicBool>) {
        let tx = self.responses_tx.clone();
        let job_id = request.job_id();
        let lane_id = request.lane_id();
        thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_worker(request, &tx, &cancel)));
            let flattened = match outcome {
                Ok(result) => result,
                Err(payload) => Err(anyhow!("worker panicked: {}", panic_message(&payload))),
            };
            if let Err(err) = flattened {
                let _ = tx.send(WorkerResponse::Error {
                    job_id,
                    lane_id,
                    message: err.to_string(),
                });
            }
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::SizeType;
    use crate::primality::MethodChoice;

    fn opts(size: u32, count: u32) -> GenerateOptions {
        GenerateOptions {
            size,
            size_type: SizeType::Bits,
            count,
            method: MethodChoice::Auto,
            rounds: 24,
        }
    }

    /// Route job logs through the test harness when `RUST_LOG` asks for
    /// them. `try_init` loses the race to the first caller after that.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Drain blocking events until the job's terminal message.
    fn run_to_terminal(orch: &mut Orchestrator, job_id: Uuid) -> Vec<WorkerResponse> {
        init_tracing();
        let mut events = Vec::new();
        while let Some(event) = orch.next_event() {
            let matching = event.job_id() == job_id;
            let terminal = event.is_terminal();
            if matching {
                events.push(event);
                if terminal {
                    break;
                }
            }
        }
        events
    }

    // ── Generation jobs ─────────────────────────────────────────────

    #[test]
    fn generate_job_streams_progress_then_completes() {
        let mut orch = Orchestrator::new();
        let job_id = orch.submit_generate(opts(24, 3));
        let events = run_to_terminal(&mut orch, job_id);
        let progress = events
            .iter()
            .filter(|e| matches!(e, WorkerResponse::Progress { .. }))
            .count();
        assert_eq!(progress, 3);
        assert!(matches!(
            events.last(),
            Some(WorkerResponse::GenerateCompleted { primes, .. }) if primes.len() == 3
        ));
        assert_eq!(orch.active_jobs(), 0);
    }

    #[test]
    fn invalid_generate_job_reports_error() {
        let mut orch = Orchestrator::new();
        let job_id = orch.submit_generate(opts(1, 1));
        let events = run_to_terminal(&mut orch, job_id);
        assert!(matches!(
            events.last(),
            Some(WorkerResponse::Error { lane_id: None, .. })
        ));
    }

    // ── Recovery jobs ───────────────────────────────────────────────

    /// A precheck hit resolves synchronously through a synthetic
    /// completion, no lanes involved.
    #[test]
    fn precheck_hit_completes_without_lanes() {
        let mut orch = Orchestrator::new();
        let job_id = orch.submit_recover(&Integer::from(299), Some(&Integer::from(5)), &[]);
        let events = run_to_terminal(&mut orch, job_id);
        match events.last() {
            Some(WorkerResponse::RecoverCompleted { p, q, phi, d, .. }) => {
                assert_eq!(p, "13");
                assert_eq!(q, "23");
                assert_eq!(phi, "264");
                assert_eq!(d.as_deref(), Some("53"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    /// Factors beyond the precheck tables exercise the parallel lanes;
    /// the winning lane's completion is the job's terminal event.
    #[test]
    fn lane_search_completes() {
        let mut orch = Orchestrator::new();
        let n = Integer::from(1237u64 * 1249);
        let job_id = orch.submit_recover(&n, None, &[]);
        let events = run_to_terminal(&mut orch, job_id);
        match events.last() {
            Some(WorkerResponse::RecoverCompleted { p, q, .. }) => {
                assert_eq!(p, "1237");
                assert_eq!(q, "1249");
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(orch.active_jobs(), 0);
    }

    /// A prime modulus exhausts every lane; the job ends in one terminal
    /// not_found, not one per lane.
    #[test]
    fn exhausted_lanes_collapse_to_single_not_found() {
        let mut orch = Orchestrator::new();
        let job_id = orch.submit_recover(&Integer::from(1_000_003), None, &[]);
        let events = run_to_terminal(&mut orch, job_id);
        let not_found = events
            .iter()
            .filter(|e| matches!(e, WorkerResponse::NotFound { .. }))
            .count();
        assert_eq!(not_found, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn undersized_modulus_errors() {
        let mut orch = Orchestrator::new();
        let job_id = orch.submit_recover(&Integer::from(3), None, &[]);
        let events = run_to_terminal(&mut orch, job_id);
        assert!(matches!(
            events.last(),
            Some(WorkerResponse::Error { .. })
        ));
    }

    // ── Supersession, cancellation, staleness ───────────────────────

    /// A new recovery cancels the one in flight; the superseded job's
    /// queued messages are dropped as stale.
    #[test]
    fn recovery_supersedes_previous() {
        let mut orch = Orchestrator::new();
        // First job terminates instantly via prechecks, but its message
        // sits unconsumed in the queue when the second job arrives.
        let first = orch.submit_recover(&Integer::from(299), None, &[]);
        let second = orch.submit_recover(&Integer::from(101u64 * 103), None, &[]);
        assert_ne!(first, second);

        let mut seen_jobs = Vec::new();
        while let Some(event) = orch.next_event() {
            seen_jobs.push(event.job_id());
            if event.is_terminal() {
                break;
            }
        }
        assert!(
            seen_jobs.iter().all(|&id| id == second),
            "superseded job leaked events: {seen_jobs:?}"
        );
        assert_eq!(orch.active_jobs(), 0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut orch = Orchestrator::new();
        let job_id = orch.submit_recover(&Integer::from(299), None, &[]);
        orch.cancel(job_id);
        orch.cancel(job_id);
        orch.cancel(Uuid::new_v4());
        assert_eq!(orch.active_jobs(), 0);
        // The cancelled job's synthetic completion is dropped as stale.
        assert!(orch.try_next_event().is_none());
    }

    #[test]
    fn no_jobs_means_no_events() {
        let mut orch = Orchestrator::new();
        assert!(orch.next_event().is_none());
        assert!(orch.try_next_event().is_none());
    }
}
