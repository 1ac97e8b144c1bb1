//! # Worker: Job Message Protocol
//!
//! Tagged-union request/response types for the CPU-bound jobs (prime
//! generation, factor recovery) plus the worker body that executes one
//! request against a response channel. Big integers cross the boundary
//! as decimal strings so the protocol stays transport-agnostic.
//!
//! A worker never terminates a job silently: every run ends in a
//! completion, a `not_found`, or an `error` message. The exception is
//! cancellation, which by contract produces no terminal message at all
//! (the orchestrator has already dropped the job).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use rug::Integer;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::generate::{generate_primes_progressive, GenerateOptions};
use crate::recover::{find_prime_factors_in_range, LaneOutcome, SearchObserver};
use crate::rsa::{compute_phi, private_exponent};

/// A job request dispatched to a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerRequest {
    Generate {
        job_id: Uuid,
        options: GenerateOptions,
    },
    Recover {
        job_id: Uuid,
        lane_id: u32,
        n: String,
        start: String,
        /// Defaults to `√n + 1` when absent.
        end_exclusive: Option<String>,
        /// Public exponent to derive `d` against, when known.
        e: Option<String>,
    },
}

impl WorkerRequest {
    pub fn job_id(&self) -> Uuid {
        match self {
            WorkerRequest::Generate { job_id, .. } => *job_id,
            WorkerRequest::Recover { job_id, .. } => *job_id,
        }
    }

    pub fn lane_id(&self) -> Option<u32> {
        match self {
            WorkerRequest::Generate { .. } => None,
            WorkerRequest::Recover { lane_id, .. } => Some(*lane_id),
        }
    }
}

/// A message emitted by a worker while (or after) executing a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerResponse {
    /// One per generated prime.
    Progress {
        job_id: Uuid,
        completed: u32,
        total: u32,
        prime: String,
    },
    GenerateCompleted {
        job_id: Uuid,
        elapsed_ms: u64,
        primes: Vec<String>,
    },
    /// Lane liveness at a fixed attempt granularity.
    Heartbeat {
        job_id: Uuid,
        lane_id: u32,
        attempts: u64,
    },
    RecoverCompleted {
        job_id: Uuid,
        lane_id: u32,
        p: String,
        q: String,
        phi: String,
        d: Option<String>,
    },
    NotFound {
        job_id: Uuid,
        lane_id: u32,
    },
    Error {
        job_id: Uuid,
        lane_id: Option<u32>,
        message: String,
    },
}

impl WorkerResponse {
    pub fn job_id(&self) -> Uuid {
        match self {
            WorkerResponse::Progress { job_id, .. }
            | WorkerResponse::GenerateCompleted { job_id, .. }
            | WorkerResponse::Heartbeat { job_id, .. }
            | WorkerResponse::RecoverCompleted { job_id, .. }
            | WorkerResponse::NotFound { job_id, .. }
            | WorkerResponse::Error { job_id, .. } => *job_id,
        }
    }

    /// Terminal messages end a lane; heartbeats and progress do not.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            WorkerResponse::Progress { .. } | WorkerResponse::Heartbeat { .. }
        )
    }
}

/// Parse a decimal-string protocol field into an integer.
pub fn parse_decimal(field: &str, text: &str) -> Result<Integer> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(field, "empty numeric input"));
    }
    trimmed.parse().map_err(|_| EngineError::Validation {
        field: field.into(),
        reason: format!("{trimmed:?} is not a decimal integer"),
        expected: Some("decimal digits with an optional sign".into()),
    })
}

/// Observer that forwards heartbeats onto the response channel and polls
/// the job's cancel flag.
struct ChannelObserver<'a> {
    job_id: Uuid,
    lane_id: u32,
    cancel: &'a AtomicBool,
    responses: &'a mpsc::Sender<WorkerResponse>,
}

impl SearchObserver for ChannelObserver<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn heartbeat(&self, attempts: u64) {
        let _ = self.responses.send(WorkerResponse::Heartbeat {
            job_id: self.job_id,
            lane_id: self.lane_id,
            attempts,
        });
    }
}

/// Execute one request to its terminal message.
///
/// Yields once before any computation so a freshly submitted job is
/// observable as running. Engine failures are sent as `error` messages
/// here; the caller converts panics and channel failures the same way.
pub fn run_worker(
    request: WorkerRequest,
    responses: &mpsc::Sender<WorkerResponse>,
    cancel: &AtomicBool,
) -> anyhow::Result<()> {
    std::thread::yield_now();
    match request {
        WorkerRequest::Generate { job_id, options } => {
            run_generate(job_id, &options, responses, cancel)
        }
        WorkerRequest::Recover {
            job_id,
            lane_id,
            n,
            start,
            end_exclusive,
            e,
        } => run_recover(
            job_id,
            lane_id,
            &n,
            &start,
            end_exclusive.as_deref(),
            e.as_deref(),
            responses,
            cancel,
        ),
    }
}

fn run_generate(
    job_id: Uuid,
    options: &GenerateOptions,
    responses: &mpsc::Sender<WorkerResponse>,
    cancel: &AtomicBool,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let total = options.count;
    let result = generate_primes_progressive(options, |index, prime| {
        let _ = responses.send(WorkerResponse::Progress {
            job_id,
            completed: index + 1,
            total,
            prime: prime.to_string(),
        });
        !cancel.load(Ordering::Relaxed)
    });

    if cancel.load(Ordering::Relaxed) {
        debug!(%job_id, "generation cancelled, dropping result");
        return Ok(());
    }
    match result {
        Ok(primes) => {
            responses.send(WorkerResponse::GenerateCompleted {
                job_id,
                elapsed_ms: started.elapsed().as_millis() as u64,
                primes: primes.iter().map(Integer::to_string).collect(),
            })?;
        }
        Err(err) => {
            responses.send(WorkerResponse::Error {
                job_id,
                lane_id: None,
                message: err.to_string(),
            })?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_recover(
    job_id: Uuid,
    lane_id: u32,
    n: &str,
    start: &str,
    end_exclusive: Option<&str>,
    e: Option<&str>,
    responses: &mpsc::Sender<WorkerResponse>,
    cancel: &AtomicBool,
) -> anyhow::Result<()> {
    let n = parse_decimal("n", n)?;
    let start = parse_decimal("start", start)?;
    let end = match end_exclusive {
        Some(text) => parse_decimal("end_exclusive", text)?,
        None => Integer::from(n.sqrt_ref()) + 1u32,
    };
    let e = e.map(|text| parse_decimal("e", text)).transpose()?;

    let observer = ChannelObserver {
        job_id,
        lane_id,
        cancel,
        responses,
    };
    match find_prime_factors_in_range(&n, &start, &end, &observer) {
        LaneOutcome::Found { p, q } => {
            let phi = compute_phi(&p, &q);
            let d = e.and_then(|e| private_exponent(&e, &phi).ok());
            responses.send(WorkerResponse::RecoverCompleted {
                job_id,
                lane_id,
                p: p.to_string(),
                q: q.to_string(),
                phi: phi.to_string(),
                d: d.map(|d| d.to_string()),
            })?;
        }
        LaneOutcome::NotFound => {
            responses.send(WorkerResponse::NotFound { job_id, lane_id })?;
        }
        LaneOutcome::Cancelled => {
            debug!(%job_id, lane_id, "lane cancelled, dropping result");
        }
    }
    Ok(())
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

    // ── Wire format ─────────────────────────────────────────────────

    /// The request union is tagged by `kind`, snake_cased, with big
    /// integers as decimal strings.
    #[test]
    fn request_wire_shape() {
        let req = WorkerRequest::Recover {
            job_id: Uuid::nil(),
            lane_id: 1,
            n: "299".into(),
            start: "7".into(),
            end_exclusive: Some("20".into()),
            e: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["kind"], "recover");
        assert_eq!(json["n"], "299");
        assert_eq!(json["lane_id"], 1);

        let back: WorkerRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn response_wire_shape() {
        let resp = WorkerResponse::RecoverCompleted {
            job_id: Uuid::nil(),
            lane_id: 0,
            p: "13".into(),
            q: "23".into(),
            phi: "264".into(),
            d: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["kind"], "recover_completed");
        assert_eq!(json["p"], "13");

        let nf = serde_json::to_value(WorkerResponse::NotFound {
            job_id: Uuid::nil(),
            lane_id: 3,
        })
        .unwrap();
        assert_eq!(nf["kind"], "not_found");
    }

    #[test]
    fn terminality() {
        let hb = WorkerResponse::Heartbeat {
            job_id: Uuid::nil(),
            lane_id: 0,
            attempts: 1,
        };
        assert!(!hb.is_terminal());
        let nf = WorkerResponse::NotFound {
            job_id: Uuid::nil(),
            lane_id: 0,
        };
        assert!(nf.is_terminal());
    }

    // ── Decimal parsing ─────────────────────────────────────────────

    #[test]
    fn parse_decimal_accepts_signed_integers() {
        assert_eq!(parse_decimal("n", "299").unwrap(), 299u32);
        assert_eq!(parse_decimal("n", " -17 ").unwrap(), -17);
    }

    #[test]
    fn parse_decimal_rejects_garbage() {
        for bad in ["", "  ", "12a", "0x10", "1.5"] {
            let err = parse_decimal("n", bad);
            assert!(matches!(err, Err(EngineError::Validation { .. })), "{bad:?}");
        }
    }

    // ── Worker bodies ───────────────────────────────────────────────

    #[test]
    fn generate_emits_progress_then_completion() {
        let (tx, rx) = mpsc::channel();
        let cancel = AtomicBool::new(false);
        let job_id = Uuid::new_v4();
        run_worker(
            WorkerRequest::Generate {
                job_id,
                options: opts(24, 3),
            },
            &tx,
            &cancel,
        )
        .unwrap();
        drop(tx);

        let messages: Vec<_> = rx.iter().collect();
        assert_eq!(messages.len(), 4, "3 progress + 1 completion");
        for (i, msg) in messages[..3].iter().enumerate() {
            match msg {
                WorkerResponse::Progress {
                    completed, total, ..
                } => {
                    assert_eq!(*completed, i as u32 + 1);
                    assert_eq!(*total, 3);
                }
                other => panic!("expected progress, got {other:?}"),
            }
        }
        match &messages[3] {
            WorkerResponse::GenerateCompleted {
                job_id: id, primes, ..
            } => {
                assert_eq!(*id, job_id);
                assert_eq!(primes.len(), 3);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    /// A cancelled generation ends without any terminal message.
    #[test]
    fn cancelled_generate_is_silent() {
        let (tx, rx) = mpsc::channel();
        let cancel = AtomicBool::new(true);
        run_worker(
            WorkerRequest::Generate {
                job_id: Uuid::new_v4(),
                options: opts(24, 5),
            },
            &tx,
            &cancel,
        )
        .unwrap();
        drop(tx);

        let messages: Vec<_> = rx.iter().collect();
        assert!(
            messages.iter().all(|m| !m.is_terminal()),
            "cancellation must not produce a terminal message: {messages:?}"
        );
    }

    #[test]
    fn invalid_generate_reports_error() {
        let (tx, rx) = mpsc::channel();
        let cancel = AtomicBool::new(false);
        run_worker(
            WorkerRequest::Generate {
                job_id: Uuid::new_v4(),
                options: opts(1, 1), // below the 2-bit minimum
            },
            &tx,
            &cancel,
        )
        .unwrap();
        drop(tx);
        match rx.recv().unwrap() {
            WorkerResponse::Error { lane_id, .. } => assert!(lane_id.is_none()),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn recover_lane_finds_factors() {
        let (tx, rx) = mpsc::channel();
        let cancel = AtomicBool::new(false);
        let job_id = Uuid::new_v4();
        run_worker(
            WorkerRequest::Recover {
                job_id,
                lane_id: 7,
                n: "299".into(),
                start: "7".into(),
                end_exclusive: Some("20".into()),
                e: Some("5".into()),
            },
            &tx,
            &cancel,
        )
        .unwrap();
        drop(tx);
        match rx.recv().unwrap() {
            WorkerResponse::RecoverCompleted {
                job_id: id,
                lane_id,
                p,
                q,
                phi,
                d,
            } => {
                assert_eq!(id, job_id);
                assert_eq!(lane_id, 7);
                assert_eq!(p, "13");
                assert_eq!(q, "23");
                assert_eq!(phi, "264");
                // 5·53 = 265 ≡ 1 (mod 264)
                assert_eq!(d.as_deref(), Some("53"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    /// Omitting `end_exclusive` searches up to √n + 1.
    #[test]
    fn recover_defaults_to_sqrt_bound() {
        let (tx, rx) = mpsc::channel();
        let cancel = AtomicBool::new(false);
        run_worker(
            WorkerRequest::Recover {
                job_id: Uuid::new_v4(),
                lane_id: 0,
                n: (1237u64 * 1249).to_string(),
                start: "512".into(),
                end_exclusive: None,
                e: None,
            },
            &tx,
            &cancel,
        )
        .unwrap();
        drop(tx);
        match rx.recv().unwrap() {
            WorkerResponse::RecoverCompleted { p, q, .. } => {
                assert_eq!(p, "1237");
                assert_eq!(q, "1249");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn recover_miss_reports_not_found() {
        let (tx, rx) = mpsc::channel();
        let cancel = AtomicBool::new(false);
        run_worker(
            WorkerRequest::Recover {
                job_id: Uuid::new_v4(),
                lane_id: 1,
                n: "299".into(),
                start: "24".into(),
                end_exclusive: Some("100".into()),
                e: None,
            },
            &tx,
            &cancel,
        )
        .unwrap();
        drop(tx);
        assert!(matches!(
            rx.recv().unwrap(),
            WorkerResponse::NotFound { lane_id: 1, .. }
        ));
    }

    /// A malformed protocol field surfaces as an Err for the caller to
    /// convert, not a panic.
    #[test]
    fn malformed_field_is_an_error() {
        let (tx, _rx) = mpsc::channel();
        let cancel = AtomicBool::new(false);
        let result = run_worker(
            WorkerRequest::Recover {
                job_id: Uuid::new_v4(),
                lane_id: 0,
                n: "not-a-number".into(),
                start: "7".into(),
                end_exclusive: None,
                e: None,
            },
            &tx,
            &cancel,
        );
        assert!(result.is_err());
    }
}
