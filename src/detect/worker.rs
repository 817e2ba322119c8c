//! Detection worker thread.
//!
//! The worker is the asynchrony seam of the capture loop: detection calls
//! have no bounded latency, so they run on a dedicated thread and the loop
//! polls for outcomes on its tick. At most one job is ever dispatched at a
//! time per loop; the frame moves into the job and comes back with the
//! outcome, so it stays valid for the whole call.
//!
//! Cancellation is fire-and-forget. Dropping the worker closes the job
//! channel; an in-flight call finishes in the background and its outcome is
//! discarded when the send fails.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectorBackend, ModelParams};
use crate::detect::result::Detection;
use crate::frame::Frame;

struct DetectJob {
    generation: u64,
    frame: Frame,
    params: ModelParams,
}

/// A resolved detection call.
pub struct DetectOutcome {
    /// Cancellation generation the job was dispatched under.
    pub generation: u64,
    /// The frame, returned for overlay rendering.
    pub frame: Frame,
    /// Detection result; errors are per-frame and non-fatal.
    pub result: Result<Vec<Detection>>,
}

/// Handle to the detection worker thread.
pub struct DetectorWorker {
    jobs: Option<Sender<DetectJob>>,
    outcomes: Receiver<DetectOutcome>,
}

impl DetectorWorker {
    /// Spawn a worker around a negotiated backend handle.
    pub fn spawn(backend: Arc<Mutex<dyn DetectorBackend>>) -> Self {
        let (job_tx, job_rx) = channel::<DetectJob>();
        let (outcome_tx, outcome_rx) = channel::<DetectOutcome>();

        std::thread::spawn(move || {
            while let Ok(job) = job_rx.recv() {
                let result = match backend.lock() {
                    Ok(mut guard) => guard.detect(
                        job.frame.pixels(),
                        job.frame.width,
                        job.frame.height,
                        &job.params,
                    ),
                    Err(_) => Err(anyhow!("detector backend lock poisoned")),
                };
                let outcome = DetectOutcome {
                    generation: job.generation,
                    frame: job.frame,
                    result,
                };
                if outcome_tx.send(outcome).is_err() {
                    // Loop side is gone; nothing left to report to.
                    break;
                }
            }
        });

        Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
        }
    }

    /// Dispatch one detection. The frame is owned by the worker until the
    /// outcome comes back.
    pub fn dispatch(&self, frame: Frame, generation: u64, params: ModelParams) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("detector worker is shut down"))?;
        jobs.send(DetectJob {
            generation,
            frame,
            params,
        })
        .map_err(|_| anyhow!("detector worker thread stopped"))
    }

    /// Non-blocking poll for a resolved outcome.
    pub fn try_recv(&self) -> Option<DetectOutcome> {
        self.outcomes.try_recv().ok()
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the thread's recv loop. No join: an
        // in-flight detection finishes in the background and its outcome
        // send fails harmlessly.
        self.jobs.take();
    }
}
