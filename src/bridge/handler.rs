//! Host-side receiver of upward messages.
//!
//! All session state the two sides of a task attempt share (completion,
//! failure cause, authentication, counter ids, stored progress) sits behind
//! one mutex. Waiters park on a [`Notify`] and re-check the state after
//! every wake-up.

use crate::bridge::counters::CounterRegistry;
use crate::bridge::partition::PartitionSlot;
use crate::error::{common, ErrorCode, PipesError, Result};
use crate::protocol::digest;
use crate::protocol::UpwardProtocol;
use crate::task::{ProgressCell, RecordWriter, TaskContext};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthState {
    /// No challenge issued yet.
    NotStarted,
    Pending { expected: String },
    Passed,
    Rejected,
}

#[derive(Debug)]
struct HandlerState {
    done: bool,
    failure: Option<PipesError>,
    auth: AuthState,
    digest_received: bool,
    counters: CounterRegistry,
    progress: f32,
}

pub struct OutputHandler {
    state: Mutex<HandlerState>,
    changed: Notify,
    output: Mutex<Box<dyn RecordWriter>>,
    partition_slot: PartitionSlot,
    progress_cell: Option<ProgressCell>,
    context: Arc<dyn TaskContext>,
}

impl OutputHandler {
    pub fn new(
        output: Box<dyn RecordWriter>,
        context: Arc<dyn TaskContext>,
        partition_slot: PartitionSlot,
        progress_cell: Option<ProgressCell>,
    ) -> Self {
        Self {
            state: Mutex::new(HandlerState {
                done: false,
                failure: None,
                auth: AuthState::NotStarted,
                digest_received: false,
                counters: CounterRegistry::new(),
                progress: 0.0,
            }),
            changed: Notify::new(),
            output: Mutex::new(output),
            partition_slot,
            progress_cell,
            context,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the handshake with the response the worker must send back.
    pub fn expect_digest(&self, expected: impl Into<String>) {
        self.lock().auth = AuthState::Pending {
            expected: expected.into(),
        };
    }

    /// Record a failure unless a terminal outcome was already reached.
    /// Returns the cause that is now in effect (or `cause` itself when the
    /// session already completed).
    pub fn record_failure(&self, cause: PipesError) -> PipesError {
        let effective = {
            let mut state = self.lock();
            match &state.failure {
                Some(existing) => {
                    tracing::debug!("Ignoring failure after the first one: {}", cause);
                    existing.clone()
                }
                None if state.done => {
                    tracing::warn!("Ignoring failure reported after DONE: {}", cause);
                    cause
                }
                None => {
                    tracing::error!("Task attempt failed: {}", cause);
                    state.failure = Some(cause.clone());
                    cause
                }
            }
        };
        self.changed.notify_waiters();
        effective
    }

    pub fn failure(&self) -> Option<PipesError> {
        self.lock().failure.clone()
    }

    /// `Err` with the recorded cause once the session has failed.
    pub fn check(&self) -> Result<()> {
        match self.failure() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn digest_received(&self) -> bool {
        self.lock().digest_received
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().auth == AuthState::Passed
    }

    /// Last progress reported by the worker.
    pub fn get_progress(&self) -> f32 {
        match &self.progress_cell {
            Some(cell) => cell.get(),
            None => self.lock().progress,
        }
    }

    pub fn partition_slot(&self) -> &PartitionSlot {
        &self.partition_slot
    }

    /// Wait until `check` yields a value, re-evaluating on every state change.
    async fn wait_until<T>(&self, mut check: impl FnMut(&HandlerState) -> Option<T>) -> T {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = check(&*self.lock());
            if let Some(result) = ready {
                return result;
            }
            notified.await;
        }
    }

    /// Block until the worker answered the challenge or the attempt failed.
    pub async fn wait_for_authentication(&self) -> Result<()> {
        self.wait_until(|state| {
            if let Some(failure) = &state.failure {
                return Some(Err(failure.clone()));
            }
            match state.auth {
                AuthState::Passed => Some(Ok(())),
                AuthState::Rejected => Some(Err(common::digest_mismatch())),
                _ => None,
            }
        })
        .await
    }

    /// Block until DONE (`Ok(true)`) or a failure.
    ///
    /// DONE without a successful handshake is an authentication failure.
    pub async fn wait_for_finish(&self) -> Result<bool> {
        self.wait_until(|state| {
            if let Some(failure) = &state.failure {
                return Some(Err(failure.clone()));
            }
            if !state.done {
                return None;
            }
            if state.auth == AuthState::Passed {
                Some(Ok(true))
            } else {
                Some(Err(PipesError::authentication_with_code(
                    ErrorCode::AUTH_NOT_PERFORMED,
                    "Worker reported DONE without authenticating",
                )))
            }
        })
        .await
    }

    /// Like [`wait_for_authentication`](Self::wait_for_authentication), with
    /// an optional deadline that turns into a recorded failure.
    pub async fn wait_for_authentication_within(&self, limit: Option<Duration>) -> Result<()> {
        match limit {
            None => self.wait_for_authentication().await,
            Some(limit) => match tokio::time::timeout(limit, self.wait_for_authentication()).await
            {
                Ok(result) => result,
                Err(_) => Err(self.record_failure(common::worker_timeout(
                    "the worker to authenticate",
                    limit.as_millis() as u64,
                ))),
            },
        }
    }

    pub async fn wait_for_finish_within(&self, limit: Option<Duration>) -> Result<bool> {
        match limit {
            None => self.wait_for_finish().await,
            Some(limit) => match tokio::time::timeout(limit, self.wait_for_finish()).await {
                Ok(result) => result,
                Err(_) => Err(self.record_failure(common::worker_timeout(
                    "the worker to finish",
                    limit.as_millis() as u64,
                ))),
            },
        }
    }

    /// Close the output sink once the worker is finished.
    pub fn close_output(&self) -> Result<()> {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).close()
    }

    fn write_output(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let result = self
            .output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .write(key, value);
        result.map_err(|e| self.record_failure(e))
    }
}

impl UpwardProtocol for OutputHandler {
    fn output(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_output(key, value)
    }

    fn partitioned_output(&self, partition: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition_slot.set(partition);
        self.write_output(key, value)
    }

    fn status(&self, text: &str) -> Result<()> {
        self.context.set_status(text);
        Ok(())
    }

    fn progress(&self, progress: f32) -> Result<()> {
        match &self.progress_cell {
            Some(cell) => cell.set(progress),
            None => self.lock().progress = progress,
        }
        Ok(())
    }

    fn done(&self) -> Result<()> {
        tracing::debug!("Worker reported DONE");
        self.lock().done = true;
        self.changed.notify_waiters();
        Ok(())
    }

    fn register_counter(&self, id: u32, group: &str, name: &str) -> Result<()> {
        let counter = self.context.counter(group, name);
        tracing::debug!("Registering counter {} as {}:{}", id, group, name);
        self.lock().counters.register(id, counter);
        Ok(())
    }

    fn increment_counter(&self, id: u32, amount: i64) -> Result<()> {
        let result = self.lock().counters.increment(id, amount);
        result.map_err(|e| self.record_failure(e))
    }

    fn authenticate(&self, received: &str) -> Result<()> {
        let outcome = {
            let mut state = self.lock();
            state.digest_received = true;
            let outcome = match &state.auth {
                AuthState::Pending { expected } if digest::digests_match(expected, received) => {
                    Ok(())
                }
                AuthState::Pending { .. } => Err(common::digest_mismatch()),
                AuthState::NotStarted => Err(PipesError::authentication(
                    "Worker sent a digest before any challenge was issued",
                )),
                AuthState::Passed | AuthState::Rejected => Err(PipesError::authentication(
                    "Worker authenticated more than once",
                )),
            };
            state.auth = if outcome.is_ok() {
                AuthState::Passed
            } else {
                AuthState::Rejected
            };
            outcome
        };

        match outcome {
            Ok(()) => {
                tracing::debug!("Worker authenticated");
                self.changed.notify_waiters();
                Ok(())
            }
            Err(e) => Err(self.record_failure(e)),
        }
    }

    fn failed(&self, cause: PipesError) {
        self.record_failure(cause);
    }
}

#[cfg(test)]
mod tests;
