//! One step's consume / execute / forward loop.

use log::{debug, error, info, warn};
use serde_json::json;

use crate::broadcast::{StepPhase, StepProgressTracker};
use crate::context::AppContext;
use crate::db::{process_repo, ProcessStatus};
use crate::handler::{HandlerRegistry, StepContext, StepError, StepHandler};
use crate::pipeline::{PipelineState, SerializableException, StepResult, Stopwatch};
use crate::queue::{encode_body, move_to_dead_letter, QueueMessage};
use crate::supervisor::ShutdownToken;

use super::DispatchError;

/// What [`QueueDispatchLoop::run_once`] did with the message it looked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The queue was empty.
    Idle,
    /// The step succeeded and the document was forwarded to `next_step`.
    Advanced { process_id: String, next_step: String },
    /// The last step succeeded.
    Completed { process_id: String },
    /// The step failed and the message was left for redelivery.
    Retrying { process_id: String, dequeue_count: u32 },
    /// The step failed too often and the message was moved to the dead-letter queue.
    DeadLettered { process_id: String },
    /// The body was not a pipeline state and went straight to the dead-letter queue.
    Rejected { message_id: String },
}

/// Polls one step's queue and runs that step's handler on every message.
pub struct QueueDispatchLoop {
    step: String,
    app: AppContext,
    handler: Box<dyn StepHandler>,
    queue: String,
    dead_letter_queue: String,
}

impl QueueDispatchLoop {
    pub fn new(step: &str, app: AppContext, handler: Box<dyn StepHandler>) -> Self {
        let queue = app.queue_name(step);
        let dead_letter_queue = app.dead_letter_queue_name(step);
        Self {
            step: step.to_string(),
            app,
            handler,
            queue,
            dead_letter_queue,
        }
    }

    pub fn from_registry(
        step: &str,
        app: AppContext,
        registry: &HandlerRegistry,
    ) -> Result<Self, DispatchError> {
        let handler = registry.build(step, &app)?;
        Ok(Self::new(step, app, handler))
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn dead_letter_queue_name(&self) -> &str {
        &self.dead_letter_queue
    }

    /// Creates the live and dead-letter queues if needed. Returns the number
    /// of messages waiting in the live queue.
    pub fn prepare(&self) -> Result<u64, DispatchError> {
        let transport = &self.app.queue;
        transport.ensure_queue(&self.queue)?;
        transport.ensure_queue(&self.dead_letter_queue)?;

        let waiting = transport.approximate_count(&self.queue)?;
        info!(
            "Step {} listening on {} ({} messages waiting)",
            self.step, self.queue, waiting
        );
        Ok(waiting)
    }

    /// Loops until `shutdown` is signalled. A message in flight is always
    /// finished before the loop returns.
    pub fn run(&self, shutdown: &ShutdownToken) -> Result<(), DispatchError> {
        self.prepare()?;
        let poll_interval = self.app.config.queue.poll_interval();

        while !shutdown.is_shutdown() {
            match self.run_once() {
                Ok(DispatchOutcome::Idle) => {
                    if shutdown.wait_timeout(poll_interval) {
                        break;
                    }
                }
                Ok(outcome) => debug!("Step {}: {:?}", self.step, outcome),
                Err(e) => {
                    error!("Step {} dispatch failed: {}", self.step, e);
                    if shutdown.wait_timeout(poll_interval) {
                        break;
                    }
                }
            }
        }

        info!("Step {} stopped", self.step);
        Ok(())
    }

    /// Receives and handles at most one message.
    pub fn run_once(&self) -> Result<DispatchOutcome, DispatchError> {
        let lease = self.app.config.queue.process_timeout();
        let Some(message) = self.app.queue.receive(&self.queue, lease)? else {
            return Ok(DispatchOutcome::Idle);
        };

        let span = tracing::info_span!(
            "dispatch",
            step = %self.step,
            message_id = %message.id,
            process_id = tracing::field::Empty,
        );
        let _guard = span.enter();

        let mut state = match PipelineState::from_message_body(&message.body) {
            Ok(state) => state,
            Err(e) => return self.reject(&message, &e.to_string()),
        };
        span.record("process_id", state.process_id.as_str());

        let tracker = self.tracker(&state.process_id);
        tracker.phase(StepPhase::Received, "Message received");
        self.log_info(&format!(
            "Process {} received by {} (delivery {})",
            state.process_id, self.step, message.dequeue_count
        ));

        let stopwatch = Stopwatch::start();
        match self.advance(&mut state, &stopwatch, &tracker) {
            Ok(next_step) => {
                // The state is already forwarded. If this delete fails the
                // message is redelivered and the next step may see it twice.
                self.app.queue.delete(&self.queue, &message)?;
                let elapsed = stopwatch.elapsed_string();
                tracker.completed(&elapsed);

                let process_id = state.process_id.clone();
                match next_step {
                    Some(next_step) => {
                        let status = ProcessStatus::Step(next_step.clone());
                        self.keep_going(&process_id, self.set_status(&process_id, &status, None));
                        self.log_info(&format!(
                            "Process {} finished {} in {}, forwarded to {}",
                            process_id, self.step, elapsed, next_step
                        ));
                        Ok(DispatchOutcome::Advanced { process_id, next_step })
                    }
                    None => {
                        self.keep_going(
                            &process_id,
                            self.set_status(&process_id, &ProcessStatus::Completed, None),
                        );
                        info!("Process {} completed in step {}", process_id, self.step);
                        Ok(DispatchOutcome::Completed { process_id })
                    }
                }
            }
            Err(e) => self.handle_failure(&message, state, &stopwatch, &tracker, e),
        }
    }

    /// Runs the handler and forwards the advanced state. Returns the step the
    /// document was forwarded to, if any.
    fn advance(
        &self,
        state: &mut PipelineState,
        stopwatch: &Stopwatch,
        tracker: &StepProgressTracker,
    ) -> Result<Option<String>, StepError> {
        state.pipeline_status.begin_step(&self.step)?;
        tracker.phase(StepPhase::Started, "Step started");

        let payload = {
            let mut ctx = StepContext::new(&self.step, &self.app, state);
            self.handler.execute(&mut ctx)?
        };

        let result = StepResult::success(&state.process_id, &self.step, payload)
            .with_elapsed(stopwatch.elapsed_string());
        self.app.storage.save_step_result(&result)?;
        state.pipeline_status.add_step_result(result);
        state.pipeline_status.complete_step(&self.step)?;
        self.app.storage.save_pipeline_state(state)?;

        let next_step = state.pipeline_status.next_step().map(str::to_string);
        if let Some(next) = &next_step {
            let body = encode_body(&state.to_json()?, self.app.config.queue.message_encoding);
            self.app.queue.send(&self.app.queue_name(next), &body)?;
        }

        Ok(next_step)
    }

    /// Routes the failed message first, then records the failure. Once the
    /// message has been routed, persistence errors are logged and do not
    /// change the outcome.
    fn handle_failure(
        &self,
        message: &QueueMessage,
        mut state: PipelineState,
        stopwatch: &Stopwatch,
        tracker: &StepProgressTracker,
        err: StepError,
    ) -> Result<DispatchOutcome, DispatchError> {
        let elapsed = stopwatch.elapsed_string();
        let reason = err.to_string();
        let exception = SerializableException::from_error(&err, Some(&self.step));
        let threshold = self.app.config.queue.dead_letter_threshold;
        let process_id = state.process_id.clone();

        if message.dequeue_count > threshold {
            error!(
                "Process {} failed in {} after {} deliveries: {}",
                process_id, self.step, message.dequeue_count, reason
            );
            move_to_dead_letter(
                self.app.queue.as_ref(),
                message,
                &self.queue,
                &self.dead_letter_queue,
            )?;

            let result = StepResult::dead_lettered(&process_id, &self.step, exception.clone())
                .with_elapsed(elapsed.clone());
            state.pipeline_status.mark_failed(exception);
            self.record_failure(&mut state, result);
            self.keep_going(
                &process_id,
                self.set_status(&process_id, &ProcessStatus::Failed, Some(reason.as_str())),
            );
            self.keep_going(&process_id, self.save_failure_output(&state));
            tracker.failed(StepPhase::DeadLettered, Some(&elapsed), &reason);

            return Ok(DispatchOutcome::DeadLettered { process_id });
        }

        warn!(
            "Process {} failed in {} (delivery {} of {}), will retry: {}",
            process_id, self.step, message.dequeue_count, threshold, reason
        );
        self.app.queue.extend_lease(
            &self.queue,
            message,
            self.app.config.queue.visibility_timeout(),
        )?;

        let result =
            StepResult::error(&process_id, &self.step, exception).with_elapsed(elapsed.clone());
        self.record_failure(&mut state, result);
        self.keep_going(
            &process_id,
            self.set_status(&process_id, &ProcessStatus::Retrying, Some(reason.as_str())),
        );
        tracker.failed(StepPhase::Retrying, Some(&elapsed), &reason);

        Ok(DispatchOutcome::Retrying {
            process_id,
            dequeue_count: message.dequeue_count,
        })
    }

    /// Adds `result` to the state and writes both to storage.
    fn record_failure(&self, state: &mut PipelineState, result: StepResult) {
        let saved = self.app.storage.save_step_result(&result);
        state.pipeline_status.add_step_result(result);
        state.pipeline_status.touch();
        let saved = saved.and_then(|_| self.app.storage.save_pipeline_state(state));
        if let Err(e) = saved {
            error!(
                "Failed to store failure of process {} in {}: {}",
                state.process_id, self.step, e
            );
        }
    }

    fn keep_going(&self, process_id: &str, result: Result<(), DispatchError>) {
        if let Err(e) = result {
            error!(
                "Failed to record status of process {} in {}: {}",
                process_id, self.step, e
            );
        }
    }

    /// Keeps the failed step's error next to the process record.
    fn save_failure_output(&self, state: &PipelineState) -> Result<(), DispatchError> {
        let outputs: Vec<_> = state
            .pipeline_status
            .process_results
            .iter()
            .map(|r| {
                json!({
                    "step_name": r.step_name,
                    "processed_time": r.elapsed,
                    "step_result": r.result,
                })
            })
            .collect();
        let output = json!(outputs).to_string();
        process_repo::set_process_output(&self.app.db, &state.process_id, &output)?;
        Ok(())
    }

    fn reject(&self, message: &QueueMessage, reason: &str) -> Result<DispatchOutcome, DispatchError> {
        error!(
            "Message {} on {} is not a pipeline state, dead-lettering it: {}",
            message.id, self.queue, reason
        );
        move_to_dead_letter(
            self.app.queue.as_ref(),
            message,
            &self.queue,
            &self.dead_letter_queue,
        )?;
        self.tracker("").failed(StepPhase::Rejected, None, reason);
        Ok(DispatchOutcome::Rejected {
            message_id: message.id.clone(),
        })
    }

    fn set_status(
        &self,
        process_id: &str,
        status: &ProcessStatus,
        error: Option<&str>,
    ) -> Result<(), DispatchError> {
        process_repo::upsert_status(&self.app.db, process_id, status, Some(&self.step), error)?;
        Ok(())
    }

    fn tracker(&self, process_id: &str) -> StepProgressTracker {
        match &self.app.progress {
            Some(broadcaster) => broadcaster.track(process_id, &self.step),
            None => StepProgressTracker::detached(process_id, &self.step),
        }
    }

    fn log_info(&self, message: &str) {
        if self.app.config.show_information {
            info!("{}", message);
        } else {
            debug!("{}", message);
        }
    }
}
