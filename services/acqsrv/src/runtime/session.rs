//! Driver session runtime
//!
//! One task per configured device. The task owns the driver (and through it
//! the transport handle) exclusively: connect, poll in batched reads, decode
//! each mapping, emit data points through the bounded event channel, and
//! handle write/refresh commands between cycles.
//!
//! Cancellation is observed only at the inter-poll suspension point, so an
//! in-flight cycle always finishes its decode before teardown releases the
//! transport handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use fieldgate_codec::{decode, encode, DataPoint, EngValue, FunctionCode, RawFrame, RegisterMapping};

use crate::config::{DeviceProfile, LimitsConfig};
use crate::drivers::DeviceDriver;
use crate::error::{AcqSrvError, Result};
use crate::logging::SessionLogger;
use crate::runtime::reconnect::ReconnectHelper;

/// Session status on the observability boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Queryable session state: status plus the last error message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: SessionStatus::Stopped,
            last_error: None,
        }
    }
}

/// Commands handled by the session task between poll cycles
pub enum SessionCommand {
    /// Encode and write one property value to the device
    Write {
        identifier: String,
        value: EngValue,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// Replace the mapping snapshot wholesale; takes effect from the next
    /// poll cycle, never mid-cycle
    RefreshMappings(Arc<Vec<RegisterMapping>>),
}

/// Sliding-window decode error counter
struct DecodeErrorWindow {
    threshold: u32,
    window: Duration,
    events: VecDeque<Instant>,
}

impl DecodeErrorWindow {
    fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            events: VecDeque::new(),
        }
    }

    /// Record one decode error; returns true when the threshold is crossed
    /// within the window
    fn record(&mut self, now: Instant) -> bool {
        self.events.push_back(now);
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.len() as u32 >= self.threshold
    }
}

/// One planned contiguous read
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadBatch {
    function_code: FunctionCode,
    start_address: u16,
    count: u16,
}

/// Group read mappings into contiguous batched reads per function code
///
/// Batches split when the function code changes or the window would exceed
/// `max_batch` registers; large address gaps therefore split naturally.
fn plan_batches(mappings: &[&RegisterMapping], max_batch: u16) -> Vec<ReadBatch> {
    let mut sorted: Vec<&RegisterMapping> = mappings.to_vec();
    sorted.sort_by_key(|m| (m.function_code.as_u8(), m.register_address));

    let mut batches = Vec::new();
    let mut current: Option<ReadBatch> = None;

    for mapping in sorted {
        let end = mapping.end_address();
        let extend = current.as_ref().is_some_and(|batch| {
            batch.function_code == mapping.function_code
                && (end - batch.start_address + 1) <= max_batch
        });

        if extend {
            if let Some(batch) = current.as_mut() {
                batch.count = batch.count.max(end - batch.start_address + 1);
            }
        } else {
            if let Some(batch) = current.take() {
                batches.push(batch);
            }
            current = Some(ReadBatch {
                function_code: mapping.function_code,
                start_address: mapping.register_address,
                count: mapping.register_count(),
            });
        }
    }

    if let Some(batch) = current {
        batches.push(batch);
    }
    batches
}

/// Outcome of one completed poll cycle
#[derive(Debug, Default)]
struct CycleOutcome {
    points_emitted: usize,
    decode_errors: u32,
    threshold_tripped: bool,
}

enum ConnectOutcome {
    Connected,
    Cancelled,
    Exhausted(String),
}

/// State owned by one spawned session task
pub(crate) struct SessionRuntime {
    pub profile: DeviceProfile,
    pub driver: Box<dyn DeviceDriver>,
    pub mappings: Arc<Vec<RegisterMapping>>,
    pub state: Arc<RwLock<SessionState>>,
    pub events: mpsc::Sender<DataPoint>,
    pub commands: mpsc::Receiver<SessionCommand>,
    pub cancel: CancellationToken,
    pub logger: SessionLogger,
    pub limits: LimitsConfig,
    pub reconnect: ReconnectHelper,
}

impl SessionRuntime {
    pub(crate) async fn run(mut self) {
        self.logger.log_init("session starting");

        match self.establish_connection().await {
            ConnectOutcome::Connected => {
                self.set_status(SessionStatus::Running, "transport connected")
                    .await;
            },
            ConnectOutcome::Cancelled => {
                self.teardown().await;
                return;
            },
            ConnectOutcome::Exhausted(error) => {
                self.set_error(&error).await;
                self.park_until_cancelled().await;
                self.teardown().await;
                return;
            },
        }

        let mut ticker = interval(self.profile.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut errors = DecodeErrorWindow::new(
            self.limits.decode_error_threshold,
            Duration::from_secs(self.limits.decode_error_window_secs),
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        // Manager gone: nothing can stop or observe us anymore
                        None => break,
                    }
                },
                _ = ticker.tick() => {
                    let snapshot = self.mappings.clone();
                    match self.run_cycle(&snapshot, &mut errors).await {
                        Ok(outcome) => {
                            self.logger
                                .log_poll_result(outcome.points_emitted, outcome.decode_errors);
                            if outcome.threshold_tripped {
                                self.set_error("decode error rate exceeded threshold").await;
                            } else if outcome.decode_errors == 0 {
                                self.recover_if_errored().await;
                            }
                        },
                        Err(error) => {
                            self.logger.log_transport_error(&error.to_string());
                            self.set_error(&error.to_string()).await;
                            match self.establish_connection().await {
                                ConnectOutcome::Connected => {
                                    self.set_status(SessionStatus::Running, "reconnected").await;
                                },
                                ConnectOutcome::Cancelled => break,
                                ConnectOutcome::Exhausted(error) => {
                                    self.set_error(&error).await;
                                    self.park_until_cancelled().await;
                                    break;
                                },
                            }
                        },
                    }
                },
            }
        }

        self.teardown().await;
    }

    /// Connect with bounded exponential backoff; a stop request interrupts
    /// any backoff wait immediately.
    async fn establish_connection(&mut self) -> ConnectOutcome {
        self.reconnect.reset();
        let mut last_error = String::from("not attempted");

        loop {
            if self.reconnect.attempts_exhausted() {
                return ConnectOutcome::Exhausted(last_error);
            }

            if let Some(delay) = self.reconnect.begin_attempt() {
                self.logger.log_retry(
                    self.reconnect.current_attempt(),
                    self.reconnect.max_attempts(),
                    delay.as_millis() as u64,
                    &last_error,
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return ConnectOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {},
                }
            }

            let attempt = timeout(self.profile.timeout(), self.driver.connect()).await;
            match attempt {
                Ok(Ok(())) => {
                    self.reconnect.mark_success();
                    self.logger
                        .log_connect(&self.profile.device_key, "transport connected");
                    return ConnectOutcome::Connected;
                },
                Ok(Err(error)) => {
                    self.reconnect.mark_failure();
                    last_error = error.to_string();
                },
                Err(_) => {
                    self.reconnect.mark_failure();
                    last_error = format!("connect timed out after {:?}", self.profile.timeout());
                },
            }
        }
    }

    /// One poll cycle: batched reads, then decode and emit in resolved
    /// mapping order. Decode failures are isolated per mapping; a transport
    /// failure aborts the cycle.
    async fn run_cycle(
        &mut self,
        mappings: &[RegisterMapping],
        errors: &mut DecodeErrorWindow,
    ) -> Result<CycleOutcome> {
        let readable: Vec<&RegisterMapping> = mappings
            .iter()
            .filter(|m| m.function_code.is_read())
            .collect();
        if readable.is_empty() {
            return Ok(CycleOutcome::default());
        }

        let batches = plan_batches(&readable, self.limits.max_batch_registers);

        let mut frames: Vec<(FunctionCode, RawFrame)> = Vec::with_capacity(batches.len());
        for batch in &batches {
            let frame = timeout(
                self.profile.timeout(),
                self.driver
                    .read_frame(batch.function_code, batch.start_address, batch.count),
            )
            .await
            .map_err(|_| {
                AcqSrvError::timeout(format!(
                    "read {} @{} x{} timed out after {:?}",
                    batch.function_code, batch.start_address, batch.count, self.profile.timeout()
                ))
            })??;
            frames.push((batch.function_code, frame));
        }

        let mut outcome = CycleOutcome::default();
        for mapping in readable {
            let frame = frames
                .iter()
                .find(|(fc, frame)| {
                    *fc == mapping.function_code
                        && frame.covers(mapping.register_address, mapping.register_count())
                })
                .or_else(|| frames.iter().find(|(fc, _)| *fc == mapping.function_code));

            let result = match frame {
                Some((_, frame)) => decode(frame, mapping).map_err(AcqSrvError::from),
                None => Err(AcqSrvError::decode(format!(
                    "no frame acquired for function code {}",
                    mapping.function_code
                ))),
            };

            match result {
                Ok(value) => {
                    let point = DataPoint::new(
                        self.profile.device_id.clone(),
                        mapping.identifier.clone(),
                        value,
                        mapping.register_address,
                        mapping.function_code,
                    );
                    // Bounded channel: block on a lagging sink rather than
                    // dropping telemetry
                    if self.events.send(point).await.is_err() {
                        warn!(
                            device = %self.profile.device_key,
                            "event sink closed, data point discarded"
                        );
                    } else {
                        outcome.points_emitted += 1;
                    }
                },
                Err(error) => {
                    outcome.decode_errors += 1;
                    self.logger
                        .log_decode_error(&mapping.identifier, &error.to_string());
                    if errors.record(Instant::now()) {
                        outcome.threshold_tripped = true;
                    }
                },
            }
        }

        Ok(outcome)
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::RefreshMappings(snapshot) => {
                self.mappings = snapshot;
                self.logger.log_init("mapping snapshot refreshed");
            },
            SessionCommand::Write {
                identifier,
                value,
                respond_to,
            } => {
                let result = self.write_property(&identifier, &value).await;
                match &result {
                    Ok(()) => self.logger.log_write(&identifier, Ok(())),
                    Err(error) => {
                        let message = error.to_string();
                        self.logger.log_write(&identifier, Err(message.as_str()));
                    },
                }
                let _ = respond_to.send(result);
            },
        }
    }

    /// Resolve a writable mapping for the identifier, encode and write
    async fn write_property(&mut self, identifier: &str, value: &EngValue) -> Result<()> {
        let mapping = self
            .mappings
            .iter()
            .find(|m| m.identifier == identifier && m.function_code.is_write())
            .cloned()
            .ok_or_else(|| {
                AcqSrvError::mapping(format!(
                    "No writable mapping for {}/{}",
                    self.profile.device_id, identifier
                ))
            })?;

        let encoded = encode(value, &mapping)?;
        timeout(
            self.profile.timeout(),
            self.driver
                .write(mapping.function_code, mapping.register_address, &encoded),
        )
        .await
        .map_err(|_| {
            AcqSrvError::timeout(format!(
                "write {} timed out after {:?}",
                identifier,
                self.profile.timeout()
            ))
        })?
    }

    /// Remain in ERROR, still serving commands, until stopped
    async fn park_until_cancelled(&mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.cancel.cancelled().await;
                        return;
                    },
                },
            }
        }
    }

    async fn set_status(&self, new: SessionStatus, reason: &str) {
        let mut state = self.state.write().await;
        if state.status != new {
            self.logger.log_status(state.status, new, reason);
        }
        state.status = new;
    }

    async fn set_error(&self, message: &str) {
        let mut state = self.state.write().await;
        if state.status != SessionStatus::Error {
            self.logger
                .log_status(state.status, SessionStatus::Error, message);
        }
        state.status = SessionStatus::Error;
        state.last_error = Some(message.to_string());
    }

    async fn recover_if_errored(&self) {
        let mut state = self.state.write().await;
        if state.status == SessionStatus::Error {
            self.logger.log_status(
                state.status,
                SessionStatus::Running,
                "clean cycle after errors",
            );
            state.status = SessionStatus::Running;
        }
    }

    async fn teardown(mut self) {
        let _ = self.driver.disconnect().await;
        self.set_status(SessionStatus::Stopped, "session stopped")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgate_codec::DataType;

    fn read_mapping(identifier: &str, address: u16, data_type: DataType) -> RegisterMapping {
        RegisterMapping::new(identifier, address, FunctionCode::Read03, data_type)
    }

    #[test]
    fn test_plan_batches_contiguous() {
        let a = read_mapping("a", 100, DataType::Int);
        let b = read_mapping("b", 101, DataType::Int);
        let c = read_mapping("c", 102, DataType::Float);
        let refs: Vec<&RegisterMapping> = vec![&a, &b, &c];

        let batches = plan_batches(&refs, 120);
        assert_eq!(
            batches,
            vec![ReadBatch {
                function_code: FunctionCode::Read03,
                start_address: 100,
                count: 4,
            }]
        );
    }

    #[test]
    fn test_plan_batches_splits_on_function_code() {
        let a = read_mapping("a", 0, DataType::Int);
        let b = RegisterMapping::new("b", 0, FunctionCode::Read01, DataType::Bool);
        let refs: Vec<&RegisterMapping> = vec![&a, &b];

        let batches = plan_batches(&refs, 120);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].function_code, FunctionCode::Read01);
        assert_eq!(batches[1].function_code, FunctionCode::Read03);
    }

    #[test]
    fn test_plan_batches_splits_on_wide_gap() {
        let a = read_mapping("a", 0, DataType::Int);
        let b = read_mapping("b", 1000, DataType::Int);
        let refs: Vec<&RegisterMapping> = vec![&a, &b];

        let batches = plan_batches(&refs, 120);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start_address, 0);
        assert_eq!(batches[1].start_address, 1000);
    }

    #[test]
    fn test_plan_batches_shared_register() {
        // Two packed bools in the same register produce one single-register read
        let a = read_mapping("valve", 7, DataType::Bool);
        let b = read_mapping("pump", 7, DataType::Bool);
        let refs: Vec<&RegisterMapping> = vec![&a, &b];

        let batches = plan_batches(&refs, 120);
        assert_eq!(
            batches,
            vec![ReadBatch {
                function_code: FunctionCode::Read03,
                start_address: 7,
                count: 1,
            }]
        );
    }

    #[test]
    fn test_decode_error_window() {
        let mut window = DecodeErrorWindow::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(!window.record(now));
        assert!(!window.record(now));
        assert!(window.record(now));
    }

    #[test]
    fn test_decode_error_window_expires_old_events() {
        let mut window = DecodeErrorWindow::new(2, Duration::from_millis(10));
        let start = Instant::now();
        assert!(!window.record(start));
        // An event far outside the window does not accumulate
        assert!(!window.record(start + Duration::from_secs(1)));
    }

    #[test]
    fn test_session_state_default() {
        let state = SessionState::default();
        assert_eq!(state.status, SessionStatus::Stopped);
        assert!(state.last_error.is_none());
    }
}
