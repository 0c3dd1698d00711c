//! Session manager
//!
//! Owns the table of running driver sessions: creation (driver resolution
//! through the capability registry, mapping snapshot load, task spawn),
//! explicit stop, status queries, mapping refresh and the property write
//! path. A session is never resurrected - every start builds a new session
//! object.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fieldgate_codec::{DataPoint, EngValue};

use crate::config::{DeviceDirectory, LimitsConfig, ReconnectConfig};
use crate::error::{AcqSrvError, Result};
use crate::logging::{DriverLogRing, SessionLogger};
use crate::mapping::MappingResolver;
use crate::registry::DriverRegistry;
use crate::runtime::reconnect::{ReconnectHelper, ReconnectPolicy};
use crate::runtime::session::{SessionCommand, SessionRuntime, SessionState, SessionStatus};

/// Handle to one running session task
struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

/// Lifecycle owner for all driver sessions
pub struct SessionManager {
    registry: Arc<DriverRegistry>,
    resolver: Arc<MappingResolver>,
    directory: Arc<DeviceDirectory>,
    limits: LimitsConfig,
    reconnect: ReconnectConfig,
    events: mpsc::Sender<DataPoint>,
    log_ring: Arc<DriverLogRing>,
    sessions: DashMap<String, SessionHandle>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<DriverRegistry>,
        resolver: Arc<MappingResolver>,
        directory: Arc<DeviceDirectory>,
        limits: LimitsConfig,
        reconnect: ReconnectConfig,
        events: mpsc::Sender<DataPoint>,
    ) -> Self {
        let log_ring = Arc::new(DriverLogRing::new(limits.log_ring_capacity));
        Self {
            registry,
            resolver,
            directory,
            limits,
            reconnect,
            events,
            log_ring,
            sessions: DashMap::new(),
        }
    }

    /// Structured driver log entries for the observability boundary
    pub fn log_ring(&self) -> &Arc<DriverLogRing> {
        &self.log_ring
    }

    /// Create and start a session for a configured device
    ///
    /// Fails without leaving a partial session if the device is unknown,
    /// disabled, already running, or its driver type is not registered.
    pub async fn start_session(&self, device_id: &str) -> Result<()> {
        let profile = self
            .directory
            .get(device_id)
            .ok_or_else(|| AcqSrvError::device_not_found(device_id))?;

        if !profile.enabled {
            return Err(AcqSrvError::validation(format!(
                "Device {} is disabled",
                device_id
            )));
        }

        // Reap a finished session first: a new object per (re)start
        if let Some(existing) = self.sessions.get(device_id) {
            if existing.task.is_finished() {
                drop(existing);
                self.sessions.remove(device_id);
            } else {
                return Err(AcqSrvError::session(format!(
                    "Session already running: {}",
                    device_id
                )));
            }
        }

        // Unknown driver type aborts creation before any resource is acquired
        let factory = self.registry.resolve(&profile.driver_type)?;
        let mappings = self.resolver.device_mappings(device_id)?;
        let driver = factory.create(&profile).await?;

        let state = Arc::new(RwLock::new(SessionState::default()));
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(16);
        let logger = SessionLogger::new(
            profile.driver_type.clone(),
            profile.device_key.clone(),
            self.log_ring.clone(),
        );

        let runtime = SessionRuntime {
            profile,
            driver,
            mappings,
            state: state.clone(),
            events: self.events.clone(),
            commands: command_rx,
            cancel: cancel.clone(),
            logger,
            limits: self.limits.clone(),
            reconnect: ReconnectHelper::new(ReconnectPolicy::from(&self.reconnect)),
        };

        let task = tokio::spawn(runtime.run());

        self.sessions.insert(
            device_id.to_string(),
            SessionHandle {
                state,
                cancel,
                commands: command_tx,
                task,
            },
        );

        info!(device_id, "session started");
        Ok(())
    }

    /// Stop a session and wait for its task to finish
    ///
    /// The in-flight poll cycle completes its decode before the transport
    /// handle is released; once this returns, the session is observably
    /// STOPPED and emits nothing further.
    pub async fn stop_session(&self, device_id: &str) -> Result<SessionState> {
        let (_, handle) = self
            .sessions
            .remove(device_id)
            .ok_or_else(|| AcqSrvError::session_not_found(device_id))?;

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            error!(device_id, "session task join failed: {}", e);
        }

        let state = handle.state.read().await.clone();
        info!(device_id, "session stopped");
        Ok(state)
    }

    /// Re-resolve the device's mappings and swap the session snapshot
    ///
    /// The new snapshot is visible to subsequently-started poll cycles only.
    pub async fn refresh_mappings(&self, device_id: &str) -> Result<()> {
        let snapshot = self.resolver.device_mappings(device_id)?;
        let commands = self.session_commands(device_id)?;
        commands
            .send(SessionCommand::RefreshMappings(snapshot))
            .await
            .map_err(|_| AcqSrvError::session(format!("Session task gone: {}", device_id)))
    }

    /// Encode and write one property value through the device's session
    pub async fn write_property(
        &self,
        device_id: &str,
        identifier: &str,
        value: EngValue,
    ) -> Result<()> {
        let (respond_to, response) = oneshot::channel();
        let commands = self.session_commands(device_id)?;
        commands
            .send(SessionCommand::Write {
                identifier: identifier.to_string(),
                value,
                respond_to,
            })
            .await
            .map_err(|_| AcqSrvError::session(format!("Session task gone: {}", device_id)))?;
        response
            .await
            .map_err(|_| AcqSrvError::session(format!("Session task gone: {}", device_id)))?
    }

    /// Clone a session's command sender without holding the table guard
    /// across an await point
    fn session_commands(&self, device_id: &str) -> Result<mpsc::Sender<SessionCommand>> {
        self.sessions
            .get(device_id)
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| AcqSrvError::session_not_found(device_id))
    }

    /// Current state of one session
    pub async fn status(&self, device_id: &str) -> Result<SessionState> {
        let handle = self
            .sessions
            .get(device_id)
            .ok_or_else(|| AcqSrvError::session_not_found(device_id))?;
        let state = handle.state.clone();
        drop(handle);
        Ok(state.read().await.clone())
    }

    /// States of all known sessions
    pub async fn statuses(&self) -> Vec<(String, SessionState)> {
        let handles: Vec<(String, Arc<RwLock<SessionState>>)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state.clone()))
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for (device_id, state) in handles {
            statuses.push((device_id, state.read().await.clone()));
        }
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    /// Whether a session exists and reports RUNNING
    pub async fn is_running(&self, device_id: &str) -> bool {
        matches!(
            self.status(device_id).await,
            Ok(SessionState {
                status: SessionStatus::Running,
                ..
            })
        )
    }

    /// Start sessions for all enabled configured devices
    ///
    /// Individual failures are logged and do not stop the remaining
    /// sessions from starting.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        let mut device_ids = self.directory.device_ids();
        device_ids.sort();

        for device_id in device_ids {
            let enabled = self
                .directory
                .get(&device_id)
                .map(|profile| profile.enabled)
                .unwrap_or(false);
            if !enabled {
                continue;
            }
            match self.start_session(&device_id).await {
                Ok(()) => started += 1,
                Err(e) => warn!(device_id = %device_id, "failed to start session: {}", e),
            }
        }

        info!(started, "session startup completed");
        started
    }

    /// Stop all sessions concurrently in an orderly manner
    pub async fn shutdown_all(&self) {
        use futures::future::join_all;

        let device_ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        info!(count = device_ids.len(), "stopping all sessions");
        let results = join_all(
            device_ids
                .iter()
                .map(|device_id| self.stop_session(device_id)),
        )
        .await;

        for (device_id, result) in device_ids.iter().zip(results) {
            if let Err(e) = result {
                error!(device_id = %device_id, "error stopping session: {}", e);
            }
        }
    }
}
