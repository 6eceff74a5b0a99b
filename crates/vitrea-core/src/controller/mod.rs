// ── Controller abstraction ──
//
// Full lifecycle management for one VBox: the session task keeps a
// connection alive and synchronized, the router feeds the store, and
// commands are correlated with their acknowledgements.

mod backoff;
mod router;
mod session;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vitrea_api::{Connection, ParameterReply, ParameterRequest, ReplyClass, Request, Response};

use crate::catalog::{ParameterExchange, expect_parameter};
use crate::command::DeviceCommand;
use crate::config::ControllerConfig;
use crate::correlator::CommandCorrelator;
use crate::error::{CommandError, CoreError};
use crate::model::{Device, DeviceId, DeviceKind};
use crate::store::DeviceStore;
use crate::stream::{ChangeStream, DeviceStream};

/// Floor for the sweeper period, so a zero command timeout cannot spin.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(100);

// ── SessionState ────────────────────────────────────────────────────

/// Session state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Synchronizing,
    Live,
    Reconnecting { attempt: u32 },
    Stopped,
}

impl SessionState {
    pub fn is_live(self) -> bool {
        self == Self::Live
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Synchronizing => f.write_str("synchronizing"),
            Self::Live => f.write_str("live"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. [`start`](Self::start)
/// spawns the session task, which connects, authenticates, resyncs and
/// reconnects with backoff until [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    config: ControllerConfig,
    store: Arc<DeviceStore>,
    correlator: Arc<CommandCorrelator>,
    state: watch::Sender<SessionState>,
    /// Current connection. Held across submit and write so that pending
    /// entries are registered in wire order.
    link: Mutex<Option<Connection>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    /// Discovery has run (or been given up on) for this controller.
    catalog_loaded: AtomicBool,
    last_failure: StdMutex<Option<String>>,
}

impl Controller {
    /// Create a new Controller from configuration. Does NOT connect;
    /// call [`start()`](Self::start).
    pub fn new(config: ControllerConfig) -> Self {
        let correlator = Arc::new(CommandCorrelator::new(config.command_timeout));
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                store: Arc::new(DeviceStore::new()),
                correlator,
                state,
                link: Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                catalog_loaded: AtomicBool::new(false),
                last_failure: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.inner.store
    }

    pub fn correlator(&self) -> &Arc<CommandCorrelator> {
        &self.inner.correlator
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawns the session and sweeper tasks. Returns immediately; watch
    /// [`state()`](Self::state) or use [`wait_live`](Self::wait_live).
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(CoreError::AlreadyStarted);
        }

        info!(address = %self.inner.config.address(), "Starting controller session");
        let mut handles = self.inner.task_handles.lock().await;

        let cancel = self.inner.cancel.clone();
        handles.push(tokio::spawn(session::session_loop(
            Arc::clone(&self.inner),
            cancel.clone(),
        )));

        let period = self.inner.config.command_timeout.max(MIN_SWEEP_PERIOD);
        handles.push(tokio::spawn(sweep_task(
            Arc::clone(&self.inner.correlator),
            period,
            cancel,
        )));

        Ok(())
    }

    /// Stops the session for good.
    ///
    /// Cancels background tasks, closes the socket, fails every pending
    /// command with [`CommandError::Cancelled`], then publishes
    /// [`SessionState::Stopped`].
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.drop_link().await;

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.set_state(SessionState::Stopped);
        info!("Controller session stopped");
    }

    // ── One-shot convenience ─────────────────────────────────────────

    /// One-shot: start, wait for the first live session, run closure,
    /// shut down.
    ///
    /// Fails instead of retrying if the first connection attempt fails.
    pub async fn oneshot<F, Fut, T>(config: ControllerConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let controller = Controller::new(config);
        controller.start().await?;
        let result = match controller.first_session().await {
            Ok(()) => f(controller.clone()).await,
            Err(e) => Err(e),
        };
        controller.shutdown().await;
        result
    }

    /// Waits until the session is Live.
    pub async fn wait_live(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut rx = self.inner.state.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, SessionState::Live | SessionState::Stopped)),
        )
        .await;
        match settled {
            Ok(Ok(state)) if state.is_live() => Ok(()),
            Ok(_) => Err(CoreError::Stopped),
            Err(_) => Err(CoreError::Timeout {
                what: "live session",
                timeout,
            }),
        }
    }

    /// Resolves at the first Live, or fails at the first Reconnecting.
    async fn first_session(&self) -> Result<(), CoreError> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|s| {
                matches!(
                    s,
                    SessionState::Live | SessionState::Reconnecting { .. } | SessionState::Stopped
                )
            })
            .await
            .map(|s| *s)
            .map_err(|_| CoreError::Stopped)?;

        match state {
            SessionState::Live => Ok(()),
            SessionState::Stopped => Err(CoreError::Stopped),
            _ => Err(CoreError::SessionFailed {
                message: self
                    .inner
                    .take_failure()
                    .unwrap_or_else(|| "connection lost during setup".into()),
            }),
        }
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to session state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Completion time of every resync, starting with the first.
    pub fn resyncs(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.store.resyncs()
    }

    /// Subscribe to per-device state changes.
    pub fn changes(&self) -> ChangeStream {
        self.inner.store.changes()
    }

    /// Subscribe to the sorted device collection.
    pub fn devices(&self) -> DeviceStream {
        self.inner.store.subscribe_devices()
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.snapshot()
    }

    pub fn list_devices(&self) -> Vec<(DeviceId, DeviceKind)> {
        self.inner.store.list_devices()
    }

    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.inner.store.get(id)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Sends `command` to `id` and waits for the controller to accept it.
    ///
    /// The device kind comes from the store, or from the id itself for
    /// thermostats and scenarios. Once acknowledged, the optimistic delta of
    /// the command (if any) is applied; the status push that follows wins.
    pub async fn send_command(
        &self,
        id: &DeviceId,
        command: DeviceCommand,
    ) -> Result<(), CommandError> {
        let current = self.inner.store.get(id);
        let kind = current
            .as_ref()
            .map(|device| device.kind)
            .or_else(|| id.implied_kind())
            .ok_or_else(|| CommandError::Invalid(format!("kind of device {id} is unknown")))?;
        let plan = command.plan(*id, kind, current.as_ref().map(|device| &device.state))?;

        if !self.session_state().is_live() {
            return Err(CommandError::NotConnected);
        }

        debug!(%id, %command, request = %plan.request, "Sending command");
        if plan.request.reply_class() == ReplyClass::None {
            return self.inner.write(&plan.request).await;
        }
        self.inner.transact(&plan.request).await?;

        if let Some(delta) = plan.optimistic {
            self.inner.store.apply_local(*id, &delta);
        }
        Ok(())
    }
}

// ── ControllerInner ─────────────────────────────────────────────────

impl ControllerInner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    /// Writes a request that expects no reply.
    async fn write(&self, request: &Request) -> Result<(), CommandError> {
        let link = self.link.lock().await;
        let connection = link.as_ref().ok_or(CommandError::NotConnected)?;
        connection.send(request).await?;
        Ok(())
    }

    /// Registers, writes and awaits one correlated request.
    async fn transact(&self, request: &Request) -> Result<Response, CommandError> {
        let id = {
            let link = self.link.lock().await;
            let connection = link.as_ref().ok_or(CommandError::NotConnected)?;
            let id = self.correlator.submit(request)?;
            if let Err(e) = connection.send(request).await {
                self.correlator.cancel(id);
                return Err(e.into());
            }
            id
        };
        self.correlator
            .await_result(id, self.config.command_timeout)
            .await
    }

    /// Closes and forgets the current connection, failing everything
    /// still waiting on it.
    async fn drop_link(&self) {
        if let Some(connection) = self.link.lock().await.take() {
            connection.close();
        }
        let cancelled = self.correlator.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending commands");
        }
        self.store.abort_resync();
    }

    fn record_failure(&self, error: &CoreError) {
        *lock(&self.last_failure) = Some(error.to_string());
    }

    fn take_failure(&self) -> Option<String> {
        lock(&self.last_failure).take()
    }
}

impl ParameterExchange for ControllerInner {
    async fn query(&self, request: ParameterRequest) -> Result<ParameterReply, CommandError> {
        expect_parameter(self.transact(&Request::Parameter(request)).await?)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Background tasks ────────────────────────────────────────────────

/// Drops pending entries whose replies were lost.
async fn sweep_task(
    correlator: Arc<CommandCorrelator>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                correlator.sweep();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn unreachable_config() -> ControllerConfig {
        let mut config = ControllerConfig::new("127.0.0.1");
        config.port = 1;
        config.connect_timeout = Duration::from_millis(200);
        config
    }

    #[tokio::test]
    async fn commands_fail_fast_when_not_live() {
        let controller = Controller::new(ControllerConfig::default());
        let err = controller
            .send_command(&DeviceId::Ac(1), DeviceCommand::TurnOn)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotConnected));
    }

    #[tokio::test]
    async fn invalid_commands_are_rejected_before_the_session_check() {
        let controller = Controller::new(ControllerConfig::default());
        let err = controller
            .send_command(&DeviceId::Key { node: 1, key: 1 }, DeviceCommand::TurnOn)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let controller = Controller::new(unreachable_config());
        controller.start().await.unwrap();
        assert!(matches!(
            controller.start().await,
            Err(CoreError::AlreadyStarted)
        ));
        controller.shutdown().await;
        assert_eq!(controller.session_state(), SessionState::Stopped);
        assert!(matches!(controller.start().await, Err(CoreError::Stopped)));
    }

    #[tokio::test]
    async fn oneshot_reports_first_connect_failure() {
        let result = Controller::oneshot(unreachable_config(), |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(CoreError::SessionFailed { .. })));
    }

    #[test]
    fn session_state_serializes_with_tag() {
        let json = serde_json::to_string(&SessionState::Reconnecting { attempt: 2 }).unwrap();
        assert_eq!(json, r#"{"state":"reconnecting","attempt":2}"#);
        assert_eq!(SessionState::Live.to_string(), "live");
    }
}
