// ── Session state machine ──
//
// Connect, authenticate, synchronize, then route until the link drops.
// Every failure ends in Reconnecting with exponential backoff; only
// shutdown leaves the loop.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use vitrea_api::{Connection, DisconnectReason, Request};

use super::backoff::Backoff;
use super::router::route_frames;
use super::{ControllerInner, SessionState};
use crate::catalog;
use crate::error::{CommandError, CoreError};
use crate::model::{DeviceId, DeviceKind};

pub(super) async fn session_loop(inner: Arc<ControllerInner>, cancel: CancellationToken) {
    let mut backoff = Backoff::new(&inner.config.reconnect);

    loop {
        inner.set_state(SessionState::Connecting);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            outcome = run_session(&inner, &cancel) => outcome,
        };
        inner.drop_link().await;

        match outcome {
            Ok(reason) => {
                tracing::warn!(%reason, "Connection to controller lost");
                backoff.reset();
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = backoff.attempt(), "Session attempt failed");
                inner.record_failure(&e);
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        let attempt = backoff.attempt();
        inner.set_state(SessionState::Reconnecting { attempt });
        let delay = backoff.next_delay();
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("Session loop exiting");
}

/// One connection from socket open to loss. `Ok` carries the loss reason
/// of a session that reached Live.
async fn run_session(
    inner: &Arc<ControllerInner>,
    cancel: &CancellationToken,
) -> Result<DisconnectReason, CoreError> {
    let config = &inner.config;
    let (connection, frames) =
        Connection::connect(&config.address(), config.connection_config()).await?;
    *inner.link.lock().await = Some(connection);

    let stop_router = cancel.child_token();
    let router = tokio::spawn(route_frames(
        frames,
        Arc::clone(&inner.store),
        Arc::clone(&inner.correlator),
        stop_router.clone(),
    ));

    if let Err(e) = establish(inner).await {
        // The router must be gone before the next session registers
        // commands, or its loss handling would cancel them.
        stop_router.cancel();
        let _ = router.await;
        return Err(e);
    }

    inner.set_state(SessionState::Live);
    tracing::info!(devices = inner.store.len(), "Session live");

    router.await.map_err(|e| {
        tracing::error!(error = %e, "Frame router panicked");
        CoreError::ControllerDisconnected
    })
}

async fn establish(inner: &ControllerInner) -> Result<(), CoreError> {
    inner.set_state(SessionState::Authenticating);
    authenticate(inner).await?;

    inner.set_state(SessionState::Synchronizing);
    synchronize(inner).await
}

async fn authenticate(inner: &ControllerInner) -> Result<(), CoreError> {
    let request = Request::authenticate(inner.config.password.expose_secret());
    match inner.transact(&request).await {
        Ok(_) => Ok(()),
        Err(CommandError::Timeout(_)) => Err(CoreError::AuthenticationFailed {
            message: "controller did not acknowledge the password".into(),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn synchronize(inner: &ControllerInner) -> Result<(), CoreError> {
    if inner.config.discover && !inner.catalog_loaded.load(Ordering::Acquire) {
        load_catalog(inner).await?;
    }

    inner.store.begin_resync();
    inner.write(&Request::GetFullStatus).await?;
    for request in status_queries(&inner.store.list_devices()) {
        inner.write(&request).await?;
    }
    barrier(inner).await?;

    // Keys the full status did not cover get one direct query each.
    let missed = inner.store.unseen_provisional_keys();
    if !missed.is_empty() {
        tracing::debug!(keys = missed.len(), "Querying keys missing from full status");
        for (node, key) in missed {
            inner.write(&Request::GetKeyStatus { node, key }).await?;
        }
        barrier(inner).await?;
    }

    let confirmed = inner.store.finish_resync();
    tracing::info!(confirmed, "Resync complete");
    Ok(())
}

/// Status lines come back in order; the ack for this ping arrives after
/// all of them.
async fn barrier(inner: &ControllerInner) -> Result<(), CoreError> {
    let ping = Request::authenticate(inner.config.password.expose_secret());
    inner.transact(&ping).await?;
    Ok(())
}

/// Per-device status queries for what `H:NALL:G` does not report.
fn status_queries(devices: &[(DeviceId, DeviceKind)]) -> Vec<Request> {
    let mut queries: Vec<Request> = devices
        .iter()
        .filter_map(|(id, _)| match *id {
            DeviceId::Ac(ac) => Some(Request::GetAcStatus { ac }),
            DeviceId::Input(input) => Some(Request::GetInputStatus { input }),
            _ => None,
        })
        .collect();
    if devices.iter().any(|(id, _)| *id == DeviceId::Occupancy) {
        queries.push(Request::GetOccupancy);
    }
    queries
}

async fn load_catalog(inner: &ControllerInner) -> Result<(), CoreError> {
    match catalog::discover(inner).await {
        Ok(entries) => {
            inner.store.register(&entries);
        }
        Err(e @ (CoreError::Command(CommandError::Rejected { .. }) | CoreError::Frame(_))) => {
            tracing::warn!(error = %e, "Catalog unavailable, learning devices from pushes");
        }
        Err(e) => return Err(e),
    }
    inner.catalog_loaded.store(true, Ordering::Release);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_queries_cover_inputs_thermostats_and_occupancy() {
        let devices = [
            (DeviceId::Key { node: 42, key: 1 }, DeviceKind::Light),
            (DeviceId::Ac(2), DeviceKind::Thermostat),
            (DeviceId::Input(4), DeviceKind::BinarySensor),
            (DeviceId::Occupancy, DeviceKind::BinarySensor),
        ];
        let lines: Vec<String> = status_queries(&devices)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, ["H:A002:G", "H:I004:G", "H:C:G"]);
    }

    #[test]
    fn no_queries_without_such_devices() {
        let devices = [(DeviceId::Key { node: 1, key: 1 }, DeviceKind::Switch)];
        assert!(status_queries(&devices).is_empty());
    }
}
