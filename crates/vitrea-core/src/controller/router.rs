// ── Frame router ──
//
// One task per connection. Pushes go to the store in wire order, replies
// to the correlator. When the connection dies every pending command is
// failed before the reason is handed back to the session.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vitrea_api::{ConnectionEvent, DisconnectReason, Frame, Frames, Response};

use crate::correlator::CommandCorrelator;
use crate::model::{DeviceId, DeviceState, ScenarioState};
use crate::store::DeviceStore;

pub(crate) async fn route_frames(
    mut frames: Frames,
    store: Arc<DeviceStore>,
    correlator: Arc<CommandCorrelator>,
    cancel: CancellationToken,
) -> DisconnectReason {
    let reason = loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break DisconnectReason::Closed,
            event = frames.recv() => event,
        };
        match event {
            Some(ConnectionEvent::Frame(frame)) => dispatch(frame, &store, &correlator),
            Some(ConnectionEvent::Corrupt(e)) => {
                tracing::debug!(error = %e, "Skipped corrupt input");
            }
            Some(ConnectionEvent::Lost(reason)) => break reason,
            None => break DisconnectReason::PeerClosed,
        }
    };

    let cancelled = correlator.cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, %reason, "Pending commands cancelled by connection loss");
    }
    reason
}

fn dispatch(frame: Frame, store: &DeviceStore, correlator: &CommandCorrelator) {
    match frame {
        Frame::Push(push) => {
            store.apply_push(&push);
        }
        Frame::Response(response) => {
            if let Response::ScenarioResult { id, ok } = response {
                store.apply_local(
                    DeviceId::Scenario(id),
                    &DeviceState::Scenario(ScenarioState {
                        last_run_ok: Some(ok),
                    }),
                );
            }
            correlator.route(response);
        }
        Frame::Command(request) => {
            tracing::trace!(%request, "Echo");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use vitrea_api::{Connection, ConnectionConfig, Request};

    use super::*;
    use crate::error::CommandError;

    async fn connected() -> (Connection, Frames, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (connect, accept) = tokio::join!(
            Connection::connect(&addr, ConnectionConfig::default()),
            listener.accept()
        );
        let (connection, frames) = connect.unwrap();
        (connection, frames, accept.unwrap().0)
    }

    #[tokio::test]
    async fn pushes_reach_the_store_and_replies_the_correlator() {
        let (_connection, frames, mut peer) = connected().await;
        let store = Arc::new(DeviceStore::new());
        let correlator = Arc::new(CommandCorrelator::new(Duration::from_secs(5)));
        let id = correlator
            .submit(&Request::KeyOff { node: 7, key: 1 })
            .unwrap();

        let cancel = CancellationToken::new();
        let router = tokio::spawn(route_frames(
            frames,
            Arc::clone(&store),
            Arc::clone(&correlator),
            cancel.clone(),
        ));

        peer.write_all(b"S:N007:1:F\r\nOK\r\n").await.unwrap();
        let reply = correlator
            .await_result(id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Response::Ok);
        assert!(store.get(&DeviceId::Key { node: 7, key: 1 }).is_some());

        cancel.cancel();
        assert_eq!(router.await.unwrap(), DisconnectReason::Closed);
    }

    #[tokio::test]
    async fn connection_loss_cancels_pending_commands() {
        let (_connection, frames, peer) = connected().await;
        let store = Arc::new(DeviceStore::new());
        let correlator = Arc::new(CommandCorrelator::new(Duration::from_secs(5)));
        let id = correlator
            .submit(&Request::KeyOff { node: 7, key: 1 })
            .unwrap();

        let router = tokio::spawn(route_frames(
            frames,
            store,
            Arc::clone(&correlator),
            CancellationToken::new(),
        ));
        drop(peer);

        assert_eq!(router.await.unwrap(), DisconnectReason::PeerClosed);
        let err = correlator
            .await_result(id, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn scenario_result_records_outcome() {
        let (_connection, frames, mut peer) = connected().await;
        let store = Arc::new(DeviceStore::new());
        let correlator = Arc::new(CommandCorrelator::new(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        let router = tokio::spawn(route_frames(
            frames,
            Arc::clone(&store),
            correlator,
            cancel.clone(),
        ));

        let mut changes = store.changes();
        peer.write_all(b"S:R0012:OK\r\n").await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.id, DeviceId::Scenario(12));
        assert_eq!(
            change.new.state,
            DeviceState::Scenario(ScenarioState {
                last_run_ok: Some(true),
            })
        );

        cancel.cancel();
        router.await.unwrap();
    }
}
