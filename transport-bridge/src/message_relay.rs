//! Pumps messages between the bridge's internal channels and a transport's
//! inbox.
//!
//! This module handles bidirectional communication between a bridged host
//! and its clients. It spawns one background task per bridge endpoint that:
//! - Forwards client messages to the host, stamping `sender_id` so the host
//!   always knows who an action came from, regardless of what the client
//!   claimed.
//! - Forwards host broadcasts to a client only once it has seen a full
//!   state sync, so a client never applies a patch to state it doesn't have
//!   yet.
//!
//! The bridge never interprets game logic; it only relays [`WireMessage`]s.

use crate::lobby::{BridgeEnvelope, ClientEnvelope};
use protocol::{MessageKind, StateSyncPayload, WireMessage};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

type Inbox = Arc<Mutex<Vec<WireMessage>>>;

/// Spawns the task that feeds a host's inbox from every client's outbound
/// messages, stamping each with the client's real player id.
pub fn spawn_host_pump(
    mut to_host_receiver: mpsc::Receiver<ClientEnvelope>,
    inbox: Inbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = to_host_receiver.recv().await {
            let mut message = envelope.message;
            message.sender_id = Some(envelope.from);
            inbox.lock().expect("inbox poisoned").push(message);
        }
        tracing::debug!("host pump closed: channel exhausted");
    })
}

/// Spawns the task that feeds a client's inbox from the host's broadcast,
/// applying the sync-state gate so patches never arrive before a base
/// state has.
///
/// ```text
/// [Unsynced] --full state sync--> [Synced]
/// [Unsynced] --incremental sync--> [Unsynced] (dropped)
/// [Synced]   --any sync-->        [Synced] (forwarded)
/// ```
pub fn spawn_client_pump(
    mut receiver: broadcast::Receiver<BridgeEnvelope>,
    player_id: String,
    inbox: Inbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut is_synced = false;
        loop {
            let envelope = match receiver.recv().await {
                Ok(envelope) => envelope,
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("client pump closed: host channel closed");
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped_messages = skipped, "bridge client pump lagged");
                    continue;
                }
            };

            if let Some(target) = &envelope.to {
                if target != &player_id {
                    continue;
                }
            }

            if envelope.message.kind == MessageKind::StateSync {
                let is_full = envelope
                    .message
                    .decode::<StateSyncPayload>()
                    .map(|p| p.full_state.is_some())
                    .unwrap_or(false);
                if is_full {
                    is_synced = true;
                } else if !is_synced {
                    continue;
                }
            }

            inbox.lock().expect("inbox poisoned").push(envelope.message);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_sync_message() -> WireMessage {
        WireMessage::new(
            MessageKind::StateSync,
            &StateSyncPayload {
                patches: vec![],
                action_seed: None,
                action_name: None,
                full_state: Some(json!({})),
                base_seed: Some(1),
            },
        )
    }

    fn incremental_sync_message() -> WireMessage {
        WireMessage::new(
            MessageKind::StateSync,
            &StateSyncPayload {
                patches: vec![],
                action_seed: None,
                action_name: None,
                full_state: None,
                base_seed: None,
            },
        )
    }

    #[tokio::test]
    async fn client_pump_drops_incremental_syncs_until_full_sync_seen() {
        let (tx, rx) = broadcast::channel(8);
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_client_pump(rx, "p1".into(), inbox.clone());

        tx.send(BridgeEnvelope {
            to: None,
            message: incremental_sync_message(),
        })
        .unwrap();
        tx.send(BridgeEnvelope {
            to: None,
            message: full_sync_message(),
        })
        .unwrap();
        tx.send(BridgeEnvelope {
            to: None,
            message: incremental_sync_message(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let received = inbox.lock().unwrap();
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn host_pump_stamps_sender_id() {
        let (tx, rx) = mpsc::channel(8);
        let inbox: Inbox = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_host_pump(rx, inbox.clone());

        tx.send(ClientEnvelope {
            from: "p2".into(),
            message: incremental_sync_message(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let received = inbox.lock().unwrap();
        assert_eq!(received[0].sender_id.as_deref(), Some("p2"));
    }
}
