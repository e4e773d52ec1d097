use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::{
    core::{
        receiver::ReceiveOutcome,
        store::{StoreError, TransmissionStore},
    },
    persist::RecordStore,
    transmission::{BinarySmsTransmission, HttpTransmission, TextSmsTransmission, Transmission},
    types::{LocalId, PayloadHash, PayloadType, RemoteId, SmsAgent, TimestampMs},
};

use super::events::TransmissionEvent;

/// Failures surfaced through a [`TransmissionHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The store rejected the request.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The service loop has stopped.
    #[error("transmission service is not running")]
    ChannelClosed,
    /// The blocking task running the request panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Queue sizes for the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pending commands before callers wait.
    pub command_queue_bound: usize,
    /// Events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            event_capacity: 1024,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

enum Command {
    Store {
        transmission: Transmission,
        resp: Reply<Transmission>,
    },
    Get {
        local_id: LocalId,
        resp: Reply<Option<Transmission>>,
    },
    FindBinary {
        correspondent: SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
        resp: Reply<Option<BinarySmsTransmission>>,
    },
    FindText {
        correspondent: SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
        resp: Reply<Option<TextSmsTransmission>>,
    },
    FindHttp {
        payload_type: PayloadType,
        payload_hash: PayloadHash,
        resp: Reply<Option<HttpTransmission>>,
    },
    Delete {
        transmission: Transmission,
        resp: Reply<bool>,
    },
    ReceiveBinary {
        sender: SmsAgent,
        data: Vec<u8>,
        received_at: TimestampMs,
        resp: Reply<ReceiveOutcome>,
    },
    ReceiveText {
        sender: SmsAgent,
        text: String,
        received_at: TimestampMs,
        resp: Reply<ReceiveOutcome>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

/// Cloneable handle to a running transmission service.
pub struct TransmissionHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<TransmissionEvent>,
}

impl Clone for TransmissionHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

/// Starts the single-writer loop owning `store`.
///
/// Commands run one at a time, in arrival order, on the blocking pool. Must be
/// called from within a tokio runtime.
pub fn spawn_transmission_service<S>(
    store: TransmissionStore<S>,
    config: RuntimeConfig,
) -> TransmissionHandle
where
    S: RecordStore + 'static,
{
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<TransmissionEvent>(config.event_capacity.max(1));

    let events_tx_loop = events_tx.clone();
    let store = Arc::new(Mutex::new(store));

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if handle_command(cmd, &store, &events_tx_loop).await {
                break;
            }
        }
        debug!("transmission service stopped");
    });

    TransmissionHandle { cmd_tx, events_tx }
}

impl TransmissionHandle {
    /// Subscribes to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TransmissionEvent> {
        self.events_tx.subscribe()
    }

    /// Stores `transmission`, returning it with its local ID set.
    pub async fn store(&self, transmission: Transmission) -> Result<Transmission, RuntimeError> {
        self.request(|resp| Command::Store { transmission, resp }).await
    }

    /// Transmission with the given local ID.
    pub async fn get(&self, local_id: LocalId) -> Result<Option<Transmission>, RuntimeError> {
        self.request(|resp| Command::Get { local_id, resp }).await
    }

    /// See [`TransmissionStore::retrieve_binary_sms_transmission`].
    pub async fn find_binary_sms(
        &self,
        correspondent: SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
    ) -> Result<Option<BinarySmsTransmission>, RuntimeError> {
        self.request(|resp| Command::FindBinary {
            correspondent,
            sent,
            remote_id,
            payload_hash,
            resp,
        })
        .await
    }

    /// See [`TransmissionStore::retrieve_text_sms_transmission`].
    pub async fn find_text_sms(
        &self,
        correspondent: SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
    ) -> Result<Option<TextSmsTransmission>, RuntimeError> {
        self.request(|resp| Command::FindText {
            correspondent,
            sent,
            remote_id,
            payload_hash,
            resp,
        })
        .await
    }

    /// See [`TransmissionStore::retrieve_http_transmission`].
    pub async fn find_http(
        &self,
        payload_type: PayloadType,
        payload_hash: PayloadHash,
    ) -> Result<Option<HttpTransmission>, RuntimeError> {
        self.request(|resp| Command::FindHttp {
            payload_type,
            payload_hash,
            resp,
        })
        .await
    }

    /// Deletes `transmission`; `false` when nothing was deleted.
    pub async fn delete(&self, transmission: Transmission) -> Result<bool, RuntimeError> {
        self.request(|resp| Command::Delete { transmission, resp }).await
    }

    /// Admits one inbound binary SMS.
    pub async fn receive_binary_sms(
        &self,
        sender: SmsAgent,
        data: Vec<u8>,
        received_at: TimestampMs,
    ) -> Result<ReceiveOutcome, RuntimeError> {
        self.request(|resp| Command::ReceiveBinary {
            sender,
            data,
            received_at,
            resp,
        })
        .await
    }

    /// Admits one inbound text SMS.
    pub async fn receive_text_sms(
        &self,
        sender: SmsAgent,
        text: String,
        received_at: TimestampMs,
    ) -> Result<ReceiveOutcome, RuntimeError> {
        self.request(|resp| Command::ReceiveText {
            sender,
            text,
            received_at,
            resp,
        })
        .await
    }

    /// Stops the loop after the commands queued before this one.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

async fn handle_command<S>(
    cmd: Command,
    store: &Arc<Mutex<TransmissionStore<S>>>,
    events_tx: &broadcast::Sender<TransmissionEvent>,
) -> bool
where
    S: RecordStore + 'static,
{
    match cmd {
        Command::Store {
            mut transmission,
            resp,
        } => {
            let res = run_blocking(store, move |store| {
                store.store_transmission(&mut transmission)?;
                Ok(transmission)
            })
            .await;
            if let Ok(t) = &res {
                if let Some(local_id) = t.local_id() {
                    let _ = events_tx.send(TransmissionEvent::Stored {
                        local_id,
                        kind: t.kind(),
                    });
                }
            }
            let _ = resp.send(res);
        }
        Command::Get { local_id, resp } => {
            let res = run_blocking(store, move |store| {
                store.retrieve_transmission_for_id(local_id)
            })
            .await;
            let _ = resp.send(res);
        }
        Command::FindBinary {
            correspondent,
            sent,
            remote_id,
            payload_hash,
            resp,
        } => {
            let res = run_blocking(store, move |store| {
                store.retrieve_binary_sms_transmission(
                    &correspondent,
                    sent,
                    remote_id,
                    payload_hash,
                )
            })
            .await;
            let _ = resp.send(res);
        }
        Command::FindText {
            correspondent,
            sent,
            remote_id,
            payload_hash,
            resp,
        } => {
            let res = run_blocking(store, move |store| {
                store.retrieve_text_sms_transmission(&correspondent, sent, remote_id, payload_hash)
            })
            .await;
            let _ = resp.send(res);
        }
        Command::FindHttp {
            payload_type,
            payload_hash,
            resp,
        } => {
            let res = run_blocking(store, move |store| {
                store.retrieve_http_transmission(payload_type, payload_hash)
            })
            .await;
            let _ = resp.send(res);
        }
        Command::Delete { transmission, resp } => {
            let local_id = transmission.local_id();
            let res = run_blocking(store, move |store| {
                Ok(store.delete_transmission(&transmission))
            })
            .await;
            if let (Ok(true), Some(local_id)) = (&res, local_id) {
                let _ = events_tx.send(TransmissionEvent::Deleted { local_id });
            }
            let _ = resp.send(res);
        }
        Command::ReceiveBinary {
            sender,
            data,
            received_at,
            resp,
        } => {
            let res = run_blocking(store, move |store| {
                store.receive_binary_sms(&sender, &data, received_at)
            })
            .await;
            emit_receive_event(events_tx, &res);
            let _ = resp.send(res);
        }
        Command::ReceiveText {
            sender,
            text,
            received_at,
            resp,
        } => {
            let res = run_blocking(store, move |store| {
                store.receive_text_sms(&sender, &text, received_at)
            })
            .await;
            emit_receive_event(events_tx, &res);
            let _ = resp.send(res);
        }
        Command::Shutdown { resp } => {
            let _ = resp.send(Ok(()));
            return true;
        }
    }

    false
}

async fn run_blocking<S, T>(
    store: &Arc<Mutex<TransmissionStore<S>>>,
    work: impl FnOnce(&mut TransmissionStore<S>) -> Result<T, StoreError> + Send + 'static,
) -> Result<T, RuntimeError>
where
    S: RecordStore + 'static,
    T: Send + 'static,
{
    let store_ref = Arc::clone(store);
    let joined = tokio::task::spawn_blocking(move || {
        let mut store = store_ref.blocking_lock();
        work(&mut *store)
    })
    .await;
    match joined {
        Ok(inner) => inner.map_err(RuntimeError::from),
        Err(err) => {
            warn!(error = %err, "store task failed");
            Err(RuntimeError::Join(err))
        }
    }
}

fn emit_receive_event(
    events_tx: &broadcast::Sender<TransmissionEvent>,
    res: &Result<ReceiveOutcome, RuntimeError>,
) {
    let event = match res {
        Ok(ReceiveOutcome::Pending {
            local_id,
            received,
            total,
        }) => TransmissionEvent::PartReceived {
            local_id: *local_id,
            received: *received,
            total: *total,
        },
        Ok(ReceiveOutcome::Complete(t)) => match t.local_id() {
            Some(local_id) => TransmissionEvent::Completed { local_id },
            None => return,
        },
        _ => return,
    };
    let _ = events_tx.send(event);
}
