//! Transport Module
//!
//! The radio stack sits behind the [`Transport`] trait. Every call is
//! fire-and-forget: results come back later as [`TransportEvent`]s on the
//! channel the transport was built with.
//!
//! All operations for every device run on one worker thread, so notifications
//! for a characteristic are delivered in the order the stack produced them.

use crate::domain::models::{Advertisement, DeviceId};
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("device {0} is not connected")]
    NotConnected(DeviceId),
    #[error("characteristic {characteristic} not found on {id}")]
    UnknownCharacteristic { id: DeviceId, characteristic: Uuid },
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("transport worker has shut down")]
    WorkerGone,
}

/// Short-range radio driver.
pub trait Transport: Send + 'static {
    /// Start discovery filtered by advertised services. The scan window is
    /// enforced by the caller, which calls [`Transport::stop_scan`] on expiry.
    fn scan(&mut self, service_filters: &[Uuid]) -> Result<(), TransportError>;
    fn stop_scan(&mut self) -> Result<(), TransportError>;
    fn connect(&mut self, id: &DeviceId) -> Result<(), TransportError>;
    fn disconnect(&mut self, id: &DeviceId) -> Result<(), TransportError>;
    /// Discover every service (no filter).
    fn discover_services(&mut self, id: &DeviceId) -> Result<(), TransportError>;
    fn discover_characteristics(
        &mut self,
        id: &DeviceId,
        service: Uuid,
    ) -> Result<(), TransportError>;
    fn set_notify(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError>;
    fn write(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        bytes: &[u8],
        ack_required: bool,
    ) -> Result<(), TransportError>;
}

/// Inbound events from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Discovered(Advertisement),
    Connected(DeviceId),
    ConnectFailed {
        id: DeviceId,
        reason: String,
    },
    Disconnected {
        id: DeviceId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        id: DeviceId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    NotificationStateChanged {
        id: DeviceId,
        characteristic: Uuid,
        enabled: bool,
    },
    NotificationValue {
        id: DeviceId,
        characteristic: Uuid,
        bytes: Vec<u8>,
    },
    /// A request failed before reaching the radio.
    OperationFailed {
        id: Option<DeviceId>,
        error: TransportError,
    },
}

/// One queued transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    Scan { service_filters: Vec<Uuid> },
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId),
    DiscoverCharacteristics { id: DeviceId, service: Uuid },
    SetNotify {
        id: DeviceId,
        characteristic: Uuid,
        enabled: bool,
    },
    Write {
        id: DeviceId,
        characteristic: Uuid,
        bytes: Vec<u8>,
        ack_required: bool,
    },
    Shutdown,
}

impl TransportRequest {
    fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Connect(id)
            | Self::Disconnect(id)
            | Self::DiscoverServices(id)
            | Self::DiscoverCharacteristics { id, .. }
            | Self::SetNotify { id, .. }
            | Self::Write { id, .. } => Some(id),
            Self::Scan { .. } | Self::StopScan | Self::Shutdown => None,
        }
    }

    fn execute<T: Transport + ?Sized>(&self, transport: &mut T) -> Result<(), TransportError> {
        match self {
            Self::Scan { service_filters } => transport.scan(service_filters),
            Self::StopScan => transport.stop_scan(),
            Self::Connect(id) => transport.connect(id),
            Self::Disconnect(id) => transport.disconnect(id),
            Self::DiscoverServices(id) => transport.discover_services(id),
            Self::DiscoverCharacteristics { id, service } => {
                transport.discover_characteristics(id, *service)
            }
            Self::SetNotify {
                id,
                characteristic,
                enabled,
            } => transport.set_notify(id, *characteristic, *enabled),
            Self::Write {
                id,
                characteristic,
                bytes,
                ack_required,
            } => transport.write(id, *characteristic, bytes, *ack_required),
            Self::Shutdown => Ok(()),
        }
    }
}

/// Sending side of the transport worker queue.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    requests: mpsc::UnboundedSender<TransportRequest>,
}

impl TransportHandle {
    pub fn new(requests: mpsc::UnboundedSender<TransportRequest>) -> Self {
        Self { requests }
    }

    pub fn submit(&self, request: TransportRequest) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::WorkerGone)
    }

    pub fn scan(&self, service_filters: &[Uuid]) -> Result<(), TransportError> {
        self.submit(TransportRequest::Scan {
            service_filters: service_filters.to_vec(),
        })
    }

    pub fn stop_scan(&self) -> Result<(), TransportError> {
        self.submit(TransportRequest::StopScan)
    }

    pub fn connect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.submit(TransportRequest::Connect(id.clone()))
    }

    pub fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.submit(TransportRequest::Disconnect(id.clone()))
    }

    pub fn discover_services(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.submit(TransportRequest::DiscoverServices(id.clone()))
    }

    pub fn discover_characteristics(
        &self,
        id: &DeviceId,
        service: Uuid,
    ) -> Result<(), TransportError> {
        self.submit(TransportRequest::DiscoverCharacteristics {
            id: id.clone(),
            service,
        })
    }

    pub fn set_notify(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.submit(TransportRequest::SetNotify {
            id: id.clone(),
            characteristic,
            enabled,
        })
    }

    pub fn write(
        &self,
        id: &DeviceId,
        characteristic: Uuid,
        bytes: Vec<u8>,
        ack_required: bool,
    ) -> Result<(), TransportError> {
        self.submit(TransportRequest::Write {
            id: id.clone(),
            characteristic,
            bytes,
            ack_required,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.requests.send(TransportRequest::Shutdown);
    }
}

/// Run `transport` on a dedicated thread that executes requests one at a time.
///
/// Failures are reported as [`TransportEvent::OperationFailed`] on `events`.
pub fn spawn_transport_worker<T: Transport>(
    mut transport: T,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> std::io::Result<(TransportHandle, thread::JoinHandle<()>)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<TransportRequest>();

    let join = thread::Builder::new()
        .name("transport-worker".to_string())
        .spawn(move || {
            while let Some(request) = rx.blocking_recv() {
                if request == TransportRequest::Shutdown {
                    debug!("Transport worker shutting down");
                    break;
                }

                if let Err(error) = request.execute(&mut transport) {
                    warn!("Transport request {:?} failed: {}", request, error);
                    let _ = events.send(TransportEvent::OperationFailed {
                        id: request.device().cloned(),
                        error,
                    });
                }
            }
        })?;

    Ok((TransportHandle::new(tx), join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for Recording {
        fn scan(&mut self, service_filters: &[Uuid]) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("scan:{}", service_filters.len()));
            Ok(())
        }
        fn stop_scan(&mut self) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push("stop_scan".into());
            Ok(())
        }
        fn connect(&mut self, id: &DeviceId) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(format!("connect:{}", id));
            Err(TransportError::UnknownDevice(id.clone()))
        }
        fn disconnect(&mut self, _id: &DeviceId) -> Result<(), TransportError> {
            Ok(())
        }
        fn discover_services(&mut self, _id: &DeviceId) -> Result<(), TransportError> {
            Ok(())
        }
        fn discover_characteristics(
            &mut self,
            _id: &DeviceId,
            _service: Uuid,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_notify(
            &mut self,
            _id: &DeviceId,
            _characteristic: Uuid,
            _enabled: bool,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn write(
            &mut self,
            _id: &DeviceId,
            _characteristic: Uuid,
            bytes: &[u8],
            _ack_required: bool,
        ) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("write:{}", hex::encode(bytes)));
            Ok(())
        }
    }

    #[test]
    fn test_worker_runs_requests_in_order() {
        let transport = Recording::default();
        let calls = transport.calls.clone();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (handle, join) = spawn_transport_worker(transport, events_tx).unwrap();

        let id = DeviceId::from("obu-1");
        handle.scan(&[Uuid::nil()]).unwrap();
        handle.stop_scan().unwrap();
        handle.connect(&id).unwrap();
        handle.write(&id, Uuid::nil(), vec![1, 0, 0, 0x7d, 1], true).unwrap();
        handle.shutdown();
        join.join().unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["scan:1", "stop_scan", "connect:obu-1", "write:0100007d01"]
        );

        // Only the failed connect is reported.
        assert_eq!(
            events_rx.try_recv().unwrap(),
            TransportEvent::OperationFailed {
                id: Some(id.clone()),
                error: TransportError::UnknownDevice(id),
            }
        );
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_reports_closed_worker() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = TransportHandle::new(tx);
        assert_eq!(handle.stop_scan(), Err(TransportError::WorkerGone));
    }
}
