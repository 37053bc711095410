//! Capture Replay
//!
//! A [`Transport`] that impersonates a single OBU and streams frames from a
//! capture file once its TX characteristic is subscribed.
//!
//! Capture format: one hex-encoded frame per line. Blank lines and lines
//! starting with `#` are skipped; whitespace inside a frame is ignored.

use crate::domain::models::{Advertisement, DeviceId};
use crate::infrastructure::bluetooth::protocol::obu;
use crate::infrastructure::bluetooth::transport::{Transport, TransportError, TransportEvent};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

pub const REPLAY_DEVICE_ID: &str = "replay-obu";
pub const REPLAY_DEVICE_NAME: &str = "OBU-REPLAY";

/// Parse capture text into frames.
pub fn parse_capture(text: &str) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let compact: String = line.split_whitespace().collect();
        let frame = hex::decode(&compact)
            .with_context(|| format!("Invalid hex on line {}", index + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

pub fn load_capture(path: &Path) -> Result<Vec<Vec<u8>>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read capture {}", path.display()))?;
    parse_capture(&text)
}

pub struct ReplayTransport {
    device: DeviceId,
    frames: Vec<Vec<u8>>,
    interval: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: bool,
    streaming: bool,
    stop: Arc<AtomicBool>,
    done: Option<oneshot::Sender<usize>>,
}

impl ReplayTransport {
    /// The receiver yields the number of frames delivered once the capture
    /// has been fully streamed.
    pub fn new(
        frames: Vec<Vec<u8>>,
        interval: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> (Self, oneshot::Receiver<usize>) {
        let (done_tx, done_rx) = oneshot::channel();
        (
            Self {
                device: DeviceId::from(REPLAY_DEVICE_ID),
                frames,
                interval,
                events,
                connected: false,
                streaming: false,
                stop: Arc::new(AtomicBool::new(false)),
                done: Some(done_tx),
            },
            done_rx,
        )
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn ensure_device(&self, id: &DeviceId) -> Result<(), TransportError> {
        if id != &self.device {
            return Err(TransportError::UnknownDevice(id.clone()));
        }
        if !self.connected {
            return Err(TransportError::NotConnected(id.clone()));
        }
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), TransportError> {
        if self.streaming {
            return Ok(());
        }
        self.streaming = true;

        let frames = std::mem::take(&mut self.frames);
        let interval = self.interval;
        let events = self.events.clone();
        let stop = self.stop.clone();
        let device = self.device.clone();
        let done = self.done.take();

        info!("Replaying {} frames", frames.len());
        thread::Builder::new()
            .name("replay-stream".to_string())
            .spawn(move || {
                let mut delivered = 0;
                for bytes in frames {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if !interval.is_zero() {
                        thread::sleep(interval);
                    }
                    let sent = events.send(TransportEvent::NotificationValue {
                        id: device.clone(),
                        characteristic: obu::NUS_TX,
                        bytes,
                    });
                    if sent.is_err() {
                        break;
                    }
                    delivered += 1;
                }
                debug!("Replay finished after {} frames", delivered);
                if let Some(done) = done {
                    let _ = done.send(delivered);
                }
            })
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

impl Transport for ReplayTransport {
    fn scan(&mut self, _service_filters: &[Uuid]) -> Result<(), TransportError> {
        self.emit(TransportEvent::Discovered(Advertisement {
            id: self.device.clone(),
            name: Some(REPLAY_DEVICE_NAME.to_string()),
            service_uuids: vec![obu::NUS_SERVICE],
            rssi: -40,
        }));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connect(&mut self, id: &DeviceId) -> Result<(), TransportError> {
        if id != &self.device {
            return Err(TransportError::UnknownDevice(id.clone()));
        }
        self.connected = true;
        self.emit(TransportEvent::Connected(id.clone()));
        Ok(())
    }

    fn disconnect(&mut self, id: &DeviceId) -> Result<(), TransportError> {
        self.ensure_device(id)?;
        self.connected = false;
        self.stop.store(true, Ordering::Relaxed);
        self.emit(TransportEvent::Disconnected {
            id: id.clone(),
            reason: None,
        });
        Ok(())
    }

    fn discover_services(&mut self, id: &DeviceId) -> Result<(), TransportError> {
        self.ensure_device(id)?;
        self.emit(TransportEvent::ServicesDiscovered {
            id: id.clone(),
            services: vec![obu::NUS_SERVICE],
        });
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        id: &DeviceId,
        service: Uuid,
    ) -> Result<(), TransportError> {
        self.ensure_device(id)?;
        let characteristics = if service == obu::NUS_SERVICE {
            vec![obu::NUS_RX, obu::NUS_TX]
        } else {
            Vec::new()
        };
        self.emit(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            characteristics,
        });
        Ok(())
    }

    fn set_notify(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.ensure_device(id)?;
        self.emit(TransportEvent::NotificationStateChanged {
            id: id.clone(),
            characteristic,
            enabled,
        });
        if characteristic == obu::NUS_TX && enabled {
            self.start_streaming()?;
        }
        Ok(())
    }

    fn write(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        bytes: &[u8],
        _ack_required: bool,
    ) -> Result<(), TransportError> {
        self.ensure_device(id)?;
        if characteristic != obu::NUS_RX {
            return Err(TransportError::UnknownCharacteristic {
                id: id.clone(),
                characteristic,
            });
        }
        debug!("Replay device received {}", hex::encode(bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_parse_capture() {
        let text = "# session\n\n010000 01 00\n  0A0B0C18  \n";
        let frames = parse_capture(text).unwrap();
        assert_eq!(frames, vec![vec![1, 0, 0, 1, 0], vec![0x0A, 0x0B, 0x0C, 0x18]]);
    }

    #[test]
    fn test_parse_capture_reports_line() {
        let err = parse_capture("00000001\nzz\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_capture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# one frame").unwrap();
        writeln!(file, "0100007D01").unwrap();
        let frames = load_capture(file.path()).unwrap();
        assert_eq!(frames, vec![vec![1, 0, 0, 0x7D, 1]]);
    }

    #[tokio::test]
    async fn test_streams_after_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frames = vec![vec![0, 0, 0, 1], vec![0, 0, 0, 2]];
        let (mut transport, done) = ReplayTransport::new(frames, Duration::ZERO, tx);
        let id = transport.device_id().clone();

        transport.scan(&[]).unwrap();
        assert!(matches!(rx.recv().await, Some(TransportEvent::Discovered(_))));

        // Nothing may be done before connecting.
        assert_eq!(
            transport.discover_services(&id),
            Err(TransportError::NotConnected(id.clone()))
        );

        transport.connect(&id).unwrap();
        transport.set_notify(&id, obu::NUS_TX, true).unwrap();
        assert_eq!(done.await.unwrap(), 2);

        let mut values = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TransportEvent::NotificationValue { .. }) {
                values += 1;
            }
        }
        assert_eq!(values, 2);
    }
}
