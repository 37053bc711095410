//! Device Registry
//!
//! Single owner of every known peripheral. The connected subset is derived
//! from each record's link state. Every mutation publishes
//! [`AppEvent::DevicesChanged`] with the full device list.

use crate::domain::models::{Advertisement, AppEvent, DeviceId, DeviceRecord, LinkState};
use crate::domain::pages::{DeviceInfo, DeviceUuid};
use crate::infrastructure::bluetooth::protocol;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, DeviceRecord>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl DeviceRegistry {
    pub fn new(event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            devices: BTreeMap::new(),
            event_sender,
        }
    }

    /// Insert a newly discovered peripheral. Known identifiers are left as is.
    pub fn insert_discovered(&mut self, advertisement: &Advertisement) -> bool {
        if self.devices.contains_key(&advertisement.id) {
            return false;
        }

        let kind = protocol::classify(advertisement);
        debug!(
            "Discovered {} ({}) as {}",
            advertisement.id,
            advertisement.name.as_deref().unwrap_or("Unknown"),
            kind
        );
        self.devices.insert(
            advertisement.id.clone(),
            DeviceRecord::scanned(advertisement, kind),
        );
        self.broadcast();
        true
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn records(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Connected device with this identifier.
    pub fn connected_device(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.devices.get(id).filter(|d| d.is_connected())
    }

    pub fn set_link(&mut self, id: &DeviceId, link: LinkState) -> bool {
        self.update(id, |record| {
            record.link = link;
            if link == LinkState::Disconnected {
                record.notifying.clear();
            }
        })
    }

    /// Record discovered services. Characteristic lists start empty.
    pub fn set_services(&mut self, id: &DeviceId, services: &[Uuid]) -> bool {
        self.update(id, |record| {
            record.services = services.iter().map(|s| (*s, Vec::new())).collect();
            record.link = LinkState::ServicesDiscovered;
        })
    }

    pub fn set_characteristics(
        &mut self,
        id: &DeviceId,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> bool {
        self.update(id, |record| {
            record.services.insert(service, characteristics.to_vec());
        })
    }

    pub fn set_notifying(&mut self, id: &DeviceId, characteristic: Uuid, enabled: bool) -> bool {
        self.update(id, |record| {
            if enabled {
                record.notifying.insert(characteristic);
            } else {
                record.notifying.remove(&characteristic);
            }
        })
    }

    pub fn set_auto_reconnect(&mut self, id: &DeviceId, enabled: bool) -> bool {
        self.update(id, |record| record.auto_reconnect = enabled)
    }

    pub fn set_disconnect_requested(&mut self, id: &DeviceId, requested: bool) -> bool {
        self.update(id, |record| record.disconnect_requested = requested)
    }

    pub fn set_device_uuid(&mut self, id: &DeviceId, uuid: DeviceUuid) -> bool {
        self.update(id, |record| record.device_uuid = Some(uuid))
    }

    pub fn set_device_info(&mut self, id: &DeviceId, info: DeviceInfo) -> bool {
        self.update(id, |record| record.device_info = Some(info))
    }

    /// Drop every record that is not connected.
    pub fn clear_scanned(&mut self) {
        let before = self.devices.len();
        self.devices.retain(|_, record| record.is_connected());
        if self.devices.len() != before {
            self.broadcast();
        }
    }

    pub fn clear(&mut self) {
        if !self.devices.is_empty() {
            self.devices.clear();
            self.broadcast();
        }
    }

    fn update(&mut self, id: &DeviceId, f: impl FnOnce(&mut DeviceRecord)) -> bool {
        let Some(record) = self.devices.get_mut(id) else {
            debug!("Ignoring update for unknown device {}", id);
            return false;
        };
        f(record);
        self.broadcast();
        true
    }

    fn broadcast(&self) {
        let _ = self
            .event_sender
            .send(AppEvent::DevicesChanged(self.records()));
    }
}
