use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::fanout::DeviceListener;
use super::types::*;

/// Thread-safe copy of the device set, kept current by a listener on the
/// PipeWire thread and read from anywhere (UI thread, CLI).
///
/// This is a derived copy: it never shares memory with the canonical set,
/// so readers can hold snapshots as long as they like.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: RwLock<HashMap<ObjectId, DeviceRecord>>,
    defaults: RwLock<HashMap<DeviceKind, ObjectId>>,
    change_counter: RwLock<u64>,
}

impl DeviceTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A listener that writes into this table.
    pub fn listener(self: &Arc<Self>) -> DeviceTableListener {
        DeviceTableListener {
            table: self.clone(),
        }
    }

    fn mark_changed(&self) {
        let mut counter = self.change_counter.write();
        *counter = counter.wrapping_add(1);
    }

    /// Bumped on every mutation; pollers compare it to skip redraws.
    pub fn change_counter(&self) -> u64 {
        *self.change_counter.read()
    }

    pub fn insert(&self, record: DeviceRecord) {
        self.devices.write().insert(record.id, record);
        self.mark_changed();
    }

    pub fn remove(&self, id: ObjectId) -> Option<DeviceRecord> {
        let record = self.devices.write().remove(&id);
        if record.is_some() {
            self.mark_changed();
        }
        record
    }

    pub fn set_volume(&self, id: ObjectId, volume: f32) {
        if let Some(record) = self.devices.write().get_mut(&id)
            && record.volume != volume
        {
            record.volume = volume;
            self.mark_changed();
        }
    }

    pub fn set_muted(&self, id: ObjectId, muted: bool) {
        if let Some(record) = self.devices.write().get_mut(&id)
            && record.muted != muted
        {
            record.muted = muted;
            self.mark_changed();
        }
    }

    pub fn set_default(&self, kind: DeviceKind, id: Option<ObjectId>) {
        let previous = match id {
            Some(id) => self.defaults.write().insert(kind, id),
            None => self.defaults.write().remove(&kind),
        };
        if previous != id {
            self.mark_changed();
        }
    }

    pub fn default_device(&self, kind: DeviceKind) -> Option<ObjectId> {
        self.defaults.read().get(&kind).copied()
    }

    pub fn get(&self, id: ObjectId) -> Option<DeviceRecord> {
        self.devices.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// All devices, sinks first, each group ordered by name then id.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        devices
    }

    pub fn sinks(&self) -> Vec<DeviceRecord> {
        self.of_kind(DeviceKind::Sink)
    }

    pub fn sources(&self) -> Vec<DeviceRecord> {
        self.of_kind(DeviceKind::Source)
    }

    fn of_kind(&self, kind: DeviceKind) -> Vec<DeviceRecord> {
        self.snapshot().into_iter().filter(|d| d.kind == kind).collect()
    }
}

pub struct DeviceTableListener {
    table: Arc<DeviceTable>,
}

impl DeviceListener for DeviceTableListener {
    fn on_device_announced(&mut self, record: &DeviceRecord) {
        self.table.insert(record.clone());
    }

    fn on_device_remove(&mut self, id: ObjectId) {
        self.table.remove(id);
    }

    fn on_volume_change(&mut self, _kind: DeviceKind, id: ObjectId, volume: f32) {
        self.table.set_volume(id, volume);
    }

    fn on_mute_change(&mut self, _kind: DeviceKind, id: ObjectId, muted: bool) {
        self.table.set_muted(id, muted);
    }

    fn on_default_change(&mut self, kind: DeviceKind, id: Option<ObjectId>) {
        self.table.set_default(kind, id);
    }
}
