//! Canonical device set
//!
//! Owns the id → record map for every live audio sink and source and feeds
//! the fan-out. Knows nothing about the PipeWire connection itself: the loop
//! thread calls in with registry events, tests call in directly.

use std::collections::HashMap;

use pipewire::types::ObjectType;

use super::fanout::{BoxedListener, Fanout};
use super::types::{DeviceKind, DeviceRecord, ObjectId, PropertyBag};

/// Build a record from a registry global, or `None` if it isn't an audio
/// sink/source node. Nodes without a `media.class` are common (drivers,
/// dummies) and are skipped quietly.
pub fn classify<P>(id: ObjectId, object_type: &ObjectType, props: Option<&P>) -> Option<DeviceRecord>
where
    P: PropertyBag + ?Sized,
{
    if !matches!(object_type, ObjectType::Node) {
        return None;
    }
    let Some(props) = props else {
        log::trace!("Node {} announced without properties", id);
        return None;
    };
    let Some(media_class) = props.get("media.class") else {
        log::trace!("Node {} has no media.class, skipping", id);
        return None;
    };
    let kind = DeviceKind::from_media_class(media_class)?;

    let mut record = DeviceRecord::new(id, kind, props.get("node.name").unwrap_or_default());
    record.description = props
        .get("node.description")
        .or_else(|| props.get("node.nick"))
        .unwrap_or_default()
        .to_string();
    Some(record)
}

#[derive(Default)]
pub struct RegistryMirror {
    devices: HashMap<ObjectId, DeviceRecord>,
    /// `node.name` of the configured default per kind, from the `default`
    /// metadata object
    default_names: HashMap<DeviceKind, String>,
    /// Live device each default name currently resolves to
    defaults: HashMap<DeviceKind, ObjectId>,
    fanout: Fanout,
}

impl RegistryMirror {
    pub fn new(fanout: Fanout) -> Self {
        Self {
            fanout,
            ..Self::default()
        }
    }

    /// Append a listener to the fan-out without replaying anything.
    pub fn register(&mut self, listener: BoxedListener) {
        self.fanout.register(listener);
    }

    /// Append a listener after telling it about every live device and the
    /// current defaults, so a late registrant ends up with the same view as
    /// early ones.
    pub fn register_with_replay(&mut self, mut listener: BoxedListener) {
        let mut defaults: Vec<(DeviceKind, ObjectId)> =
            self.defaults.iter().map(|(kind, id)| (*kind, *id)).collect();
        defaults.sort_unstable();
        Fanout::replay_to(listener.as_mut(), &self.devices(), &defaults);
        self.fanout.register(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.fanout.len()
    }

    /// Handle a registry `global` event. Returns the kind when the object
    /// was accepted as a device.
    ///
    /// A repeated announce for a live id replaces the record and is
    /// dispatched again; listeners see one `on_device_added` per announce.
    /// Volume and mute state survive the replacement, since no new Props
    /// reading comes with it.
    pub fn on_object_announced<P>(
        &mut self,
        id: ObjectId,
        object_type: &ObjectType,
        props: Option<&P>,
    ) -> Option<DeviceKind>
    where
        P: PropertyBag + ?Sized,
    {
        let mut record = classify(id, object_type, props)?;
        let kind = record.kind;
        if let Some(previous) = self.devices.get(&id) {
            log::debug!("Device {} announced again while live", id);
            record.volume = previous.volume;
            record.muted = previous.muted;
        }

        log::debug!("Device announced: id={} kind={:?} name={:?}", id, kind, record.name);
        self.fanout.dispatch_added(&record);
        self.devices.insert(id, record);
        self.resolve_default(kind);
        Some(kind)
    }

    /// Handle a registry `global_remove` event. Ids that were never devices
    /// (ports, links, clients) are a no-op.
    ///
    /// A default pointing at the device is withdrawn before the removal is
    /// dispatched.
    pub fn on_object_removed(&mut self, id: ObjectId) -> Option<DeviceRecord> {
        let record = self.devices.remove(&id)?;
        log::debug!("Device removed: id={} name={:?}", id, record.name);
        self.resolve_default(record.kind);
        self.fanout.dispatch_removed(id);
        Some(record)
    }

    /// Record a volume reading. Only dispatched when the value actually
    /// changed for a live device.
    pub fn on_volume_changed(&mut self, id: ObjectId, volume: f32) -> bool {
        let volume = volume.clamp(0.0, 1.0);
        let Some(record) = self.devices.get_mut(&id) else {
            return false;
        };
        if (record.volume - volume).abs() < f32::EPSILON {
            return false;
        }
        record.volume = volume;
        let kind = record.kind;
        self.fanout.dispatch_volume(kind, id, volume);
        true
    }

    pub fn on_mute_changed(&mut self, id: ObjectId, muted: bool) -> bool {
        let Some(record) = self.devices.get_mut(&id) else {
            return false;
        };
        if record.muted == muted {
            return false;
        }
        record.muted = muted;
        let kind = record.kind;
        self.fanout.dispatch_mute(kind, id, muted);
        true
    }

    /// The `default` metadata named a new default device for `kind`, or
    /// cleared it. Dispatched once the name resolves to a different live id.
    pub fn on_default_changed(&mut self, kind: DeviceKind, name: Option<&str>) {
        match name {
            Some(name) => {
                log::debug!("Default {} is now {:?}", kind.label(), name);
                self.default_names.insert(kind, name.to_string());
            }
            None => {
                self.default_names.remove(&kind);
            }
        }
        self.resolve_default(kind);
    }

    pub fn default_device(&self, kind: DeviceKind) -> Option<ObjectId> {
        self.defaults.get(&kind).copied()
    }

    fn resolve_default(&mut self, kind: DeviceKind) {
        // Names aren't unique; the lowest id wins
        let resolved = self.default_names.get(&kind).and_then(|name| {
            self.devices
                .values()
                .filter(|d| d.kind == kind && d.name == *name)
                .map(|d| d.id)
                .min()
        });
        if self.defaults.get(&kind).copied() == resolved {
            return;
        }
        match resolved {
            Some(id) => self.defaults.insert(kind, id),
            None => self.defaults.remove(&kind),
        };
        self.fanout.dispatch_default(kind, resolved);
    }

    /// Drop every record, telling listeners each one is gone. Used when the
    /// session ends since nothing in the set can be trusted afterwards.
    /// Defaults are withdrawn first.
    pub fn clear(&mut self) -> usize {
        self.default_names.clear();
        for kind in [DeviceKind::Sink, DeviceKind::Source] {
            self.resolve_default(kind);
        }

        let mut ids: Vec<ObjectId> = self.devices.keys().copied().collect();
        ids.sort_unstable();
        for id in &ids {
            self.devices.remove(id);
            self.fanout.dispatch_removed(*id);
        }
        ids.len()
    }

    pub fn get(&self, id: ObjectId) -> Option<&DeviceRecord> {
        self.devices.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Live devices ordered by kind, then id.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| (d.kind, d.id));
        devices
    }
}
