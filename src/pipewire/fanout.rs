//! Listener fan-out
//!
//! Delivers every filtered registry event to all registered listeners, in
//! registration order. Listeners are plain trait objects: the implementing
//! value carries whatever per-listener state it needs (a UI panel's rows, a
//! channel sender, a shared table) and gets `&mut self` back on every call.
//!
//! There is no priority, filtering or cancellation between listeners, and no
//! uniqueness check on registration: registering the same kind of listener
//! twice means it hears every event twice.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;

use super::types::{DeviceEvent, DeviceKind, DeviceRecord, ObjectId};

/// Receiver of device events. Every method is optional; the defaults do
/// nothing, so a listener only implements what it cares about.
///
/// Callbacks run on the PipeWire loop thread. Borrowed arguments are only
/// valid for the duration of the call.
pub trait DeviceListener {
    fn on_device_added(&mut self, _kind: DeviceKind, _id: ObjectId, _name: &str) {}

    /// Full-record form of [`on_device_added`](Self::on_device_added), with
    /// the description and the last known volume and mute state. The default
    /// forwards to `on_device_added`, so implement one or the other.
    fn on_device_announced(&mut self, record: &DeviceRecord) {
        self.on_device_added(record.kind, record.id, &record.name);
    }

    fn on_device_remove(&mut self, _id: ObjectId) {}

    fn on_volume_change(&mut self, _kind: DeviceKind, _id: ObjectId, _volume: f32) {}

    fn on_mute_change(&mut self, _kind: DeviceKind, _id: ObjectId, _muted: bool) {}

    /// `id` is `None` when no live device matches the configured default.
    fn on_default_change(&mut self, _kind: DeviceKind, _id: Option<ObjectId>) {}
}

pub type BoxedListener = Box<dyn DeviceListener + Send>;

/// Ordered list of listeners
#[derive(Default)]
pub struct Fanout {
    listeners: Vec<BoxedListener>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Duplicates are allowed.
    pub fn register(&mut self, listener: BoxedListener) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn dispatch_added(&mut self, record: &DeviceRecord) {
        self.each("on_device_added", |l| l.on_device_announced(record));
    }

    pub fn dispatch_removed(&mut self, id: ObjectId) {
        self.each("on_device_remove", |l| l.on_device_remove(id));
    }

    pub fn dispatch_volume(&mut self, kind: DeviceKind, id: ObjectId, volume: f32) {
        self.each("on_volume_change", |l| l.on_volume_change(kind, id, volume));
    }

    pub fn dispatch_mute(&mut self, kind: DeviceKind, id: ObjectId, muted: bool) {
        self.each("on_mute_change", |l| l.on_mute_change(kind, id, muted));
    }

    pub fn dispatch_default(&mut self, kind: DeviceKind, id: Option<ObjectId>) {
        self.each("on_default_change", |l| l.on_default_change(kind, id));
    }

    /// Bring a listener that is not registered yet up to date: every record
    /// as an announce followed by its known volume and mute state, then the
    /// current defaults. A panic abandons the replay for that listener only.
    /// Returns false if it panicked.
    pub fn replay_to(
        listener: &mut dyn DeviceListener,
        devices: &[DeviceRecord],
        defaults: &[(DeviceKind, ObjectId)],
    ) -> bool {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            for record in devices {
                listener.on_device_announced(record);
                if record.volume > 0.0 {
                    listener.on_volume_change(record.kind, record.id, record.volume);
                }
                if record.muted {
                    listener.on_mute_change(record.kind, record.id, true);
                }
            }
            for &(kind, id) in defaults {
                listener.on_default_change(kind, Some(id));
            }
        }));
        if result.is_err() {
            log::error!("Listener panicked during replay");
        }
        result.is_ok()
    }

    /// Run `f` on every listener. A panicking listener is logged and skipped
    /// so the ones after it still get the event.
    fn each(&mut self, what: &str, mut f: impl FnMut(&mut dyn DeviceListener)) {
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_mut())));
            if result.is_err() {
                log::error!("Listener #{} panicked in {}", index, what);
            }
        }
    }
}

/// Forwards events as [`DeviceEvent`]s over a channel, typically to a UI
/// thread that polls the receiving end.
pub struct ChannelListener {
    tx: Sender<DeviceEvent>,
}

impl ChannelListener {
    pub fn new(tx: Sender<DeviceEvent>) -> Self {
        Self { tx }
    }
}

impl DeviceListener for ChannelListener {
    fn on_device_announced(&mut self, record: &DeviceRecord) {
        let _ = self.tx.send(DeviceEvent::Added(record.clone()));
    }

    fn on_device_remove(&mut self, id: ObjectId) {
        let _ = self.tx.send(DeviceEvent::Removed(id));
    }

    fn on_volume_change(&mut self, kind: DeviceKind, id: ObjectId, volume: f32) {
        let _ = self
            .tx
            .send(DeviceEvent::VolumeChanged { kind, id, volume });
    }

    fn on_mute_change(&mut self, kind: DeviceKind, id: ObjectId, muted: bool) {
        let _ = self.tx.send(DeviceEvent::MuteChanged { kind, id, muted });
    }

    fn on_default_change(&mut self, kind: DeviceKind, id: Option<ObjectId>) {
        let _ = self.tx.send(DeviceEvent::DefaultChanged { kind, id });
    }
}

/// Logs every event at info level
pub struct LogListener;

impl DeviceListener for LogListener {
    fn on_device_announced(&mut self, record: &DeviceRecord) {
        log::info!(
            "+ {} {} {:?} ({})",
            record.kind.label(),
            record.id,
            record.display_name(),
            record.name
        );
    }

    fn on_device_remove(&mut self, id: ObjectId) {
        log::info!("- {}", id);
    }

    fn on_volume_change(&mut self, kind: DeviceKind, id: ObjectId, volume: f32) {
        log::info!("~ {} {} volume={:.0}%", kind.label(), id, volume * 100.0);
    }

    fn on_mute_change(&mut self, kind: DeviceKind, id: ObjectId, muted: bool) {
        log::info!("~ {} {} {}", kind.label(), id, if muted { "muted" } else { "unmuted" });
    }

    fn on_default_change(&mut self, kind: DeviceKind, id: Option<ObjectId>) {
        match id {
            Some(id) => log::info!("* default {} is {}", kind.label(), id),
            None => log::info!("* no default {}", kind.label()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;

    use parking_lot::Mutex;

    use super::*;

    /// Records every call as a string, tagged with the listener's label, into
    /// a log shared between listeners so cross-listener ordering is visible.
    pub(crate) struct Recorder {
        pub label: &'static str,
        pub log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub fn boxed(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> BoxedListener {
            Box::new(Recorder {
                label,
                log: log.clone(),
            })
        }
    }

    impl DeviceListener for Recorder {
        fn on_device_added(&mut self, kind: DeviceKind, id: ObjectId, name: &str) {
            self.log
                .lock()
                .push(format!("{}:added:{:?}:{}:{}", self.label, kind, id, name));
        }

        fn on_device_remove(&mut self, id: ObjectId) {
            self.log.lock().push(format!("{}:removed:{}", self.label, id));
        }

        fn on_volume_change(&mut self, kind: DeviceKind, id: ObjectId, volume: f32) {
            self.log
                .lock()
                .push(format!("{}:volume:{:?}:{}:{:.2}", self.label, kind, id, volume));
        }

        fn on_mute_change(&mut self, kind: DeviceKind, id: ObjectId, muted: bool) {
            self.log
                .lock()
                .push(format!("{}:mute:{:?}:{}:{}", self.label, kind, id, muted));
        }

        fn on_default_change(&mut self, kind: DeviceKind, id: Option<ObjectId>) {
            self.log
                .lock()
                .push(format!("{}:default:{:?}:{:?}", self.label, kind, id));
        }
    }

    struct AddedOnly(Arc<Mutex<u32>>);

    impl DeviceListener for AddedOnly {
        fn on_device_added(&mut self, _kind: DeviceKind, _id: ObjectId, _name: &str) {
            *self.0.lock() += 1;
        }
    }

    pub(crate) struct Panicker;

    impl DeviceListener for Panicker {
        fn on_device_added(&mut self, _kind: DeviceKind, _id: ObjectId, _name: &str) {
            panic!("listener blew up");
        }
    }

    fn sink(id: ObjectId, name: &str) -> DeviceRecord {
        DeviceRecord::new(id, DeviceKind::Sink, name)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fanout = Fanout::new();
        fanout.register(Recorder::boxed("a", &log));
        fanout.register(Recorder::boxed("b", &log));

        fanout.dispatch_added(&sink(3, "speaker"));

        assert_eq!(
            *log.lock(),
            vec!["a:added:Sink:3:speaker", "b:added:Sink:3:speaker"]
        );
    }

    #[test]
    fn test_duplicate_registration_hears_twice() {
        let count = Arc::new(Mutex::new(0));
        let mut fanout = Fanout::new();
        fanout.register(Box::new(AddedOnly(count.clone())));
        fanout.register(Box::new(AddedOnly(count.clone())));
        assert_eq!(fanout.len(), 2);

        fanout.dispatch_added(&DeviceRecord::new(7, DeviceKind::Source, "mic"));
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_missing_callbacks_are_skipped() {
        let count = Arc::new(Mutex::new(0));
        let mut fanout = Fanout::new();
        fanout.register(Box::new(AddedOnly(count.clone())));

        fanout.dispatch_removed(7);
        fanout.dispatch_volume(DeviceKind::Sink, 7, 0.5);
        fanout.dispatch_mute(DeviceKind::Sink, 7, true);
        fanout.dispatch_default(DeviceKind::Sink, Some(7));
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut fanout = Fanout::new();
        fanout.register(Box::new(Panicker));
        fanout.register(Recorder::boxed("after", &log));

        fanout.dispatch_added(&sink(1, "hdmi"));
        fanout.dispatch_added(&sink(2, "usb"));

        assert_eq!(
            *log.lock(),
            vec!["after:added:Sink:1:hdmi", "after:added:Sink:2:usb"]
        );
    }

    #[test]
    fn test_replay_sends_records_then_defaults() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut late = Recorder {
            label: "late",
            log: log.clone(),
        };
        let devices = [sink(3, "speaker"), DeviceRecord::new(7, DeviceKind::Source, "mic")];

        assert!(Fanout::replay_to(&mut late, &devices, &[(DeviceKind::Sink, 3)]));
        assert_eq!(
            *log.lock(),
            vec![
                "late:added:Sink:3:speaker",
                "late:added:Source:7:mic",
                "late:default:Sink:Some(3)"
            ]
        );
    }

    #[test]
    fn test_replay_contains_panics() {
        let devices = [sink(3, "speaker")];
        assert!(!Fanout::replay_to(&mut Panicker, &devices, &[]));
    }

    #[test]
    fn test_channel_listener_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let mut fanout = Fanout::new();
        fanout.register(Box::new(ChannelListener::new(tx)));

        let mut mic = DeviceRecord::new(7, DeviceKind::Source, "alsa_input.usb");
        mic.description = "USB Mic".into();
        fanout.dispatch_added(&mic);
        fanout.dispatch_volume(DeviceKind::Source, 7, 0.25);
        fanout.dispatch_mute(DeviceKind::Source, 7, true);
        fanout.dispatch_default(DeviceKind::Source, Some(7));
        fanout.dispatch_removed(7);

        let events: Vec<DeviceEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                DeviceEvent::Added(mic),
                DeviceEvent::VolumeChanged {
                    kind: DeviceKind::Source,
                    id: 7,
                    volume: 0.25
                },
                DeviceEvent::MuteChanged {
                    kind: DeviceKind::Source,
                    id: 7,
                    muted: true
                },
                DeviceEvent::DefaultChanged {
                    kind: DeviceKind::Source,
                    id: Some(7)
                },
                DeviceEvent::Removed(7),
            ]
        );
    }

    #[test]
    fn test_channel_listener_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut fanout = Fanout::new();
        fanout.register(Box::new(ChannelListener::new(tx)));
        fanout.dispatch_added(&sink(1, "speaker"));
    }
}
