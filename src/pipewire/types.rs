use std::collections::{BTreeMap, HashMap};

use libspa::utils::dict::DictRef;
use serde::{Deserialize, Serialize};

/// Unique identifier for PipeWire objects
pub type ObjectId = u32;

pub const MEDIA_CLASS_SINK: &str = "Audio/Sink";
pub const MEDIA_CLASS_SOURCE: &str = "Audio/Source";

/// Which side of the audio graph a device sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Playback device (speaker, headphones)
    Sink,
    /// Capture device (microphone)
    Source,
}

impl DeviceKind {
    /// Map a `media.class` value to a device kind. Only the exact audio
    /// sink/source classes qualify; streams, video and virtual variants don't.
    pub fn from_media_class(media_class: &str) -> Option<Self> {
        match media_class {
            MEDIA_CLASS_SINK => Some(DeviceKind::Sink),
            MEDIA_CLASS_SOURCE => Some(DeviceKind::Source),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Sink => "sink",
            DeviceKind::Source => "source",
        }
    }
}

/// One live audio endpoint as announced by the PipeWire registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: ObjectId,
    pub kind: DeviceKind,
    /// `node.name`; technical, not unique
    pub name: String,
    /// `node.description` or `node.nick`
    pub description: String,
    /// Normalized gain in `0.0..=1.0`, 0 until the first Props param arrives
    pub volume: f32,
    pub muted: bool,
}

impl DeviceRecord {
    pub fn new(id: ObjectId, kind: DeviceKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            description: String::new(),
            volume: 0.0,
            muted: false,
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.description.is_empty() {
            &self.description
        } else if !self.name.is_empty() {
            &self.name
        } else {
            "Unknown"
        }
    }
}

/// Owned form of the listener callbacks, for handing off to another thread
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A sink or source was announced
    Added(DeviceRecord),
    /// A previously announced device went away
    Removed(ObjectId),
    /// A device reported a new volume
    VolumeChanged {
        kind: DeviceKind,
        id: ObjectId,
        volume: f32,
    },
    MuteChanged {
        kind: DeviceKind,
        id: ObjectId,
        muted: bool,
    },
    /// The default device of `kind` changed; `None` when there is none
    DefaultChanged {
        kind: DeviceKind,
        id: Option<ObjectId>,
    },
}

/// Read access to a registry property dictionary.
///
/// PipeWire hands out `DictRef`s; tests and callers without a live daemon
/// can use plain maps.
pub trait PropertyBag {
    fn get(&self, key: &str) -> Option<&str>;
}

impl PropertyBag for DictRef {
    fn get(&self, key: &str) -> Option<&str> {
        DictRef::get(self, key)
    }
}

impl PropertyBag for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }
}

impl PropertyBag for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        BTreeMap::get(self, key).map(String::as_str)
    }
}

impl PropertyBag for [(&str, &str)] {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_class_mapping() {
        assert_eq!(DeviceKind::from_media_class("Audio/Sink"), Some(DeviceKind::Sink));
        assert_eq!(DeviceKind::from_media_class("Audio/Source"), Some(DeviceKind::Source));
        assert_eq!(DeviceKind::from_media_class("Stream/Output/Audio"), None);
        assert_eq!(DeviceKind::from_media_class("Audio/Source/Virtual"), None);
        assert_eq!(DeviceKind::from_media_class("Video/Source"), None);
        assert_eq!(DeviceKind::from_media_class(""), None);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut dev = DeviceRecord::new(3, DeviceKind::Sink, "alsa_output.pci");
        assert_eq!(dev.display_name(), "alsa_output.pci");
        dev.description = "Built-in Audio".into();
        assert_eq!(dev.display_name(), "Built-in Audio");
        let unnamed = DeviceRecord::new(4, DeviceKind::Source, "");
        assert_eq!(unnamed.display_name(), "Unknown");
    }

    #[test]
    fn test_slice_property_bag() {
        let props: &[(&str, &str)] = &[("media.class", "Audio/Sink"), ("node.name", "speaker")];
        assert_eq!(PropertyBag::get(props, "node.name"), Some("speaker"));
        assert_eq!(PropertyBag::get(props, "node.nick"), None);
    }
}
