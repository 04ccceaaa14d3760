//! Volume and mute from node `Props` params, and the reverse for writing.
//!
//! PipeWire reports per-channel linear gains; mixers show the cube root of
//! that, which is what we store as the normalized volume.

use std::io::Cursor;

use libspa::pod::deserialize::PodDeserializer;
use libspa::pod::serialize::PodSerializer;
use libspa::pod::{Object, Pod, Property, PropertyFlags, Value, ValueArray};

/// What a `Props` param says about a node. Absent keys stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeProps {
    pub volume: Option<f32>,
    pub muted: Option<bool>,
    /// Length of `channelVolumes`, 0 if the node didn't report it
    pub channels: usize,
}

pub fn props_from_pod(pod: &Pod) -> Option<NodeProps> {
    match PodDeserializer::deserialize_any_from(pod.as_bytes()) {
        Ok((_, value)) => props_from_value(&value),
        Err(_) => {
            log::debug!("Could not deserialize Props param");
            None
        }
    }
}

/// `channelVolumes` wins over the single `volume` property; nodes set both
/// but only the former tracks what the user hears.
pub fn props_from_value(value: &Value) -> Option<NodeProps> {
    let Value::Object(object) = value else {
        return None;
    };

    let mut props = NodeProps::default();
    let mut fallback = None;
    for prop in &object.properties {
        match (prop.key, &prop.value) {
            (libspa::sys::SPA_PROP_channelVolumes, Value::ValueArray(ValueArray::Float(channels)))
                if !channels.is_empty() =>
            {
                let mean = channels.iter().sum::<f32>() / channels.len() as f32;
                props.volume = Some(linear_to_normalized(mean));
                props.channels = channels.len();
            }
            (libspa::sys::SPA_PROP_volume, Value::Float(linear)) => {
                fallback = Some(linear_to_normalized(*linear));
            }
            (libspa::sys::SPA_PROP_mute, Value::Bool(muted)) => props.muted = Some(*muted),
            _ => {}
        }
    }
    props.volume = props.volume.or(fallback);
    Some(props)
}

pub fn volume_from_value(value: &Value) -> Option<f32> {
    props_from_value(value).and_then(|p| p.volume)
}

pub fn linear_to_normalized(linear: f32) -> f32 {
    if !linear.is_finite() {
        return 0.0;
    }
    linear.max(0.0).cbrt().min(1.0)
}

pub fn normalized_to_linear(volume: f32) -> f32 {
    let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
    volume * volume * volume
}

/// A change to write back to a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropsUpdate {
    /// Normalized volume applied to every channel
    Volume(f32),
    Mute(bool),
}

/// Build the `Props` object for `update`. Volume goes into `channelVolumes`
/// when the channel count is known, else into the single `volume` key.
pub fn build_props(update: PropsUpdate, channels: usize) -> Value {
    let (key, value) = match update {
        PropsUpdate::Volume(volume) if channels > 0 => (
            libspa::sys::SPA_PROP_channelVolumes,
            Value::ValueArray(ValueArray::Float(vec![normalized_to_linear(volume); channels])),
        ),
        PropsUpdate::Volume(volume) => {
            (libspa::sys::SPA_PROP_volume, Value::Float(normalized_to_linear(volume)))
        }
        PropsUpdate::Mute(muted) => (libspa::sys::SPA_PROP_mute, Value::Bool(muted)),
    };
    Value::Object(Object {
        type_: libspa::sys::SPA_TYPE_OBJECT_Props,
        id: libspa::sys::SPA_PARAM_Props,
        properties: vec![Property {
            key,
            flags: PropertyFlags::empty(),
            value,
        }],
    })
}

/// Serialized pod bytes for [`build_props`], ready for `Pod::from_bytes`.
pub fn serialize_props(update: PropsUpdate, channels: usize) -> Option<Vec<u8>> {
    let value = build_props(update, channels);
    match PodSerializer::serialize(Cursor::new(Vec::new()), &value) {
        Ok((cursor, _)) => Some(cursor.into_inner()),
        Err(e) => {
            log::warn!("Failed to serialize Props: {:?}", e);
            None
        }
    }
}
