//! Parsing of the session manager's `default` metadata object.
//!
//! The metadata holds entries like
//! `default.audio.sink = {"name":"alsa_output.pci-0000_00_1f.3.analog-stereo"}`
//! on subject 0. We only read the effective defaults, not the
//! `default.configured.*` ones the user asked for.

use serde::Deserialize;

use super::types::DeviceKind;

/// `metadata.name` of the object that carries the defaults
pub const DEFAULT_METADATA_NAME: &str = "default";

pub const KEY_DEFAULT_SINK: &str = "default.audio.sink";
pub const KEY_DEFAULT_SOURCE: &str = "default.audio.source";

#[derive(Deserialize)]
struct DefaultTarget {
    name: String,
}

pub fn kind_for_key(key: &str) -> Option<DeviceKind> {
    match key {
        KEY_DEFAULT_SINK => Some(DeviceKind::Sink),
        KEY_DEFAULT_SOURCE => Some(DeviceKind::Source),
        _ => None,
    }
}

/// Node name out of a metadata value. `None` for unparseable values, which
/// callers treat the same as a cleared default.
pub fn parse_target(value: &str) -> Option<String> {
    match serde_json::from_str::<DefaultTarget>(value) {
        Ok(target) if !target.name.is_empty() => Some(target.name),
        Ok(_) => None,
        Err(e) => {
            log::debug!("Unreadable default metadata value {:?}: {}", value, e);
            None
        }
    }
}

/// One `property` event from the metadata object, reduced to what changed.
/// A `None` key clears every property of the subject.
pub fn changes(
    subject: u32,
    key: Option<&str>,
    value: Option<&str>,
) -> Vec<(DeviceKind, Option<String>)> {
    if subject != 0 {
        return Vec::new();
    }
    match key {
        None => vec![(DeviceKind::Sink, None), (DeviceKind::Source, None)],
        Some(key) => match kind_for_key(key) {
            Some(kind) => vec![(kind, value.and_then(parse_target))],
            None => Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target(r#"{"name":"alsa_output.pci.analog-stereo"}"#).as_deref(),
            Some("alsa_output.pci.analog-stereo")
        );
        assert_eq!(parse_target(r#"{"name":""}"#), None);
        assert_eq!(parse_target("alsa_output.pci"), None);
    }

    #[test]
    fn test_only_effective_defaults_on_subject_zero() {
        let value = Some(r#"{"name":"usb-mic"}"#);
        assert_eq!(
            changes(0, Some("default.audio.source"), value),
            vec![(DeviceKind::Source, Some("usb-mic".to_string()))]
        );
        assert!(changes(0, Some("default.configured.audio.source"), value).is_empty());
        assert!(changes(0, Some("default.video.source"), value).is_empty());
        assert!(changes(42, Some("default.audio.source"), value).is_empty());
    }

    #[test]
    fn test_removed_key_and_clear_all() {
        assert_eq!(
            changes(0, Some("default.audio.sink"), None),
            vec![(DeviceKind::Sink, None)]
        );
        assert_eq!(
            changes(0, None, None),
            vec![(DeviceKind::Sink, None), (DeviceKind::Source, None)]
        );
    }
}
