//! pwdevmirror - a live mirror of PipeWire audio devices
//!
//! Follows the PipeWire registry, keeps the set of audio sinks and sources
//! that are currently present along with their volume, mute state and which
//! of them is the default, and fans those events out to any number of
//! listeners. Volume and mute can be written back through the handle.

pub mod config;
pub mod error;
pub mod pipewire;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::pipewire::{DeviceListener, DeviceMirrorHandle, connect};
