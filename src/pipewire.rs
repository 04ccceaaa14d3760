mod backoff;
mod defaults;
mod fanout;
mod manager;
mod mirror;
mod state;
mod types;
mod volume;

// Re-export public types
pub use backoff::Backoff;
pub use fanout::{BoxedListener, ChannelListener, DeviceListener, Fanout, LogListener};
pub use mirror::{RegistryMirror, classify};
pub use state::{DeviceTable, DeviceTableListener};
pub use types::*;
pub use volume::{
    NodeProps, PropsUpdate, build_props, linear_to_normalized, normalized_to_linear,
    props_from_pod, props_from_value, volume_from_value,
};

// Re-export the connection entry point
pub use manager::{DeviceMirrorHandle, connect};
