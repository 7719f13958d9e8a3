//! forwarder-core: wire formats, identity, and the overlay abstraction
//! shared between the dial protocol and the ports pub/sub protocol.

pub mod error;
pub mod identity;
pub mod overlay;
pub mod protocol;
pub mod wire;

pub use error::{ForwarderError, ForwarderResult};
pub use identity::{Keypair, PeerId};
pub use overlay::{OverlayHost, OverlayReadHalf, OverlayStream, OverlayWriteHalf, StreamHandler};
pub use protocol::{ProtoTag, DIAL_PROTOCOL, PORTSSUB_PROTOCOL, SUBSCRIBE};
pub use wire::{DialHeader, ManifestFrameDecoder, PortsManifest, HEADER_LEN};
