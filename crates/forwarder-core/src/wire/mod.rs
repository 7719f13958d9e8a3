pub mod dial;
pub mod manifest;

pub use dial::{DialHeader, HEADER_LEN};
pub use manifest::{ManifestFrameDecoder, PortsManifest};
