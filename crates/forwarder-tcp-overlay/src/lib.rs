//! A plain-TCP [`OverlayHost`](forwarder_core::overlay::OverlayHost): one
//! socket per overlay stream, a tiny handshake, and a static address book in
//! place of peer discovery and NAT traversal. Meant for running the agent
//! on a LAN or over already-routable addresses, not as a production overlay.

mod addressbook;
mod host;
mod stream;

pub use addressbook::AddressBook;
pub use host::TcpOverlayHost;
