//! Protocol tags and overlay stream names shared by the dial and pub/sub
//! protocols.

use crate::error::ForwarderError;

/// Name of the dial stream protocol (§4.2). Opened once per TCP connection
/// or UDP source address being bridged.
pub const DIAL_PROTOCOL: &str = "/p2pforwarder/dial/1.0.0";

/// Name of the ports pub/sub stream protocol (§4.5).
pub const PORTSSUB_PROTOCOL: &str = "/p2pforwarder/portssub/1.0.0";

/// Single control byte sent by the subscriber on opening a `portssub` stream.
pub const SUBSCRIBE: u8 = 0x00;

/// The single byte that selects TCP or UDP semantics on the wire. All other
/// values are invalid and must be rejected with [`ForwarderError::UnknownProtocol`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoTag {
    Tcp,
    Udp,
}

impl ProtoTag {
    pub const TCP_BYTE: u8 = 0x00;
    pub const UDP_BYTE: u8 = 0x01;

    pub fn from_byte(b: u8) -> Result<Self, ForwarderError> {
        match b {
            Self::TCP_BYTE => Ok(Self::Tcp),
            Self::UDP_BYTE => Ok(Self::Udp),
            other => Err(ForwarderError::UnknownProtocol(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Tcp => Self::TCP_BYTE,
            Self::Udp => Self::UDP_BYTE,
        }
    }
}

impl std::fmt::Display for ProtoTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_tags() {
        assert_eq!(ProtoTag::from_byte(0x00).unwrap(), ProtoTag::Tcp);
        assert_eq!(ProtoTag::from_byte(0x01).unwrap(), ProtoTag::Udp);
        assert_eq!(ProtoTag::Tcp.to_byte(), 0x00);
        assert_eq!(ProtoTag::Udp.to_byte(), 0x01);
    }

    #[test]
    fn rejects_unknown_tags() {
        assert!(matches!(
            ProtoTag::from_byte(0x02),
            Err(ForwarderError::UnknownProtocol(2))
        ));
        assert!(matches!(
            ProtoTag::from_byte(0xff),
            Err(ForwarderError::UnknownProtocol(255))
        ));
    }
}
