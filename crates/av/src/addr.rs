//! Raw device addresses, endpoint addresses and forward identifiers.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{AvError, Result};

/// Length of a raw device-global identifier.
pub const GID_LEN: usize = 16;

/// Length of a serialized endpoint address.
pub const EP_ADDR_LEN: usize = 32;

/// Raw network-layer address of a device (its global identifier).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gid([u8; GID_LEN]);

impl Gid {
    pub const fn new(bytes: [u8; GID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; GID_LEN] {
        &self.0
    }
}

impl From<[u8; GID_LEN]> for Gid {
    fn from(bytes: [u8; GID_LEN]) -> Self {
        Self(bytes)
    }
}

/// Colon-separated groups of two bytes, the way IPv6 addresses are written.
impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.0.chunks(2).enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            f.write_str(&hex::encode(group))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gid({self})")
    }
}

/// Full endpoint address of a peer.
///
/// Wire layout (32 bytes): raw GID, little-endian queue pair number, two
/// bytes of padding, little-endian queue key, eight reserved bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EpAddr {
    gid: Gid,
    qpn: u16,
    qkey: u32,
}

impl EpAddr {
    pub const fn new(gid: Gid, qpn: u16, qkey: u32) -> Self {
        Self { gid, qpn, qkey }
    }

    /// Parse the wire layout. Trailing bytes past [`EP_ADDR_LEN`] are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EP_ADDR_LEN {
            return Err(AvError::InvalidAddress { len: bytes.len() });
        }

        let mut buf = bytes;
        let mut gid = [0u8; GID_LEN];
        buf.copy_to_slice(&mut gid);
        let qpn = buf.get_u16_le();
        buf.advance(2);
        let qkey = buf.get_u32_le();

        Ok(Self::new(Gid(gid), qpn, qkey))
    }

    pub fn to_bytes(&self) -> [u8; EP_ADDR_LEN] {
        let mut out = [0u8; EP_ADDR_LEN];
        let mut buf = out.as_mut_slice();
        buf.put_slice(self.gid.as_bytes());
        buf.put_u16_le(self.qpn);
        buf.put_u16_le(0);
        buf.put_u32_le(self.qkey);
        out
    }

    pub const fn gid(&self) -> &Gid {
        &self.gid
    }

    /// Local queue identifier of the peer.
    pub const fn qpn(&self) -> u16 {
        self.qpn
    }

    pub const fn qkey(&self) -> u32 {
        self.qkey
    }

    /// Connection identifier. The queue key changes every time the peer
    /// recreates its queue, so it tells successive connections apart.
    pub const fn connid(&self) -> u32 {
        self.qkey
    }
}

impl fmt::Display for EpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fi_addr_efa://[{}]:{}:{}", self.gid, self.qpn, self.qkey)
    }
}

/// Identifier the transport uses to name a peer when sending.
///
/// In [`AvType::Table`] mode this is a dense index; in [`AvType::Map`]
/// mode it names the connection record directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiAddr(u64);

impl FiAddr {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressing mode, fixed when the address vector is opened.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AvType {
    /// Forward identifiers are dense indices into the address table.
    #[default]
    Table,
    /// Forward identifiers denote the connection record itself.
    Map,
}

impl AvType {
    pub fn is_index(&self) -> bool {
        matches!(self, AvType::Table)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::*;

    fn test_gid(n: u8) -> Gid {
        let mut bytes = [0u8; GID_LEN];
        bytes[0] = 0xfe;
        bytes[1] = 0x80;
        bytes[15] = n;
        Gid::new(bytes)
    }

    #[test]
    fn test_ep_addr_layout() {
        let addr = EpAddr::new(test_gid(7), 0x0102, 0xdead_beef);
        let bytes = addr.to_bytes();

        assert_eq!(&bytes[..GID_LEN], test_gid(7).as_bytes());
        assert_eq!(&bytes[16..18], &[0x02, 0x01]);
        assert_eq!(&bytes[18..20], &[0, 0]);
        assert_eq!(&bytes[20..24], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(&bytes[24..], &[0u8; 8]);

        assert_eq!(EpAddr::from_bytes(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_ep_addr_short_buffer() {
        let bytes = [0u8; EP_ADDR_LEN - 1];
        assert_matches!(
            EpAddr::from_bytes(&bytes),
            Err(AvError::InvalidAddress { len }) if len == EP_ADDR_LEN - 1
        );
        assert_matches!(EpAddr::from_bytes(&[]), Err(AvError::InvalidAddress { len: 0 }));
    }

    #[test]
    fn test_ep_addr_ignores_trailing_bytes() {
        let addr = EpAddr::new(test_gid(1), 3, 4);
        let mut bytes = addr.to_bytes().to_vec();
        bytes.extend_from_slice(&[0xff; 8]);
        assert_eq!(EpAddr::from_bytes(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_display() {
        let addr = EpAddr::new(test_gid(0x2a), 5, 9);
        assert_eq!(
            addr.to_string(),
            "fi_addr_efa://[fe80:0000:0000:0000:0000:0000:0000:002a]:5:9"
        );
    }

    #[test]
    fn test_av_type_parse() {
        assert_eq!(AvType::from_str("table").unwrap(), AvType::Table);
        assert_eq!(AvType::from_str("map").unwrap(), AvType::Map);
        assert_eq!(AvType::Map.to_string(), "map");
        assert!(AvType::Table.is_index());
        assert!(!AvType::Map.is_index());
    }
}
