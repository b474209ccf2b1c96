// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::fmt;

use byteorder::{BigEndian, WriteBytesExt};

use crate::{ByteArray, DecodeError, EncodeError};

/// Decode a packet, or a field of a packet, out of a byte buffer.
pub trait DecodePacket: Sized {
    /// # Errors
    ///
    /// Returns error if the buffer is too short or content is malformed.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Encode a packet, or a field of a packet, into a byte buffer.
pub trait EncodePacket {
    /// Returns number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented on the wire.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Quality of Service level, used by Publish and Subscribe packets.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum QoS {
    /// At most once delivery, "fire and forget".
    #[default]
    AtMostOnce = 0,

    /// At least once delivery, acknowledged by PublishAck.
    AtLeastOnce = 1,

    /// Exactly once delivery, acknowledged by the PublishReceived/PublishRelease/
    /// PublishComplete handshake.
    ExactOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

/// Packet identifier, present in Publish (QoS > 0), Subscribe, Unsubscribe and their
/// respective acknowledgement packets.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct PacketId(u16);

impl PacketId {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        2
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PacketId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl DecodePacket for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)
            .map_err(|_| EncodeError::OtherErrors)?;
        Ok(Self::bytes())
    }
}
