// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, PubTopic, QoS,
};

/// Publish packet is sent from the Client to the Server, or from the Server to
/// the Client, to transport an application message.
///
/// Basic packet structure:
/// ```txt
/// +----------------------------+
/// | Fixed header (dup/qos/retain) |
/// +----------------------------+
/// | Topic name                |
/// +----------------------------+
/// | Packet id (QoS > 0 only)  |
/// +----------------------------+
/// | Payload                   |
/// +----------------------------+
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    dup: bool,
    qos: QoS,
    retain: bool,
    topic: PubTopic,
    packet_id: Option<PacketId>,
    payload: Vec<u8>,
}

impl PublishPacket {
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `payload` is too large.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, EncodeError> {
        crate::utils::validate_two_bytes_data(payload)?;
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic: PubTopic::new(topic)?,
            packet_id: None,
            payload: payload.to_vec(),
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        if self.qos != QoS::AtMostOnce {
            self.dup = dup;
        }
        self
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        self.qos = qos;
        if qos == QoS::AtMostOnce {
            self.packet_id = None;
            self.dup = false;
        }
        self
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = Some(packet_id);
        self
    }

    fn remaining_length(&self) -> usize {
        let mut len = self.topic.bytes() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            len += PacketId::bytes();
        }
        len
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let (dup, qos, retain) = match fixed_header.packet_type() {
            PacketType::Publish { dup, qos, retain } => (dup, qos, retain),
            _ => return Err(DecodeError::InvalidPacketType),
        };

        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            let packet_id = PacketId::decode(ba)?;
            // The Packet Identifier field is only present in Publish packets
            // where the QoS level is 1 or 2 [MQTT-2.3.1-5], and must be
            // non-zero [MQTT-2.3.1-1].
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            Some(packet_id)
        };

        let consumed = topic.bytes() + packet_id.map_or(0, |_| PacketId::bytes());
        if consumed > fixed_header.remaining_length() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let payload_len = fixed_header.remaining_length() - consumed;
        let payload = ba.read_bytes(payload_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, self.remaining_length())
            .map_err(|_err| EncodeError::TooManyData)?;
        fixed_header.encode(v)?;

        self.topic.encode(v)?;
        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or(EncodeError::OtherErrors)?;
            packet_id.encode(v)?;
        }
        v.extend_from_slice(&self.payload);

        Ok(v.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_qos0() {
        let packet = PublishPacket::new("a/b", QoS::AtMostOnce, b"hello").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topic(), "a/b");
        assert_eq!(decoded.payload(), b"hello");
        assert_eq!(decoded.packet_id(), None);
    }

    #[test]
    fn test_roundtrip_qos1() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, b"hello").unwrap();
        packet.set_packet_id(PacketId::new(42));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id(), Some(PacketId::new(42)));
    }
}
