// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket, DisconnectPacket,
    EncodeError, EncodePacket, FixedHeader, PacketType, PingRequestPacket, PingResponsePacket,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket,
    UnsubscribePacket, VarIntError,
};

/// A decoded MQTT control packet of any type.
///
/// Sessions read bytes off the wire into a buffer and hand them to
/// [`read_packet`] once a complete packet is available; they never touch the
/// individual packet decoders directly.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(p) => PacketType::Publish {
                dup: p.dup(),
                qos: p.qos(),
                retain: p.retain(),
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
        }
    }
}

/// Decode one complete packet out of `buf`.
///
/// The caller is responsible for buffering bytes off the wire until
/// [`FixedHeader`]'s remaining length is satisfied; this function assumes
/// `buf` holds exactly one packet's worth of data.
///
/// # Errors
///
/// Returns error if `buf` is malformed or its contents fail validation.
pub fn read_packet(buf: &[u8]) -> Result<Packet, DecodeError> {
    let mut peek = ByteArray::new(buf);
    let fixed_header = FixedHeader::decode(&mut peek)?;

    let mut ba = ByteArray::new(buf);
    match fixed_header.packet_type() {
        PacketType::Connect => Ok(Packet::Connect(ConnectPacket::decode(&mut ba)?)),
        PacketType::ConnectAck => Ok(Packet::ConnectAck(ConnectAckPacket::decode(&mut ba)?)),
        PacketType::Publish { .. } => Ok(Packet::Publish(PublishPacket::decode(&mut ba)?)),
        PacketType::PublishAck => Ok(Packet::PublishAck(PublishAckPacket::decode(&mut ba)?)),
        PacketType::PublishReceived => Ok(Packet::PublishReceived(PublishReceivedPacket::decode(
            &mut ba,
        )?)),
        PacketType::PublishRelease => Ok(Packet::PublishRelease(PublishReleasePacket::decode(
            &mut ba,
        )?)),
        PacketType::PublishComplete => Ok(Packet::PublishComplete(
            PublishCompletePacket::decode(&mut ba)?,
        )),
        PacketType::Subscribe => Ok(Packet::Subscribe(SubscribePacket::decode(&mut ba)?)),
        PacketType::SubscribeAck => Ok(Packet::SubscribeAck(SubscribeAckPacket::decode(
            &mut ba,
        )?)),
        PacketType::Unsubscribe => Ok(Packet::Unsubscribe(UnsubscribePacket::decode(&mut ba)?)),
        PacketType::UnsubscribeAck => Ok(Packet::UnsubscribeAck(UnsubscribeAckPacket::decode(
            &mut ba,
        )?)),
        PacketType::PingRequest => Ok(Packet::PingRequest(PingRequestPacket::decode(&mut ba)?)),
        PacketType::PingResponse => {
            Ok(Packet::PingResponse(PingResponsePacket::decode(&mut ba)?))
        }
        PacketType::Disconnect => Ok(Packet::Disconnect(DisconnectPacket::decode(&mut ba)?)),
    }
}

/// Encode `packet` onto the end of `buf`.
///
/// # Errors
///
/// Returns error if the packet's fields cannot be represented on the wire.
pub fn write_packet(buf: &mut Vec<u8>, packet: &Packet) -> Result<usize, EncodeError> {
    match packet {
        Packet::Connect(p) => p.encode(buf),
        Packet::ConnectAck(p) => p.encode(buf),
        Packet::Publish(p) => p.encode(buf),
        Packet::PublishAck(p) => p.encode(buf),
        Packet::PublishReceived(p) => p.encode(buf),
        Packet::PublishRelease(p) => p.encode(buf),
        Packet::PublishComplete(p) => p.encode(buf),
        Packet::Subscribe(p) => p.encode(buf),
        Packet::SubscribeAck(p) => p.encode(buf),
        Packet::Unsubscribe(p) => p.encode(buf),
        Packet::UnsubscribeAck(p) => p.encode(buf),
        Packet::PingRequest(p) => p.encode(buf),
        Packet::PingResponse(p) => p.encode(buf),
        Packet::Disconnect(p) => p.encode(buf),
    }
}

/// Number of bytes `packet` occupies once encoded, without actually encoding it.
///
/// # Errors
///
/// Returns error if the packet's remaining length cannot be represented.
pub fn packet_bytes(packet: &Packet) -> Result<usize, VarIntError> {
    let mut buf = Vec::new();
    write_packet(&mut buf, packet).map_err(|_err| VarIntError::OutOfRange(buf.len()))?;
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_roundtrip_publish() {
        let mut publish = PublishPacket::new("sensors/temp", QoS::AtLeastOnce, b"21.5").unwrap();
        publish.set_packet_id(PacketId::from(1));
        let packet = Packet::Publish(publish);

        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).unwrap();

        let decoded = read_packet(&buf).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_roundtrip_ping() {
        let packet = Packet::PingRequest(PingRequestPacket::new());
        let mut buf = Vec::new();
        write_packet(&mut buf, &packet).unwrap();
        assert_eq!(read_packet(&buf).unwrap(), packet);
    }
}
