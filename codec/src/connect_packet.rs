// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, ConnectFlags, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, PacketType, ProtocolLevel, PubTopic, QoS, StringData, PROTOCOL_NAME,
};

/// `ConnectPacket` consists of three parts:
/// * `FixedHeader`
/// * Variable header (protocol name, level, connect flags, keep alive)
/// * Payload (client id, and optionally will topic/message, username, password)
///
/// Note that the fixed header is encoded/decoded through [`FixedHeader`]; this
/// struct only covers the variable header and payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    protocol_level: ProtocolLevel,
    connect_flags: ConnectFlags,

    /// Time interval in seconds between two packets. The Client must send a
    /// PingRequest packet before exceeding this interval, or the Server will
    /// close the network connection.
    keep_alive: u16,

    client_id: StringData,

    will_topic: Option<PubTopic>,
    will_message: BinaryData,

    username: StringData,
    password: BinaryData,
}

impl ConnectPacket {
    /// # Errors
    ///
    /// Returns error if `client_id` fails validation.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id).map_err(|_err| EncodeError::InvalidClientId)?;
        Ok(Self {
            protocol_level: ProtocolLevel::V311,
            connect_flags: ConnectFlags::default(),
            keep_alive: 60,
            client_id: StringData::from(client_id)?,
            will_topic: None,
            will_message: BinaryData::new(),
            username: StringData::new(),
            password: BinaryData::new(),
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.connect_flags.set_clean_session(clean_session);
        self
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    #[must_use]
    pub const fn will_qos(&self) -> QoS {
        self.connect_flags.will_qos()
    }

    #[must_use]
    pub const fn will_retain(&self) -> bool {
        self.connect_flags.will_retain()
    }

    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, EncodeError> {
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = BinaryData::from_slice(message)?;
        self.connect_flags.set_will(true);
        self.connect_flags.set_will_qos(qos);
        self.connect_flags.set_will_retain(retain);
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        if self.connect_flags.has_username() {
            Some(self.username.as_ref())
        } else {
            None
        }
    }

    pub fn set_username(&mut self, username: &str) -> Result<&mut Self, EncodeError> {
        self.username = StringData::from(username)?;
        self.connect_flags.set_has_username(true);
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        if self.connect_flags.has_password() {
            Some(self.password.as_ref())
        } else {
            None
        }
    }

    pub fn set_password(&mut self, password: &[u8]) -> Result<&mut Self, EncodeError> {
        self.password = BinaryData::from_slice(password)?;
        self.connect_flags.set_has_password(true);
        Ok(self)
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2
            + PROTOCOL_NAME.len()
            + 1 // protocol level
            + ConnectFlags::bytes()
            + 2 // keep alive
            + self.client_id.bytes();

        if let Some(will_topic) = &self.will_topic {
            len += will_topic.bytes() + self.will_message.bytes();
        }
        if self.connect_flags.has_username() {
            len += self.username.bytes();
        }
        if self.connect_flags.has_password() {
            len += self.password.bytes();
        }
        len
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ProtocolLevel::decode(ba)?;
        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;
        crate::validate_keep_alive(keep_alive)?;

        let client_id = StringData::decode(ba)?;
        // A Server MAY allow a Client to supply a zero-byte ClientId, in which
        // case the Server MUST treat this as a special request to generate a
        // unique ClientId. It MUST then process the CONNECT packet as if the
        // Client had provided a ClientId, but MUST also require that the
        // CleanSession flag is set to 1 [MQTT-3.1.3-7] [MQTT-3.1.3-8].
        if client_id.is_empty() && !connect_flags.clean_session() {
            return Err(DecodeError::InvalidClientId);
        }

        let (will_topic, will_message) = if connect_flags.will() {
            (Some(PubTopic::decode(ba)?), BinaryData::decode(ba)?)
        } else {
            (None, BinaryData::new())
        };

        let username = if connect_flags.has_username() {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };

        let password = if connect_flags.has_password() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        Ok(Self {
            protocol_level,
            connect_flags,
            keep_alive,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())
            .map_err(|_err| EncodeError::TooManyData)?;
        fixed_header.encode(v)?;

        StringData::from(PROTOCOL_NAME)?.encode(v)?;
        self.protocol_level.encode(v)?;
        self.connect_flags.encode(v)?;
        v.extend_from_slice(&self.keep_alive.to_be_bytes());

        self.client_id.encode(v)?;
        if let Some(will_topic) = &self.will_topic {
            will_topic.encode(v)?;
            self.will_message.encode(v)?;
        }
        if self.connect_flags.has_username() {
            self.username.encode(v)?;
        }
        if self.connect_flags.has_password() {
            self.password.encode(v)?;
        }

        Ok(v.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 2, 0, 60, 0, 8, 119, 118, 80, 84, 88, 99, 67, 119,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba);
        assert!(packet.is_ok());
        let packet = packet.unwrap();
        assert_eq!(packet.client_id(), "wvPTXcCw");
        assert!(packet.connect_flags().clean_session());
    }

    #[test]
    fn test_encode_roundtrip() {
        let packet = ConnectPacket::new("test-client").unwrap();
        let mut buf = Vec::new();
        assert!(packet.encode(&mut buf).is_ok());
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.client_id(), "test-client");
    }
}
