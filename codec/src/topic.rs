// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Wire-level topic types.
//!
//! These types only validate that a topic string is legal to put on the wire;
//! the recursive wildcard-matching algorithm used to route published messages
//! to subscribers lives outside this crate.

use crate::utils::{validate_utf8_string, StringError};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, StringData};

/// A topic name, as found in a Publish packet. Topic names MUST NOT contain
/// wildcard characters [MQTT-3.3.2-2].
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct PubTopic(String);

impl PubTopic {
    /// # Errors
    ///
    /// Returns error if `topic` is empty, contains a wildcard character, or is
    /// not valid MQTT String Data.
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_pub_topic(topic).map_err(|_err| EncodeError::InvalidTopic)?;
        validate_utf8_string(topic)?;
        Ok(Self(topic.to_string()))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data = StringData::decode(ba)?;
        let topic = data.as_ref();
        validate_pub_topic(topic).map_err(|_err| DecodeError::InvalidTopic)?;
        Ok(Self(topic.to_string()))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let data = StringData::from(&self.0)?;
        data.encode(buf)
    }
}

fn validate_pub_topic(topic: &str) -> Result<(), StringError> {
    if topic.is_empty() || topic.contains('+') || topic.contains('#') {
        return Err(StringError::InvalidUtf8);
    }
    Ok(())
}

/// A topic filter, as found in a Subscribe or Unsubscribe packet. May contain the
/// single-level wildcard `+` and the trailing multi-level wildcard `#`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct SubTopic(String);

impl SubTopic {
    /// # Errors
    ///
    /// Returns error if `topic` is empty or uses a wildcard incorrectly
    /// (`#` anywhere but the last level, or a level mixing `+`/`#` with other
    /// characters).
    pub fn new(topic: &str) -> Result<Self, EncodeError> {
        validate_sub_topic(topic).map_err(|_err| EncodeError::InvalidTopic)?;
        validate_utf8_string(topic)?;
        Ok(Self(topic.to_string()))
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data = StringData::decode(ba)?;
        let topic = data.as_ref();
        validate_sub_topic(topic).map_err(|_err| DecodeError::InvalidTopic)?;
        Ok(Self(topic.to_string()))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let data = StringData::from(&self.0)?;
        data.encode(buf)
    }
}

/// Topic filters MUST be at least one character long [MQTT-4.7.3-1]. The
/// multi-level wildcard character MUST be specified either on its own or
/// following a topic level separator, and MUST be the last character in the
/// filter [MQTT-4.7.1-2]. The single-level wildcard MUST occupy an entire
/// level of the filter [MQTT-4.7.1-3].
fn validate_sub_topic(topic: &str) -> Result<(), StringError> {
    if topic.is_empty() {
        return Err(StringError::InvalidUtf8);
    }
    let levels: Vec<&str> = topic.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" || index != levels.len() - 1 {
                return Err(StringError::InvalidUtf8);
            }
        } else if level.contains('+') && *level != "+" {
            return Err(StringError::InvalidUtf8);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pub_topic_rejects_wildcards() {
        assert!(PubTopic::new("foo/bar").is_ok());
        assert!(PubTopic::new("foo/+").is_err());
        assert!(PubTopic::new("foo/#").is_err());
        assert!(PubTopic::new("").is_err());
    }

    #[test]
    fn test_sub_topic_wildcards() {
        assert!(SubTopic::new("sport/tennis/player1").is_ok());
        assert!(SubTopic::new("sport/tennis/+").is_ok());
        assert!(SubTopic::new("sport/#").is_ok());
        assert!(SubTopic::new("#").is_ok());
        assert!(SubTopic::new("sport+").is_err());
        assert!(SubTopic::new("sport/tennis#").is_err());
        assert!(SubTopic::new("sport/#/player").is_err());
    }
}
