// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::EncodeError;

/// Generate a random alphanumeric string, used to assign client ids to anonymous clients.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// String data does not fit in a Two Byte Integer length prefix.
    TooLong,

    /// Bytes are not valid UTF-8.
    InvalidUtf8,

    /// String contains the null character, which [MQTT-1.5.4-2] forbids.
    ContainsNul,
}

/// Validate a string can be encoded as MQTT String Data.
///
/// # Errors
///
/// Returns error if the string is too long to fit in a two-byte length prefix or
/// contains the null character.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooLong);
    }
    if s.contains('\u{0000}') {
        return Err(StringError::ContainsNul);
    }
    Ok(())
}

/// Decode a byte slice as MQTT String Data.
///
/// # Errors
///
/// Returns error if bytes are not valid UTF-8.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    String::from_utf8(bytes.to_vec()).map_err(|_err| StringError::InvalidUtf8)
}

/// Validate binary payload fits in a Two Byte Integer length prefix.
///
/// # Errors
///
/// Returns error if `data` is longer than 65535 bytes.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), EncodeError> {
    if data.len() > u16::MAX as usize {
        Err(EncodeError::TooManyData)
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdError {
    /// No chars.
    IsEmpty,

    /// Larger than 23 chars.
    TooLong,

    /// Can only contain `0-9a-zA-Z`.
    InvalidChars,
}

/// Validate a client identifier against the character-set restriction MQTT 3.1.1
/// places on it. The Server MAY allow ClientId's that contain more than 23 encoded
/// bytes, and MAY allow ClientId's that contain characters not included in this
/// list (here we do not, matching a conservative broker configuration).
///
/// # Errors
///
/// Returns error if `client_id` is empty, too long, or contains characters
/// outside `[0-9a-zA-Z]`.
pub fn validate_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.is_empty() {
        return Err(ClientIdError::IsEmpty);
    }
    if client_id.len() > 23 {
        return Err(ClientIdError::TooLong);
    }
    if !client_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ClientIdError::InvalidChars);
    }
    Ok(())
}

/// Looser variant retained for callers that only want to reject control characters.
pub fn check_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.is_empty() {
        return Err(ClientIdError::IsEmpty);
    }
    Ok(())
}
