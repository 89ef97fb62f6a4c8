//! Timestamped message the demo peer sends over its data channel.
//!
//! The relay never looks inside channel messages; only peers that speak
//! this format can read the timestamp back.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use bincode::config::{self, Configuration};
use bincode::error::{DecodeError, EncodeError};

const BINCODE_CONFIG: Configuration = config::standard();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Payload {
    pub data: Vec<u8>,
    pub timestamp: i64,
}

impl Payload {
    pub fn new(data: &[u8]) -> Payload {
        Self {
            data: data.to_vec(),
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(0),
        }
    }

    pub fn data(&self) -> String {
        String::from_utf8_lossy(&self.data).to_string()
    }

    pub fn timestamp(&self) -> String {
        Utc.timestamp_nanos(self.timestamp).to_rfc3339()
    }

    /// Time since the payload was created, by the local clock.
    pub fn latency(&self) -> String {
        (Utc::now() - Utc.timestamp_nanos(self.timestamp)).to_string()
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::encode_to_vec(self, BINCODE_CONFIG)
    }

    /// Decode received bytes. Trailing bytes mean it was not a payload.
    pub fn decode(bytes: &[u8]) -> Result<Payload, DecodeError> {
        let (payload, read): (Payload, usize) = bincode::decode_from_slice(bytes, BINCODE_CONFIG)?;
        if read != bytes.len() {
            return Err(DecodeError::Other("trailing bytes after payload"));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_and_timestamp_come_back() {
        let payload = Payload::new(b"scissors");
        let bytes = payload.encode().unwrap();
        let back = Payload::decode(&bytes).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.data(), "scissors");
    }

    #[test]
    fn plain_text_is_not_a_payload() {
        assert!(Payload::decode(b"rock").is_err());
        assert!(Payload::decode(b"").is_err());
    }
}
