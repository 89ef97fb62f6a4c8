//! Signaling envelope codec
//!
//! Every message on the duplex channel is a JSON object `{"type", "data"}`.
//! The codec only understands the outer envelope; `data` is kept as raw JSON
//! and decoded per type by the caller.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::SignalError;

/// Known envelope types. Anything else is carried as [`SignalKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind<'a> {
    Offer,
    Answer,
    Ice,
    Other(&'a str),
}

impl<'a> SignalKind<'a> {
    pub fn parse(kind: &'a str) -> Self {
        match kind {
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "ice" => SignalKind::Ice,
            other => SignalKind::Other(other),
        }
    }

    pub fn as_str(&self) -> &'a str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Ice => "ice",
            SignalKind::Other(s) => s,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Box<RawValue>>,
}

impl Signal {
    /// Build an envelope, serializing `data` as its payload.
    pub fn new<T: Serialize>(kind: SignalKind<'_>, data: &T) -> Result<Self, SignalError> {
        let raw = serde_json::value::to_raw_value(data).map_err(SignalError::Encode)?;
        Ok(Signal {
            kind: kind.as_str().to_string(),
            data: Some(raw),
        })
    }

    /// Decode the outer envelope. The payload is left untouched.
    pub fn decode(raw: &[u8]) -> Result<Self, SignalError> {
        serde_json::from_slice(raw).map_err(SignalError::MalformedEnvelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SignalError> {
        serde_json::to_vec(self).map_err(SignalError::Encode)
    }

    pub fn kind(&self) -> SignalKind<'_> {
        SignalKind::parse(&self.kind)
    }

    /// The payload exactly as it appeared on the wire.
    pub fn raw_data(&self) -> Option<&str> {
        self.data.as_deref().map(RawValue::get)
    }

    /// Decode the payload for this envelope's type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, SignalError> {
        let malformed = |reason: String| SignalError::MalformedPayload {
            kind: self.kind.clone(),
            reason,
        };

        let raw = self
            .data
            .as_deref()
            .ok_or_else(|| malformed("missing data".to_string()))?;

        serde_json::from_str(raw.get()).map_err(|e| malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::description::{CandidateInit, SdpType, SessionDescription};

    #[test]
    fn payload_survives_decode_and_encode_unchanged() {
        let payloads = [
            ("offer", r#"{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"}"#),
            ("answer", r#"{"sdp":"v=0\r\n","type":"answer"}"#),
            (
                "ice",
                r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 5000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":null}"#,
            ),
        ];

        for (kind, data) in payloads {
            let wire = format!(r#"{{"type":"{kind}","data":{data}}}"#);
            let signal = Signal::decode(wire.as_bytes()).unwrap();
            assert_eq!(signal.kind().as_str(), kind);
            assert_eq!(signal.raw_data(), Some(data));

            let encoded = signal.encode().unwrap();
            let again = Signal::decode(&encoded).unwrap();
            assert_eq!(again.raw_data(), Some(data));
        }
    }

    #[test]
    fn decodes_typed_payloads() {
        let offer = r#"{"type":"offer","data":{"type":"offer","sdp":"v=0"}}"#;
        let signal = Signal::decode(offer.as_bytes()).unwrap();
        assert_eq!(signal.kind(), SignalKind::Offer);
        let desc: SessionDescription = signal.payload().unwrap();
        assert_eq!(desc.kind, SdpType::Offer);
        assert_eq!(desc.sdp, "v=0");

        let ice = r#"{"type":"ice","data":{"candidate":"candidate:x","sdpMLineIndex":0}}"#;
        let signal = Signal::decode(ice.as_bytes()).unwrap();
        let cand: CandidateInit = signal.payload().unwrap();
        assert_eq!(cand.candidate, "candidate:x");
        assert_eq!(cand.sdp_m_line_index, Some(0));
        assert_eq!(cand.sdp_mid, None);
    }

    #[test]
    fn broken_envelope_is_rejected() {
        for raw in [&b"not json"[..], br#"{"data":{}}"#, br#"[1,2]"#] {
            assert!(matches!(
                Signal::decode(raw),
                Err(SignalError::MalformedEnvelope(_))
            ));
        }
    }

    #[test]
    fn broken_payload_is_a_payload_error() {
        let signal = Signal::decode(br#"{"type":"offer","data":{"sdp":5}}"#).unwrap();
        let err = signal.payload::<SessionDescription>().unwrap_err();
        assert!(matches!(err, SignalError::MalformedPayload { ref kind, .. } if kind == "offer"));

        let signal = Signal::decode(br#"{"type":"ice"}"#).unwrap();
        assert!(signal.payload::<CandidateInit>().is_err());
    }

    #[test]
    fn unknown_type_is_kept() {
        let signal = Signal::decode(br#"{"type":"chat","data":"hi"}"#).unwrap();
        assert_eq!(signal.kind(), SignalKind::Other("chat"));
    }
}
