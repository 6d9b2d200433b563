//! Payload codecs for the bus.
//!
//! Telemetry goes out in the configured [`Format`]. Commands may arrive in
//! either format from different producers, so the command side sniffs the
//! payload with [`decode_auto`].

use serde::{Serialize, de::DeserializeOwned};
use zenoh::bytes::Encoding;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Cbor,
}

impl Format {
    /// Zenoh encoding attached to payloads written in this format.
    pub fn encoding(self) -> Encoding {
        match self {
            Format::Json => Encoding::APPLICATION_JSON,
            Format::Cbor => Encoding::APPLICATION_CBOR,
        }
    }

    /// Guess the format of a payload.
    ///
    /// A JSON document starts with an object or array, possibly after
    /// whitespace. Anything else is treated as CBOR.
    pub fn detect(data: &[u8]) -> Format {
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{' | b'[') => Format::Json,
            _ => Format::Cbor,
        }
    }
}

pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    let bytes = match format {
        Format::Json => serde_json::to_vec(value)?,
        Format::Cbor => {
            let mut buf = Vec::with_capacity(64);
            ciborium::into_writer(value, &mut buf)?;
            buf
        }
    };
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    if data.is_empty() {
        return Err(Error::EmptyPayload);
    }
    match format {
        Format::Json => Ok(serde_json::from_slice(data)?),
        Format::Cbor => Ok(ciborium::from_reader(data)?),
    }
}

/// Decode a payload of unknown format, see [`Format::detect`].
pub fn decode_auto<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    decode(data, Format::detect(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{BusMessage, CommandEnvelope, CommandPayload, Frame, TelemetryEnvelope};

    fn frame_envelope() -> TelemetryEnvelope {
        TelemetryEnvelope {
            timestamp: 1_700_000_000_000,
            channel: 3,
            message: BusMessage::Frame(Frame {
                x: Some(0.5),
                y: Some(-0.25),
                z: Some(1.0),
                roll: None,
                pitch: Some(0.1),
                yaw: Some(1.5),
            }),
        }
    }

    #[test]
    fn test_cbor_preserves_envelope() {
        let envelope = frame_envelope();

        let encoded = encode(&envelope, Format::Cbor).unwrap();
        let decoded: TelemetryEnvelope = decode(&encoded, Format::Cbor).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_cbor_is_smaller() {
        let envelope = frame_envelope();

        let json = encode(&envelope, Format::Json).unwrap();
        let cbor = encode(&envelope, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::detect(b"{\"sender_stamp\": 2}"), Format::Json);
        assert_eq!(Format::detect(b"\n  [1, 2, 3]"), Format::Json);
        assert_eq!(Format::detect(b"\xa1\x63key\x65value"), Format::Cbor);
        assert_eq!(Format::detect(b""), Format::Cbor);
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let err = decode_auto::<CommandEnvelope>(b"").unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
    }

    #[test]
    fn test_auto_decode_command() {
        let command = CommandEnvelope::new(
            3,
            CommandPayload {
                x: 1.0,
                z: 1.0,
                time: 2.0,
                ..Default::default()
            },
        );

        let json = encode(&command, Format::Json).unwrap();
        let from_json: CommandEnvelope = decode_auto(&json).unwrap();
        assert_eq!(from_json, command);

        let cbor = encode(&command, Format::Cbor).unwrap();
        let from_cbor: CommandEnvelope = decode_auto(&cbor).unwrap();
        assert_eq!(from_cbor, command);
    }

    #[test]
    fn test_encoding_matches_format() {
        assert_eq!(Format::Json.encoding(), Encoding::APPLICATION_JSON);
        assert_eq!(Format::Cbor.encoding(), Encoding::APPLICATION_CBOR);
    }
}
