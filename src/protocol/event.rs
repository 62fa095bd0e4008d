//! Typed response events
//!
//! Each frame is decoded exactly once into an [`Event`]; the processor then
//! matches on the variant instead of the raw type string.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::frame::Frame;
use crate::error::ProtocolError;

/// One decoded protocol event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Incremental response text
    TextDelta(String),
    /// Audio chunk with its sequence index; payload already base64-decoded
    AudioChunk { index: u64, data: Bytes },
    /// Transcript of the user's own utterance
    Transcript(String),
    /// Free-form progress status from the server
    Status(String),
    /// End of response with the authoritative full text
    Complete { full_text: String },
    /// Server-side failure
    Error { message: String },
}

impl Event {
    /// Wire name of the event type
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::TextDelta(_) => "text",
            Event::AudioChunk { .. } => "audio",
            Event::Transcript(_) => "transcript",
            Event::Status(_) => "status",
            Event::Complete { .. } => "complete",
            Event::Error { .. } => "error",
        }
    }

    /// Whether this event counts toward first-packet latency
    pub fn is_content(&self) -> bool {
        matches!(self, Event::TextDelta(_) | Event::AudioChunk { .. })
    }

    /// Decode a frame. Unknown event types yield `Ok(None)`.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, ProtocolError> {
        let event = match frame.event_type.as_str() {
            "text" => {
                let payload: ContentPayload = payload(frame)?;
                Event::TextDelta(payload.content)
            }
            "audio" => {
                let payload: AudioPayload = payload(frame)?;
                let data = BASE64.decode(payload.chunk.as_bytes())?;
                Event::AudioChunk {
                    index: payload.index,
                    data: Bytes::from(data),
                }
            }
            "transcript" => {
                let payload: ContentPayload = payload(frame)?;
                Event::Transcript(payload.content)
            }
            "status" => {
                let payload: StatusPayload = payload(frame)?;
                let value = match payload.value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Event::Status(value)
            }
            "complete" => {
                let payload: CompletePayload = payload(frame)?;
                Event::Complete {
                    full_text: payload.full_text,
                }
            }
            "error" => {
                let payload: ErrorPayload = payload(frame)?;
                Event::Error {
                    message: payload.message,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn payload<T: DeserializeOwned>(frame: &Frame) -> Result<T, ProtocolError> {
    serde_json::from_str(&frame.data).map_err(|source| ProtocolError::InvalidJson {
        event_type: frame.event_type.clone(),
        source,
    })
}

#[derive(Deserialize)]
struct ContentPayload {
    content: String,
}

#[derive(Deserialize)]
struct AudioPayload {
    chunk: String,
    index: u64,
}

#[derive(Deserialize)]
struct StatusPayload {
    value: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletePayload {
    #[serde(default)]
    full_text: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default = "unknown_error")]
    message: String,
}

fn unknown_error() -> String {
    "unknown error".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event_type: &str, data: &str) -> Frame {
        Frame {
            event_type: event_type.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_text_and_transcript() {
        let event = Event::from_frame(&frame("text", r#"{"content":"Hel"}"#)).unwrap();
        assert_eq!(event, Some(Event::TextDelta("Hel".into())));

        let event = Event::from_frame(&frame("transcript", r#"{"content":"hi there"}"#)).unwrap();
        assert_eq!(event, Some(Event::Transcript("hi there".into())));
    }

    #[test]
    fn test_audio_is_base64_decoded() {
        let event = Event::from_frame(&frame("audio", r#"{"chunk":"AQID","index":7}"#))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            Event::AudioChunk {
                index: 7,
                data: Bytes::from_static(&[1, 2, 3])
            }
        );
        assert!(event.is_content());
    }

    #[test]
    fn test_complete_and_error() {
        let event = Event::from_frame(&frame("complete", r#"{"fullText":"Hello"}"#)).unwrap();
        assert_eq!(
            event,
            Some(Event::Complete {
                full_text: "Hello".into()
            })
        );

        let event = Event::from_frame(&frame("error", r#"{"message":"quota"}"#)).unwrap();
        assert_eq!(
            event,
            Some(Event::Error {
                message: "quota".into()
            })
        );
    }

    #[test]
    fn test_status_accepts_any_json() {
        let event = Event::from_frame(&frame("status", r#"{"value":"thinking"}"#)).unwrap();
        assert_eq!(event, Some(Event::Status("thinking".into())));

        let event = Event::from_frame(&frame("status", r#"{"value":3}"#)).unwrap();
        assert_eq!(event, Some(Event::Status("3".into())));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            Event::from_frame(&frame("text", "{not json")),
            Err(ProtocolError::InvalidJson { .. })
        ));
        assert!(matches!(
            Event::from_frame(&frame("audio", r#"{"chunk":"***","index":0}"#)),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        assert_eq!(Event::from_frame(&frame("ping", "{}")).unwrap(), None);
    }
}
