//! Framing for intermediate streams.
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────┐
//! │ type │ body                                         │
//! ├──────┼──────────────────────────────────────────────┤
//! │  0   │ user message, via the wrapped codec or raw   │
//! │  1   │ watermark control message as JSON            │
//! │  2   │ end-of-stream control message as JSON        │
//! └──────┴──────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::{anyhow, bail};
use stream_types::{ControlMessage, Payload};

use crate::serdes::Serde;

pub const USER_MESSAGE: u8 = 0;
pub const WATERMARK: u8 = 1;
pub const END_OF_STREAM: u8 = 2;

/// Message codec of an intermediate stream.
pub struct IntermediateMessageSerde {
    inner: Option<Arc<dyn Serde>>,
}

impl IntermediateMessageSerde {
    /// `inner` encodes user messages; `None` sends them as raw bytes.
    pub fn new(inner: Option<Arc<dyn Serde>>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> Option<&Arc<dyn Serde>> {
        self.inner.as_ref()
    }
}

impl Serde for IntermediateMessageSerde {
    fn name(&self) -> &str {
        "intermediate"
    }

    fn to_bytes(&self, payload: &Payload) -> anyhow::Result<Vec<u8>> {
        let (kind, body) = match payload {
            Payload::Control(control @ ControlMessage::Watermark { .. }) => {
                (WATERMARK, serde_json::to_vec(control)?)
            }
            Payload::Control(control @ ControlMessage::EndOfStream { .. }) => {
                (END_OF_STREAM, serde_json::to_vec(control)?)
            }
            user => {
                let body = match &self.inner {
                    Some(serde) => serde.to_bytes(user)?,
                    None => user
                        .as_bytes()
                        .map(<[u8]>::to_vec)
                        .ok_or_else(|| anyhow!("no codec for user message {user:?}"))?,
                };
                (USER_MESSAGE, body)
            }
        };

        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(kind);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<Payload> {
        let Some((&kind, body)) = bytes.split_first() else {
            bail!("empty intermediate message");
        };
        match kind {
            USER_MESSAGE => match &self.inner {
                Some(serde) => serde.from_bytes(body),
                None => Ok(Payload::Bytes(body.to_vec())),
            },
            WATERMARK | END_OF_STREAM => {
                let control: ControlMessage = serde_json::from_slice(body)?;
                let matches_kind = matches!(
                    (&control, kind),
                    (ControlMessage::Watermark { .. }, WATERMARK)
                        | (ControlMessage::EndOfStream { .. }, END_OF_STREAM)
                );
                if !matches_kind {
                    bail!("type byte {kind} does not match body {control:?}");
                }
                Ok(Payload::Control(control))
            }
            other => bail!("unknown intermediate message type {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serdes::JsonSerde;
    use serde_json::json;

    #[test]
    fn test_control_messages_round_trip() {
        let serde = IntermediateMessageSerde::new(Some(Arc::new(JsonSerde)));

        let watermark = Payload::Control(ControlMessage::Watermark {
            task_name: "Partition 0".into(),
            timestamp: 1_700_000_000_000,
        });
        let bytes = serde.to_bytes(&watermark).unwrap();
        assert_eq!(bytes[0], WATERMARK);
        assert_eq!(serde.from_bytes(&bytes).unwrap(), watermark);

        let eos = Payload::Control(ControlMessage::EndOfStream {
            task_name: "Partition 0".into(),
        });
        let bytes = serde.to_bytes(&eos).unwrap();
        assert_eq!(bytes[0], END_OF_STREAM);
        assert_eq!(serde.from_bytes(&bytes).unwrap(), eos);
    }

    #[test]
    fn test_user_message_uses_inner_codec() {
        let serde = IntermediateMessageSerde::new(Some(Arc::new(JsonSerde)));
        let bytes = serde.to_bytes(&Payload::Json(json!({"n": 1}))).unwrap();
        assert_eq!(bytes[0], USER_MESSAGE);
        assert_eq!(&bytes[1..], br#"{"n":1}"#);
    }

    #[test]
    fn test_raw_user_message_without_inner() {
        let serde = IntermediateMessageSerde::new(None);
        let bytes = serde.to_bytes(&Payload::Bytes(vec![9, 9])).unwrap();
        assert_eq!(bytes, vec![USER_MESSAGE, 9, 9]);
        assert_eq!(serde.from_bytes(&bytes).unwrap(), Payload::Bytes(vec![9, 9]));
        assert!(serde.to_bytes(&Payload::from("text")).is_err());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let serde = IntermediateMessageSerde::new(None);
        assert!(serde.from_bytes(&[]).is_err());
        assert!(serde.from_bytes(&[7, 1]).is_err());

        let mut mislabelled = vec![WATERMARK];
        mislabelled.extend(br#"{"type":"end_of_stream","task_name":"t"}"#);
        assert!(serde.from_bytes(&mislabelled).is_err());
    }
}
