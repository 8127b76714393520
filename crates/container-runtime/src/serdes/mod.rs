//! # Serdes
//!
//! Codecs between transport bytes and `Payload` values, the built-in codec
//! set, and the per-system / per-stream resolution table.
//!
//! ## Built-in codecs
//!
//! | Name     | Codec        | Decodes to        |
//! |----------|--------------|-------------------|
//! | `noop`   | `NoOpSerde`  | never stored      |
//! | `string` | `StringSerde`| `Payload::Text`   |
//! | `json`   | `JsonSerde`  | `Payload::Json`   |
//! | `bytes`  | `BytesSerde` | `Payload::Bytes`  |

mod intermediate;
mod table;

pub use intermediate::{IntermediateMessageSerde, USER_MESSAGE, WATERMARK, END_OF_STREAM};
pub use table::{SerdeManager, SerdeTable};

use std::sync::Arc;

use anyhow::{anyhow, Context};
use stream_types::Payload;

use crate::config::Config;

/// Built-in serde names, also usable as factory names.
pub const NOOP_SERDE: &str = "noop";
pub const STRING_SERDE: &str = "string";
pub const JSON_SERDE: &str = "json";
pub const BYTES_SERDE: &str = "bytes";

/// A key or message codec.
pub trait Serde: Send + Sync {
    fn name(&self) -> &str;

    fn to_bytes(&self, payload: &Payload) -> anyhow::Result<Vec<u8>>;

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<Payload>;

    /// The no-op sentinel marks "leave bytes untouched" and is never bound.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Builds a serde from its configuration.
pub trait SerdeFactory: Send + Sync {
    fn create(&self, name: &str, config: &Config) -> Arc<dyn Serde>;
}

// =============================================================================
// BUILT-IN CODECS
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSerde;

impl Serde for NoOpSerde {
    fn name(&self) -> &str {
        NOOP_SERDE
    }

    fn to_bytes(&self, payload: &Payload) -> anyhow::Result<Vec<u8>> {
        payload
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| anyhow!("noop serde can only pass raw bytes through"))
    }

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<Payload> {
        Ok(Payload::Bytes(bytes.to_vec()))
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// UTF-8 text.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringSerde;

impl Serde for StringSerde {
    fn name(&self) -> &str {
        STRING_SERDE
    }

    fn to_bytes(&self, payload: &Payload) -> anyhow::Result<Vec<u8>> {
        match payload {
            Payload::Text(s) => Ok(s.as_bytes().to_vec()),
            Payload::Bytes(b) => {
                std::str::from_utf8(b).context("string serde given non UTF-8 bytes")?;
                Ok(b.clone())
            }
            Payload::Json(serde_json::Value::String(s)) => Ok(s.as_bytes().to_vec()),
            other => Err(anyhow!("string serde cannot encode {other:?}")),
        }
    }

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<Payload> {
        let text = std::str::from_utf8(bytes).context("invalid UTF-8")?;
        Ok(Payload::Text(text.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerde;

impl Serde for JsonSerde {
    fn name(&self) -> &str {
        JSON_SERDE
    }

    fn to_bytes(&self, payload: &Payload) -> anyhow::Result<Vec<u8>> {
        match payload {
            Payload::Json(v) => Ok(serde_json::to_vec(v)?),
            Payload::Text(s) => Ok(serde_json::to_vec(s)?),
            Payload::Control(c) => Ok(serde_json::to_vec(c)?),
            Payload::Bytes(b) => {
                serde_json::from_slice::<serde_json::Value>(b)
                    .context("json serde given bytes that are not JSON")?;
                Ok(b.clone())
            }
        }
    }

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<Payload> {
        Ok(Payload::Json(serde_json::from_slice(bytes)?))
    }
}

/// Raw bytes; text is accepted on the way out.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesSerde;

impl Serde for BytesSerde {
    fn name(&self) -> &str {
        BYTES_SERDE
    }

    fn to_bytes(&self, payload: &Payload) -> anyhow::Result<Vec<u8>> {
        match payload {
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(anyhow!("bytes serde cannot encode {other:?}")),
        }
    }

    fn from_bytes(&self, bytes: &[u8]) -> anyhow::Result<Payload> {
        Ok(Payload::Bytes(bytes.to_vec()))
    }
}

macro_rules! builtin_serde_factory {
    ($factory:ident, $serde:ident) => {
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $factory;

        impl SerdeFactory for $factory {
            fn create(&self, _name: &str, _config: &Config) -> Arc<dyn Serde> {
                Arc::new($serde)
            }
        }
    };
}

builtin_serde_factory!(NoOpSerdeFactory, NoOpSerde);
builtin_serde_factory!(StringSerdeFactory, StringSerde);
builtin_serde_factory!(JsonSerdeFactory, JsonSerde);
builtin_serde_factory!(BytesSerdeFactory, BytesSerde);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_serde() {
        let bytes = StringSerde.to_bytes(&Payload::from("héllo")).unwrap();
        assert_eq!(StringSerde.from_bytes(&bytes).unwrap(), Payload::from("héllo"));
        assert!(StringSerde.from_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_json_serde() {
        let value = json!({"word": "a", "count": 3});
        let bytes = JsonSerde.to_bytes(&Payload::Json(value.clone())).unwrap();
        assert_eq!(JsonSerde.from_bytes(&bytes).unwrap(), Payload::Json(value));
        assert!(JsonSerde.to_bytes(&Payload::Bytes(b"{oops".to_vec())).is_err());
    }

    #[test]
    fn test_noop_only_passes_bytes() {
        assert!(NoOpSerde.is_noop());
        assert_eq!(NoOpSerde.to_bytes(&Payload::Bytes(vec![7])).unwrap(), vec![7]);
        assert!(NoOpSerde.to_bytes(&Payload::from("text")).is_err());
    }

    #[test]
    fn test_bytes_serde_accepts_text() {
        assert_eq!(BytesSerde.to_bytes(&Payload::from("ab")).unwrap(), b"ab".to_vec());
        assert!(BytesSerde.to_bytes(&Payload::Json(json!(1))).is_err());
    }
}
