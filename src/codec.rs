//! Encoder/decoder collaborator.
//!
//! The dispatcher never serializes values itself; it negotiates a format
//! alias (explicit `format` query parameter, else the codec's default) and
//! hands the refined return value to the [`Codec`]. Request bodies travel the
//! other way through [`Codec::read`] during parameter binding.

use crate::error::CodecError;
use serde_json::Value;
use std::io::Write;

/// Format collaborator: bytes in, typed value out, and back.
pub trait Codec: Send + Sync {
    /// Default format alias used when the request does not ask for one.
    fn default_format(&self) -> &str;

    /// MIME type for a format alias, when the codec knows the alias.
    fn mime_type(&self, alias: &str) -> Option<&str>;

    /// Encode `value` as `content_type` onto `out`.
    fn write(&self, out: &mut dyn Write, content_type: &str, value: &Value)
        -> Result<(), CodecError>;

    /// Decode a request body of `content_type` into a structured value.
    fn read(&self, input: &[u8], content_type: &str) -> Result<Value, CodecError>;
}

/// JSON codec, the one structured format every deployment carries.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    pub const FORMAT: &'static str = "json";
    pub const MIME: &'static str = "application/json";

    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn default_format(&self) -> &str {
        Self::FORMAT
    }

    fn mime_type(&self, alias: &str) -> Option<&str> {
        (alias == Self::FORMAT).then_some(Self::MIME)
    }

    fn write(
        &self,
        out: &mut dyn Write,
        _content_type: &str,
        value: &Value,
    ) -> Result<(), CodecError> {
        serde_json::to_writer(out, value).map_err(|e| CodecError::Encode(e.into()))
    }

    fn read(&self, input: &[u8], _content_type: &str) -> Result<Value, CodecError> {
        serde_json::from_slice(input).map_err(|e| CodecError::Decode(e.into()))
    }
}

/// Resolve the response MIME for a requested alias, falling back to the
/// codec's default when the alias is unknown.
pub fn negotiate<'a>(codec: &'a dyn Codec, requested: Option<&str>) -> &'a str {
    requested
        .and_then(|alias| codec.mime_type(alias))
        .or_else(|| codec.mime_type(codec.default_format()))
        .unwrap_or(JsonCodec::MIME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec::new();
        let value = json!({"name": "x", "n": 3});
        let mut buf = Vec::new();
        codec.write(&mut buf, JsonCodec::MIME, &value).unwrap();
        assert_eq!(codec.read(&buf, JsonCodec::MIME).unwrap(), value);
    }

    #[test]
    fn negotiate_falls_back_to_default() {
        let codec = JsonCodec::new();
        assert_eq!(negotiate(&codec, Some("json")), "application/json");
        assert_eq!(negotiate(&codec, Some("xml")), "application/json");
        assert_eq!(negotiate(&codec, None), "application/json");
    }

    #[test]
    fn decode_error_is_reported() {
        let codec = JsonCodec::new();
        assert!(codec.read(b"{not json", JsonCodec::MIME).is_err());
    }
}
