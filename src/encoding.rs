//! Request-body wire encodings understood by the relay.
//!
//! The relay transports bodies either verbatim (`identity`) or gzip-framed
//! (RFC 1952). Plugins that rewrite bodies decode first and re-encode after,
//! so the upstream always observes the encoding the client chose.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hyper::header::CONTENT_ENCODING;
use hyper::{Body, Request};

use crate::error::{RelayError, RelayResult};

/// Query parameter that may carry the body encoding instead of the
/// `Content-Encoding` header. When both are present they must agree.
pub const ENCODING_QUERY_PARAM: &str = "ContentEncoding";

/// The closed set of body encodings the relay transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
}

impl Encoding {
    /// Parse an encoding token as it appears in a header or query parameter.
    pub fn parse(value: &str) -> RelayResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Encoding::Identity),
            "gzip" => Ok(Encoding::Gzip),
            other => Err(RelayError::decode(format!(
                "unsupported content encoding: {}",
                other
            ))),
        }
    }

    /// Determine the body encoding of a request from its `Content-Encoding`
    /// header and/or the `ContentEncoding` query parameter. Conflicting
    /// signals are an error; callers treat that as "leave the body alone".
    pub fn for_request(request: &Request<Body>) -> RelayResult<Self> {
        let from_header = match request.headers().get(CONTENT_ENCODING) {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| RelayError::decode("non-ASCII Content-Encoding header"))?;
                Some(Self::parse(value)?)
            }
            None => None,
        };

        let from_query = request
            .uri()
            .query()
            .and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == ENCODING_QUERY_PARAM)
                    .map(|(_, value)| Self::parse(&value))
            })
            .transpose()?;

        match (from_header, from_query) {
            (Some(header), Some(query)) if header != query => Err(RelayError::decode(format!(
                "Content-Encoding header ({:?}) conflicts with {} query parameter ({:?})",
                header, ENCODING_QUERY_PARAM, query
            ))),
            (Some(encoding), _) | (None, Some(encoding)) => Ok(encoding),
            (None, None) => Ok(Encoding::Identity),
        }
    }
}

/// Encode raw bytes under the given encoding.
pub fn encode_data(data: &[u8], encoding: Encoding) -> RelayResult<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(data.to_vec()),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| RelayError::decode(format!("gzip encode failed: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| RelayError::decode(format!("gzip encode failed: {}", e)))
        }
    }
}

/// Decode wire bytes under the given encoding.
pub fn decode_data(data: &[u8], encoding: Encoding) -> RelayResult<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(data.to_vec()),
        Encoding::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut decoded = Vec::new();
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| RelayError::decode(format!("gzip decode failed: {}", e)))?;
            Ok(decoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_identity() {
        let data = b"Hello, world!".to_vec();
        let encoded = encode_data(&data, Encoding::Identity).unwrap();
        assert_eq!(encoded, data);
        let decoded = decode_data(&encoded, Encoding::Identity).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_round_trip_gzip() {
        let data = b"Hello, world! Hello, world! Hello, world!".to_vec();
        let encoded = encode_data(&data, Encoding::Gzip).unwrap();
        assert_ne!(encoded, data);
        let decoded = decode_data(&encoded, Encoding::Gzip).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_round_trip_empty() {
        for encoding in [Encoding::Identity, Encoding::Gzip] {
            let encoded = encode_data(b"", encoding).unwrap();
            let decoded = decode_data(&encoded, encoding).unwrap();
            assert!(decoded.is_empty());
        }
    }

    #[test]
    fn test_truncated_gzip_is_a_decode_error() {
        let encoded = encode_data(b"some content", Encoding::Gzip).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        let err = decode_data(truncated, Encoding::Gzip).unwrap_err();
        assert!(matches!(err, RelayError::Decode { .. }));
    }

    #[test]
    fn test_garbage_gzip_is_a_decode_error() {
        let err = decode_data(b"definitely not gzip", Encoding::Gzip).unwrap_err();
        assert!(matches!(err, RelayError::Decode { .. }));
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(Encoding::parse("gzip").unwrap(), Encoding::Gzip);
        assert_eq!(Encoding::parse("GZIP").unwrap(), Encoding::Gzip);
        assert_eq!(Encoding::parse("identity").unwrap(), Encoding::Identity);
        assert!(Encoding::parse("br").is_err());
    }

    #[test]
    fn test_for_request_header() {
        let request = Request::builder()
            .uri("http://localhost/")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        assert_eq!(Encoding::for_request(&request).unwrap(), Encoding::Gzip);
    }

    #[test]
    fn test_for_request_query_param() {
        let request = Request::builder()
            .uri("http://localhost/?ContentEncoding=gzip")
            .body(Body::empty())
            .unwrap();
        assert_eq!(Encoding::for_request(&request).unwrap(), Encoding::Gzip);
    }

    #[test]
    fn test_for_request_defaults_to_identity() {
        let request = Request::builder()
            .uri("http://localhost/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(Encoding::for_request(&request).unwrap(), Encoding::Identity);
    }

    #[test]
    fn test_for_request_conflicting_signals() {
        let request = Request::builder()
            .uri("http://localhost/?ContentEncoding=identity")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        assert!(Encoding::for_request(&request).is_err());
    }

    #[test]
    fn test_for_request_agreeing_signals() {
        let request = Request::builder()
            .uri("http://localhost/?ContentEncoding=gzip")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        assert_eq!(Encoding::for_request(&request).unwrap(), Encoding::Gzip);
    }
}
