//! Buffer-oriented multipart (RFC 7578) parsing.
//!
//! Malformed input surfaces a parse error instead of silently dropping
//! the unparsed remainder.

use bytes::Bytes;
use std::convert::Infallible;

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Part {
    /// The `name` parameter of the part's content disposition.
    pub name: Option<String>,
    /// The `filename` parameter, for file parts.
    pub filename: Option<String>,
    /// The part's own content type.
    pub content_type: Option<String>,
    /// The raw part payload.
    pub data: Bytes,
}

/// Errors produced while decomposing a multipart body.
#[derive(Debug, thiserror::Error)]
#[error("malformed multipart body")]
pub struct MultipartError(#[from] multer::Error);

/// Extract the boundary parameter from a `Content-Type` field value.
pub fn boundary(content_type: &str) -> Option<String> {
    multer::parse_boundary(content_type).ok()
}

/// Parse a fully-buffered multipart body delimited by `boundary`.
pub async fn parse(boundary: &str, body: Bytes) -> Result<Vec<Part>, MultipartError> {
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut parts = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(|m| m.to_string());
        let data = field.bytes().await?;
        parts.push(Part {
            name,
            filename,
            content_type,
            data,
        });
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "X-WHARF-BOUNDARY";

    fn sample_body() -> Bytes {
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             hello\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"upload\"; filename=\"a.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             \x01\x02\x03\r\n\
             --{b}--\r\n",
            b = BOUNDARY
        );
        Bytes::from(body)
    }

    #[tokio::test]
    async fn known_boundary_yields_all_parts() {
        let parts = parse(BOUNDARY, sample_body()).await.unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name.as_deref(), Some("title"));
        assert_eq!(&parts[0].data[..], b"hello");
        assert!(parts[0].filename.is_none());

        assert_eq!(parts[1].name.as_deref(), Some("upload"));
        assert_eq!(parts[1].filename.as_deref(), Some("a.bin"));
        assert_eq!(
            parts[1].content_type.as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(&parts[1].data[..], b"\x01\x02\x03");
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let broken = Bytes::from(format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\ndangling",
            b = BOUNDARY
        ));
        assert!(parse(BOUNDARY, broken).await.is_err());
    }

    #[test]
    fn boundary_is_read_from_the_content_type() {
        assert_eq!(
            boundary("multipart/form-data; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert!(boundary("text/plain").is_none());
    }
}
