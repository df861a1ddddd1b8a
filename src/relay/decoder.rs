//! Bounded multipart decoding
//!
//! Materializes the file part of an inbound `multipart/form-data` body into a
//! pooled buffer, never holding more than one chunk's worth of bytes.

use super::buffer::BufferPool;
use super::RelayError;
use bytes::Bytes;
use futures::Stream;
use multer::{Constraints, Multipart, SizeLimit};

/// Room for multipart framing and small non-file parts on top of the chunk ceiling
pub const FRAMING_ALLOWANCE: u64 = 64 * 1024;

/// Largest up-front reservation; buffers grow past it only as bytes arrive
pub const MAX_INITIAL_RESERVATION: usize = 1024 * 1024;

/// Raw bytes of one chunk as received from the client
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub data: Bytes,
    /// Declared content type of the file part
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl ChunkPayload {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Multipart decoder enforcing a per-chunk size ceiling
pub struct BoundedDecoder<'a> {
    pool: &'a BufferPool,
    max_chunk_size: usize,
    file_field: &'a str,
}

impl<'a> BoundedDecoder<'a> {
    pub fn new(pool: &'a BufferPool, max_chunk_size: usize, file_field: &'a str) -> Self {
        Self {
            pool,
            max_chunk_size,
            file_field,
        }
    }

    /// Decode `body` and return the file part.
    ///
    /// `content_length` is the declared request length, used to refuse
    /// obviously oversized bodies before reading them. `size_hint` sizes the
    /// initial buffer (normally the declared chunk size), capped at
    /// [`MAX_INITIAL_RESERVATION`].
    pub async fn decode<'r, S, O, E>(
        &self,
        content_type: Option<&str>,
        content_length: Option<u64>,
        size_hint: u64,
        body: S,
    ) -> Result<ChunkPayload, RelayError>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let content_type = content_type
            .ok_or_else(|| RelayError::MalformedPayload("missing Content-Type header".into()))?;
        let boundary = multer::parse_boundary(content_type).map_err(|e| {
            RelayError::MalformedPayload(format!("expected multipart/form-data body: {}", e))
        })?;

        let stream_limit = (self.max_chunk_size as u64).saturating_add(FRAMING_ALLOWANCE);
        if matches!(content_length, Some(len) if len > stream_limit) {
            return Err(self.too_large());
        }

        let constraints =
            Constraints::new().size_limit(SizeLimit::new().whole_stream(stream_limit));
        let mut multipart = Multipart::with_constraints(body, boundary, constraints);

        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|e| self.classify(e))?
        {
            if field.name() != Some(self.file_field) {
                continue;
            }

            let content_type = field.content_type().map(|mime| mime.to_string());
            let file_name = field.file_name().map(str::to_string);

            let hint = usize::try_from(size_hint).unwrap_or(usize::MAX);
            let mut buf = self
                .pool
                .acquire(hint.min(self.max_chunk_size).min(MAX_INITIAL_RESERVATION));
            while let Some(bytes) = field.chunk().await.map_err(|e| self.classify(e))? {
                if buf.len() + bytes.len() > self.max_chunk_size {
                    return Err(self.too_large());
                }
                buf.extend_from_slice(&bytes);
            }

            if buf.is_empty() {
                return Err(RelayError::MalformedPayload(format!(
                    "'{}' part is empty",
                    self.file_field
                )));
            }

            return Ok(ChunkPayload {
                data: buf.freeze(),
                content_type,
                file_name,
            });
        }

        Err(RelayError::MalformedPayload(format!(
            "multipart body has no '{}' part",
            self.file_field
        )))
    }

    fn too_large(&self) -> RelayError {
        RelayError::PayloadTooLarge {
            limit: self.max_chunk_size,
        }
    }

    fn classify(&self, err: multer::Error) -> RelayError {
        match err {
            multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
                self.too_large()
            }
            multer::Error::StreamReadFailed(e) => {
                RelayError::MalformedPayload(format!("failed to read request body: {}", e))
            }
            other => RelayError::MalformedPayload(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    const BOUNDARY: &str = "X-RELAY-BOUNDARY";

    fn content_type() -> String {
        format!("multipart/form-data; boundary={}", BOUNDARY)
    }

    fn form(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn stream(
        body: Vec<u8>,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        // Deliver in small pieces to exercise incremental parsing
        let pieces: Vec<Result<Bytes, Infallible>> = body
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(pieces)
    }

    #[tokio::test]
    async fn test_decodes_file_part() {
        let pool = BufferPool::new(2, 1024);
        let decoder = BoundedDecoder::new(&pool, 1024, "file");
        let body = form(&[
            ("note", None, &b"ignored"[..]),
            ("file", Some("video.mp4"), &b"chunk-bytes"[..]),
        ]);

        let payload = decoder
            .decode(Some(&content_type()), None, 11, stream(body))
            .await
            .unwrap();

        assert_eq!(&payload.data[..], b"chunk-bytes");
        assert_eq!(payload.file_name.as_deref(), Some("video.mp4"));
        assert_eq!(
            payload.content_type.as_deref(),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn test_oversized_part_is_rejected() {
        let pool = BufferPool::new(2, 100);
        let decoder = BoundedDecoder::new(&pool, 100, "file");
        let body = form(&[("file", Some("big.bin"), &[1u8; 101][..])]);

        let err = decoder
            .decode(Some(&content_type()), None, 101, stream(body))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::PayloadTooLarge { limit: 100 }));
        assert_eq!(pool.idle_count(), 1, "partial buffer goes back to the pool");
    }

    #[tokio::test]
    async fn test_exactly_at_ceiling_is_accepted() {
        let pool = BufferPool::new(2, 100);
        let decoder = BoundedDecoder::new(&pool, 100, "file");
        let body = form(&[("file", Some("edge.bin"), &[1u8; 100][..])]);

        let payload = decoder
            .decode(Some(&content_type()), None, 100, stream(body))
            .await
            .unwrap();
        assert_eq!(payload.len(), 100);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_fails_fast() {
        let pool = BufferPool::new(2, 100);
        let decoder = BoundedDecoder::new(&pool, 100, "file");

        let err = decoder
            .decode(
                Some(&content_type()),
                Some(100 + FRAMING_ALLOWANCE + 1),
                100,
                stream(Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_part() {
        let pool = BufferPool::new(2, 1024);
        let decoder = BoundedDecoder::new(&pool, 1024, "file");
        let body = form(&[("upload", Some("a.bin"), &b"data"[..])]);

        let err = decoder
            .decode(Some(&content_type()), None, 4, stream(body))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(ref msg) if msg.contains("'file'")));
    }

    #[tokio::test]
    async fn test_non_multipart_content_type() {
        let pool = BufferPool::new(2, 1024);
        let decoder = BoundedDecoder::new(&pool, 1024, "file");

        for content_type in [None, Some("application/octet-stream")] {
            let err = decoder
                .decode(content_type, None, 4, stream(b"data".to_vec()))
                .await
                .unwrap_err();
            assert!(matches!(err, RelayError::MalformedPayload(_)));
        }
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let pool = BufferPool::new(2, 1024);
        let decoder = BoundedDecoder::new(&pool, 1024, "file");
        let mut body = form(&[("file", Some("a.bin"), &b"abcdefgh"[..])]);
        body.truncate(body.len() - 20);

        let err = decoder
            .decode(Some(&content_type()), None, 8, stream(body))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_declared_size_does_not_drive_reservation() {
        let ceiling = 64 * 1024 * 1024;
        let pool = BufferPool::new(2, ceiling);
        let decoder = BoundedDecoder::new(&pool, ceiling, "file");
        let mut body = form(&[("file", Some("tiny.bin"), &b"abcd"[..])]);
        body.truncate(body.len() - 10);

        // Client claims a 64 MiB chunk but sends four bytes
        let err = decoder
            .decode(Some(&content_type()), None, ceiling as u64, stream(body))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::MalformedPayload(_)));
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.idle_bytes() <= MAX_INITIAL_RESERVATION);
    }

    #[tokio::test]
    async fn test_read_failure_is_malformed_payload() {
        let pool = BufferPool::new(2, 1024);
        let decoder = BoundedDecoder::new(&pool, 1024, "file");
        let head = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a\"\r\n\r\nabc",
            BOUNDARY
        );
        let pieces: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(head)),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];

        let err = decoder
            .decode(
                Some(&content_type()),
                None,
                3,
                futures::stream::iter(pieces),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, RelayError::MalformedPayload(ref msg) if msg.contains("client went away")),
            "unexpected error: {:?}",
            err
        );
    }
}
