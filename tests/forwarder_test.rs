//! HTTP Forwarder Integration Tests
//!
//! Checks the outbound request shape against a wiremock upstream.

use bytes::Bytes;
use chunk_relay::config::UpstreamConfig;
use chunk_relay::relay::{ByteRange, ChunkPayload, ChunkSink, ForwardError, HttpForwarder};
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload(data: &'static [u8]) -> ChunkPayload {
    ChunkPayload {
        data: Bytes::from_static(data),
        content_type: Some("application/octet-stream".into()),
        file_name: Some("clip.mp4".into()),
    }
}

/// Test: range and identity headers carry the reconstructed placement
#[tokio::test]
async fn test_forwards_range_and_identity_headers() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("Content-Range", "bytes 2000-2499/2500"))
        .and(header("X-Unique-Upload-Id", "u1"))
        .and(header_regex("content-type", "^multipart/form-data; boundary="))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let forwarder = HttpForwarder::builder()
        .endpoint(&format!("{}/upload", upstream.uri()))
        .build()
        .expect("Failed to build forwarder");

    forwarder
        .submit_chunk(
            "u1",
            ByteRange {
                start: 2000,
                end: 2499,
            },
            2500,
            &payload(b"tail-bytes"),
        )
        .await
        .expect("upstream should accept the chunk");
}

/// Test: the body holds the file part plus every configured field
#[tokio::test]
async fn test_multipart_body_includes_configured_fields() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("name=\"file\"; filename=\"clip.mp4\""))
        .and(body_string_contains("name=\"upload_preset\""))
        .and(body_string_contains("chunks-preset"))
        .and(body_string_contains("name=\"public_id\""))
        .and(body_string_contains("chunk-payload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut fields = BTreeMap::new();
    fields.insert("upload_preset".to_string(), "chunks-preset".to_string());
    fields.insert("public_id".to_string(), "videos/clip".to_string());
    let config = UpstreamConfig {
        endpoint: upstream.uri(),
        fields,
        ..serde_yaml::from_str::<UpstreamConfig>("endpoint: http://placeholder").expect("valid upstream yaml")
    };

    let forwarder = HttpForwarder::from_config(&config).expect("Failed to build forwarder");
    forwarder
        .submit_chunk("u1", ByteRange { start: 0, end: 12 }, 13, &payload(b"chunk-payload"))
        .await
        .expect("upstream should accept the chunk");
}

/// Test: custom header and part names are honoured
#[tokio::test]
async fn test_custom_header_and_field_names() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-Byte-Range", "bytes 0-4/5"))
        .and(header("X-Upload-Session", "session-9"))
        .and(body_string_contains("name=\"media\""))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&upstream)
        .await;

    let forwarder = HttpForwarder::builder()
        .endpoint(&upstream.uri())
        .file_field("media")
        .range_header("X-Byte-Range")
        .identity_header("X-Upload-Session")
        .build()
        .expect("Failed to build forwarder");

    forwarder
        .submit_chunk("session-9", ByteRange { start: 0, end: 4 }, 5, &payload(b"hello"))
        .await
        .expect("any 2xx counts as success");
}

/// Test: a non-2xx status is reported as a rejection with its body
#[tokio::test]
async fn test_error_status_is_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bucket offline"))
        .mount(&upstream)
        .await;

    let forwarder = HttpForwarder::builder()
        .endpoint(&upstream.uri())
        .build()
        .expect("Failed to build forwarder");

    let err = forwarder
        .submit_chunk("u1", ByteRange { start: 0, end: 4 }, 5, &payload(b"hello"))
        .await
        .unwrap_err();

    match err {
        ForwardError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "bucket offline");
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

/// Test: an unreachable endpoint is a transient transport failure
#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let forwarder = HttpForwarder::builder()
        .endpoint(&format!("http://{}/upload", addr))
        .connect_timeout(Duration::from_secs(2))
        .build()
        .expect("Failed to build forwarder");

    let err = forwarder
        .submit_chunk("u1", ByteRange { start: 0, end: 4 }, 5, &payload(b"hello"))
        .await
        .unwrap_err();

    assert!(err.is_transient(), "expected transport error, got {:?}", err);
}
