//! Chunk descriptor parsing
//!
//! Extracts the Resumable.js chunk metadata from the request query string.
//! Validation is purely syntactic; cross-field consistency is left to the
//! remote endpoint.

use super::RelayError;
use hyper::header::HeaderValue;
use std::collections::HashMap;

pub const PARAM_IDENTIFIER: &str = "resumableIdentifier";
pub const PARAM_CHUNK_NUMBER: &str = "resumableChunkNumber";
pub const PARAM_CHUNK_SIZE: &str = "resumableChunkSize";
pub const PARAM_CURRENT_CHUNK_SIZE: &str = "resumableCurrentChunkSize";
pub const PARAM_TOTAL_SIZE: &str = "resumableTotalSize";

/// Per-request chunk metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Stable across all chunks of one logical upload
    pub upload_identifier: String,
    /// 1-based ordinal of this chunk
    pub chunk_number: u64,
    /// Size of every chunk except possibly the last
    pub nominal_chunk_size: u64,
    /// Size of this chunk's payload
    pub actual_chunk_size: u64,
    /// Byte length of the complete object
    pub total_size: u64,
}

impl ChunkDescriptor {
    /// Parse a descriptor from a raw (percent-encoded) query string
    pub fn from_query(query: Option<&str>) -> Result<Self, RelayError> {
        let params = parse_query(query.unwrap_or_default());

        let upload_identifier = params
            .get(PARAM_IDENTIFIER)
            .ok_or_else(|| missing(PARAM_IDENTIFIER))?;
        if upload_identifier.is_empty() {
            return Err(RelayError::MalformedRequest(format!(
                "{} must not be empty",
                PARAM_IDENTIFIER
            )));
        }
        // Forwarded verbatim as a header value
        if HeaderValue::from_str(upload_identifier).is_err() {
            return Err(RelayError::MalformedRequest(format!(
                "{} contains characters not allowed in a header",
                PARAM_IDENTIFIER
            )));
        }

        Ok(Self {
            upload_identifier: upload_identifier.to_string(),
            chunk_number: positive(&params, PARAM_CHUNK_NUMBER)?,
            nominal_chunk_size: positive(&params, PARAM_CHUNK_SIZE)?,
            actual_chunk_size: positive(&params, PARAM_CURRENT_CHUNK_SIZE)?,
            total_size: positive(&params, PARAM_TOTAL_SIZE)?,
        })
    }

    /// Whether the client framed this as the short trailing chunk.
    ///
    /// Informational only: the relay cannot know an upload is complete.
    pub fn is_final_hint(&self) -> bool {
        self.actual_chunk_size < self.nominal_chunk_size
    }
}

fn missing(name: &str) -> RelayError {
    RelayError::MalformedRequest(format!("missing query parameter {}", name))
}

fn positive(params: &HashMap<String, String>, name: &str) -> Result<u64, RelayError> {
    let raw = params.get(name).ok_or_else(|| missing(name))?;
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(RelayError::MalformedRequest(format!(
            "{} must be greater than zero",
            name
        ))),
        Ok(value) => Ok(value),
        Err(e) => Err(RelayError::MalformedRequest(format!(
            "{} is not a positive integer ({:?}): {}",
            name, raw, e
        ))),
    }
}

/// Decode `application/x-www-form-urlencoded` pairs. The first occurrence of a key wins.
fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}
