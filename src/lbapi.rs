pub mod grader;

pub use grader::LlmGrader;

use anyhow::Result;
use reqwest::header::{self, HeaderMap, HeaderValue};

/// Headers for an authenticated JSON request against an OpenAI-compatible API.
fn json_headers(api_key: &str) -> Result<HeaderMap> {
    Ok(HeaderMap::from_iter([
        (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
        (header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {api_key}"))?),
    ]))
}
