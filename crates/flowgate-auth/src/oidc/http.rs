//! Bounded reads of provider responses.

use super::error::OidcError;

/// Reads the body of `response`, failing as soon as it exceeds `max_size`
/// bytes. A declared `Content-Length` over the limit is rejected before
/// anything is read; chunked bodies are counted as they arrive.
pub(crate) async fn read_body_limited(
    mut response: reqwest::Response,
    max_size: usize,
) -> Result<Vec<u8>, OidcError> {
    let too_large = || OidcError::ResponseTooLarge { max_size };
    if response
        .content_length()
        .is_some_and(|len| len > max_size as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_size {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
