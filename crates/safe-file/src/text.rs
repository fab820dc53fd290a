//! Encoding utilities for file content.

/// Decode `bytes` as UTF-8, replacing each invalid byte sequence with
/// `replacement`.
///
/// An empty `replacement` strips invalid sequences entirely. Valid input is
/// returned unchanged.
pub fn scrub_encoding(bytes: &[u8], replacement: &str) -> String {
    let mut result = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        result.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            result.push_str(replacement);
        }
    }
    result
}

/// Decode `bytes` as UTF-8, scrubbing only when a replacement is configured.
///
/// Returns `Err` with the underlying UTF-8 error when the content is invalid
/// and no replacement was given.
pub fn decode_content(
    bytes: Vec<u8>,
    replacement: Option<&str>,
) -> Result<String, std::string::FromUtf8Error> {
    match replacement {
        Some(replacement) => Ok(scrub_encoding(&bytes, replacement)),
        None => String::from_utf8(bytes),
    }
}
