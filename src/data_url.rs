//! Converting image payloads to and from `data:` URLs.

use std::sync::LazyLock;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use regex::Regex;

/// Regex for parsing a base64 `data:` URL.
static DATA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime_type>[^;,]+);base64,(?P<data>.+)$")
        .expect("failed to compile data URL regex")
});

/// Convert binary data to base64.
pub fn encode_base64(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

/// Build a `data:` URL from data which is already base64-encoded.
///
/// We don't percent-encode the payload. Vision APIs expect the raw base64.
pub fn data_url_from_base64(mime_type: &str, base64_data: &str) -> String {
    format!("data:{};base64,{}", mime_type, base64_data)
}

/// Parse a `data:` URL into a MIME type and base64-encoded data.
pub fn parse_data_url(data_url: &str) -> Option<(&str, &str)> {
    let caps = DATA_URL_RE.captures(data_url)?;
    let mime_type = caps.name("mime_type")?.as_str();
    let data = caps.name("data")?.as_str();
    Some((mime_type, data))
}

/// Check that a `data:` URL is well-formed and carries a non-empty, decodable
/// base64 payload. Returns a description of the problem if not.
pub fn check_image_data_url(data_url: &str) -> Result<(), String> {
    let (mime_type, data) =
        parse_data_url(data_url).ok_or_else(|| "not a base64 data: URL".to_owned())?;
    if !mime_type.starts_with("image/") {
        return Err(format!("expected an image MIME type, found {mime_type:?}"));
    }
    match BASE64_STANDARD.decode(data) {
        Ok(bytes) if bytes.is_empty() => Err("image payload is empty".to_owned()),
        Ok(_) => Ok(()),
        Err(err) => Err(format!("image payload is not valid base64: {err}")),
    }
}
