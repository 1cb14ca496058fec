//! Image encoding: page PNG bytes → base64 `ImageData`.
//!
//! Vision APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. The renderer already produced PNG —
//! lossless, so rendered digits and fine print stay crisp — and this stage
//! only wraps the bytes for the wire. `detail: "high"` instructs GPT-4-class
//! models to use the full image tile budget; without it the small line-item
//! rows of a dense invoice are lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Wrap a page's PNG bytes as a base64 image attachment.
pub fn encode_page(png: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("encoded page image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_valid_base64() {
        let data = encode_page(&[0x89, b'P', b'N', b'G', 0, 1, 2, 3]);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded.len(), 8);
    }

    #[test]
    fn empty_payload_still_encodes() {
        let data = encode_page(&[]);
        assert!(data.data.is_empty());
    }
}
