//! Page rendering: native text, OCR fallback, and PNG payloads.
//!
//! ## Why spawn_blocking?
//!
//! Both pdfium (via `pdfium-render`) and Tesseract wrap C/C++ libraries with
//! thread-local state that must not run on async worker threads.
//! `tokio::task::spawn_blocking` moves the whole render pass onto the
//! blocking pool so the executor stays responsive while pages rasterise.
//!
//! ## Two rasters per page
//!
//! A blank-text page is rendered twice at different pixel caps: a larger
//! raster for Tesseract (OCR accuracy scales with pixels) and a smaller one
//! for the vision payload (request size matters more there). Pages whose
//! native text extraction succeeds skip the OCR raster entirely.
//!
//! ## Degradation
//!
//! A page that cannot be rendered contributes empty text and a best-effort
//! blank image; only a document that cannot be opened at all fails the run.

use crate::config::ExtractionConfig;
use crate::error::InvoxError;
use image::{DynamicImage, Rgba, RgbaImage};
use kreuzberg_tesseract::{TessPageSegMode, TesseractAPI};
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// One rendered page: extracted (or OCR-recovered) text plus a PNG payload.
///
/// Immutable once produced. `text` is the empty string when both native
/// extraction and the OCR fallback failed.
#[derive(Debug, Clone)]
pub struct Page {
    /// 0-indexed position in the document.
    pub index: usize,
    /// Native or OCR-recovered page text.
    pub text: String,
    /// PNG-encoded payload image for the inference request.
    pub png: Vec<u8>,
}

/// All pages of a document, plus how many needed the OCR fallback.
#[derive(Debug)]
pub struct RenderedDocument {
    pub pages: Vec<Page>,
    pub ocr_pages: usize,
}

/// Pixel caps, OCR language, and password lifted out of the config so the
/// blocking closure doesn't capture the whole thing.
#[derive(Debug, Clone)]
struct RenderSettings {
    ocr_pixels: u32,
    payload_pixels: u32,
    language: String,
    password: Option<String>,
}

/// Render every page of a document (PDF or raster image).
///
/// Runs inside `spawn_blocking` since pdfium and Tesseract are CPU-bound.
///
/// # Errors
/// Only when the document itself cannot be opened (corrupt bytes, wrong
/// password, unsupported format). Per-page failures degrade in place.
pub async fn render_document(
    bytes: Vec<u8>,
    filename: &str,
    config: &ExtractionConfig,
) -> Result<RenderedDocument, InvoxError> {
    let filename = filename.to_string();
    let settings = RenderSettings {
        ocr_pixels: config.ocr_render_pixels,
        payload_pixels: config.payload_render_pixels,
        language: config.ocr_language.clone(),
        password: config.password.clone(),
    };

    tokio::task::spawn_blocking(move || render_blocking(&bytes, &filename, &settings))
        .await
        .map_err(|e| InvoxError::Internal(format!("render task panicked: {e}")))?
}

fn render_blocking(
    bytes: &[u8],
    filename: &str,
    settings: &RenderSettings,
) -> Result<RenderedDocument, InvoxError> {
    if is_pdf(filename, bytes) {
        render_pdf(bytes, filename, settings)
    } else if has_image_extension(filename) {
        render_image(bytes, filename, settings)
    } else {
        Err(InvoxError::UnsupportedFormat {
            filename: filename.to_string(),
        })
    }
}

/// PDF vs. raster dispatch: extension first, magic bytes as a tiebreaker
/// for extensionless downloads.
fn is_pdf(filename: &str, bytes: &[u8]) -> bool {
    filename.to_lowercase().ends_with(".pdf") || bytes.starts_with(b"%PDF")
}

fn has_image_extension(filename: &str) -> bool {
    Path::new(&filename.to_lowercase())
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| matches!(ext, "png" | "jpg" | "jpeg"))
}

fn render_pdf(
    bytes: &[u8],
    filename: &str,
    settings: &RenderSettings,
) -> Result<RenderedDocument, InvoxError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, settings.password.as_deref())
        .map_err(|e| {
            let err_str = format!("{e:?}");
            if err_str.contains("Password") || err_str.contains("password") {
                if settings.password.is_some() {
                    InvoxError::WrongPassword {
                        filename: filename.to_string(),
                    }
                } else {
                    InvoxError::PasswordRequired {
                        filename: filename.to_string(),
                    }
                }
            } else {
                InvoxError::DocumentUnreadable {
                    filename: filename.to_string(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("document '{}' opened: {} pages", filename, total_pages);

    let ocr_config = PdfRenderConfig::new()
        .set_target_width(settings.ocr_pixels as i32)
        .set_maximum_height(settings.ocr_pixels as i32);
    let payload_config = PdfRenderConfig::new()
        .set_target_width(settings.payload_pixels as i32)
        .set_maximum_height(settings.payload_pixels as i32);

    let mut rendered = Vec::with_capacity(total_pages);
    let mut ocr_pages = 0usize;

    for idx in 0..total_pages {
        let page = match pages.get(idx as u16) {
            Ok(page) => page,
            Err(e) => {
                warn!("page {} unreadable, substituting blank page: {e:?}", idx + 1);
                rendered.push(Page {
                    index: idx,
                    text: String::new(),
                    png: blank_png(),
                });
                continue;
            }
        };

        let mut text = page.text().map(|t| t.all()).unwrap_or_default();

        if text.trim().is_empty() {
            ocr_pages += 1;
            debug!("no native text on page {}, running OCR fallback", idx + 1);
            match page.render_with_config(&ocr_config) {
                Ok(bitmap) => match ocr_text(&bitmap.as_image(), &settings.language, idx) {
                    Ok(recovered) => text = recovered,
                    Err(e) => warn!("{e}"),
                },
                Err(e) => warn!("OCR raster failed on page {}: {e:?}", idx + 1),
            }
        }

        let png = match page.render_with_config(&payload_config) {
            Ok(bitmap) => encode_png(&bitmap.as_image()).unwrap_or_else(|e| {
                warn!("PNG encoding failed on page {}: {e}", idx + 1);
                blank_png()
            }),
            Err(e) => {
                warn!("payload raster failed on page {}: {e:?}", idx + 1);
                blank_png()
            }
        };

        debug!(
            "rendered page {} → {} chars text, {} bytes PNG",
            idx + 1,
            text.len(),
            png.len()
        );

        rendered.push(Page {
            index: idx,
            text,
            png,
        });
    }

    Ok(RenderedDocument {
        pages: rendered,
        ocr_pages,
    })
}

/// A raster image is a one-page document whose text can only come from OCR.
fn render_image(
    bytes: &[u8],
    filename: &str,
    settings: &RenderSettings,
) -> Result<RenderedDocument, InvoxError> {
    let img = image::load_from_memory(bytes).map_err(|e| InvoxError::DocumentUnreadable {
        filename: filename.to_string(),
        detail: e.to_string(),
    })?;
    info!(
        "image document '{}' opened: {}x{} px",
        filename,
        img.width(),
        img.height()
    );

    let ocr_raster = cap_longest_edge(&img, settings.ocr_pixels);
    let text = match ocr_text(&ocr_raster, &settings.language, 0) {
        Ok(recovered) => recovered,
        Err(e) => {
            warn!("{e}");
            String::new()
        }
    };

    let payload = cap_longest_edge(&img, settings.payload_pixels);
    let png = encode_png(&payload).unwrap_or_else(|e| {
        warn!("PNG encoding failed for image document: {e}");
        blank_png()
    });

    Ok(RenderedDocument {
        pages: vec![Page {
            index: 0,
            text,
            png,
        }],
        ocr_pages: 1,
    })
}

fn cap_longest_edge(img: &DynamicImage, max_pixels: u32) -> DynamicImage {
    if img.width().max(img.height()) > max_pixels {
        img.thumbnail(max_pixels, max_pixels)
    } else {
        img.clone()
    }
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Best-effort stand-in for a page that could not be rasterised.
fn blank_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255])));
    encode_png(&img).unwrap_or_default()
}

/// Run Tesseract over a page raster.
fn ocr_text(img: &DynamicImage, language: &str, page: usize) -> Result<String, InvoxError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let bytes_per_pixel = 3i32;
    let bytes_per_line = (width * 3) as i32;

    let api = TesseractAPI::new();
    let tessdata = resolve_tessdata_dir();

    api.init(&tessdata, language)
        .map_err(|e| InvoxError::OcrFailed {
            page,
            detail: format!("init (language '{language}', tessdata '{tessdata}'): {e}"),
        })?;
    api.set_page_seg_mode(TessPageSegMode::from_int(3))
        .map_err(|e| InvoxError::OcrFailed {
            page,
            detail: format!("set page segmentation mode: {e}"),
        })?;
    api.set_image(
        rgb.as_raw(),
        width as i32,
        height as i32,
        bytes_per_pixel,
        bytes_per_line,
    )
    .map_err(|e| InvoxError::OcrFailed {
        page,
        detail: format!("set image: {e}"),
    })?;
    api.recognize().map_err(|e| InvoxError::OcrFailed {
        page,
        detail: format!("recognize: {e}"),
    })?;

    api.get_utf8_text().map_err(|e| InvoxError::OcrFailed {
        page,
        detail: format!("extract text: {e}"),
    })
}

/// Locate a tessdata directory: `TESSDATA_PREFIX` wins, then the usual
/// distro install locations. An empty string lets Tesseract try its
/// compiled-in default.
fn resolve_tessdata_dir() -> String {
    if let Ok(dir) = std::env::var("TESSDATA_PREFIX") {
        if !dir.is_empty() {
            return dir;
        }
    }

    const FALLBACK_PATHS: &[&str] = &[
        "/opt/homebrew/share/tessdata",
        "/usr/share/tesseract-ocr/5/tessdata",
        "/usr/share/tesseract-ocr/4/tessdata",
        "/usr/share/tessdata",
        "/usr/local/share/tessdata",
    ];

    FALLBACK_PATHS
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| (*p).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_detection_by_extension_and_magic() {
        assert!(is_pdf("invoice.pdf", b"%PDF-1.7"));
        assert!(is_pdf("INVOICE.PDF", b"junk"));
        assert!(is_pdf("no-extension", b"%PDF-1.4"));
        assert!(!is_pdf("scan.png", b"\x89PNG"));
    }

    #[test]
    fn image_extension_detection() {
        assert!(has_image_extension("scan.PNG"));
        assert!(has_image_extension("receipt.jpeg"));
        assert!(!has_image_extension("invoice.pdf"));
        assert!(!has_image_extension("report.docx"));
        assert!(!has_image_extension("noext"));
    }

    #[test]
    fn unsupported_format_is_fatal() {
        let settings = RenderSettings {
            ocr_pixels: 2_400,
            payload_pixels: 1_600,
            language: "eng".into(),
            password: None,
        };
        let result = render_blocking(b"PK\x03\x04", "invoice.docx", &settings);
        assert!(matches!(result, Err(InvoxError::UnsupportedFormat { .. })));
    }

    #[test]
    fn blank_png_is_decodable() {
        let png = blank_png();
        let img = image::load_from_memory(&png).expect("blank PNG decodes");
        assert_eq!((img.width(), img.height()), (1, 1));
    }

    #[test]
    fn cap_longest_edge_preserves_small_images() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 20, Rgba([0, 0, 0, 255])));
        let capped = cap_longest_edge(&img, 100);
        assert_eq!((capped.width(), capped.height()), (10, 20));

        let shrunk = cap_longest_edge(&img, 10);
        assert!(shrunk.height() <= 10);
    }
}
