//! PDF rasterisation: render one page of a PDF to a `DynamicImage` via pdfium.
//!
//! pdfium is CPU-bound and keeps thread-local state, so every call here runs
//! on tokio's blocking pool via `spawn_blocking`.
//!
//! The page is scaled by `dpi / 72` (PDF user space is 72 units per inch),
//! so a US Letter sheet at 300 DPI renders to roughly 2550 × 3300 px. An
//! optional pixel cap bounds the longest edge for very large pages.

use crate::error::GradeError;
use crate::pipeline::input::{check_magic, PdfSource};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable pointing at an existing libpdfium.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to a pdfium library.
///
/// Resolution order: `PDFIUM_LIB_PATH`, the directory of the running
/// executable, the working directory, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, GradeError> {
    if let Ok(path) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        if !path.is_empty() {
            let bindings = Pdfium::bind_to_library(&path)
                .map_err(|e| GradeError::PdfiumBindingFailed(format!("{path}: {e:?}")))?;
            return Ok(Pdfium::new(bindings));
        }
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
    {
        candidates.push(dir);
    }
    candidates.push(PathBuf::from("./"));

    for dir in &candidates {
        let lib = Pdfium::pdfium_platform_library_name_at_path(dir);
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            debug!("Bound pdfium from {}", lib.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| GradeError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Rasterise `page_index` (0-based) of `source` at `dpi`.
///
/// Fails with a document error when the bytes are not a PDF, the PDF cannot
/// be opened, or the page does not exist.
pub async fn rasterize_page(
    source: &PdfSource,
    page_index: usize,
    dpi: u32,
    max_rendered_pixels: Option<u32>,
    password: Option<&str>,
) -> Result<DynamicImage, GradeError> {
    check_magic(&source.name, &source.bytes)?;

    let source = source.clone();
    let password = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        rasterize_page_blocking(
            &pdfium,
            &source,
            page_index,
            dpi,
            max_rendered_pixels,
            password.as_deref(),
        )
    })
    .await
    .map_err(|e| GradeError::Internal(format!("Render task panicked: {}", e)))?
}

/// Number of pages in `source`.
pub async fn page_count(source: &PdfSource, password: Option<&str>) -> Result<usize, GradeError> {
    check_magic(&source.name, &source.bytes)?;

    let source = source.clone();
    let password = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &source, password.as_deref())?;
        let total = document.pages().len() as usize;
        Ok(total)
    })
    .await
    .map_err(|e| GradeError::Internal(format!("Page-count task panicked: {}", e)))?
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    source: &'a PdfSource,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, GradeError> {
    pdfium
        .load_pdf_from_byte_slice(&source.bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    GradeError::WrongPassword {
                        source_name: source.name.clone(),
                    }
                } else {
                    GradeError::PasswordRequired {
                        source_name: source.name.clone(),
                    }
                }
            } else {
                GradeError::CorruptPdf {
                    source_name: source.name.clone(),
                    detail: err_str,
                }
            }
        })
}

/// Blocking implementation of page rendering.
pub fn rasterize_page_blocking(
    pdfium: &Pdfium,
    source: &PdfSource,
    page_index: usize,
    dpi: u32,
    max_rendered_pixels: Option<u32>,
    password: Option<&str>,
) -> Result<DynamicImage, GradeError> {
    let document = load_document(pdfium, source, password)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    if page_index >= total_pages {
        return Err(GradeError::PageOutOfRange {
            page: page_index + 1,
            total: total_pages,
        });
    }

    let mut render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
    if let Some(max) = max_rendered_pixels {
        render_config = render_config
            .set_maximum_width(max as i32)
            .set_maximum_height(max as i32);
    }

    let page = pages
        .get(page_index as u16)
        .map_err(|e| GradeError::RasterisationFailed {
            page: page_index + 1,
            detail: format!("{:?}", e),
        })?;

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| GradeError::RasterisationFailed {
            page: page_index + 1,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} at {} DPI → {}x{} px",
        page_index + 1,
        dpi,
        image.width(),
        image.height()
    );

    Ok(image)
}
