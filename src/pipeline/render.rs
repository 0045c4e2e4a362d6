//! Convert stage: discover PDFs and rasterise every page via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.
//!
//! A PDF that fails to open is logged and skipped; the stage only fails when
//! no page at all could be produced.

use super::encode::encode_page;
use super::{PipelineContext, RenderedPage, Stage};
use crate::error::ReportError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rasterises every PDF in the input directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertStage;

#[async_trait]
impl Stage for ConvertStage {
    fn name(&self) -> &'static str {
        "convert"
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), ReportError> {
        let input_dir = ctx.config.input_dir.clone();
        let pdfs = discover_pdfs(&input_dir).await?;
        let (dpi, max_pixels) = (ctx.config.dpi, ctx.config.max_rendered_pixels);

        let mut pages = Vec::new();
        for (doc_idx, pdf) in pdfs.iter().enumerate() {
            let doc_num = doc_idx + 1;
            info!(
                "Converting {} ({}/{})",
                pdf.display(),
                doc_num,
                pdfs.len()
            );

            let images = match render_pdf(pdf, dpi, max_pixels).await {
                Ok(images) => images,
                Err(e) => {
                    warn!("Error converting {}: {e}", pdf.display());
                    continue;
                }
            };

            let before = pages.len();
            for (page_idx, img) in images.iter().enumerate() {
                match encode_page(img) {
                    Ok(image) => pages.push(RenderedPage {
                        name: page_name(doc_num, page_idx + 1),
                        image,
                    }),
                    Err(e) => warn!(
                        "Could not encode page {} of {}: {e}",
                        page_idx + 1,
                        pdf.display()
                    ),
                }
            }
            info!("  Generated {} page images", pages.len() - before);
        }

        if pages.is_empty() {
            return Err(ReportError::NoPagesRendered { path: input_dir });
        }
        info!("Total pages: {}", pages.len());
        ctx.pages = pages;
        Ok(())
    }
}

/// `doc_001_page_003` style name; sorts in reading order.
pub fn page_name(doc_num: usize, page_num: usize) -> String {
    format!("doc_{doc_num:03}_page_{page_num:03}")
}

/// Sorted `*.pdf` files (case-insensitive extension) directly inside `dir`.
pub async fn discover_pdfs(dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    if !dir.is_dir() {
        return Err(ReportError::InputNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|_| ReportError::InputNotFound {
            path: dir.to_path_buf(),
        })?;

    let mut pdfs = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            pdfs.push(path);
        }
    }

    if pdfs.is_empty() {
        return Err(ReportError::NoPdfsFound {
            path: dir.to_path_buf(),
        });
    }
    pdfs.sort();
    debug!("Found {} PDFs in {}", pdfs.len(), dir.display());
    Ok(pdfs)
}

/// Rasterise every page of one PDF.
///
/// This runs inside `spawn_blocking` since pdfium operations are CPU-bound.
pub async fn render_pdf(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, ReportError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || render_pdf_blocking(&path, dpi, max_pixels))
        .await
        .map_err(|e| ReportError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library.
fn bind_pdfium() -> Result<Pdfium, ReportError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| ReportError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Target width for a page `width_points` wide at `dpi`, capped so neither
/// edge exceeds `max_pixels`.
fn target_width(width_points: f32, height_points: f32, dpi: u32, max_pixels: u32) -> i32 {
    let scale = dpi as f32 / 72.0;
    let (w, h) = (width_points * scale, height_points * scale);
    let longest = w.max(h).max(1.0);
    let shrink = (max_pixels as f32 / longest).min(1.0);
    (w * shrink).round().max(1.0) as i32
}

fn render_pdf_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, ReportError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| ReportError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut results = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let width = target_width(page.width().value, page.height().value, dpi, max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_maximum_height(max_pixels as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ReportError::RasterisationFailed {
                path: pdf_path.to_path_buf(),
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push(image);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_sort_in_reading_order() {
        assert_eq!(page_name(1, 3), "doc_001_page_003");
        assert!(page_name(1, 10) < page_name(2, 1));
    }

    #[test]
    fn width_follows_dpi_until_capped() {
        // US Letter at 72 DPI is 612 × 792 points → pixels.
        assert_eq!(target_width(612.0, 792.0, 72, 2000), 612);
        // At 150 DPI the long edge (1650 px) still fits.
        assert_eq!(target_width(612.0, 792.0, 150, 2000), 1275);
        // At 400 DPI the long edge is capped at 2000 px.
        let w = target_width(612.0, 792.0, 400, 2000);
        assert!((1544..=1546).contains(&w), "got {w}");
    }

    #[tokio::test]
    async fn discovers_sorted_pdfs_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.PDF", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let pdfs = discover_pdfs(dir.path()).await.unwrap();
        let names: Vec<_> = pdfs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[tokio::test]
    async fn missing_dir_and_empty_dir_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_pdfs(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, ReportError::InputNotFound { .. }));

        let err = discover_pdfs(dir.path()).await.unwrap_err();
        assert!(matches!(err, ReportError::NoPdfsFound { .. }));
    }
}
