use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use adventure_core::{
    PageHandle, PageSource, PixelRect, ProgressReport, Rect, RenderImage, RenderJob,
    RenderObserver, Size,
};
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, instrument, warn};

use crate::{band_rows, crop_origin, fit_region, render_scale, ActiveRenders};

const LIBRARY_PATH_VAR: &str = "ADVENTURE_PDFIUM_LIBRARY_PATH";

/// Rasterizes pages with pdfium on a rayon pool and reports back in bands.
pub struct PdfiumPageSource {
    pdfium: Arc<Pdfium>,
    pool: ThreadPool,
    bands: u32,
    page_boxes: Mutex<HashMap<PageHandle, Rect>>,
    active: Arc<ActiveRenders>,
}

impl PdfiumPageSource {
    pub fn new(threads: usize, bands: u32) -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("adventure-render-{index}"))
            .build()
            .context("failed to start render workers")?;
        Ok(Self {
            pdfium: Arc::new(pdfium),
            pool,
            bands: bands.max(1),
            page_boxes: Mutex::new(HashMap::new()),
            active: Arc::new(ActiveRenders::new()),
        })
    }
}

impl PageSource for PdfiumPageSource {
    #[instrument(skip(self))]
    fn page_box(&self, page: &PageHandle) -> Result<Rect> {
        if let Some(page_box) = self.page_boxes.lock().get(page) {
            return Ok(*page_box);
        }
        let page_box = with_page(&self.pdfium, &page.path, page.page, |pdf_page| {
            Ok(Rect::new(
                0.0,
                0.0,
                f64::from(pdf_page.width().value),
                f64::from(pdf_page.height().value),
            ))
        })?;
        self.page_boxes.lock().insert(page.clone(), page_box);
        Ok(page_box)
    }

    fn request_image(&self, job: RenderJob, observer: Arc<dyn RenderObserver>) {
        let page_box = match self.page_box(&job.page) {
            Ok(page_box) => page_box,
            Err(err) => {
                warn!(?err, job = %job.id, "failed to read page box for render");
                observer.on_progress(ProgressReport::failed(job.id));
                return;
            }
        };
        let cancelled = self.active.register(job.id, &job.page, job.size, job.clip);
        let pdfium = Arc::clone(&self.pdfium);
        let active = Arc::clone(&self.active);
        let bands = self.bands;

        self.pool.spawn(move || {
            let id = job.id;
            run_job(&pdfium, job, page_box, bands, &cancelled, observer.as_ref());
            active.finish(id);
        });
    }

    fn stop(&self, page: &PageHandle, size: Size, clip: Option<Rect>) {
        let stopped = self.active.stop(page, size, clip);
        debug!(path = %page.path.display(), ?size, stopped, "stop requested");
    }
}

fn run_job(
    pdfium: &Pdfium,
    job: RenderJob,
    page_box: Rect,
    bands: u32,
    cancelled: &AtomicBool,
    observer: &dyn RenderObserver,
) {
    if cancelled.load(Ordering::Acquire) {
        debug!(job = %job.id, "render cancelled before start");
        return;
    }

    let rendered = match rasterize(pdfium, &job, page_box) {
        Ok(image) => image,
        Err(err) => {
            warn!(?err, job = %job.id, path = %job.page.path.display(), "render failed");
            observer.on_progress(ProgressReport::failed(job.id));
            return;
        }
    };

    let Size { width, height } = job.size;
    let row_bytes = width as usize * 4;
    let finished = rendered.into_raw();
    let mut pixels = vec![255u8; finished.len()];

    for (start, rows) in band_rows(height, bands) {
        if cancelled.load(Ordering::Acquire) {
            debug!(job = %job.id, "render cancelled mid-delivery");
            return;
        }
        let from = start as usize * row_bytes;
        let to = from + rows as usize * row_bytes;
        pixels[from..to].copy_from_slice(&finished[from..to]);

        let image = Arc::new(RenderImage {
            width,
            height,
            pixels: pixels.clone(),
        });
        let last = start + rows == height;
        let wanted = if last {
            observer.on_progress(ProgressReport::completed(job.id, image))
        } else {
            let region = PixelRect::new(0, start as i32, width, rows);
            observer.on_progress(ProgressReport::partial(job.id, region, image))
        };
        if !wanted {
            return;
        }
    }
}

fn rasterize(pdfium: &Pdfium, job: &RenderJob, page_box: Rect) -> Result<RgbaImage> {
    let region = job.clip.unwrap_or(page_box);
    let scale = render_scale(region, job.size);
    if !scale.is_finite() || scale <= 0.0 {
        return Err(anyhow!("cannot render region {:?} at {:?}", region, job.size));
    }

    let full_page = with_page(pdfium, &job.page.path, job.page.page, |pdf_page| {
        let config = PdfRenderConfig::new().scale_page_by_factor(scale as f32);
        let bitmap = pdf_page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", job.page.page))?;
        let width = u32::try_from(bitmap.width()).unwrap_or_default();
        let height = u32::try_from(bitmap.height()).unwrap_or_default();
        let pixels = bitmap.as_image().to_rgba8().into_raw();
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pdfium returned a short bitmap"))
    })?;

    fit_region(full_page, crop_origin(page_box, region, scale), job.size)
}

fn with_page<R, F>(pdfium: &Pdfium, path: &Path, page_index: usize, f: F) -> Result<R>
where
    F: FnOnce(&PdfPage<'_>) -> Result<R>,
{
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let index: PdfPageIndex = page_index
        .try_into()
        .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
    let page = document
        .pages()
        .get(index)
        .with_context(|| format!("page {} out of range in {:?}", page_index, path))?;
    f(&page)
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(LIBRARY_PATH_VAR) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!("failed to load Pdfium from {}={}: {}", LIBRARY_PATH_VAR, path, err);
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                LIBRARY_PATH_VAR,
                errors.join(", ")
            ))
        }
    }
}
