use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use adventure_core::{JobId, PageHandle, Rect, Size};
use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use parking_lot::Mutex;

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumPageSource;

#[cfg(feature = "pdf")]
pub type PdfPageSource = PdfiumPageSource;

/// Renders currently running, keyed by the geometry they were started with so
/// that a stop request can find them again.
#[derive(Default)]
pub struct ActiveRenders {
    entries: Mutex<Vec<ActiveRender>>,
}

struct ActiveRender {
    job: JobId,
    page: PageHandle,
    size: Size,
    clip: Option<Rect>,
    cancelled: Arc<AtomicBool>,
}

impl ActiveRenders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        job: JobId,
        page: &PageHandle,
        size: Size,
        clip: Option<Rect>,
    ) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().push(ActiveRender {
            job,
            page: page.clone(),
            size,
            clip,
            cancelled: Arc::clone(&cancelled),
        });
        cancelled
    }

    /// Cancels every render of `page` at exactly this size and clip. Returns how many matched.
    pub fn stop(&self, page: &PageHandle, size: Size, clip: Option<Rect>) -> usize {
        let mut stopped = 0;
        for entry in self.entries.lock().iter() {
            let same_clip = match (entry.clip, clip) {
                (Some(a), Some(b)) => a.same_bits(&b),
                (None, None) => true,
                _ => false,
            };
            if entry.page == *page && entry.size == size && same_clip {
                entry.cancelled.store(true, Ordering::Release);
                stopped += 1;
            }
        }
        stopped
    }

    pub fn finish(&self, job: JobId) {
        self.entries.lock().retain(|entry| entry.job != job);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pixels per point so that `region` fills `size`.
pub fn render_scale(region: Rect, size: Size) -> f64 {
    f64::from(size.width) / region.width
}

/// Top-left corner of `region` inside a full page rendered at `scale`.
/// Page space is y up, bitmaps are y down.
pub fn crop_origin(page_box: Rect, region: Rect, scale: f64) -> (u32, u32) {
    let x = (region.x - page_box.x) * scale;
    let y = (page_box.y + page_box.height - (region.y + region.height)) * scale;
    (x.max(0.0).round() as u32, y.max(0.0).round() as u32)
}

/// Cuts the requested region out of a full-page bitmap and forces it to `size`.
pub fn fit_region(page: RgbaImage, origin: (u32, u32), size: Size) -> Result<RgbaImage> {
    if size.width == 0 || size.height == 0 {
        return Err(anyhow!("cannot produce an empty image"));
    }
    let (x, y) = origin;
    let (width, height) = page.dimensions();
    if x >= width || y >= height {
        return Err(anyhow!(
            "region origin ({x}, {y}) lies outside the {width}x{height} page bitmap"
        ));
    }
    let crop_width = size.width.min(width - x);
    let crop_height = size.height.min(height - y);
    let region = imageops::crop_imm(&page, x, y, crop_width, crop_height).to_image();
    if region.dimensions() == (size.width, size.height) {
        Ok(region)
    } else {
        Ok(imageops::resize(
            &region,
            size.width,
            size.height,
            FilterType::Triangle,
        ))
    }
}

/// Splits `height` rows into at most `bands` contiguous `(first_row, rows)` slices.
pub fn band_rows(height: u32, bands: u32) -> Vec<(u32, u32)> {
    let bands = bands.clamp(1, height.max(1));
    let base = height / bands;
    let extra = height % bands;
    let mut out = Vec::with_capacity(bands as usize);
    let mut start = 0;
    for band in 0..bands {
        let rows = base + u32::from(band < extra);
        if rows > 0 {
            out.push((start, rows));
        }
        start += rows;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn handle(name: &str) -> PageHandle {
        PageHandle::new(PathBuf::from(format!("/nonexistent/{name}")), 0)
    }

    #[test]
    fn stop_only_cancels_matching_geometry() {
        let renders = ActiveRenders::new();
        let size = Size::new(100, 200);
        let clip = Some(Rect::new(0.0, 0.0, 50.0, 100.0));
        let whole = renders.register(job(1), &handle("1.pdf"), size, None);
        let clipped = renders.register(job(2), &handle("1.pdf"), size, clip);

        assert_eq!(renders.stop(&handle("1.pdf"), size, clip), 1);
        assert!(clipped.load(Ordering::Acquire));
        assert!(!whole.load(Ordering::Acquire));

        assert_eq!(renders.stop(&handle("2.pdf"), size, None), 0);
        assert_eq!(renders.stop(&handle("1.pdf"), Size::new(1, 1), None), 0);

        renders.finish(job(1));
        renders.finish(job(2));
        assert!(renders.is_empty());
    }

    fn job(n: u64) -> JobId {
        JobId::new(n)
    }

    #[test]
    fn crop_origin_flips_vertical_axis() {
        let page_box = Rect::new(0.0, 0.0, 600.0, 800.0);
        let top_right_quarter = Rect::new(300.0, 400.0, 300.0, 400.0);
        assert_eq!(crop_origin(page_box, top_right_quarter, 0.5), (150, 0));
        let bottom_left = Rect::new(0.0, 0.0, 300.0, 400.0);
        assert_eq!(crop_origin(page_box, bottom_left, 0.5), (0, 200));
        assert_eq!(render_scale(bottom_left, Size::new(150, 200)), 0.5);
    }

    #[test]
    fn fit_region_returns_exact_size() {
        let page = RgbaImage::from_pixel(300, 400, image::Rgba([10, 20, 30, 255]));
        let cropped = fit_region(page.clone(), (150, 0), Size::new(150, 200)).unwrap();
        assert_eq!(cropped.dimensions(), (150, 200));

        let stretched = fit_region(page.clone(), (290, 390), Size::new(40, 40)).unwrap();
        assert_eq!(stretched.dimensions(), (40, 40));

        assert!(fit_region(page, (300, 0), Size::new(10, 10)).is_err());
    }

    #[test]
    fn band_rows_cover_every_row_once() {
        assert_eq!(band_rows(10, 3), vec![(0, 4), (4, 3), (7, 3)]);
        assert_eq!(band_rows(2, 8), vec![(0, 1), (1, 1)]);
        assert_eq!(band_rows(5, 0), vec![(0, 5)]);
        let total: u32 = band_rows(997, 4).iter().map(|(_, rows)| rows).sum();
        assert_eq!(total, 997);
    }
}
