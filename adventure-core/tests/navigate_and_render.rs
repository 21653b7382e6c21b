use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use adventure_core::{
    DirectoryProbe, DisplaySurface, Navigator, PageHandle, PageIndex, PageSource, PixelRect,
    ProgressReport, Rect, RenderImage, RenderJob, RenderObserver, RenderStatus, Size, Step,
};
use anyhow::Result;
use parking_lot::Mutex;
use tempfile::tempdir;

/// Renders on a background thread in two bands. Pages whose file stem is listed
/// in `slow` take longer, so later requests can overtake them.
struct ThreadedSource {
    slow: Vec<String>,
    stopped: Mutex<Vec<PathBuf>>,
}

impl ThreadedSource {
    fn new(slow: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            slow: slow.iter().map(|s| s.to_string()).collect(),
            stopped: Mutex::new(Vec::new()),
        })
    }
}

fn stem(page: &PageHandle) -> String {
    page.path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_owned()
}

impl PageSource for ThreadedSource {
    fn page_box(&self, _page: &PageHandle) -> Result<Rect> {
        Ok(Rect::new(0.0, 0.0, 600.0, 800.0))
    }

    fn request_image(&self, job: RenderJob, observer: Arc<dyn RenderObserver>) {
        let delay = if self.slow.contains(&stem(&job.page)) {
            Duration::from_millis(80)
        } else {
            Duration::from_millis(5)
        };
        let fill = stem(&job.page).parse::<u8>().unwrap_or(255);
        thread::spawn(move || {
            let Size { width, height } = job.size;
            let image = Arc::new(RenderImage {
                width,
                height,
                pixels: vec![fill; (width * height * 4) as usize],
            });
            thread::sleep(delay);
            let half = PixelRect::new(0, 0, width, height / 2);
            if !observer.on_progress(ProgressReport::partial(job.id, half, Arc::clone(&image))) {
                return;
            }
            thread::sleep(delay);
            observer.on_progress(ProgressReport::completed(job.id, image));
        });
    }

    fn stop(&self, page: &PageHandle, _size: Size, _clip: Option<Rect>) {
        self.stopped.lock().push(page.path.to_path_buf());
    }
}

fn story(pages: &[u32], branches: &[(u32, &str)]) -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    for page in pages {
        std::fs::write(dir.path().join(format!("{page}.pdf")), b"%PDF-1.4").unwrap();
    }
    for (page, options) in branches {
        std::fs::write(dir.path().join(format!("{page}.txt")), options).unwrap();
    }
    dir
}

#[test]
fn overtaken_render_never_replaces_the_current_page() {
    let dir = story(&[1, 2, 3], &[(1, "2 3")]);
    let source = ThreadedSource::new(&["2"]);
    let surface = Arc::new(DisplaySurface::new(source.clone(), Size::new(300, 400)));
    let probe = Arc::new(DirectoryProbe::new(dir.path().to_path_buf()));
    let mut nav = Navigator::new(probe, surface.clone(), PageIndex::new(1).unwrap());

    assert!(matches!(nav.start().unwrap(), Step::Started { .. }));
    assert!(surface.wait_for_current_page_timeout(Duration::from_secs(5)));

    let mut choose_slow = |_: &[PageIndex]| -> Option<usize> { Some(0) };
    nav.advance(&mut choose_slow).unwrap();
    nav.retreat().unwrap();
    let mut choose_fast = |_: &[PageIndex]| -> Option<usize> { Some(1) };
    nav.advance(&mut choose_fast).unwrap();

    assert!(surface.wait_for_current_page_timeout(Duration::from_secs(5)));
    // Give the overtaken render time to report late.
    thread::sleep(Duration::from_millis(250));

    assert_eq!(nav.position(), PageIndex::new(3).unwrap());
    assert_eq!(surface.status(), RenderStatus::Complete);
    let image = surface.image().unwrap();
    assert_eq!(image.pixels[0], 3);
    assert_eq!(image.size(), Size::new(300, 400));
    assert!(source
        .stopped
        .lock()
        .iter()
        .any(|path| path.ends_with("2.pdf")));
}

#[test]
fn walking_forward_and_back_restores_the_start() {
    let dir = story(&[0, 1, 2, 5, 6], &[(2, "6 5")]);
    let source = ThreadedSource::new(&[]);
    let surface = Arc::new(DisplaySurface::new(source, Size::new(300, 400)));
    let probe = Arc::new(DirectoryProbe::new(dir.path().to_path_buf()));
    let mut nav = Navigator::new(probe, surface.clone(), PageIndex::new(0).unwrap());
    nav.start().unwrap();

    let mut first = |_: &[PageIndex]| -> Option<usize> { Some(0) };
    let mut advanced = 0;
    loop {
        match nav.advance(&mut first).unwrap() {
            Step::Advanced { .. } => advanced += 1,
            Step::Ended => break,
            other => panic!("unexpected step: {:?}", other),
        }
        assert!(surface.wait_for_current_page_timeout(Duration::from_secs(5)));
    }
    assert_eq!(advanced, 3);
    assert_eq!(nav.position(), PageIndex::new(6).unwrap());
    assert!(nav.is_at_end());

    for _ in 0..advanced {
        assert!(matches!(nav.retreat().unwrap(), Step::Retreated { .. }));
    }
    assert_eq!(nav.position(), PageIndex::new(0).unwrap());
    assert_eq!(nav.history_depth(), 0);
    assert_eq!(nav.retreat().unwrap(), Step::NoHistory);

    assert!(surface.wait_for_current_page_timeout(Duration::from_secs(5)));
    assert_eq!(surface.image().unwrap().pixels[0], 0);
}
