use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::geometry::{self, Geometry, PixelRect, Rect, Size};
use crate::navigation::PageDisplay;
use crate::signal::CompletionSignal;
use crate::{PageHandle, RenderImage};

/// Identity of one render request issued by a [`DisplaySurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub id: JobId,
    pub page: PageHandle,
    pub size: Size,
    /// Page-space region to rasterize; the whole page box when `None`.
    pub clip: Option<Rect>,
}

/// One progress callback from a page source.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub job: JobId,
    /// Image-space region with new pixels. Empty when nothing new arrived.
    pub region: PixelRect,
    /// Latest pixels for the whole image, when the source has any.
    pub image: Option<Arc<RenderImage>>,
    pub completed: bool,
    pub failed: bool,
}

impl ProgressReport {
    pub fn partial(job: JobId, region: PixelRect, image: Arc<RenderImage>) -> Self {
        Self {
            job,
            region,
            image: Some(image),
            completed: false,
            failed: false,
        }
    }

    pub fn completed(job: JobId, image: Arc<RenderImage>) -> Self {
        let region = PixelRect::new(0, 0, image.width, image.height);
        Self {
            job,
            region,
            image: Some(image),
            completed: true,
            failed: false,
        }
    }

    pub fn failed(job: JobId) -> Self {
        Self {
            job,
            region: PixelRect::default(),
            image: None,
            completed: false,
            failed: true,
        }
    }
}

pub trait RenderObserver: Send + Sync {
    /// Returns `true` while further updates for `report.job` are wanted.
    fn on_progress(&self, report: ProgressReport) -> bool;
}

/// Asynchronous rasterizer. Implementations report back through the observer,
/// from any thread, and may keep reporting after [`PageSource::stop`].
pub trait PageSource: Send + Sync {
    /// Page box in page space (points, y up).
    fn page_box(&self, page: &PageHandle) -> Result<Rect>;
    fn request_image(&self, job: RenderJob, observer: Arc<dyn RenderObserver>);
    /// Abandons work started for `page` at exactly this size and clip.
    fn stop(&self, page: &PageHandle, size: Size, clip: Option<Rect>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Repaint,
    RepaintRegion(PixelRect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Idle,
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Nothing to show yet.
    Placeholder,
    Image {
        image: Arc<RenderImage>,
        offset_x: i32,
        offset_y: i32,
    },
    /// Geometry is invalid or the image does not match what was requested.
    Error,
}

struct SurfaceState {
    viewport: Size,
    page: Option<PageHandle>,
    desired_clip: Option<Rect>,
    job: Option<RenderJob>,
    in_flight: bool,
    status: RenderStatus,
    image: Option<Arc<RenderImage>>,
    geometry: Option<Geometry>,
    offset: (i32, i32),
}

struct Shared {
    state: Mutex<SurfaceState>,
    signal: CompletionSignal,
    events: Arc<Mutex<Vec<SurfaceEvent>>>,
}

impl Shared {
    fn push_event(&self, event: SurfaceEvent) {
        self.events.lock().push(event);
    }
}

impl RenderObserver for Shared {
    fn on_progress(&self, report: ProgressReport) -> bool {
        let mut state = self.state.lock();
        let current = state.job.as_ref().map(|job| job.id);
        if current != Some(report.job) || !state.in_flight {
            debug!(job = %report.job, ?current, "discarding progress for superseded render");
            return false;
        }

        if !report.failed {
            if let Some(image) = report.image {
                state.image = Some(image);
            }
        }
        if !report.region.is_empty() {
            let (dx, dy) = state.offset;
            self.push_event(SurfaceEvent::RepaintRegion(report.region.translated(dx, dy)));
        }

        if report.completed || report.failed {
            state.in_flight = false;
            if report.failed {
                warn!(job = %report.job, "page source reported a failed render");
                state.status = RenderStatus::Failed;
                state.image = None;
            } else {
                state.status = RenderStatus::Complete;
            }
            // Set under the state lock so a concurrent show_page cannot clear in between.
            self.signal.set();
            return false;
        }
        true
    }
}

/// Shows one page at a time, sized to the viewport, and tracks the single
/// render request that is in flight for it.
pub struct DisplaySurface {
    source: Arc<dyn PageSource>,
    shared: Arc<Shared>,
    show_lock: Mutex<()>,
    next_job: AtomicU64,
}

impl DisplaySurface {
    pub fn new(source: Arc<dyn PageSource>, viewport: Size) -> Self {
        let state = SurfaceState {
            viewport,
            page: None,
            desired_clip: None,
            job: None,
            in_flight: false,
            status: RenderStatus::Idle,
            image: None,
            geometry: None,
            offset: (0, 0),
        };
        Self {
            source,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                signal: CompletionSignal::new(),
                events: Arc::new(Mutex::new(Vec::new())),
            }),
            show_lock: Mutex::new(()),
            next_job: AtomicU64::new(1),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SurfaceEvent>>> {
        Arc::clone(&self.shared.events)
    }

    /// Stops whatever was rendering and starts rendering `page`. `None` blanks the surface.
    #[instrument(skip(self))]
    pub fn show_page(&self, page: Option<PageHandle>) {
        let _exclusive = self.show_lock.lock();

        let superseded = {
            let mut state = self.shared.state.lock();
            let in_flight = std::mem::replace(&mut state.in_flight, false);
            let previous = state.job.take();
            state.page = page.clone();
            previous.filter(|_| in_flight)
        };
        if let Some(old) = superseded {
            debug!(job = %old.id, "stopping superseded render");
            self.source.stop(&old.page, old.size, old.clip);
        }

        let Some(page) = page else {
            let mut state = self.shared.state.lock();
            state.image = None;
            state.geometry = None;
            state.desired_clip = None;
            state.status = RenderStatus::Idle;
            self.shared.signal.set();
            self.shared.push_event(SurfaceEvent::Repaint);
            return;
        };

        self.shared.signal.clear();

        let (viewport, desired_clip, previous_inverse) = {
            let state = self.shared.state.lock();
            let inverse = state.geometry.as_ref().and_then(|g| g.inverse);
            (state.viewport, state.desired_clip, inverse)
        };

        if viewport.is_zero() {
            debug!("viewport has no area; deferring render");
            let mut state = self.shared.state.lock();
            state.image = None;
            state.geometry = None;
            state.status = RenderStatus::Pending;
            self.shared.push_event(SurfaceEvent::Repaint);
            return;
        }

        let page_box = match self.source.page_box(&page) {
            Ok(page_box) => page_box,
            Err(err) => {
                warn!(?err, path = %page.path.display(), "failed to read page box");
                let mut state = self.shared.state.lock();
                state.image = None;
                state.geometry = None;
                state.status = RenderStatus::Failed;
                self.shared.signal.set();
                self.shared.push_event(SurfaceEvent::Repaint);
                return;
            }
        };

        let use_clip = match (desired_clip, previous_inverse) {
            (Some(clip), Some(inverse)) => Some(inverse.map_rect_bounds(clip)),
            (clip, _) => clip,
        };
        let region = use_clip.unwrap_or(page_box);
        let size = geometry::unstretched_size(region, viewport);
        let inverse = geometry::initial_transform(region, size).invert();
        if inverse.is_none() {
            warn!(?region, ?size, "page transform is not invertible");
        }

        let id = JobId::new(self.next_job.fetch_add(1, Ordering::Relaxed));
        let job = RenderJob {
            id,
            page,
            size,
            clip: use_clip,
        };

        {
            let mut state = self.shared.state.lock();
            state.job = Some(job.clone());
            state.in_flight = true;
            state.status = RenderStatus::Pending;
            state.image = None;
            state.geometry = Some(Geometry {
                viewport,
                clip: use_clip,
                image_size: size,
                inverse,
            });
        }
        self.shared.push_event(SurfaceEvent::Repaint);

        debug!(job = %id, ?size, clip = ?use_clip, "requesting page image");
        let observer: Arc<dyn RenderObserver> = self.shared.clone();
        self.source.request_image(job, observer);
    }

    /// Sets the desired clip in viewport coordinates and re-renders the current page.
    pub fn set_clip(&self, clip: Option<Rect>) {
        let page = {
            let mut state = self.shared.state.lock();
            state.desired_clip = clip;
            state.page.clone()
        };
        self.show_page(page);
    }

    /// Records a new viewport size. The next [`paint`](Self::paint) notices the
    /// stale image and requests a fresh one.
    pub fn resize(&self, viewport: Size) {
        let mut state = self.shared.state.lock();
        if state.viewport != viewport {
            state.viewport = viewport;
            self.shared.push_event(SurfaceEvent::Repaint);
        }
    }

    pub fn on_progress(&self, report: ProgressReport) -> bool {
        self.shared.on_progress(report)
    }

    /// Blocks until the current request completes or fails. Must not be called
    /// from a thread the page source reports on.
    pub fn wait_for_current_page(&self) {
        self.shared.signal.wait();
    }

    pub fn wait_for_current_page_timeout(&self, timeout: Duration) -> bool {
        self.shared.signal.wait_timeout(timeout)
    }

    pub fn paint(&self) -> Frame {
        let (frame, retry) = {
            let mut state = self.shared.state.lock();
            let viewport = state.viewport;
            match (state.image.clone(), state.geometry.clone()) {
                (_, Some(geometry)) if !geometry.is_valid() => (Frame::Error, None),
                (None, _) => {
                    // A page deferred for lack of viewport gets requested once there is one.
                    let deferred = state.job.is_none()
                        && state.status == RenderStatus::Pending
                        && !viewport.is_zero();
                    (Frame::Placeholder, state.page.clone().filter(|_| deferred))
                }
                (Some(image), geometry) => {
                    let matches = geometry.as_ref().is_some_and(|g| {
                        g.image_size == image.size() && g.viewport == viewport
                    });
                    if matches {
                        let offset_x = centered(viewport.width, image.width);
                        let offset_y = centered(viewport.height, image.height);
                        state.offset = (offset_x, offset_y);
                        (
                            Frame::Image {
                                image,
                                offset_x,
                                offset_y,
                            },
                            None,
                        )
                    } else {
                        debug!(
                            image = ?image.size(),
                            ?viewport,
                            "image does not match requested geometry; re-rendering"
                        );
                        (Frame::Error, state.page.clone())
                    }
                }
            }
        };
        if let Some(page) = retry {
            self.show_page(Some(page));
        }
        frame
    }

    pub fn page(&self) -> Option<PageHandle> {
        self.shared.state.lock().page.clone()
    }

    pub fn image(&self) -> Option<Arc<RenderImage>> {
        self.shared.state.lock().image.clone()
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.shared.state.lock().geometry.clone()
    }

    pub fn current_size(&self) -> Option<Size> {
        self.geometry().map(|g| g.image_size)
    }

    pub fn current_clip(&self) -> Option<Rect> {
        self.geometry().and_then(|g| g.clip)
    }

    pub fn viewport(&self) -> Size {
        self.shared.state.lock().viewport
    }

    pub fn status(&self) -> RenderStatus {
        self.shared.state.lock().status
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.shared.state.lock().job.as_ref().map(|job| job.id)
    }
}

impl PageDisplay for DisplaySurface {
    fn show_page(&self, page: Option<PageHandle>) {
        DisplaySurface::show_page(self, page);
    }
}

fn centered(outer: u32, inner: u32) -> i32 {
    let diff = i64::from(outer) - i64::from(inner);
    (diff / 2) as i32
}
