use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use uuid::Uuid;

pub mod config;
pub mod geometry;
pub mod navigation;
pub mod probe;
pub mod signal;
pub mod surface;

pub use config::{ConfigError, ViewerConfig};
pub use geometry::{Geometry, PixelRect, Rect, Size, Transform};
pub use navigation::{
    BranchParseError, BranchSpec, ChoiceResolver, LoadError, Navigator, PageDisplay, Step,
};
pub use probe::{DirectoryProbe, ResourceProbe};
pub use signal::CompletionSignal;
pub use surface::{
    DisplaySurface, Frame, JobId, PageSource, ProgressReport, RenderJob, RenderObserver,
    RenderStatus, SurfaceEvent,
};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f1d0b52-6a8e-5c1e-9a47-2d6c1f0e8b13").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

/// Index of a node in the adventure graph. Each index names one document on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(u32);

impl PageIndex {
    /// Marker for a position that could not be derived from a file name.
    /// No parsed token ever produces this value.
    pub const UNKNOWN: PageIndex = PageIndex(u32::MAX);

    pub const FIRST: PageIndex = PageIndex(0);

    pub fn new(value: u32) -> Option<Self> {
        if value == u32::MAX {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    pub fn successor(self) -> Option<Self> {
        if !self.is_known() {
            return None;
        }
        self.0.checked_add(1).and_then(Self::new)
    }

    /// Parses a single decimal token. Signs, blanks and out-of-range values are rejected.
    pub fn parse(token: &str) -> Option<Self> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token.parse::<u32>().ok().and_then(Self::new)
    }

    /// Derives the index from a file stem such as `12.pdf`. Anything else maps to
    /// [`PageIndex::UNKNOWN`].
    pub fn from_file_name(path: &Path) -> Self {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(Self::parse)
            .unwrap_or(Self::UNKNOWN)
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("?")
        }
    }
}

/// A renderable page inside an opened document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub document: DocumentId,
    pub path: Arc<Path>,
    pub page: usize,
}

impl PageHandle {
    pub fn new(path: PathBuf, page: usize) -> Self {
        Self {
            document: document_id_for_path(&path),
            path: Arc::from(path),
            page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}
