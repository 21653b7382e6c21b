use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// Rectangle in floating point space. Used both for viewport clips and for page-space regions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exact bit comparison so rectangles can key lookups.
    pub fn same_bits(&self, other: &Rect) -> bool {
        self.x.to_bits() == other.x.to_bits()
            && self.y.to_bits() == other.y.to_bits()
            && self.width.to_bits() == other.width.to_bits()
            && self.height.to_bits() == other.height.to_bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }
}

/// 2-D affine transform:
/// `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// `None` when the transform collapses space or carries non-finite terms.
    pub fn invert(&self) -> Option<Transform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inverse = Transform {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        };
        inverse.is_finite().then_some(inverse)
    }

    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Bounding box of `rect` after transformation.
    pub fn map_rect_bounds(&self, rect: Rect) -> Rect {
        let corners = [
            self.apply(rect.x, rect.y),
            self.apply(rect.x + rect.width, rect.y),
            self.apply(rect.x, rect.y + rect.height),
            self.apply(rect.x + rect.width, rect.y + rect.height),
        ];
        let (mut min_x, mut min_y) = corners[0];
        let (mut max_x, mut max_y) = corners[0];
        for &(x, y) in &corners[1..] {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// What a render request was computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub viewport: Size,
    /// Page-space region that was requested, if any.
    pub clip: Option<Rect>,
    pub image_size: Size,
    /// Image (device) space back to page space. `None` if the forward transform was singular.
    pub inverse: Option<Transform>,
}

impl Geometry {
    pub fn is_valid(&self) -> bool {
        self.inverse.is_some()
    }
}

/// Largest size with the aspect ratio of `region` that fits inside `viewport`,
/// touching at least one of its edges.
pub fn unstretched_size(region: Rect, viewport: Size) -> Size {
    let ratio = region.height / region.width;
    let ask_ratio = f64::from(viewport.height) / f64::from(viewport.width);
    let (width, height) = if ask_ratio > ratio {
        let width = f64::from(viewport.width);
        (width, width * ratio)
    } else {
        let height = f64::from(viewport.height);
        (height / ratio, height)
    };
    Size::new(to_pixels(width), to_pixels(height))
}

fn to_pixels(value: f64) -> u32 {
    // NaN casts to zero.
    ((value + 0.5) as u32).max(1)
}

/// Maps page space (y up) onto an image of `size` pixels showing `region` (y down).
pub fn initial_transform(region: Rect, size: Size) -> Transform {
    let sx = f64::from(size.width) / region.width;
    let sy = f64::from(size.height) / region.height;
    Transform {
        a: sx,
        b: 0.0,
        c: 0.0,
        d: -sy,
        e: -region.x * sx,
        f: (region.y + region.height) * sy,
    }
}
