//! Rectangle and region algebra used for damage tracking.
//!
//! `Rect` is a 16-bit axis-aligned rectangle with exclusive right/bottom
//! edges. `Region` is a set of non-overlapping rectangles; union keeps that
//! invariant by only inserting the parts of a new rectangle not already
//! covered, subtraction splits each affected rectangle into at most four
//! remainders.

// ---------------------------------------------------------------------------
// Rect
// ---------------------------------------------------------------------------

/// Axis-aligned rectangle. `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl Rect {
    pub const fn new(left: u16, top: u16, right: u16, bottom: u16) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u16 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u16 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Returns the overlap of two rects (possibly empty).
    pub fn intersection(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }

    /// Smallest rect containing both. Empty operands are ignored.
    pub fn union_bounds(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.is_empty()
            || (self.left <= other.left
                && self.top <= other.top
                && self.right >= other.right
                && self.bottom >= other.bottom)
    }

    /// Returns the parts of `self` not covered by `cut`: a top band, a bottom
    /// band, and the left/right pieces of the middle band.
    pub fn subtract(&self, cut: &Rect) -> Vec<Rect> {
        let overlap = self.intersection(cut);
        if overlap.is_empty() {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        }

        let mut pieces = Vec::with_capacity(4);
        if self.top < overlap.top {
            pieces.push(Rect::new(self.left, self.top, self.right, overlap.top));
        }
        if overlap.bottom < self.bottom {
            pieces.push(Rect::new(self.left, overlap.bottom, self.right, self.bottom));
        }
        if self.left < overlap.left {
            pieces.push(Rect::new(self.left, overlap.top, overlap.left, overlap.bottom));
        }
        if overlap.right < self.right {
            pieces.push(Rect::new(overlap.right, overlap.top, self.right, overlap.bottom));
        }
        pieces
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// A set of non-overlapping rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Total covered area in pixels.
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Bounding rectangle of the whole region, `None` when empty.
    pub fn extents(&self) -> Option<Rect> {
        let mut rects = self.rects.iter();
        let first = *rects.next()?;
        Some(rects.fold(first, |acc, r| acc.union_bounds(r)))
    }

    /// Adds `rect` to the region.
    pub fn union_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut fresh = vec![rect];
        for existing in &self.rects {
            if fresh.is_empty() {
                return;
            }
            fresh = fresh
                .iter()
                .flat_map(|piece| piece.subtract(existing))
                .collect();
        }
        self.rects.extend(fresh);
    }

    /// Removes `rect` from the region. Area outside `rect` is untouched.
    pub fn subtract_rect(&mut self, rect: Rect) {
        if rect.is_empty() || self.is_empty() {
            return;
        }
        self.rects = self.rects.iter().flat_map(|r| r.subtract(&rect)).collect();
    }

    /// True when every pixel of `rect` is in the region.
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        let mut rest = vec![*rect];
        for existing in &self.rects {
            rest = rest.iter().flat_map(|piece| piece.subtract(existing)).collect();
            if rest.is_empty() {
                return true;
            }
        }
        rest.iter().all(Rect::is_empty)
    }

    /// Moves all rectangles out, leaving the region empty.
    pub fn take(&mut self) -> Region {
        std::mem::take(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
