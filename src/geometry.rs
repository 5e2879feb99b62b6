//! Shared geometry types and the fixed mercator coordinate space.

use std::f64::consts::PI;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::tile::MAX_ZOOM;

/// Integer coordinate in fixed mercator units.
pub type Coord = i64;

/// Fixed units per degree of longitude.
///
/// A power of two, so converting a fixed X coordinate back to degrees is a
/// single exact division and the projection round-trips without drift.
const X_SCALE: f64 = (1u64 << 50) as f64;

/// Fixed units per radian of projected mercator latitude, also a power of two.
const Y_SCALE: f64 = (1u64 << 55) as f64;

/// Degrees per radian, shared by both projection directions.
const DEG_PER_RAD: f64 = 180. / PI;

/// Largest latitude representable in the square mercator plane.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Horizontal extent of the world in fixed units (`180 * 2^50`).
const X_EXTENT: Coord = 180 << 50;

/// Vertical extent of the world in fixed units (`π * 2^55`, rounded).
const Y_EXTENT: Coord = 113_187_804_032_455_040;

/// 2D object position.
#[derive(Serialize, Deserialize, PartialEq, Eq, Copy, Clone, Default, Debug)]
pub struct Point<T = Coord> {
    pub x: T,
    pub y: T,
}

/// Point in fixed mercator units.
pub type FixedPoint = Point<Coord>;

/// Point in floating-point units, used at style and label boundaries.
pub type FloatPoint = Point<f64>;

impl<T> Point<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

impl<T> From<(T, T)> for Point<T> {
    fn from((x, y): (T, T)) -> Self {
        Self { x, y }
    }
}

impl From<FixedPoint> for FloatPoint {
    fn from(point: FixedPoint) -> Self {
        Self::new(point.x as f64, point.y as f64)
    }
}

impl<T: Add<Output = T>> Add<Point<T>> for Point<T> {
    type Output = Self;

    fn add(mut self, other: Point<T>) -> Self {
        self.x = self.x + other.x;
        self.y = self.y + other.y;
        self
    }
}

impl<T: AddAssign> AddAssign<Point<T>> for Point<T> {
    fn add_assign(&mut self, other: Point<T>) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl<T: Sub<Output = T>> Sub<Point<T>> for Point<T> {
    type Output = Self;

    fn sub(mut self, other: Point<T>) -> Self {
        self.x = self.x - other.x;
        self.y = self.y - other.y;
        self
    }
}

impl<T: SubAssign> SubAssign<Point<T>> for Point<T> {
    fn sub_assign(&mut self, other: Point<T>) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

/// Closed axis-aligned rectangle.
///
/// All containment and intersection checks treat edges and corners as part of
/// the rectangle.
#[derive(Serialize, Deserialize, PartialEq, Eq, Copy, Clone, Default, Debug)]
pub struct Rect<T = Coord> {
    pub min_x: T,
    pub min_y: T,
    pub max_x: T,
    pub max_y: T,
}

/// Rectangle in fixed mercator units.
pub type FixedRect = Rect<Coord>;

/// Rectangle in floating-point units.
pub type FloatRect = Rect<f64>;

impl<T: Copy + PartialOrd> Rect<T> {
    pub fn new(min_x: T, min_y: T, max_x: T, max_y: T) -> Self {
        debug_assert!(min_x <= max_x && min_y <= max_y);
        Self { min_x, min_y, max_x, max_y }
    }

    /// Create the smallest rectangle covering both points.
    pub fn from_points(a: Point<T>, b: Point<T>) -> Self {
        let (min_x, max_x) = if a.x <= b.x { (a.x, b.x) } else { (b.x, a.x) };
        let (min_y, max_y) = if a.y <= b.y { (a.y, b.y) } else { (b.y, a.y) };
        Self { min_x, min_y, max_x, max_y }
    }

    /// Check if a point lies inside the rectangle.
    pub fn contains(&self, point: Point<T>) -> bool {
        self.min_x <= point.x
            && point.x <= self.max_x
            && self.min_y <= point.y
            && point.y <= self.max_y
    }

    /// Check if another rectangle lies fully inside this one.
    pub fn contains_rect(&self, other: &Self) -> bool {
        self.min_x <= other.min_x
            && other.max_x <= self.max_x
            && self.min_y <= other.min_y
            && other.max_y <= self.max_y
    }

    /// Check if the closed rectangles share at least one point.
    pub fn intersects(&self, other: &Self) -> bool {
        !(other.max_x < self.min_x
            || self.max_x < other.min_x
            || other.max_y < self.min_y
            || self.max_y < other.min_y)
    }

    /// Expand to the smallest rectangle covering both rectangles.
    pub fn enclose(&mut self, other: &Self) {
        if other.min_x < self.min_x {
            self.min_x = other.min_x;
        }
        if other.min_y < self.min_y {
            self.min_y = other.min_y;
        }
        if self.max_x < other.max_x {
            self.max_x = other.max_x;
        }
        if self.max_y < other.max_y {
            self.max_y = other.max_y;
        }
    }

    /// Expand to cover a point.
    pub fn enclose_point(&mut self, point: Point<T>) {
        if point.x < self.min_x {
            self.min_x = point.x;
        }
        if self.max_x < point.x {
            self.max_x = point.x;
        }
        if point.y < self.min_y {
            self.min_y = point.y;
        }
        if self.max_y < point.y {
            self.max_y = point.y;
        }
    }
}

impl<T: Copy + Sub<Output = T>> Rect<T> {
    pub fn width(&self) -> T {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> T {
        self.max_y - self.min_y
    }
}

impl FixedRect {
    /// Sentinel for the bounding box of an empty feature.
    pub const EMPTY: Self = Self { min_x: 0, min_y: 0, max_x: 0, max_y: 0 };

    /// Whole fixed mercator plane.
    pub const WORLD: Self =
        Self { min_x: -X_EXTENT, min_y: -Y_EXTENT, max_x: X_EXTENT, max_y: Y_EXTENT };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Center of the rectangle, truncated by integer division.
    pub fn center(&self) -> FixedPoint {
        Point::new(
            self.min_x + (self.max_x - self.min_x) / 2,
            self.min_y + (self.max_y - self.min_y) / 2,
        )
    }

    pub fn area(&self) -> Coord {
        self.width() * self.height()
    }

    /// Shift the rectangle by an offset.
    pub fn translate(&self, dx: Coord, dy: Coord) -> Self {
        Self::new(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }

    /// Expand the rectangle outwards on all sides.
    pub fn grow(&self, dx: Coord, dy: Coord) -> Self {
        Self::new(self.min_x - dx, self.min_y - dy, self.max_x + dx, self.max_y + dy)
    }

    /// Overlap of two rectangles, or the empty sentinel when disjoint.
    pub fn intersection(&self, other: &Self) -> Self {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);

        if max_x < min_x || max_y < min_y {
            return Self::EMPTY;
        }

        Self::new(min_x, min_y, max_x, max_y)
    }
}

impl FloatRect {
    pub fn center(&self) -> FloatPoint {
        Point::new((self.min_x + self.max_x) / 2., (self.min_y + self.max_y) / 2.)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

/// Point in geographical space.
#[derive(PartialEq, Default, Copy, Clone, Debug)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Project onto the fixed mercator plane.
    ///
    /// Latitudes beyond the mercator domain are clamped to its edge. Fixed Y
    /// grows southward, matching tile row numbering.
    pub fn project(&self) -> FixedPoint {
        let lat = self.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        let mercator = (lat / DEG_PER_RAD).tan().asinh();

        let x = (self.lon * X_SCALE).round() as Coord;
        let y = (-mercator * Y_SCALE).round() as Coord;

        Point::new(x, y)
    }

    /// Recover the geographic point from its fixed mercator projection.
    pub fn from_fixed(point: FixedPoint) -> Self {
        let lon = point.x as f64 / X_SCALE;
        let lat = (-(point.y as f64) / Y_SCALE).sinh().atan() * DEG_PER_RAD;

        Self { lat, lon }
    }
}

/// Get the north-western corner of a tile in fixed mercator units.
///
/// Accepts indices up to and including `2^z`, so the south-eastern corner of
/// the last tile in a row is addressable.
pub fn tile_to_mercator(tx: u32, ty: u32, z: u8) -> FixedPoint {
    debug_assert!(z <= MAX_ZOOM && tx <= 1 << z && ty <= 1 << z);

    let x = -X_EXTENT + ((2 * X_EXTENT as i128 * tx as i128) >> z) as Coord;
    let y = -Y_EXTENT + ((2 * Y_EXTENT as i128 * ty as i128) >> z) as Coord;

    Point::new(x, y)
}

/// Get the index of the tile containing a fixed mercator point.
///
/// Points outside the world are clamped to the border tiles.
pub fn mercator_to_tile(point: FixedPoint, z: u8) -> (u32, u32) {
    debug_assert!(z <= MAX_ZOOM);

    let max_index = (1i128 << z) - 1;
    let tx = (point.x as i128 + X_EXTENT as i128) << z;
    let tx = (tx / (2 * X_EXTENT as i128)).clamp(0, max_index);
    let ty = (point.y as i128 + Y_EXTENT as i128) << z;
    let ty = (ty / (2 * Y_EXTENT as i128)).clamp(0, max_index);

    (tx as u32, ty as u32)
}
