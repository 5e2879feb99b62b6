//! Tile identifiers and their mercator extents.

use std::fmt::{self, Display, Formatter};

use crate::Error;
use crate::geometry::{FixedRect, tile_to_mercator};

/// Maximum tile zoom level.
pub const MAX_ZOOM: u8 = 18;

/// Coordinate marking a "none-data" tile.
const NONE_DATA: i32 = -2;

/// Encoding requested for a rendered tile.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum ImageFormat {
    Png,
    Svg,
}

impl ImageFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
        }
    }
}

/// Identifier uniquely describing a requested map tile.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct TileId {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub format: ImageFormat,
    pub stylesheet: String,
}

impl TileId {
    pub fn new(x: i32, y: i32, z: i32, format: ImageFormat, stylesheet: String) -> Self {
        Self { x, y, z, format, stylesheet }
    }

    /// Parse a tile identifier from its URL path form
    /// `/<stylesheet>/<z>/<x>/<y>.<ext>`.
    ///
    /// The stylesheet component may itself contain slashes.
    pub fn parse(url: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedUrl(url.into());

        let path = url.strip_prefix('/').ok_or_else(malformed)?;
        if path.is_empty() {
            return Err(malformed());
        }

        let mut segments = path.rsplitn(4, '/');
        let file = segments.next().ok_or_else(malformed)?;
        let x = segments.next().ok_or_else(malformed)?;
        let z = segments.next().ok_or_else(malformed)?;
        let stylesheet = segments.next().ok_or_else(malformed)?;

        let (y, extension) = file.rsplit_once('.').ok_or_else(malformed)?;

        let z: u8 = z.parse().map_err(|_| malformed())?;
        let x: u32 = x.parse().map_err(|_| malformed())?;
        let y: u32 = y.parse().map_err(|_| malformed())?;
        if z > MAX_ZOOM || x >= 1u32 << z || y >= 1u32 << z {
            return Err(malformed());
        }

        let format = match extension {
            "png" => ImageFormat::Png,
            "svg" => ImageFormat::Svg,
            _ => return Err(Error::UnknownImageFormat(extension.into())),
        };

        Ok(Self { x: x as i32, y: y as i32, z: z as i32, format, stylesheet: stylesheet.into() })
    }

    /// Get the "none-data" identifier for this tile's stylesheet.
    ///
    /// The caching layer uses it to mark "blank tile for this stylesheet"; it
    /// is carried through the pipeline but never rendered from geodata.
    pub fn none_data(&self) -> Self {
        Self {
            x: NONE_DATA,
            y: NONE_DATA,
            z: NONE_DATA,
            format: ImageFormat::Png,
            stylesheet: self.stylesheet.clone(),
        }
    }

    pub fn is_none_data(&self) -> bool {
        self.z == NONE_DATA
    }

    /// Mercator extent of the tile.
    ///
    /// None-data tiles have no extent and yield the empty rectangle.
    pub fn bounds(&self) -> FixedRect {
        if self.is_none_data() {
            return FixedRect::EMPTY;
        }

        let min = tile_to_mercator(self.x as u32, self.y as u32, self.z as u8);
        let max = tile_to_mercator(self.x as u32 + 1, self.y as u32 + 1, self.z as u8);

        FixedRect::from_points(min, max)
    }
}

impl Display for TileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self { x, y, z, stylesheet, format } = self;
        write!(f, "/{stylesheet}/{z}/{x}/{y}.{}", format.extension())
    }
}
