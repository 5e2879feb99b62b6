//! Slippy-map tile rendering core.
//!
//! This crate provides the two data-heavy halves of a map tile server: an
//! immutable in-memory spatial store of OSM-shaped features ([`geodata`]) and
//! a MapCSS-style cascade engine ([`mapcss`]) which computes per-feature
//! render styles for the candidate features of a tile.
//!
//! A tile request maps to a mercator rectangle ([`tile`]), the rectangle to
//! three id vectors via the spatial indices, and the rule cascade turns those
//! into a [`mapcss::RenderAttributes`] ready for rasterization.

pub mod assets;
pub mod geodata;
pub mod geometry;
pub mod mapcss;
pub mod tile;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    AtomicMove(#[from] tempfile::PersistError),
    #[error("{0}")]
    Regex(#[from] regex::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("geodata store is corrupt or truncated")]
    CorruptStore,
    #[error("geodata store version {0} is not supported")]
    IncompatibleStore(u32),
    #[error("dangling {0} reference {1}")]
    DanglingReference(&'static str, u32),
    #[error("{0:?} is not a valid tile URL")]
    MalformedUrl(String),
    #[error("unknown image format {0:?}")]
    UnknownImageFormat(String),
}
