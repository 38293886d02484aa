//! Error types for this crate.

use thiserror::Error;

/// Errors arising from misuse of grid/surface/polygoniser operations.
///
/// All variants correspond to programmer errors detectable at an API
/// boundary; the crate has no I/O and therefore no external failure domain
/// to wrap.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A position lies outside a grid's `offset..offset+size` bounds.
    #[error("position out of bounds")]
    OutOfBounds,
    /// A write (or an operation requiring storage) was attempted on an
    /// inactive lazy grid.
    #[error("write to inactive grid")]
    InactiveGrid,
    /// A staged delta exceeded the one-layer-per-update magnitude limit.
    #[error("delta magnitude greater than one layer")]
    InvalidDelta,
    /// A layer move was attempted between two layers neither of which lies
    /// inside the tracked band.
    #[error("layer move has neither endpoint in the tracked band")]
    InvalidLayerMove,
    /// A grid was constructed with a non-positive size along some axis.
    #[error("grid size must be positive along every axis")]
    InvalidDimensions,
}

/// This crate's result alias.
pub type Result<T> = std::result::Result<T, Error>;
