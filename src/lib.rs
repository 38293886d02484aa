#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

//! Sparse-field narrow-band level sets for evolving implicit surfaces in
//! 2D and 3D.
//!
//! A [`surface::Surface`] tracks a thin band of cells around a zero
//! isocontour, partitioned into lazily-activated chunks so that only the
//! region near the surface ever holds storage. Callers stage a delta per
//! tracked cell, commit it with [`surface::Surface::update_end`], and read
//! back a triangulated (3D) or segmented (2D) mesh from
//! [`poly::Polygoniser`].

pub mod error;
pub mod grid;
pub mod lazy;
pub mod lookup;
pub mod numeric;
pub mod partitioned;
pub mod poly;
pub mod surface;
pub mod tables;
pub mod tracked;
pub mod vector;

pub use error::{Error, Result};
pub use poly::{PolyChild, Polygoniser, Simplex, Vertex};
pub use surface::{RaycastParams, Surface, LAYER_EPSILON, RAY_TINY};
pub use vector::{VecDf, VecDi, Vector};
