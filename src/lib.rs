//! # astrometry
//!
//! Invertible pixel ↔ celestial coordinate transformations for astronomical
//! images, together with the numerical machinery they are built on.
//!
//! An astrometric solution maps image pixels to a native projection plane and
//! from there, through a spherical projection, to celestial coordinates. The
//! image ↔ plane part is either an affine map (a plain WCS solution) or a pair
//! of thin-plate surface splines fitted to matched star positions, which model
//! optical distortion to a fraction of a pixel.
//!
//! ## Features
//!
//! - **Surface splines**: thin-plate splines of any order with smoothing and
//!   per-node weights, solved with a Bunch–Kaufman symmetric indefinite
//!   factorization; recursive quadtree partitioning for large node sets
//! - **Fast evaluation**: grid interpolation of any spline over a bounded
//!   region, and Shepard interpolation for scattered data
//! - **WCS**: reading and writing of FITS celestial keywords (CD, PC+CDELT and
//!   CDELT+CROTA forms), zenithal projections, and serialized spline control
//!   points that survive a save/load cycle
//! - **Robust statistics**: a parallel histogram-based median, order
//!   statistics and MAD for all common sample types
//! - **PSF fitting**: Levenberg–Marquardt fits of Gaussian, Moffat and
//!   variable-shape point spread functions
//! - **Star databases**: the XPSD spatially indexed star catalog format with
//!   cone searches
//!
//! ## Example
//!
//! ```no_run
//! use astrometry::star_database::{SearchConfig, Star, StarDatabaseFile, StarDatabaseWriter};
//!
//! # fn main() -> anyhow::Result<()> {
//! // Index a catalog and save it
//! let stars = vec![
//!     Star { id: 1, ra: 10.684, dec: 41.269, mag: 3.4, flags: 0 },
//!     Star { id: 2, ra: 10.092, dec: 40.865, mag: 8.1, flags: 1 },
//!     // ... more stars ...
//! ];
//! StarDatabaseWriter::default().write_file(&stars, "data/catalog.xpsd")?;
//!
//! // Cone search of 2° around M31
//! let mut db = StarDatabaseFile::open("data/catalog.xpsd")?;
//! let mut search = SearchConfig::new(10.684, 41.269, 2.0);
//! search.magnitude_high = 12.0;
//! let found = db.search_stars(search)?;
//! println!("{} stars within 2°", found.results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Conventions
//!
//! - Image coordinates have their origin at the top-left corner of the
//!   top-left pixel, with `y` growing downwards. FITS pixel `(1, 1)` is the
//!   center of the bottom-left pixel.
//! - Angles are in degrees unless stated otherwise.
//! - Parallel work runs on the rayon global pool.
//!

pub mod astrometry;
pub mod error;
pub mod geometry;
pub mod integration_metadata;
pub mod interpolation;
pub mod keywords;
pub mod linear_transformation;
pub mod numeric;
pub mod parallel;
pub mod psf;
pub mod quadtree;
pub mod random;
pub mod spline;
pub mod star_database;

pub use crate::astrometry::{
    AstrometricMetadata, LinearWorldTransformation, Projection, SplineWorldTransformation,
    SplineWorldTransformationConfig, WcsKeywords, WorldTransformation, ZenithalKind, ZenithalProjection,
};
pub use error::{Error, Result};
pub use geometry::{Point, Rect};
pub use integration_metadata::IntegrationMetadata;
pub use keywords::{FitsKeyword, KeywordSet, PropertySet, PropertyValue};
pub use linear_transformation::LinearTransformation;
pub use psf::{fit_psf, PsfData, PsfFitConfig, PsfFitStatus, PsfFunction};
pub use quadtree::QuadTree;
pub use spline::{PointSurfaceSpline, RecursivePointSurfaceSpline, SurfaceSplineConfig, ThinPlateSpline};
