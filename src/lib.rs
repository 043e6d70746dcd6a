// starcore/src/lib.rs
//! Batch image-reduction pipeline for CCD astronomy.
//!
//! Five independently-invocable stages, organized into their own crates:
//!
//! - [`types`]: the shared data model (`Frame`, `FrameKind`, `Sequence`, ...) and error taxonomy
//! - [`io`]: container (FITS) loading, validation and saving
//! - [`calib`]: calibration master indexing/building and per-frame calibration
//! - [`align`]: WCS reprojection and asterism-based alignment
//! - [`stack`]: reduction, sigma-clipping, and motion-tracked stacking
//!
//! # Examples
//!
//! ```no_run
//! use starcore::{io, calib};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let frame = io::load(Path::new("/path/to/light.fits"))?;
//! let library = calib::CalibrationLibrary::open(Path::new("/path/to/masters"), |_| {
//!     unimplemented!("load a CalibrationMaster from a FITS file")
//! })?;
//! let bias = library.find_bias(&frame, calib::MatchTolerances::default());
//! # let _ = bias;
//! # Ok(())
//! # }
//! ```

pub use star_align as align;
pub use star_calib as calib;
pub use star_io as io;
pub use star_stack as stack;
pub use star_types as types;

mod config;

pub use config::{Config, ConfigBuilder, TestedCard};
