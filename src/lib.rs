#![deny(clippy::all)]

//! A reader for dvi files output by TeX, together with the TFM font metric
//! and VF virtual font formats they refer to, and a persistent cache of
//! support-file lookups and parsed page contents.
//!
//! ```no_run
//! use dviread::DVIReader;
//!
//! # fn main() -> dviread::Result<()> {
//! let reader = DVIReader::new("input.dvi", Some(72.0), None)?;
//! for page in reader {
//!     let page = page?;
//!     for text in &page.text {
//!         println!("{} {} {}", text.x, text.y, text.glyph);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod dvi;
mod error;
mod fixed;
mod font;
mod paths;
mod psfonts;
mod tfm;
mod vf;

#[cfg(test)]
mod testing;

pub use crate::cache::{
    with_default_cache, CacheTransaction, PageBoundingBox, PageTextRow, TeXSupportCache,
    SCHEMA_VERSION,
};
pub use crate::dvi::{Box, DVIReader, Page, Text};
pub use crate::error::{DviError, Result};
pub use crate::fixed::{fix2comp, mul2012};
pub use crate::font::DVIFont;
pub use crate::paths::{find_tex_file, find_tex_files};
pub use crate::psfonts::{Encoding, FontEffects, PsFont, PsfontsMap};
pub use crate::tfm::TFMFile;
pub use crate::vf::VFFile;
