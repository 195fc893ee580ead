//! A reader for imaging mass cytometry data stored in the proprietary
//! `.mcd` container format.
//!
//! A container interleaves binary payloads (channel data, embedded optical
//! images) with a trailing XML document describing the slide → panorama →
//! acquisition → channel hierarchy and where each payload lives. Opening a
//! file parses only that document and builds an immutable entity graph;
//! the multi-gigabyte pixel payloads are decoded lazily, one channel at a
//! time, on request.
//!
//! Decode calls are pure functions of the container and an identifier:
//! they hold no hidden caches and return owned rasters, so decoding many
//! channels from worker threads needs no external synchronization.
//!
//! # Example
//!
//! ```no_run
//! use imcdata::{ChannelIdent, McdFile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mcd = McdFile::open("/data/experiment.mcd")?;
//!
//! for acquisition in mcd.metadata().acquisitions() {
//!     println!("[{}] {}", acquisition.id(), acquisition.description());
//! }
//!
//! let raster = mcd.channel_data(1, &ChannelIdent::Label("Ki67".into()))?;
//! println!(
//!     "{} x {} pixels, intensity range {:?}",
//!     raster.width(),
//!     raster.height(),
//!     raster.value_range()
//! );
//! # Ok(())
//! # }
//! ```

mod compose;
pub(crate) mod decode;
pub mod error;
mod geom;
pub mod io;
pub mod meta;
mod raster;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::decode::Codec;
pub use crate::error::{DecodeError, FormatError, McdError, MetadataError};
pub use crate::geom::{BoundingBox, SlideTransform};
pub use crate::io::{Mcd, McdFile, Segment, SegmentIndex, SegmentKind, SegmentRef};
pub use crate::meta::{
    Acquisition, Channel, ChannelIdent, EntityGraph, ImageKind, Panorama, Slide, ValueFormat,
};
pub use crate::raster::{ChannelRaster, Raster};
