//! The optional channel-plane sidecar (`.dcm`).
//!
//! The primary container stores channel values interleaved per pixel, so
//! extracting one channel image touches the acquisition's whole payload. A
//! sidecar file with the same base name and a `.dcm` extension stores each
//! channel as one contiguous, compressed plane instead, which makes
//! single-channel reads proportional to that channel alone.
//!
//! The sidecar is strictly auxiliary: it is cross-validated against the
//! container's metadata when present, and any absence or disagreement
//! demotes it with a warning rather than failing the open. The container
//! must always remain readable on its own.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic      b"DCM1"
//! u16        acquisition count
//! per acquisition:
//!   u16      acquisition id
//!   u64      offset of its plane table
//! plane table:
//!   u32      width in pixels
//!   u32      height in pixels
//!   u32      measured pixel count (may be short of width*height)
//!   u8       codec tag (0 = none, 1 = lz4, 2 = zlib)
//!   u16      channel count
//!   per channel:
//!     u64    plane offset
//!     u64    stored length
//!     u64    decompressed length
//! ```

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use indexmap::IndexMap;
use thiserror::Error;

use crate::decode::Codec;
use crate::meta::EntityGraph;

pub(crate) const SIDECAR_MAGIC: [u8; 4] = *b"DCM1";

/// Why a sidecar was rejected. Reported at warn level by the opener; never
/// fatal for the container itself.
#[derive(Debug, Error)]
pub(crate) enum SidecarError {
    #[error("missing DCM1 magic, not a channel-plane sidecar")]
    BadMagic,
    #[error("unsupported codec tag {0}")]
    UnknownCodec(u8),
    #[error("sidecar describes acquisition {0} which the container does not declare")]
    UnknownAcquisition(u16),
    #[error(
        "acquisition {id}: sidecar geometry {got_width}x{got_height} with {got_channels} \
         channels disagrees with the container's {want_width}x{want_height} with {want_channels}"
    )]
    Inconsistent {
        id: u16,
        got_width: u32,
        got_height: u32,
        got_channels: usize,
        want_width: u32,
        want_height: u32,
        want_channels: usize,
    },
    #[error("I/O error reading sidecar")]
    Io(#[from] std::io::Error),
}

/// Location of one compressed channel plane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlaneLocation {
    pub offset: u64,
    pub length: u64,
    pub raw_length: u64,
}

/// The plane table of one acquisition.
#[derive(Debug)]
pub(crate) struct SidecarAcquisition {
    pub width: u32,
    pub height: u32,
    pub valid_pixels: u32,
    pub codec: Codec,
    pub planes: Vec<PlaneLocation>,
}

/// The parsed index of a sidecar file.
#[derive(Debug, Default)]
pub(crate) struct SidecarIndex {
    acquisitions: IndexMap<u16, SidecarAcquisition>,
}

impl SidecarIndex {
    pub(crate) fn read<R: Read + Seek>(reader: &mut R) -> Result<SidecarIndex, SidecarError> {
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != SIDECAR_MAGIC {
            return Err(SidecarError::BadMagic);
        }

        let count = reader.read_u16::<LittleEndian>()?;
        let mut table: Vec<(u16, u64)> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_u16::<LittleEndian>()?;
            let offset = reader.read_u64::<LittleEndian>()?;
            table.push((id, offset));
        }

        let mut acquisitions = IndexMap::with_capacity(count as usize);
        for (id, offset) in table {
            reader.seek(SeekFrom::Start(offset))?;

            let width = reader.read_u32::<LittleEndian>()?;
            let height = reader.read_u32::<LittleEndian>()?;
            let valid_pixels = reader.read_u32::<LittleEndian>()?;
            let codec_tag = reader.read_u8()?;
            let codec =
                Codec::from_tag(codec_tag).ok_or(SidecarError::UnknownCodec(codec_tag))?;
            let channel_count = reader.read_u16::<LittleEndian>()?;

            let mut planes = Vec::with_capacity(channel_count as usize);
            for _ in 0..channel_count {
                planes.push(PlaneLocation {
                    offset: reader.read_u64::<LittleEndian>()?,
                    length: reader.read_u64::<LittleEndian>()?,
                    raw_length: reader.read_u64::<LittleEndian>()?,
                });
            }

            acquisitions.insert(
                id,
                SidecarAcquisition {
                    width,
                    height,
                    valid_pixels,
                    codec,
                    planes,
                },
            );
        }

        Ok(SidecarIndex { acquisitions })
    }

    /// Checks that every acquisition the sidecar describes exists in the
    /// container and agrees on geometry and channel count.
    pub(crate) fn cross_validate(&self, graph: &EntityGraph) -> Result<(), SidecarError> {
        for (&id, entry) in &self.acquisitions {
            let Some(acquisition) = graph.acquisition(id) else {
                return Err(SidecarError::UnknownAcquisition(id));
            };

            if entry.width != acquisition.width()
                || entry.height != acquisition.height()
                || entry.planes.len() != acquisition.channels().len()
            {
                return Err(SidecarError::Inconsistent {
                    id,
                    got_width: entry.width,
                    got_height: entry.height,
                    got_channels: entry.planes.len(),
                    want_width: acquisition.width(),
                    want_height: acquisition.height(),
                    want_channels: acquisition.channels().len(),
                });
            }
        }

        Ok(())
    }

    /// Looks up the plane for one channel of one acquisition.
    pub(crate) fn plane(
        &self,
        acquisition: u16,
        order: i16,
    ) -> Option<(&SidecarAcquisition, PlaneLocation)> {
        let entry = self.acquisitions.get(&acquisition)?;
        let index = usize::try_from(order).ok()?;
        let plane = entry.planes.get(index).copied()?;
        Some((entry, plane))
    }
}
