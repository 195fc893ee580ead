//! Decoding payload bytes into rasters.
//!
//! Channel values live in the container interleaved per pixel: for each
//! pixel, one little-endian value per channel in record order. Extracting a
//! channel therefore streams the acquisition's payload once and picks the
//! channel's lane out of every record; the cost scales with that payload,
//! never with the size of the whole file. When a channel-plane sidecar is
//! loaded, the decoder instead reads one compressed plane, which scales
//! with the single channel.
//!
//! Payload compression is a pluggable codec selected by a tag, so new
//! schemes added by future instrument software slot in without touching the
//! decode paths.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;

use crate::error::DecodeError;
use crate::io::dcm::{PlaneLocation, SidecarAcquisition};
use crate::io::segment::{Segment, SegmentRef};
use crate::meta::{Acquisition, Channel, ImageKind, ValueFormat};
use crate::raster::ChannelRaster;

/// Compression applied to a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Stored uncompressed
    #[default]
    None,
    /// LZ4 block compression
    Lz4,
    /// zlib (RFC 1950)
    Zlib,
}

impl Codec {
    /// Resolves a stored codec tag, or `None` when the tag is unknown
    pub fn from_tag(tag: u8) -> Option<Codec> {
        match tag {
            0 => Some(Codec::None),
            1 => Some(Codec::Lz4),
            2 => Some(Codec::Zlib),
            _ => None,
        }
    }

    /// The tag this codec is stored under
    pub fn tag(self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Lz4 => 1,
            Codec::Zlib => 2,
        }
    }

    /// Expands `bytes` to `raw_length` decompressed bytes.
    pub(crate) fn expand(
        self,
        bytes: &[u8],
        raw_length: usize,
        segment: SegmentRef,
    ) -> Result<Vec<u8>, DecodeError> {
        let corrupt = |reason: String| DecodeError::Corrupt { segment, reason };

        let raw = match self {
            Codec::None => bytes.to_vec(),
            Codec::Lz4 => lz4_flex::decompress(bytes, raw_length)
                .map_err(|e| corrupt(e.to_string()))?,
            Codec::Zlib => {
                let mut out = Vec::with_capacity(raw_length);
                ZlibDecoder::new(bytes)
                    .read_to_end(&mut out)
                    .map_err(|e| corrupt(e.to_string()))?;
                out
            }
        };

        if raw.len() != raw_length {
            return Err(corrupt(format!(
                "expanded to {} bytes, expected {}",
                raw.len(),
                raw_length
            )));
        }

        Ok(raw)
    }
}

fn ensure_f32(acquisition: &Acquisition) -> Result<(), DecodeError> {
    match acquisition.value_format() {
        ValueFormat::Float32 if acquisition.value_bytes() == 4 => Ok(()),
        ValueFormat::Float32 => Err(DecodeError::UnsupportedValueFormat(format!(
            "{}-byte Float",
            acquisition.value_bytes()
        ))),
        ValueFormat::Unknown(tag) => Err(DecodeError::UnsupportedValueFormat(tag.clone())),
    }
}

/// Extracts one channel from the interleaved payload of the container.
pub(crate) fn read_channel_interleaved<R: Read + Seek>(
    reader: &mut R,
    segment: Segment,
    acquisition: &Acquisition,
    channel: &Channel,
) -> Result<ChannelRaster, DecodeError> {
    ensure_f32(acquisition)?;

    let reference = SegmentRef::ChannelData {
        acquisition: acquisition.id(),
    };

    let record_size = acquisition.record_size();
    let lane = usize::try_from(channel.order()).unwrap_or(usize::MAX);
    if record_size == 0 || lane >= acquisition.channels().len() {
        // A record that has no lane for this channel holds no data for it
        return Err(DecodeError::MissingData(reference));
    }

    let declared = acquisition.declared_pixels();
    let available = (segment.length as usize) / record_size;
    if available > declared {
        return Err(DecodeError::SizeMismatch {
            acquisition: acquisition.id(),
            expected: declared,
            actual: available,
        });
    }

    let lane_offset = lane * acquisition.value_bytes() as usize;

    let mut data = vec![0f32; declared];
    let mut record = vec![0u8; record_size];

    reader.seek(SeekFrom::Start(segment.offset))?;
    for value in data.iter_mut().take(available) {
        reader.read_exact(&mut record)?;
        *value = LittleEndian::read_f32(&record[lane_offset..lane_offset + 4]);
    }

    Ok(ChannelRaster::new(
        acquisition.width(),
        acquisition.height(),
        available,
        data,
    ))
}

/// Reads one channel plane from a sidecar file.
pub(crate) fn read_channel_plane<R: Read + Seek>(
    reader: &mut R,
    entry: &SidecarAcquisition,
    plane: PlaneLocation,
    acquisition: &Acquisition,
) -> Result<ChannelRaster, DecodeError> {
    ensure_f32(acquisition)?;

    let reference = SegmentRef::ChannelData {
        acquisition: acquisition.id(),
    };

    if plane.length == 0 {
        return Err(DecodeError::MissingData(reference));
    }

    let mut stored = vec![0u8; plane.length as usize];
    reader.seek(SeekFrom::Start(plane.offset))?;
    reader.read_exact(&mut stored)?;

    let raw = entry
        .codec
        .expand(&stored, plane.raw_length as usize, reference)?;

    let valid = raw.len() / 4;
    if valid != entry.valid_pixels as usize {
        return Err(DecodeError::Corrupt {
            segment: reference,
            reason: format!(
                "plane holds {} values, table declares {}",
                valid, entry.valid_pixels
            ),
        });
    }

    let declared = acquisition.declared_pixels();
    if valid > declared {
        return Err(DecodeError::SizeMismatch {
            acquisition: acquisition.id(),
            expected: declared,
            actual: valid,
        });
    }

    let mut data = vec![0f32; declared];
    LittleEndian::read_f32_into(&raw[..valid * 4], &mut data[..valid]);

    Ok(ChannelRaster::new(
        acquisition.width(),
        acquisition.height(),
        valid,
        data,
    ))
}

/// Reads and decodes an embedded optical image payload.
pub(crate) fn read_embedded_image<R: Read + Seek>(
    reader: &mut R,
    segment: Segment,
    format: ImageKind,
) -> Result<image::RgbaImage, DecodeError> {
    let mut bytes = vec![0u8; segment.length as usize];
    reader.seek(SeekFrom::Start(segment.offset))?;
    reader.read_exact(&mut bytes)?;

    let decoded = image::load_from_memory_with_format(&bytes, format.to_image_format())?;
    Ok(decoded.to_rgba8())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codec_round_trips() {
        let raw: Vec<u8> = (0..=255).collect();
        let reference = SegmentRef::ChannelData { acquisition: 1 };

        assert_eq!(
            Codec::None.expand(&raw, raw.len(), reference).unwrap(),
            raw
        );

        let lz4 = lz4_flex::compress(&raw);
        assert_eq!(Codec::Lz4.expand(&lz4, raw.len(), reference).unwrap(), raw);

        let mut zlib = Vec::new();
        {
            use flate2::write::ZlibEncoder;
            use std::io::Write;
            let mut encoder = ZlibEncoder::new(&mut zlib, flate2::Compression::default());
            encoder.write_all(&raw).unwrap();
            encoder.finish().unwrap();
        }
        assert_eq!(
            Codec::Zlib.expand(&zlib, raw.len(), reference).unwrap(),
            raw
        );
    }

    #[test]
    fn corrupt_stream_is_reported() {
        let reference = SegmentRef::ChannelData { acquisition: 1 };
        match Codec::Lz4.expand(&[0xFF, 0x00, 0x01], 100, reference) {
            Err(DecodeError::Corrupt { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn codec_tags_round_trip() {
        for codec in [Codec::None, Codec::Lz4, Codec::Zlib] {
            assert_eq!(Codec::from_tag(codec.tag()), Some(codec));
        }
        assert_eq!(Codec::from_tag(0xFF), None);
    }
}
