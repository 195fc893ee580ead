use chrono::{DateTime, FixedOffset};

use crate::geom::{BoundingBox, SlideTransform};

use super::channel::{Channel, ChannelIdent};
use super::ByteSpan;

/// How the values of a channel payload are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueFormat {
    /// Little-endian IEEE-754 single precision
    Float32,
    /// A format tag this build does not recognize. Carried so that the
    /// rest of the file stays readable; decoding such a payload fails.
    Unknown(String),
}

/// One scanning run over a region of the slide, producing equally-sized
/// rasters for every channel.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub(crate) id: u16,
    pub(crate) panorama_id: u16,
    pub(crate) roi_id: i16,
    pub(crate) description: String,
    pub(crate) order_number: i16,

    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) value_format: ValueFormat,
    pub(crate) value_bytes: u8,

    pub(crate) data: Option<ByteSpan>,
    pub(crate) before_ablation_image: Option<ByteSpan>,
    pub(crate) after_ablation_image: Option<ByteSpan>,

    pub(crate) roi_start_x_um: f64,
    pub(crate) roi_start_y_um: f64,
    pub(crate) roi_end_x_um: f64,
    pub(crate) roi_end_y_um: f64,
    pub(crate) shot_distance_x: f64,
    pub(crate) shot_distance_y: f64,

    pub(crate) start_timestamp: Option<String>,
    pub(crate) end_timestamp: Option<String>,

    pub(crate) channels: Vec<Channel>,
}

impl Acquisition {
    /// Returns the unique id of the acquisition
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Returns the id of the panorama the acquired region was selected on
    #[inline]
    pub fn panorama_id(&self) -> u16 {
        self.panorama_id
    }

    /// Returns the id of the region-of-interest record for this acquisition
    pub fn roi_id(&self) -> i16 {
        self.roi_id
    }

    /// Returns the operator-supplied description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the position of this acquisition in acquisition order
    pub fn order_number(&self) -> i16 {
        self.order_number
    }

    /// Returns the width of the acquired raster in pixels
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of the acquired raster in pixels
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the declared encoding of the channel values
    pub fn value_format(&self) -> &ValueFormat {
        &self.value_format
    }

    /// Returns the declared width of a single value in bytes
    pub fn value_bytes(&self) -> u8 {
        self.value_bytes
    }

    /// Returns the channels of this acquisition, ordered by their position
    /// in the pixel record
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Returns the channel matching `ident`, or `None` when no channel does
    pub fn channel(&self, ident: &ChannelIdent) -> Option<&Channel> {
        self.channels.iter().find(|c| c.matches(ident))
    }

    /// Size in bytes of one interleaved pixel record
    pub fn record_size(&self) -> usize {
        self.channels.len() * self.value_bytes as usize
    }

    /// Number of pixels the declared geometry implies
    pub fn declared_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns whether the recorded payload covers the declared geometry.
    /// An aborted run leaves the payload short.
    pub fn is_complete(&self) -> bool {
        let record = self.record_size();
        if record == 0 {
            return false;
        }

        match self.data {
            Some(span) => span.len() as usize / record >= self.declared_pixels(),
            None => false,
        }
    }

    /// Returns the moment the run started, when the timestamp parses
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.start_timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    }

    /// Returns the moment the run ended, when the timestamp parses
    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        self.end_timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    }

    /// Returns whether a pre-ablation optical image is embedded
    pub fn has_before_ablation_image(&self) -> bool {
        self.before_ablation_image.is_some()
    }

    /// Returns whether a post-ablation optical image is embedded
    pub fn has_after_ablation_image(&self) -> bool {
        self.after_ablation_image.is_some()
    }

    // Some instrument revisions record the end x position equal to the
    // start; reconstruct the extent from the shot pitch in that case.
    fn end_x_um(&self) -> f64 {
        if self.roi_start_x_um == self.roi_end_x_um {
            self.roi_start_x_um + self.width as f64 * self.shot_distance_x
        } else {
            self.roi_end_x_um
        }
    }

    /// Returns the bounding box of the acquired region on the slide (μm)
    pub fn bounding_box(&self) -> BoundingBox<f64> {
        let end_x = self.end_x_um();

        BoundingBox {
            min_x: self.roi_start_x_um.min(end_x),
            min_y: self.roi_start_y_um.min(self.roi_end_y_um),
            width: (end_x - self.roi_start_x_um).abs(),
            height: (self.roi_end_y_um - self.roi_start_y_um).abs(),
        }
    }

    /// Returns the mapping from raster pixel coordinates to slide
    /// coordinates (μm)
    pub fn to_slide_transform(&self) -> SlideTransform {
        SlideTransform::new(self.bounding_box(), self.width, self.height)
    }

    pub(crate) fn data_span(&self) -> Option<ByteSpan> {
        self.data
    }

    pub(crate) fn before_ablation_span(&self) -> Option<ByteSpan> {
        self.before_ablation_image
    }

    pub(crate) fn after_ablation_span(&self) -> Option<ByteSpan> {
        self.after_ablation_image
    }
}
