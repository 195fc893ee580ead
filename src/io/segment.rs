//! The segment index: where each entity's payload lives in the container.
//!
//! Payload locations are declared by the metadata document rather than by a
//! separate on-disk table, so the index is derived from the entity graph
//! once at open time, bounds-checked against the metadata block offset, and
//! immutable afterwards. Entities whose declarations are absent or empty
//! simply have no index entry; looking them up reports missing data rather
//! than failing the whole container.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{DecodeError, FormatError};
use crate::meta::EntityGraph;

/// What a segment's bytes encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Interleaved channel values of one acquisition
    ChannelData,
    /// A panorama's embedded preview image
    PanoramaImage,
    /// The whole-slide optical image
    SlideImage,
    /// Optical image of the region taken before ablation
    BeforeAblationImage,
    /// Optical image of the region taken after ablation
    AfterAblationImage,
}

/// Identifies the payload belonging to one entity of the metadata graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentRef {
    /// The channel data payload of an acquisition
    ChannelData {
        /// Owning acquisition id
        acquisition: u16,
    },
    /// The preview image of a panorama
    PanoramaImage {
        /// Owning panorama id
        panorama: u16,
    },
    /// The optical image of a slide
    SlideImage {
        /// Owning slide id
        slide: u16,
    },
    /// The pre-ablation optical image of an acquisition
    BeforeAblationImage {
        /// Owning acquisition id
        acquisition: u16,
    },
    /// The post-ablation optical image of an acquisition
    AfterAblationImage {
        /// Owning acquisition id
        acquisition: u16,
    },
}

impl SegmentRef {
    /// The kind of payload this reference names
    pub fn kind(&self) -> SegmentKind {
        match self {
            SegmentRef::ChannelData { .. } => SegmentKind::ChannelData,
            SegmentRef::PanoramaImage { .. } => SegmentKind::PanoramaImage,
            SegmentRef::SlideImage { .. } => SegmentKind::SlideImage,
            SegmentRef::BeforeAblationImage { .. } => SegmentKind::BeforeAblationImage,
            SegmentRef::AfterAblationImage { .. } => SegmentKind::AfterAblationImage,
        }
    }
}

impl fmt::Display for SegmentRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SegmentRef::ChannelData { acquisition } => {
                write!(f, "channel data of acquisition {}", acquisition)
            }
            SegmentRef::PanoramaImage { panorama } => {
                write!(f, "image of panorama {}", panorama)
            }
            SegmentRef::SlideImage { slide } => write!(f, "image of slide {}", slide),
            SegmentRef::BeforeAblationImage { acquisition } => {
                write!(f, "pre-ablation image of acquisition {}", acquisition)
            }
            SegmentRef::AfterAblationImage { acquisition } => {
                write!(f, "post-ablation image of acquisition {}", acquisition)
            }
        }
    }
}

/// A located byte range within the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Absolute offset of the payload
    pub offset: u64,
    /// Length of the payload in bytes
    pub length: u64,
    /// What the payload encodes
    pub kind: SegmentKind,
}

/// An ordered mapping from entity reference to the byte range holding its
/// payload, built once when the container is opened.
#[derive(Debug, Default)]
pub struct SegmentIndex {
    segments: IndexMap<SegmentRef, Segment>,
}

impl SegmentIndex {
    /// Derives the index from a validated entity graph. `payload_limit` is
    /// the offset of the metadata block; no payload may extend past it.
    pub(crate) fn from_graph(
        graph: &EntityGraph,
        payload_limit: u64,
    ) -> Result<SegmentIndex, FormatError> {
        let mut index = SegmentIndex::default();

        for slide in graph.slides() {
            index.register(
                SegmentRef::SlideImage { slide: slide.id() },
                slide.image_span(),
                payload_limit,
            )?;
        }

        for panorama in graph.panoramas() {
            index.register(
                SegmentRef::PanoramaImage {
                    panorama: panorama.id(),
                },
                panorama.image_span(),
                payload_limit,
            )?;
        }

        for acquisition in graph.acquisitions() {
            let id = acquisition.id();
            index.register(
                SegmentRef::ChannelData { acquisition: id },
                acquisition.data_span(),
                payload_limit,
            )?;
            index.register(
                SegmentRef::BeforeAblationImage { acquisition: id },
                acquisition.before_ablation_span(),
                payload_limit,
            )?;
            index.register(
                SegmentRef::AfterAblationImage { acquisition: id },
                acquisition.after_ablation_span(),
                payload_limit,
            )?;
        }

        Ok(index)
    }

    fn register(
        &mut self,
        reference: SegmentRef,
        span: Option<crate::meta::ByteSpan>,
        limit: u64,
    ) -> Result<(), FormatError> {
        let Some(span) = span else {
            return Ok(());
        };

        if span.end > limit {
            return Err(FormatError::CorruptIndex {
                segment: reference,
                start: span.start,
                end: span.end,
                limit,
            });
        }

        self.segments.insert(
            reference,
            Segment {
                offset: span.start,
                length: span.len(),
                kind: reference.kind(),
            },
        );

        Ok(())
    }

    /// Locates the payload for `reference`. Declared-but-absent payloads
    /// report [`DecodeError::MissingData`]; this is a legitimate state for
    /// partially acquired runs, not a corrupt file.
    pub fn locate(&self, reference: SegmentRef) -> Result<Segment, DecodeError> {
        self.segments
            .get(&reference)
            .copied()
            .ok_or(DecodeError::MissingData(reference))
    }

    /// Returns whether the index holds a payload for `reference`
    pub fn contains(&self, reference: SegmentRef) -> bool {
        self.segments.contains_key(&reference)
    }

    /// Number of payloads in the index
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterate over the references and segments
    pub fn iter(&self) -> impl Iterator<Item = (&SegmentRef, &Segment)> {
        self.segments.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::EntityGraph;

    const XML: &str = r#"<MCDSchema>
<Slide><ID>1</ID><WidthUm>100</WidthUm><HeightUm>100</HeightUm></Slide>
<Panorama><ID>2</ID><SlideID>1</SlideID><ImageStartOffset>0</ImageStartOffset><ImageEndOffset>64</ImageEndOffset></Panorama>
<AcquisitionROI><ID>1</ID><PanoramaID>2</PanoramaID></AcquisitionROI>
<Acquisition><ID>5</ID><AcquisitionROIID>1</AcquisitionROIID><MaxX>4</MaxX><MaxY>4</MaxY><DataStartOffset>64</DataStartOffset><DataEndOffset>192</DataEndOffset></Acquisition>
<Acquisition><ID>6</ID><AcquisitionROIID>1</AcquisitionROIID><MaxX>4</MaxX><MaxY>4</MaxY><DataStartOffset>200</DataStartOffset><DataEndOffset>200</DataEndOffset></Acquisition>
</MCDSchema>"#;

    #[test]
    fn locates_declared_payloads() {
        let graph = EntityGraph::build(XML).unwrap();
        let index = SegmentIndex::from_graph(&graph, 1024).unwrap();

        let segment = index
            .locate(SegmentRef::ChannelData { acquisition: 5 })
            .unwrap();
        assert_eq!(segment.offset, 64);
        assert_eq!(segment.length, 128);
        assert_eq!(segment.kind, SegmentKind::ChannelData);

        let image = index.locate(SegmentRef::PanoramaImage { panorama: 2 }).unwrap();
        assert_eq!(image.length, 64);
    }

    #[test]
    fn empty_declaration_reports_missing_data() {
        let graph = EntityGraph::build(XML).unwrap();
        let index = SegmentIndex::from_graph(&graph, 1024).unwrap();

        // Acquisition 6 declares a zero-length payload
        match index.locate(SegmentRef::ChannelData { acquisition: 6 }) {
            Err(DecodeError::MissingData(SegmentRef::ChannelData { acquisition: 6 })) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        // The slide never declared an image at all
        match index.locate(SegmentRef::SlideImage { slide: 1 }) {
            Err(DecodeError::MissingData(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn out_of_bounds_payload_is_corrupt() {
        let graph = EntityGraph::build(XML).unwrap();
        match SegmentIndex::from_graph(&graph, 100) {
            Err(FormatError::CorruptIndex {
                segment: SegmentRef::ChannelData { acquisition: 5 },
                end: 192,
                limit: 100,
                ..
            }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
