//! Event-driven construction of an [`EntityGraph`] from the embedded XML
//! document.
//!
//! The document is flat: entity elements (`<Slide>`, `<Panorama>`,
//! `<AcquisitionROI>`, `<Acquisition>`, `<AcquisitionChannel>`, ...) are
//! direct children of the `<MCDSchema>` root and their fields are leaf
//! children. The builder walks the event stream with a small state machine,
//! collects partially-parsed drafts, then resolves and validates the
//! cross-entity references in a final pass. Elements it does not recognize
//! are skipped, so documents from newer schema revisions stay readable.

use std::collections::HashSet;
use std::str::FromStr;

use indexmap::IndexMap;
use log::{debug, trace, warn};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::MetadataError;

use super::acquisition::{Acquisition, ValueFormat};
use super::channel::Channel;
use super::panorama::Panorama;
use super::slide::Slide;
use super::{ByteSpan, EntityGraph, ImageKind};

// Some instrument revisions write μm coordinates multiplied by 1000;
// positions past the physical slide edge are assumed to be affected.
const UM_OVERFLOW_LIMIT: f64 = 75_000.0;

pub(super) fn parse(xml: &str) -> Result<EntityGraph, MetadataError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut builder = GraphBuilder::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => builder.start_element(e.local_name().as_ref())?,
            Event::Empty(e) => builder.empty_element(e.local_name().as_ref()),
            Event::End(e) => builder.end_element(e.local_name().as_ref()),
            Event::Text(t) => {
                let text = t.unescape()?;
                builder.text(&text)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    builder.finish()
}

/// Which entity element the builder is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Scope {
    #[default]
    Document,
    Slide,
    Panorama,
    AcquisitionRoi,
    Acquisition,
    Channel,
    /// An entity element this build does not recognize
    Other,
}

#[derive(Debug, Default)]
struct SlideDraft {
    id: Option<u16>,
    uid: Option<String>,
    description: Option<String>,
    width_um: Option<f64>,
    height_um: Option<f64>,
    sw_version: Option<String>,
    image_start: Option<i64>,
    image_end: Option<i64>,
}

#[derive(Debug, Default)]
struct PanoramaDraft {
    id: Option<u16>,
    slide_id: Option<u16>,
    description: Option<String>,
    corners_x: [Option<f64>; 4],
    corners_y: [Option<f64>; 4],
    pixel_width: Option<i64>,
    pixel_height: Option<i64>,
    image_start: Option<i64>,
    image_end: Option<i64>,
    image_format: Option<ImageKind>,
    pixel_scale_coef: Option<f64>,
}

#[derive(Debug, Default)]
struct RoiDraft {
    id: Option<i16>,
    panorama_id: Option<u16>,
}

#[derive(Debug, Default)]
struct AcquisitionDraft {
    id: Option<u16>,
    description: Option<String>,
    order_number: Option<i16>,
    roi_id: Option<i16>,
    data_start: Option<i64>,
    data_end: Option<i64>,
    before_start: Option<i64>,
    before_end: Option<i64>,
    after_start: Option<i64>,
    after_end: Option<i64>,
    roi_start_x_um: Option<f64>,
    roi_start_y_um: Option<f64>,
    roi_end_x_um: Option<f64>,
    roi_end_y_um: Option<f64>,
    shot_distance_x: Option<f64>,
    shot_distance_y: Option<f64>,
    value_format: Option<ValueFormat>,
    value_bytes: Option<u8>,
    max_x: Option<i64>,
    max_y: Option<i64>,
    start_timestamp: Option<String>,
    end_timestamp: Option<String>,
}

#[derive(Debug, Default)]
struct ChannelDraft {
    id: Option<u16>,
    acquisition_id: Option<u16>,
    name: Option<String>,
    label: Option<String>,
    order: Option<i16>,
}

#[derive(Debug, Default)]
struct GraphBuilder {
    depth: usize,
    scope: Scope,
    field: Option<Vec<u8>>,

    slide: SlideDraft,
    panorama: PanoramaDraft,
    roi: RoiDraft,
    acquisition: AcquisitionDraft,
    channel: ChannelDraft,

    slides: Vec<SlideDraft>,
    panoramas: Vec<PanoramaDraft>,
    rois: Vec<RoiDraft>,
    acquisitions: Vec<AcquisitionDraft>,
    channels: Vec<ChannelDraft>,
}

fn parse_value<T: FromStr>(
    text: &str,
    element: &'static str,
    field: &'static str,
) -> Result<T, MetadataError> {
    text.parse().map_err(|_| MetadataError::InvalidValue {
        element,
        field,
        value: text.to_string(),
    })
}

fn require<T>(
    value: Option<T>,
    element: &'static str,
    field: &'static str,
) -> Result<T, MetadataError> {
    value.ok_or(MetadataError::MissingElement { element, field })
}

impl GraphBuilder {
    fn start_element(&mut self, name: &[u8]) -> Result<(), MetadataError> {
        self.depth += 1;

        match self.depth {
            1 => {
                if name != b"MCDSchema" {
                    return Err(MetadataError::MissingElement {
                        element: "document",
                        field: "MCDSchema",
                    });
                }
            }
            2 => {
                self.scope = match name {
                    b"Slide" => Scope::Slide,
                    b"Panorama" => Scope::Panorama,
                    b"AcquisitionROI" => Scope::AcquisitionRoi,
                    b"Acquisition" => Scope::Acquisition,
                    b"AcquisitionChannel" => Scope::Channel,
                    other => {
                        trace!(
                            "skipping unrecognized element <{}>",
                            String::from_utf8_lossy(other)
                        );
                        Scope::Other
                    }
                };
            }
            _ => {
                self.field = Some(name.to_vec());
            }
        }

        Ok(())
    }

    fn empty_element(&mut self, name: &[u8]) {
        // An empty leaf carries no text; nothing to record
        if self.depth <= 1 {
            trace!(
                "skipping empty element <{}>",
                String::from_utf8_lossy(name)
            );
        }
    }

    fn end_element(&mut self, name: &[u8]) {
        match self.depth {
            0 => {}
            1 | 2 => {
                if self.depth == 2 {
                    match self.scope {
                        Scope::Slide => self.slides.push(std::mem::take(&mut self.slide)),
                        Scope::Panorama => self.panoramas.push(std::mem::take(&mut self.panorama)),
                        Scope::AcquisitionRoi => self.rois.push(std::mem::take(&mut self.roi)),
                        Scope::Acquisition => self
                            .acquisitions
                            .push(std::mem::take(&mut self.acquisition)),
                        Scope::Channel => self.channels.push(std::mem::take(&mut self.channel)),
                        Scope::Other => {
                            trace!(
                                "finished skipping <{}>",
                                String::from_utf8_lossy(name)
                            );
                        }
                        Scope::Document => {}
                    }
                    self.scope = Scope::Document;
                }
                self.depth -= 1;
            }
            _ => {
                self.field = None;
                self.depth -= 1;
            }
        }
    }

    fn text(&mut self, text: &str) -> Result<(), MetadataError> {
        let Some(field) = self.field.take() else {
            return Ok(());
        };

        match self.scope {
            Scope::Slide => self.slide_text(&field, text)?,
            Scope::Panorama => self.panorama_text(&field, text)?,
            Scope::AcquisitionRoi => self.roi_text(&field, text)?,
            Scope::Acquisition => self.acquisition_text(&field, text)?,
            Scope::Channel => self.channel_text(&field, text)?,
            Scope::Other | Scope::Document => {}
        }

        Ok(())
    }

    fn slide_text(&mut self, field: &[u8], text: &str) -> Result<(), MetadataError> {
        let slide = &mut self.slide;
        match field {
            b"ID" => slide.id = Some(parse_value(text, "Slide", "ID")?),
            b"UID" => slide.uid = Some(text.to_string()),
            b"Description" => slide.description = Some(text.to_string()),
            b"WidthUm" => slide.width_um = Some(parse_value(text, "Slide", "WidthUm")?),
            b"HeightUm" => slide.height_um = Some(parse_value(text, "Slide", "HeightUm")?),
            b"ImageStartOffset" => {
                slide.image_start = Some(parse_value(text, "Slide", "ImageStartOffset")?)
            }
            b"ImageEndOffset" => {
                slide.image_end = Some(parse_value(text, "Slide", "ImageEndOffset")?)
            }
            b"SwVersion" => slide.sw_version = Some(text.to_string()),
            other => trace!(
                "ignoring <{}> on <Slide>",
                String::from_utf8_lossy(other)
            ),
        }

        Ok(())
    }

    fn panorama_text(&mut self, field: &[u8], text: &str) -> Result<(), MetadataError> {
        let panorama = &mut self.panorama;
        match field {
            b"ID" => panorama.id = Some(parse_value(text, "Panorama", "ID")?),
            b"SlideID" => panorama.slide_id = Some(parse_value(text, "Panorama", "SlideID")?),
            b"Description" => panorama.description = Some(text.to_string()),
            b"SlideX1PosUm" => {
                panorama.corners_x[0] = Some(parse_value(text, "Panorama", "SlideX1PosUm")?)
            }
            b"SlideY1PosUm" => {
                panorama.corners_y[0] = Some(parse_value(text, "Panorama", "SlideY1PosUm")?)
            }
            b"SlideX2PosUm" => {
                panorama.corners_x[1] = Some(parse_value(text, "Panorama", "SlideX2PosUm")?)
            }
            b"SlideY2PosUm" => {
                panorama.corners_y[1] = Some(parse_value(text, "Panorama", "SlideY2PosUm")?)
            }
            b"SlideX3PosUm" => {
                panorama.corners_x[2] = Some(parse_value(text, "Panorama", "SlideX3PosUm")?)
            }
            b"SlideY3PosUm" => {
                panorama.corners_y[2] = Some(parse_value(text, "Panorama", "SlideY3PosUm")?)
            }
            b"SlideX4PosUm" => {
                panorama.corners_x[3] = Some(parse_value(text, "Panorama", "SlideX4PosUm")?)
            }
            b"SlideY4PosUm" => {
                panorama.corners_y[3] = Some(parse_value(text, "Panorama", "SlideY4PosUm")?)
            }
            b"PixelWidth" => {
                panorama.pixel_width = Some(parse_value(text, "Panorama", "PixelWidth")?)
            }
            b"PixelHeight" => {
                panorama.pixel_height = Some(parse_value(text, "Panorama", "PixelHeight")?)
            }
            b"ImageStartOffset" => {
                panorama.image_start = Some(parse_value(text, "Panorama", "ImageStartOffset")?)
            }
            b"ImageEndOffset" => {
                panorama.image_end = Some(parse_value(text, "Panorama", "ImageEndOffset")?)
            }
            b"ImageFormat" => {
                panorama.image_format = Some(match text {
                    "PNG" => ImageKind::Png,
                    "JPEG" | "JPG" => ImageKind::Jpeg,
                    other => {
                        warn!(
                            "unrecognized panorama image format {:?}, assuming PNG",
                            other
                        );
                        ImageKind::Png
                    }
                })
            }
            b"PixelScaleCoef" => {
                panorama.pixel_scale_coef = Some(parse_value(text, "Panorama", "PixelScaleCoef")?)
            }
            other => trace!(
                "ignoring <{}> on <Panorama>",
                String::from_utf8_lossy(other)
            ),
        }

        Ok(())
    }

    fn roi_text(&mut self, field: &[u8], text: &str) -> Result<(), MetadataError> {
        let roi = &mut self.roi;
        match field {
            b"ID" => roi.id = Some(parse_value(text, "AcquisitionROI", "ID")?),
            b"PanoramaID" => {
                roi.panorama_id = Some(parse_value(text, "AcquisitionROI", "PanoramaID")?)
            }
            other => trace!(
                "ignoring <{}> on <AcquisitionROI>",
                String::from_utf8_lossy(other)
            ),
        }

        Ok(())
    }

    fn acquisition_text(&mut self, field: &[u8], text: &str) -> Result<(), MetadataError> {
        let acq = &mut self.acquisition;
        match field {
            b"ID" => acq.id = Some(parse_value(text, "Acquisition", "ID")?),
            b"Description" => acq.description = Some(text.to_string()),
            b"OrderNumber" => {
                acq.order_number = Some(parse_value(text, "Acquisition", "OrderNumber")?)
            }
            b"AcquisitionROIID" => {
                acq.roi_id = Some(parse_value(text, "Acquisition", "AcquisitionROIID")?)
            }
            b"DataStartOffset" => {
                acq.data_start = Some(parse_value(text, "Acquisition", "DataStartOffset")?)
            }
            b"DataEndOffset" => {
                acq.data_end = Some(parse_value(text, "Acquisition", "DataEndOffset")?)
            }
            b"BeforeAblationImageStartOffset" => {
                acq.before_start = Some(parse_value(
                    text,
                    "Acquisition",
                    "BeforeAblationImageStartOffset",
                )?)
            }
            b"BeforeAblationImageEndOffset" => {
                acq.before_end = Some(parse_value(
                    text,
                    "Acquisition",
                    "BeforeAblationImageEndOffset",
                )?)
            }
            b"AfterAblationImageStartOffset" => {
                acq.after_start = Some(parse_value(
                    text,
                    "Acquisition",
                    "AfterAblationImageStartOffset",
                )?)
            }
            b"AfterAblationImageEndOffset" => {
                acq.after_end = Some(parse_value(
                    text,
                    "Acquisition",
                    "AfterAblationImageEndOffset",
                )?)
            }
            b"ROIStartXPosUm" => {
                acq.roi_start_x_um = Some(parse_value(text, "Acquisition", "ROIStartXPosUm")?)
            }
            b"ROIStartYPosUm" => {
                acq.roi_start_y_um = Some(parse_value(text, "Acquisition", "ROIStartYPosUm")?)
            }
            b"ROIEndXPosUm" => {
                acq.roi_end_x_um = Some(parse_value(text, "Acquisition", "ROIEndXPosUm")?)
            }
            b"ROIEndYPosUm" => {
                acq.roi_end_y_um = Some(parse_value(text, "Acquisition", "ROIEndYPosUm")?)
            }
            b"AblationDistanceBetweenShotsX" => {
                acq.shot_distance_x = Some(parse_value(
                    text,
                    "Acquisition",
                    "AblationDistanceBetweenShotsX",
                )?)
            }
            b"AblationDistanceBetweenShotsY" => {
                acq.shot_distance_y = Some(parse_value(
                    text,
                    "Acquisition",
                    "AblationDistanceBetweenShotsY",
                )?)
            }
            b"SegmentDataFormat" => {
                acq.value_format = Some(match text {
                    "Float" => ValueFormat::Float32,
                    other => ValueFormat::Unknown(other.to_string()),
                })
            }
            b"ValueBytes" => acq.value_bytes = Some(parse_value(text, "Acquisition", "ValueBytes")?),
            b"MaxX" => acq.max_x = Some(parse_value(text, "Acquisition", "MaxX")?),
            b"MaxY" => acq.max_y = Some(parse_value(text, "Acquisition", "MaxY")?),
            b"StartTimeStamp" => acq.start_timestamp = Some(text.to_string()),
            b"EndTimeStamp" => acq.end_timestamp = Some(text.to_string()),
            other => trace!(
                "ignoring <{}> on <Acquisition>",
                String::from_utf8_lossy(other)
            ),
        }

        Ok(())
    }

    fn channel_text(&mut self, field: &[u8], text: &str) -> Result<(), MetadataError> {
        let channel = &mut self.channel;
        match field {
            b"ID" => channel.id = Some(parse_value(text, "AcquisitionChannel", "ID")?),
            b"AcquisitionID" => {
                channel.acquisition_id =
                    Some(parse_value(text, "AcquisitionChannel", "AcquisitionID")?)
            }
            b"ChannelName" => channel.name = Some(text.to_string()),
            b"ChannelLabel" => channel.label = Some(text.to_string()),
            b"OrderNumber" => {
                channel.order = Some(parse_value(text, "AcquisitionChannel", "OrderNumber")?)
            }
            other => trace!(
                "ignoring <{}> on <AcquisitionChannel>",
                String::from_utf8_lossy(other)
            ),
        }

        Ok(())
    }

    fn finish(self) -> Result<EntityGraph, MetadataError> {
        let mut graph = EntityGraph::default();

        for draft in self.slides {
            let id = require(draft.id, "Slide", "ID")?;
            let slide = Slide {
                id,
                uid: draft.uid,
                description: draft.description.unwrap_or_default(),
                width_um: require(draft.width_um, "Slide", "WidthUm")?,
                height_um: require(draft.height_um, "Slide", "HeightUm")?,
                sw_version: draft.sw_version,
                image: ByteSpan::from_offsets(draft.image_start, draft.image_end),
            };

            if graph.slides.insert(id, slide).is_some() {
                return Err(MetadataError::DuplicateId { kind: "slide", id });
            }
        }

        let mut rois: IndexMap<i16, u16> = IndexMap::new();
        for draft in self.rois {
            let id = require(draft.id, "AcquisitionROI", "ID")?;
            let panorama_id = require(draft.panorama_id, "AcquisitionROI", "PanoramaID")?;

            if rois.insert(id, panorama_id).is_some() {
                return Err(MetadataError::DuplicateId {
                    kind: "acquisition region",
                    id: id as u16,
                });
            }
        }

        for draft in self.panoramas {
            let id = require(draft.id, "Panorama", "ID")?;
            let slide_id = require(draft.slide_id, "Panorama", "SlideID")?;

            if !graph.slides.contains_key(&slide_id) {
                return Err(MetadataError::DanglingReference {
                    kind: "panorama",
                    id,
                    parent: "slide",
                    parent_id: slide_id as i64,
                });
            }

            let mut corners = [(0.0, 0.0); 4];
            for (i, corner) in corners.iter_mut().enumerate() {
                *corner = (
                    draft.corners_x[i].unwrap_or(0.0),
                    draft.corners_y[i].unwrap_or(0.0),
                );
            }

            let panorama = Panorama {
                id,
                slide_id,
                description: draft.description.unwrap_or_default(),
                corners,
                pixel_width: draft.pixel_width.unwrap_or(0).max(0) as u32,
                pixel_height: draft.pixel_height.unwrap_or(0).max(0) as u32,
                image: ByteSpan::from_offsets(draft.image_start, draft.image_end),
                image_format: draft.image_format.unwrap_or_default(),
                pixel_scale_coef: draft.pixel_scale_coef.unwrap_or(1.0),
            };

            if graph.panoramas.insert(id, panorama).is_some() {
                return Err(MetadataError::DuplicateId {
                    kind: "panorama",
                    id,
                });
            }
        }

        for draft in self.acquisitions {
            let id = require(draft.id, "Acquisition", "ID")?;
            let roi_id = require(draft.roi_id, "Acquisition", "AcquisitionROIID")?;

            let Some(&panorama_id) = rois.get(&roi_id) else {
                return Err(MetadataError::DanglingReference {
                    kind: "acquisition",
                    id,
                    parent: "acquisition region",
                    parent_id: roi_id as i64,
                });
            };
            if !graph.panoramas.contains_key(&panorama_id) {
                return Err(MetadataError::DanglingReference {
                    kind: "acquisition",
                    id,
                    parent: "panorama",
                    parent_id: panorama_id as i64,
                });
            }

            let max_x = require(draft.max_x, "Acquisition", "MaxX")?;
            let max_y = require(draft.max_y, "Acquisition", "MaxY")?;
            if max_x <= 0 || max_y <= 0 || max_x > u32::MAX as i64 || max_y > u32::MAX as i64 {
                return Err(MetadataError::InvalidGeometry {
                    id,
                    width: max_x,
                    height: max_y,
                });
            }

            let mut roi_start_x_um = draft.roi_start_x_um.unwrap_or(0.0);
            let mut roi_start_y_um = draft.roi_start_y_um.unwrap_or(0.0);
            if roi_start_x_um > UM_OVERFLOW_LIMIT {
                debug!("acquisition {}: scaling down overflowed ROI start x", id);
                roi_start_x_um /= 1000.0;
            }
            if roi_start_y_um > UM_OVERFLOW_LIMIT {
                debug!("acquisition {}: scaling down overflowed ROI start y", id);
                roi_start_y_um /= 1000.0;
            }

            let acquisition = Acquisition {
                id,
                panorama_id,
                roi_id,
                description: draft.description.unwrap_or_default(),
                order_number: draft.order_number.unwrap_or(0),
                width: max_x as u32,
                height: max_y as u32,
                value_format: draft.value_format.unwrap_or(ValueFormat::Float32),
                value_bytes: draft.value_bytes.unwrap_or(4),
                data: ByteSpan::from_offsets(draft.data_start, draft.data_end),
                before_ablation_image: ByteSpan::from_offsets(
                    draft.before_start,
                    draft.before_end,
                ),
                after_ablation_image: ByteSpan::from_offsets(draft.after_start, draft.after_end),
                roi_start_x_um,
                roi_start_y_um,
                roi_end_x_um: draft.roi_end_x_um.unwrap_or(0.0),
                roi_end_y_um: draft.roi_end_y_um.unwrap_or(0.0),
                shot_distance_x: draft.shot_distance_x.unwrap_or(1.0),
                shot_distance_y: draft.shot_distance_y.unwrap_or(1.0),
                start_timestamp: draft.start_timestamp,
                end_timestamp: draft.end_timestamp,
                channels: Vec::new(),
            };

            if graph.acquisitions.insert(id, acquisition).is_some() {
                return Err(MetadataError::DuplicateId {
                    kind: "acquisition",
                    id,
                });
            }
        }

        let mut channel_ids: HashSet<u16> = HashSet::new();
        for draft in self.channels {
            let id = require(draft.id, "AcquisitionChannel", "ID")?;
            let acquisition_id = require(draft.acquisition_id, "AcquisitionChannel", "AcquisitionID")?;

            if !channel_ids.insert(id) {
                return Err(MetadataError::DuplicateId {
                    kind: "channel",
                    id,
                });
            }

            let Some(acquisition) = graph.acquisitions.get_mut(&acquisition_id) else {
                return Err(MetadataError::DanglingReference {
                    kind: "channel",
                    id,
                    parent: "acquisition",
                    parent_id: acquisition_id as i64,
                });
            };

            acquisition.channels.push(Channel {
                id,
                acquisition_id,
                name: draft.name.unwrap_or_default(),
                label: draft.label.unwrap_or_default(),
                order: require(draft.order, "AcquisitionChannel", "OrderNumber")?,
            });
        }

        for acquisition in graph.acquisitions.values_mut() {
            acquisition.channels.sort_by_key(|c| c.order);
        }

        Ok(graph)
    }
}
