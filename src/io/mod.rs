//! Opening containers and the lazily-decoding [`Mcd`] handle.

pub(crate) mod dcm;
pub(crate) mod segment;
mod tail;

pub use segment::{Segment, SegmentIndex, SegmentKind, SegmentRef};

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{GrayImage, RgbaImage};
use log::{debug, warn};

use crate::compose::{self, OverlayPlane};
use crate::decode;
use crate::error::{DecodeError, FormatError, McdError};
use crate::geom::BoundingBox;
use crate::meta::{Acquisition, Channel, ChannelIdent, EntityGraph, Panorama, Slide};
use crate::raster::ChannelRaster;

/// An opened .mcd container.
///
/// Holds the byte source, the entity graph parsed from the embedded
/// metadata document and the segment index derived from it. Pixel payloads
/// are never read at open time; every decode re-reads exactly the payload
/// it needs, so concurrent decodes from multiple threads only contend for
/// the short seek-and-read window on the shared source.
pub struct Mcd<R: Read + Seek> {
    source: Mutex<R>,
    location: Option<PathBuf>,
    graph: EntityGraph,
    index: SegmentIndex,
    sidecar: Option<Sidecar>,
}

/// A file-backed container, the common case.
pub type McdFile = Mcd<BufReader<File>>;

struct Sidecar {
    index: dcm::SidecarIndex,
    source: Mutex<BufReader<File>>,
}

impl McdFile {
    /// Opens a container from a path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<McdFile, McdError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(FormatError::Io)?;
        Mcd::open_impl(BufReader::new(file), Some(path.to_owned()), None)
    }

    /// Opens a container and, when present and consistent, the channel-plane
    /// sidecar at `sidecar_path` that accelerates single-channel reads.
    ///
    /// A missing or disagreeing sidecar is reported at warn level and the
    /// container opens on its own; this never fails an otherwise valid
    /// container.
    pub fn open_with_dcm<P: AsRef<Path>, Q: AsRef<Path>>(
        path: P,
        sidecar_path: Q,
    ) -> Result<McdFile, McdError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(FormatError::Io)?;
        Mcd::open_impl(
            BufReader::new(file),
            Some(path.to_owned()),
            Some(sidecar_path.as_ref().to_owned()),
        )
    }
}

impl<R: Read + Seek> Mcd<R> {
    /// Opens a container from any seekable byte source. No sidecar is
    /// consulted.
    pub fn from_reader(reader: R) -> Result<Mcd<R>, McdError> {
        Mcd::open_impl(reader, None, None)
    }

    fn open_impl(
        mut reader: R,
        location: Option<PathBuf>,
        sidecar_path: Option<PathBuf>,
    ) -> Result<Mcd<R>, McdError> {
        let block = tail::read_trailing_metadata(&mut reader)?;
        let graph = EntityGraph::build(&block.xml)?;
        let index = SegmentIndex::from_graph(&graph, block.offset)?;

        debug!(
            "opened container with {} slides, {} panoramas, {} acquisitions, {} payloads",
            graph.slide_ids().len(),
            graph.panorama_ids().len(),
            graph.acquisition_ids().len(),
            index.len()
        );

        let sidecar = sidecar_path.and_then(|path| match Self::load_sidecar(&path, &graph) {
            Ok(sidecar) => Some(sidecar),
            Err(error) => {
                warn!(
                    "ignoring sidecar {}: {}; continuing with the container alone",
                    path.display(),
                    error
                );
                None
            }
        });

        Ok(Mcd {
            source: Mutex::new(reader),
            location,
            graph,
            index,
            sidecar,
        })
    }

    fn load_sidecar(path: &Path, graph: &EntityGraph) -> Result<Sidecar, dcm::SidecarError> {
        let mut reader = BufReader::new(File::open(path)?);
        let index = dcm::SidecarIndex::read(&mut reader)?;
        index.cross_validate(graph)?;

        Ok(Sidecar {
            index,
            source: Mutex::new(reader),
        })
    }

    /// Returns the path the container was opened from, if any
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Returns whether a channel-plane sidecar is loaded
    pub fn has_sidecar(&self) -> bool {
        self.sidecar.is_some()
    }

    /// Returns the entity graph parsed from the embedded metadata
    pub fn metadata(&self) -> &EntityGraph {
        &self.graph
    }

    /// Returns the segment index derived from the metadata
    pub fn segments(&self) -> &SegmentIndex {
        &self.index
    }

    /// Returns the slide with the given id, or `None` if no such slide exists
    pub fn slide(&self, id: u16) -> Option<&Slide> {
        self.graph.slide(id)
    }

    /// Returns the panorama with the given id, or `None` if no such
    /// panorama exists
    pub fn panorama(&self, id: u16) -> Option<&Panorama> {
        self.graph.panorama(id)
    }

    /// Returns the acquisition with the given id, or `None` if no such
    /// acquisition exists
    pub fn acquisition(&self, id: u16) -> Option<&Acquisition> {
        self.graph.acquisition(id)
    }

    /// Returns all slide ids, ascending
    pub fn slide_ids(&self) -> Vec<u16> {
        self.graph.slide_ids()
    }

    /// Returns all panorama ids, ascending
    pub fn panorama_ids(&self) -> Vec<u16> {
        self.graph.panorama_ids()
    }

    /// Returns all acquisition ids, ascending
    pub fn acquisition_ids(&self) -> Vec<u16> {
        self.graph.acquisition_ids()
    }

    /// Returns one channel per distinct name across all acquisitions,
    /// ordered by record position
    pub fn channels(&self) -> Vec<&Channel> {
        self.graph.channels()
    }

    /// Decodes one channel of one acquisition into an owned raster.
    ///
    /// Reads exactly the acquisition's payload (or, with a sidecar loaded,
    /// just the channel's plane) on every call; nothing is cached. Repeated
    /// calls yield bit-identical rasters. A failure here never affects the
    /// decodability of sibling channels or acquisitions.
    pub fn channel_data(
        &self,
        acquisition: u16,
        channel: &ChannelIdent,
    ) -> Result<ChannelRaster, DecodeError> {
        let acq = self
            .graph
            .acquisition(acquisition)
            .ok_or(DecodeError::NoSuchAcquisition(acquisition))?;
        let ch = acq
            .channel(channel)
            .ok_or_else(|| DecodeError::NoSuchChannel {
                acquisition,
                channel: channel.clone(),
            })?;

        if let Some(sidecar) = &self.sidecar {
            if let Some((entry, plane)) = sidecar.index.plane(acquisition, ch.order()) {
                let mut source = sidecar.source.lock().unwrap();
                match decode::read_channel_plane(&mut *source, entry, plane, acq) {
                    Ok(raster) => return Ok(raster),
                    Err(error) => {
                        debug!(
                            "sidecar read for channel {:?} of acquisition {} failed ({}), \
                             falling back to the container",
                            ch.name(),
                            acquisition,
                            error
                        );
                    }
                }
            }
        }

        let segment = self
            .index
            .locate(SegmentRef::ChannelData { acquisition })?;
        let mut source = self.source.lock().unwrap();
        decode::read_channel_interleaved(&mut *source, segment, acq, ch)
    }

    /// Decodes the embedded preview image of a panorama.
    pub fn panorama_image(&self, panorama: u16) -> Result<RgbaImage, DecodeError> {
        let pan = self
            .graph
            .panorama(panorama)
            .ok_or(DecodeError::NoSuchPanorama(panorama))?;
        let segment = self.index.locate(SegmentRef::PanoramaImage { panorama })?;

        let image = {
            let mut source = self.source.lock().unwrap();
            decode::read_embedded_image(&mut *source, segment, pan.image_format())?
        };

        let (declared_width, declared_height) = pan.dimensions();
        if declared_width != 0 && (declared_width, declared_height) != image.dimensions() {
            debug!(
                "panorama {} declares {}x{} but its image decodes to {}x{}",
                panorama,
                declared_width,
                declared_height,
                image.width(),
                image.height()
            );
        }

        Ok(image)
    }

    /// Decodes the embedded optical image of the whole slide.
    pub fn slide_image(&self, slide: u16) -> Result<RgbaImage, DecodeError> {
        let s = self
            .graph
            .slide(slide)
            .ok_or(DecodeError::NoSuchSlide(slide))?;
        let segment = self.index.locate(SegmentRef::SlideImage { slide })?;

        let mut source = self.source.lock().unwrap();
        decode::read_embedded_image(&mut *source, segment, s.image_format())
    }

    /// Decodes the optical image taken of the region before ablation.
    pub fn before_ablation_image(&self, acquisition: u16) -> Result<RgbaImage, DecodeError> {
        self.ablation_image(acquisition, SegmentRef::BeforeAblationImage { acquisition })
    }

    /// Decodes the optical image taken of the region after ablation.
    pub fn after_ablation_image(&self, acquisition: u16) -> Result<RgbaImage, DecodeError> {
        self.ablation_image(acquisition, SegmentRef::AfterAblationImage { acquisition })
    }

    fn ablation_image(
        &self,
        acquisition: u16,
        reference: SegmentRef,
    ) -> Result<RgbaImage, DecodeError> {
        if self.graph.acquisition(acquisition).is_none() {
            return Err(DecodeError::NoSuchAcquisition(acquisition));
        }
        let segment = self.index.locate(reference)?;

        let mut source = self.source.lock().unwrap();
        // Ablation snapshots are always PNG, independent of software version
        decode::read_embedded_image(&mut *source, segment, crate::meta::ImageKind::Png)
    }

    /// Renders a contrast-normalized single-channel overview of a slide.
    ///
    /// Every acquisition on the slide carrying the channel is decoded and
    /// box-filtered onto a canvas whose longest side is `target_size`,
    /// capped at the acquisitions' native resolution. Values map linearly
    /// from `[0, contrast_max]` to the 8-bit display range and saturate at
    /// both ends. Acquisitions whose payloads fail to decode are skipped
    /// with a warning; the overview fails only when nothing could be drawn.
    pub fn slide_overview(
        &self,
        slide: u16,
        target_size: u32,
        channel: &ChannelIdent,
        contrast_max: f32,
    ) -> Result<GrayImage, DecodeError> {
        if target_size == 0 {
            return Err(DecodeError::InvalidArgument("target_size must be positive"));
        }
        if !(contrast_max > 0.0) {
            return Err(DecodeError::InvalidArgument(
                "contrast_max must be positive",
            ));
        }
        if self.graph.slide(slide).is_none() {
            return Err(DecodeError::NoSuchSlide(slide));
        }

        let mut rasters: Vec<(ChannelRaster, BoundingBox<f64>)> = Vec::new();
        let mut last_error: Option<DecodeError> = None;

        for acquisition in self.graph.acquisitions_of(slide) {
            if acquisition.channel(channel).is_none() {
                continue;
            }

            match self.channel_data(acquisition.id(), channel) {
                Ok(raster) => rasters.push((raster, acquisition.bounding_box())),
                Err(error) => {
                    warn!(
                        "skipping acquisition {} in overview of slide {}: {}",
                        acquisition.id(),
                        slide,
                        error
                    );
                    last_error = Some(error);
                }
            }
        }

        if rasters.is_empty() {
            return Err(last_error.unwrap_or_else(|| DecodeError::ChannelNotOnSlide {
                slide,
                channel: channel.clone(),
            }));
        }

        let planes: Vec<OverlayPlane<'_>> = rasters
            .iter()
            .map(|(raster, bounds)| OverlayPlane {
                raster,
                bounds: *bounds,
            })
            .collect();

        compose::compose_overview(&planes, target_size, contrast_max)
    }
}

impl<R: Read + Seek> fmt::Debug for Mcd<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mcd")
            .field("location", &self.location)
            .field("slides", &self.graph.slide_ids())
            .field("panoramas", &self.graph.panorama_ids())
            .field("acquisitions", &self.graph.acquisition_ids())
            .field("segments", &self.index.len())
            .field("sidecar", &self.sidecar.is_some())
            .finish()
    }
}
