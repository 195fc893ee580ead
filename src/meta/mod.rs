//! The typed entity graph parsed from a container's embedded XML document.
//!
//! All entities live in one owning [`EntityGraph`] arena and refer to each
//! other by id, so any entity is cheaply reachable without traversing the
//! hierarchy and no reference cycles exist. The graph is immutable once
//! built and safe to query from any number of threads.

mod acquisition;
mod builder;
mod channel;
mod panorama;
mod slide;

pub use acquisition::{Acquisition, ValueFormat};
pub use channel::{Channel, ChannelIdent};
pub use panorama::Panorama;
pub use slide::Slide;

use indexmap::IndexMap;

use crate::error::MetadataError;

/// A declared byte range within the container, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    /// Builds a span from raw declared offsets. Absent, inverted or
    /// zero-length declarations mean "nothing recorded".
    pub(crate) fn from_offsets(start: Option<i64>, end: Option<i64>) -> Option<ByteSpan> {
        match (start, end) {
            (Some(start), Some(end)) if start >= 0 && end > start => Some(ByteSpan {
                start: start as u64,
                end: end as u64,
            }),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Encoding of an embedded optical image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageKind {
    /// Portable Network Graphics
    #[default]
    Png,
    /// JPEG/JFIF
    Jpeg,
}

impl ImageKind {
    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// The entity graph of one container: every slide, panorama, acquisition
/// and channel the embedded document declares.
#[derive(Debug, Default)]
pub struct EntityGraph {
    pub(crate) slides: IndexMap<u16, Slide>,
    pub(crate) panoramas: IndexMap<u16, Panorama>,
    pub(crate) acquisitions: IndexMap<u16, Acquisition>,
}

impl EntityGraph {
    /// Parses and validates the embedded XML document.
    pub fn build(xml: &str) -> Result<EntityGraph, MetadataError> {
        builder::parse(xml)
    }

    /// Returns the slide with the given id, or `None` if no such slide exists
    pub fn slide(&self, id: u16) -> Option<&Slide> {
        self.slides.get(&id)
    }

    /// Returns the panorama with the given id, or `None` if no such
    /// panorama exists
    pub fn panorama(&self, id: u16) -> Option<&Panorama> {
        self.panoramas.get(&id)
    }

    /// Returns the acquisition with the given id, or `None` if no such
    /// acquisition exists
    pub fn acquisition(&self, id: u16) -> Option<&Acquisition> {
        self.acquisitions.get(&id)
    }

    /// Returns all slide ids, ascending
    pub fn slide_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.slides.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns all panorama ids, ascending
    pub fn panorama_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.panoramas.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns all acquisition ids, ascending. Every id the document
    /// declares appears exactly once.
    pub fn acquisition_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.acquisitions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns references to all slides, ordered by id
    pub fn slides(&self) -> Vec<&Slide> {
        self.slide_ids()
            .into_iter()
            .map(|id| &self.slides[&id])
            .collect()
    }

    /// Returns references to all panoramas, ordered by id
    pub fn panoramas(&self) -> Vec<&Panorama> {
        self.panorama_ids()
            .into_iter()
            .map(|id| &self.panoramas[&id])
            .collect()
    }

    /// Returns references to all acquisitions, ordered by id
    pub fn acquisitions(&self) -> Vec<&Acquisition> {
        self.acquisition_ids()
            .into_iter()
            .map(|id| &self.acquisitions[&id])
            .collect()
    }

    /// Returns the panoramas scanned on one slide, ordered by id
    pub fn panoramas_of(&self, slide_id: u16) -> Vec<&Panorama> {
        self.panoramas()
            .into_iter()
            .filter(|p| p.slide_id() == slide_id)
            .collect()
    }

    /// Returns the acquisitions within one panorama, ordered by id
    pub fn acquisitions_in(&self, panorama_id: u16) -> Vec<&Acquisition> {
        self.acquisitions()
            .into_iter()
            .filter(|a| a.panorama_id() == panorama_id)
            .collect()
    }

    /// Returns the acquisitions performed on one slide, ordered by id
    pub fn acquisitions_of(&self, slide_id: u16) -> Vec<&Acquisition> {
        let panoramas: Vec<u16> = self
            .panoramas_of(slide_id)
            .into_iter()
            .map(|p| p.id())
            .collect();

        self.acquisitions()
            .into_iter()
            .filter(|a| panoramas.contains(&a.panorama_id()))
            .collect()
    }

    /// Returns one channel per distinct name across all acquisitions,
    /// ordered by record position.
    pub fn channels(&self) -> Vec<&Channel> {
        let mut seen: IndexMap<&str, &Channel> = IndexMap::new();

        for acquisition in self.acquisitions.values() {
            for channel in acquisition.channels() {
                seen.entry(channel.name()).or_insert(channel);
            }
        }

        let mut channels: Vec<&Channel> = seen.into_values().collect();
        channels.sort_by_key(|c| c.order());
        channels
    }
}
