//! The ways reading an .mcd container can go wrong.
//!
//! Structural problems ([`FormatError`], [`MetadataError`]) are fatal for
//! the whole open call. Decode problems ([`DecodeError`]) are local to the
//! entity being decoded and never prevent decoding its siblings.

use std::io;

use thiserror::Error;

use crate::io::SegmentRef;
use crate::meta::ChannelIdent;

/// The file is not a valid or complete container. Fatal for the open call.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The file ends before an expected structure could be read
    #[error("file ends before the {0} could be read")]
    Truncated(&'static str),
    /// The trailing metadata block is absent
    #[error("no trailing metadata block found, not an .mcd container")]
    NotAContainer,
    /// The metadata declares a payload outside the file bounds
    #[error("{segment} lies outside the container: bytes {start}..{end} of {limit}")]
    CorruptIndex {
        /// The payload whose declared range is invalid
        segment: SegmentRef,
        /// Declared start offset
        start: u64,
        /// Declared end offset
        end: u64,
        /// Last byte any payload may occupy
        limit: u64,
    },
    /// The metadata block is not valid UTF-16 text
    #[error("metadata block is not valid UTF-16 text")]
    MalformedMetadataText,
    /// An I/O error occurred while reading the container
    #[error("an I/O error occurred while reading the container")]
    Io(#[from] io::Error),
}

/// The embedded XML document is present but malformed or inconsistent.
/// Fatal for the open call.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The XML document could not be parsed
    #[error("malformed metadata XML")]
    Xml(#[from] quick_xml::Error),
    /// A required child element is absent
    #[error("<{element}> is missing required element <{field}>")]
    MissingElement {
        /// The element missing a child
        element: &'static str,
        /// The absent child element
        field: &'static str,
    },
    /// Two entities of the same kind share an identifier
    #[error("duplicate {kind} id {id}")]
    DuplicateId {
        /// Entity kind ("slide", "panorama", ...)
        kind: &'static str,
        /// The repeated identifier
        id: u16,
    },
    /// An entity references a parent that does not exist in the document
    #[error("{kind} {id} references unknown {parent} {parent_id}")]
    DanglingReference {
        /// Kind of the referencing entity
        kind: &'static str,
        /// Identifier of the referencing entity
        id: u16,
        /// Kind of the missing parent
        parent: &'static str,
        /// Identifier the reference points at
        parent_id: i64,
    },
    /// An acquisition declares a non-positive raster geometry
    #[error("acquisition {id} declares invalid raster geometry {width}x{height}")]
    InvalidGeometry {
        /// The acquisition in question
        id: u16,
        /// Declared width in pixels
        width: i64,
        /// Declared height in pixels
        height: i64,
    },
    /// An element's text could not be interpreted
    #[error("cannot parse {value:?} as <{field}> of <{element}>")]
    InvalidValue {
        /// The enclosing element
        element: &'static str,
        /// The field being parsed
        field: &'static str,
        /// The offending text
        value: String,
    },
}

/// A specific entity's payload is absent or cannot be decoded. Local to
/// that entity; sibling entities remain decodable.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Metadata declares the entity but the container holds no payload for
    /// it. Legitimate for partially acquired runs.
    #[error("no data recorded for {0}")]
    MissingData(SegmentRef),
    /// The payload holds more pixel records than the declared geometry
    #[error("acquisition {acquisition} holds {actual} pixel records but declares {expected}")]
    SizeMismatch {
        /// The acquisition whose payload disagrees with its geometry
        acquisition: u16,
        /// Pixel count implied by the declared geometry
        expected: usize,
        /// Pixel count implied by the payload
        actual: usize,
    },
    /// A compressed payload failed to decompress
    #[error("failed to decompress {segment}: {reason}")]
    Corrupt {
        /// The payload being decompressed
        segment: SegmentRef,
        /// Codec-level failure description
        reason: String,
    },
    /// A payload is stored with a compression codec this build does not know
    #[error("unsupported compression codec tag {0}")]
    UnsupportedCodec(u8),
    /// A channel payload is stored in a value format this build does not know
    #[error("unsupported channel value format {0}")]
    UnsupportedValueFormat(String),
    /// An embedded optical image failed to decode
    #[error("failed to decode embedded image")]
    Image(#[from] image::ImageError),
    /// The acquisition has no channel matching the identifier
    #[error("no channel matching {channel} in acquisition {acquisition}")]
    NoSuchChannel {
        /// The acquisition searched
        acquisition: u16,
        /// The identifier that failed to match
        channel: ChannelIdent,
    },
    /// No acquisition on the slide carries the requested channel
    #[error("no acquisition of slide {slide} carries a channel matching {channel}")]
    ChannelNotOnSlide {
        /// The slide searched
        slide: u16,
        /// The identifier that failed to match
        channel: ChannelIdent,
    },
    /// No acquisition with the given id
    #[error("no acquisition with id {0}")]
    NoSuchAcquisition(u16),
    /// No slide with the given id
    #[error("no slide with id {0}")]
    NoSuchSlide(u16),
    /// No panorama with the given id
    #[error("no panorama with id {0}")]
    NoSuchPanorama(u16),
    /// A caller-supplied parameter is out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// An I/O error occurred while reading the payload
    #[error("an I/O error occurred while decoding")]
    Io(#[from] io::Error),
}

/// Union of everything that can fail while opening a container.
#[derive(Debug, Error)]
pub enum McdError {
    /// The file structure is invalid
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The embedded metadata is invalid
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// A decode operation failed
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<io::Error> for McdError {
    fn from(err: io::Error) -> McdError {
        McdError::Format(FormatError::Io(err))
    }
}
