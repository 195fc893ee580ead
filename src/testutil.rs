//! Builders producing synthetic containers with the real byte layout:
//! binary payloads followed by a UTF-16LE XML document at the tail.

use std::fmt::Write as _;
use std::io::Cursor;

use byteorder::{LittleEndian, WriteBytesExt};
use image::{DynamicImage, Rgba, RgbaImage};

use crate::decode::Codec;
use crate::io::dcm::SIDECAR_MAGIC;

/// Encodes a uniformly colored RGBA PNG of the given size.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Assembles container bytes: payloads first, then the metadata document
/// encoded UTF-16LE at the tail.
#[derive(Default)]
pub(crate) struct ContainerBuilder {
    payload: Vec<u8>,
    slides: String,
    panoramas: String,
    rois: String,
    acquisitions: String,
    channels: String,
    next_channel_id: u16,
}

impl ContainerBuilder {
    pub fn new() -> ContainerBuilder {
        ContainerBuilder {
            next_channel_id: 100,
            ..Default::default()
        }
    }

    pub fn slide(&mut self, id: u16, width_um: f64, height_um: f64) -> &mut Self {
        write!(
            self.slides,
            "<Slide><ID>{id}</ID><Description>Slide {id}</Description>\
             <WidthUm>{width_um}</WidthUm><HeightUm>{height_um}</HeightUm>\
             <SwVersion>7.0.5189</SwVersion></Slide>"
        )
        .unwrap();
        self
    }

    /// Adds a panorama; `image` is embedded verbatim when given.
    pub fn panorama(
        &mut self,
        id: u16,
        slide_id: u16,
        bounds_um: (f64, f64, f64, f64),
        dimensions: (u32, u32),
        image: Option<&[u8]>,
    ) -> &mut Self {
        let (min_x, min_y, width, height) = bounds_um;
        let (max_x, max_y) = (min_x + width, min_y + height);

        let offsets = match image {
            Some(bytes) => {
                let start = self.payload.len();
                self.payload.extend_from_slice(bytes);
                format!(
                    "<ImageStartOffset>{}</ImageStartOffset><ImageEndOffset>{}</ImageEndOffset>",
                    start,
                    self.payload.len()
                )
            }
            None => String::new(),
        };

        write!(
            self.panoramas,
            "<Panorama><ID>{id}</ID><SlideID>{slide_id}</SlideID>\
             <Description>Panorama {id}</Description>\
             <SlideX1PosUm>{min_x}</SlideX1PosUm><SlideY1PosUm>{min_y}</SlideY1PosUm>\
             <SlideX2PosUm>{max_x}</SlideX2PosUm><SlideY2PosUm>{min_y}</SlideY2PosUm>\
             <SlideX3PosUm>{max_x}</SlideX3PosUm><SlideY3PosUm>{max_y}</SlideY3PosUm>\
             <SlideX4PosUm>{min_x}</SlideX4PosUm><SlideY4PosUm>{max_y}</SlideY4PosUm>\
             <PixelWidth>{}</PixelWidth><PixelHeight>{}</PixelHeight>\
             <ImageFormat>PNG</ImageFormat>{offsets}</Panorama>",
            dimensions.0, dimensions.1
        )
        .unwrap();
        self
    }

    /// Adds an acquisition with its region record and channels. `records`
    /// holds interleaved values, one per channel per measured pixel; `None`
    /// declares no payload at all.
    pub fn acquisition(
        &mut self,
        id: u16,
        panorama_id: u16,
        bounds_um: (f64, f64, f64, f64),
        dimensions: (u32, u32),
        channels: &[(&str, &str)],
        records: Option<&[f32]>,
    ) -> &mut Self {
        let (min_x, min_y, width_um, height_um) = bounds_um;
        let roi_id = id;

        write!(
            self.rois,
            "<AcquisitionROI><ID>{roi_id}</ID><PanoramaID>{panorama_id}</PanoramaID></AcquisitionROI>"
        )
        .unwrap();

        let offsets = match records {
            Some(values) => {
                let start = self.payload.len();
                for value in values {
                    self.payload.write_f32::<LittleEndian>(*value).unwrap();
                }
                format!(
                    "<DataStartOffset>{}</DataStartOffset><DataEndOffset>{}</DataEndOffset>",
                    start,
                    self.payload.len()
                )
            }
            None => String::new(),
        };

        write!(
            self.acquisitions,
            "<Acquisition><ID>{id}</ID><Description>ROI {id}</Description>\
             <OrderNumber>{id}</OrderNumber><AcquisitionROIID>{roi_id}</AcquisitionROIID>\
             {offsets}<SegmentDataFormat>Float</SegmentDataFormat><ValueBytes>4</ValueBytes>\
             <MaxX>{}</MaxX><MaxY>{}</MaxY>\
             <ROIStartXPosUm>{min_x}</ROIStartXPosUm><ROIStartYPosUm>{min_y}</ROIStartYPosUm>\
             <ROIEndXPosUm>{}</ROIEndXPosUm><ROIEndYPosUm>{}</ROIEndYPosUm>\
             <AblationDistanceBetweenShotsX>1</AblationDistanceBetweenShotsX>\
             <AblationDistanceBetweenShotsY>1</AblationDistanceBetweenShotsY>\
             <StartTimeStamp>2019-10-25T13:01:02+00:00</StartTimeStamp>\
             <EndTimeStamp>2019-10-25T14:01:02+00:00</EndTimeStamp></Acquisition>",
            dimensions.0,
            dimensions.1,
            min_x + width_um,
            min_y + height_um,
        )
        .unwrap();

        for (order, (name, label)) in channels.iter().enumerate() {
            let channel_id = self.next_channel_id;
            self.next_channel_id += 1;
            write!(
                self.channels,
                "<AcquisitionChannel><ID>{channel_id}</ID><ChannelName>{name}</ChannelName>\
                 <OrderNumber>{order}</OrderNumber><AcquisitionID>{id}</AcquisitionID>\
                 <ChannelLabel>{label}</ChannelLabel></AcquisitionChannel>"
            )
            .unwrap();
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let xml = format!(
            "<MCDSchema xmlns=\"http://www.fluidigm.com/IMC/MCDSchema.xsd\">{}{}{}{}{}</MCDSchema>",
            self.slides, self.panoramas, self.rois, self.acquisitions, self.channels
        );

        let mut container = self.payload.clone();
        container.extend(xml.encode_utf16().flat_map(u16::to_le_bytes));
        container
    }
}

/// Interleaves per-channel planes into the pixel-record layout the
/// container stores.
pub(crate) fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let pixels = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut records = Vec::with_capacity(pixels * planes.len());
    for pixel in 0..pixels {
        for plane in planes {
            records.push(plane[pixel]);
        }
    }
    records
}

/// Assembles sidecar bytes. Each entry is
/// `(acquisition id, width, height, valid pixels, codec, planes)`;
/// an empty plane is recorded as absent.
pub(crate) fn sidecar_bytes(
    acquisitions: &[(u16, u32, u32, u32, Codec, &[Vec<f32>])],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&SIDECAR_MAGIC);
    out.write_u16::<LittleEndian>(acquisitions.len() as u16)
        .unwrap();

    let index_at = out.len();
    for _ in acquisitions {
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(0).unwrap();
    }

    let mut table_offsets = Vec::with_capacity(acquisitions.len());
    for (id, width, height, valid_pixels, codec, planes) in acquisitions {
        let mut locations = Vec::with_capacity(planes.len());
        for plane in *planes {
            if plane.is_empty() {
                locations.push((0u64, 0u64, 0u64));
                continue;
            }

            let mut raw = Vec::with_capacity(plane.len() * 4);
            for value in plane {
                raw.write_f32::<LittleEndian>(*value).unwrap();
            }

            let stored = match codec {
                Codec::None => raw.clone(),
                Codec::Lz4 => lz4_flex::compress(&raw),
                Codec::Zlib => {
                    use flate2::write::ZlibEncoder;
                    use std::io::Write;
                    let mut encoder =
                        ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                    encoder.write_all(&raw).unwrap();
                    encoder.finish().unwrap()
                }
            };

            let offset = out.len() as u64;
            out.extend_from_slice(&stored);
            locations.push((offset, stored.len() as u64, raw.len() as u64));
        }

        table_offsets.push((*id, out.len() as u64));
        out.write_u32::<LittleEndian>(*width).unwrap();
        out.write_u32::<LittleEndian>(*height).unwrap();
        out.write_u32::<LittleEndian>(*valid_pixels).unwrap();
        out.push(codec.tag());
        out.write_u16::<LittleEndian>(locations.len() as u16).unwrap();
        for (offset, length, raw_length) in locations {
            out.write_u64::<LittleEndian>(offset).unwrap();
            out.write_u64::<LittleEndian>(length).unwrap();
            out.write_u64::<LittleEndian>(raw_length).unwrap();
        }
    }

    let mut at = index_at;
    for (id, offset) in table_offsets {
        out[at..at + 2].copy_from_slice(&id.to_le_bytes());
        out[at + 2..at + 10].copy_from_slice(&offset.to_le_bytes());
        at += 10;
    }

    out
}
