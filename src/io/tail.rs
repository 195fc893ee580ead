//! Locating and decoding the trailing metadata block.
//!
//! An .mcd container stores its XML metadata document UTF-16LE encoded at
//! the very end of the file, after all binary payloads. The block is found
//! by scanning backwards from EOF for the encoded `<MCDSchema` marker, so
//! opening a container never touches the (potentially multi-gigabyte)
//! payload region.

use std::io::{Read, Seek, SeekFrom};

use log::debug;

use crate::error::FormatError;

/// UTF-16LE encoding of `<MCDSchema`
const SCHEMA_MARKER: [u8; 20] = [
    b'<', 0, b'M', 0, b'C', 0, b'D', 0, b'S', 0, b'c', 0, b'h', 0, b'e', 0, b'm', 0, b'a', 0,
];

const SCAN_CHUNK: u64 = 4096;

/// How far from EOF the marker may be. Generous: metadata documents of
/// heavily acquired slides run to a few tens of megabytes.
const MAX_SCAN: u64 = 256 * 1024 * 1024;

#[derive(Debug)]
pub(crate) struct MetadataBlock {
    /// Offset of the block within the container; payloads must end here
    pub offset: u64,
    /// The decoded XML document
    pub xml: String,
}

pub(crate) fn read_trailing_metadata<R: Read + Seek>(
    reader: &mut R,
) -> Result<MetadataBlock, FormatError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < SCHEMA_MARKER.len() as u64 {
        return Err(FormatError::NotAContainer);
    }

    let scan_floor = file_len.saturating_sub(MAX_SCAN);
    let mut pos = file_len;
    // Bytes from the start of the previously scanned chunk, kept so a
    // marker straddling a chunk boundary is still found
    let mut carry: Vec<u8> = Vec::new();

    let marker_at = loop {
        if pos <= scan_floor {
            return Err(FormatError::NotAContainer);
        }

        let chunk_start = pos.saturating_sub(SCAN_CHUNK).max(scan_floor);
        let chunk_len = (pos - chunk_start) as usize;

        let mut buf = vec![0u8; chunk_len + carry.len()];
        reader.seek(SeekFrom::Start(chunk_start))?;
        reader.read_exact(&mut buf[..chunk_len])?;
        buf[chunk_len..].copy_from_slice(&carry);

        if let Some(index) = find_last(&buf, &SCHEMA_MARKER) {
            break chunk_start + index as u64;
        }

        carry.clear();
        carry.extend_from_slice(&buf[..(SCHEMA_MARKER.len() - 1).min(chunk_len)]);
        pos = chunk_start;
    };

    let block_len = file_len - marker_at;
    if block_len % 2 != 0 {
        return Err(FormatError::Truncated("metadata block"));
    }

    debug!(
        "metadata block found at {} ({} bytes)",
        marker_at, block_len
    );

    let mut bytes = vec![0u8; block_len as usize];
    reader.seek(SeekFrom::Start(marker_at))?;
    reader.read_exact(&mut bytes)?;

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let xml = String::from_utf16(&units).map_err(|_| FormatError::MalformedMetadataText)?;

    Ok(MetadataBlock {
        offset: marker_at,
        xml,
    })
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn utf16_bytes(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    #[test]
    fn finds_block_after_binary_payload() {
        let mut container = vec![0xAAu8; 10_000];
        container.extend(utf16_bytes("<MCDSchema><Slide/></MCDSchema>"));

        let block = read_trailing_metadata(&mut Cursor::new(container)).unwrap();
        assert_eq!(block.offset, 10_000);
        assert_eq!(block.xml, "<MCDSchema><Slide/></MCDSchema>");
    }

    #[test]
    fn finds_marker_straddling_a_chunk_boundary() {
        // Make the block long enough that the marker crosses the boundary
        // between the first and second backward scan chunks
        let filler = " ".repeat(2030);
        let xml = format!("<MCDSchema>{}</MCDSchema>", filler);
        let xml_bytes = utf16_bytes(&xml);
        assert_eq!(xml_bytes.len(), SCAN_CHUNK as usize + 10);

        let mut container = vec![0xAAu8; 100];
        container.extend(&xml_bytes);

        let block = read_trailing_metadata(&mut Cursor::new(container)).unwrap();
        assert_eq!(block.offset, 100);
        assert_eq!(block.xml, xml);
    }

    #[test]
    fn missing_marker_is_not_a_container() {
        let container = vec![0u8; 50_000];
        match read_trailing_metadata(&mut Cursor::new(container)) {
            Err(FormatError::NotAContainer) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_file_is_not_a_container() {
        match read_trailing_metadata(&mut Cursor::new(Vec::new())) {
            Err(FormatError::NotAContainer) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn odd_length_block_is_truncated() {
        let mut container = utf16_bytes("<MCDSchema></MCDSchema>");
        container.pop();
        // The marker sits at offset 0; the trailing text is now one byte short
        match read_trailing_metadata(&mut Cursor::new(container)) {
            Err(FormatError::Truncated("metadata block")) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn unpaired_surrogate_is_malformed() {
        let mut container = utf16_bytes("<MCDSchema>");
        container.extend(0xD800u16.to_le_bytes());
        match read_trailing_metadata(&mut Cursor::new(container)) {
            Err(FormatError::MalformedMetadataText) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
