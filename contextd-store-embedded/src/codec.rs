//! On-disk encoding for documents and collection metadata.
//!
//! Documents larger than [`COMPRESS_THRESHOLD_BYTES`] are gzip-compressed
//! on write (spec §6.3: "one file per document (or compressed .gz)");
//! smaller documents are stored as plain `postcard`.

use contextd_core::{CollectionMeta, Document, Error, Result};
use std::io::{Read, Write};

/// Documents whose `postcard` encoding exceeds this many bytes are
/// gzip-compressed before being written to disk.
pub const COMPRESS_THRESHOLD_BYTES: usize = 4096;

/// Encode a document, returning the bytes to write and whether they were
/// gzip-compressed (decides the `.gob` vs `.gob.gz` extension).
pub fn encode_document(doc: &Document) -> Result<(Vec<u8>, bool)> {
    let raw = postcard::to_allocvec(doc).map_err(|e| Error::Validation(e.to_string()))?;
    if raw.len() > COMPRESS_THRESHOLD_BYTES {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw)?;
        Ok((encoder.finish()?, true))
    } else {
        Ok((raw, false))
    }
}

/// Decode a document previously written by [`encode_document`].
pub fn decode_document(bytes: &[u8], compressed: bool) -> Result<Document> {
    if compressed {
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        postcard::from_bytes(&raw).map_err(|e| Error::Validation(e.to_string()))
    } else {
        postcard::from_bytes(bytes).map_err(|e| Error::Validation(e.to_string()))
    }
}

/// Encode collection metadata (never compressed; it is always small).
pub fn encode_meta(meta: &CollectionMeta) -> Result<Vec<u8>> {
    postcard::to_allocvec(meta).map_err(|e| Error::Validation(e.to_string()))
}

/// Decode collection metadata.
pub fn decode_meta(bytes: &[u8]) -> Result<CollectionMeta> {
    postcard::from_bytes(bytes).map_err(|e| Error::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn small_document_round_trips_uncompressed() {
        let doc = Document {
            id: "d1".into(),
            content: "short".into(),
            embedding: vec![0.1, 0.2],
            payload: BTreeMap::new(),
        };
        let (bytes, compressed) = encode_document(&doc).unwrap();
        assert!(!compressed);
        let back = decode_document(&bytes, compressed).unwrap();
        assert_eq!(back.id, doc.id);
        assert_eq!(back.embedding, doc.embedding);
    }

    #[test]
    fn large_document_round_trips_compressed() {
        let doc = Document {
            id: "d2".into(),
            content: "x".repeat(COMPRESS_THRESHOLD_BYTES * 2),
            embedding: vec![0.1; 64],
            payload: BTreeMap::new(),
        };
        let (bytes, compressed) = encode_document(&doc).unwrap();
        assert!(compressed);
        let back = decode_document(&bytes, compressed).unwrap();
        assert_eq!(back.content, doc.content);
    }

    #[test]
    fn meta_round_trips() {
        let meta = CollectionMeta::new("memories", 384);
        let bytes = encode_meta(&meta).unwrap();
        let back = decode_meta(&bytes).unwrap();
        assert_eq!(back.name, meta.name);
        assert_eq!(back.dimension, meta.dimension);
    }
}
