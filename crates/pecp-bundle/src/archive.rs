//! # Archive Codec
//!
//! Writes a bundle as a gzip-compressed tar stream: `data.json` first, then
//! one entry per file in caller order. Headers are normalized (mtime 0,
//! uid/gid 0, mode 0644) so identical inputs produce identical bytes.
//!
//! Writing happens entirely into an in-memory buffer. Any failure drops the
//! buffer, so a partial archive is never handed back.

use std::io::{Cursor, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use serde::Serialize;
use tar::{Builder, Header};
use thiserror::Error;

/// Name of the manifest entry.
pub const MANIFEST_ENTRY: &str = "data.json";

/// Archive encode/decode failure.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The manifest could not be serialized.
    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Writing or reading the tar/gzip stream failed.
    #[error("archive I/O failed at {path:?}: {source}")]
    Io {
        /// Entry being processed when the failure occurred.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Decoded archive does not start with the manifest entry.
    #[error("archive does not start with {MANIFEST_ENTRY}")]
    MissingManifest,
}

impl From<ArchiveError> for pecp_core::PlaneError {
    fn from(err: ArchiveError) -> Self {
        pecp_core::PlaneError::technical_with(
            pecp_core::codes::BUNDLE_GENERATION,
            "Error generating bundle",
            err.to_string(),
        )
    }
}

/// One file inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, e.g. `policies/finance.rego`.
    pub path: String,
    /// Raw bytes.
    pub content: Vec<u8>,
}

impl ArchiveEntry {
    /// Convenience constructor.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

fn io_at(path: &str) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_string(),
        source,
    }
}

fn deterministic_builder(buffer: Vec<u8>) -> Builder<GzEncoder<Vec<u8>>> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(buffer, Compression::default());
    let mut tar = Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);
    tar
}

fn append<W: Write>(tar: &mut Builder<W>, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    // append_data writes a GNU long-name record for paths over 100 bytes.
    tar.append_data(&mut header, path, data).map_err(io_at(path))
}

/// Encode `manifest` and `entries` into a `.tar.gz` byte stream.
pub fn write_archive<M: Serialize + ?Sized>(
    manifest: &M,
    entries: &[ArchiveEntry],
) -> Result<Vec<u8>, ArchiveError> {
    let manifest_bytes = serde_json::to_vec(manifest)?;

    let mut tar = deterministic_builder(Vec::new());
    append(&mut tar, MANIFEST_ENTRY, &manifest_bytes)?;
    for entry in entries {
        append(&mut tar, &entry.path, &entry.content)?;
    }

    let encoder = tar.into_inner().map_err(io_at("<tar trailer>"))?;
    encoder.finish().map_err(io_at("<gzip trailer>"))
}

/// Decode a `.tar.gz` stream into its entries, in archive order.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let decoder = GzDecoder::new(Cursor::new(bytes));
    let mut archive = tar::Archive::new(decoder);

    let mut out = Vec::new();
    for entry in archive.entries().map_err(io_at("<archive>"))? {
        let mut entry = entry.map_err(io_at("<entry>"))?;
        let path = entry
            .path()
            .map_err(io_at("<path>"))?
            .to_string_lossy()
            .into_owned();
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content).map_err(io_at(&path))?;
        out.push(ArchiveEntry { path, content });
    }
    Ok(out)
}

/// Decode a `.tar.gz` stream and split off its manifest.
pub fn read_bundle(bytes: &[u8]) -> Result<(serde_json::Value, Vec<ArchiveEntry>), ArchiveError> {
    let mut entries = read_archive(bytes)?;
    if entries.first().map(|e| e.path.as_str()) != Some(MANIFEST_ENTRY) {
        return Err(ArchiveError::MissingManifest);
    }
    let manifest_entry = entries.remove(0);
    let manifest = serde_json::from_slice(&manifest_entry.content)?;
    Ok((manifest, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_is_first_entry() {
        let bytes = write_archive(
            &json!({"bindings": [], "entitlements": [], "resource_types": []}),
            &[ArchiveEntry::new("policies/a.rego", "package a")],
        )
        .unwrap();
        let entries = read_archive(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "data.json");
        assert_eq!(entries[1].path, "policies/a.rego");
        assert_eq!(entries[1].content, b"package a");
    }

    #[test]
    fn empty_entry_list_yields_manifest_only() {
        let bytes = write_archive(&json!({"bindings": []}), &[]).unwrap();
        let (manifest, rest) = read_bundle(&bytes).unwrap();
        assert_eq!(manifest, json!({"bindings": []}));
        assert!(rest.is_empty());
    }

    #[test]
    fn output_is_gzip() {
        let bytes = write_archive(&json!({}), &[]).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let entries = vec![ArchiveEntry::new("policies/a.rego", "package a")];
        let a = write_archive(&json!({"k": 1}), &entries).unwrap();
        let b = write_archive(&json!({"k": 1}), &entries).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn long_paths_survive() {
        let path = format!("policies/{}.rego", "x".repeat(150));
        let bytes = write_archive(&json!({}), &[ArchiveEntry::new(path.clone(), "p")]).unwrap();
        let entries = read_archive(&bytes).unwrap();
        assert_eq!(entries[1].path, path);
    }

    #[test]
    fn corrupt_input_is_an_error() {
        assert!(read_archive(b"definitely not gzip").is_err());
    }

    #[test]
    fn archive_error_maps_to_technical() {
        let err: pecp_core::PlaneError = ArchiveError::MissingManifest.into();
        assert_eq!(err.category(), pecp_core::ErrorCategory::Technical);
        assert_eq!(err.code(), "TECH_001");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn policy_bytes_round_trip_exactly(
                contents in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..512), 0..6)
            ) {
                let entries: Vec<ArchiveEntry> = contents
                    .iter()
                    .enumerate()
                    .map(|(i, c)| ArchiveEntry::new(format!("policies/p{i}.rego"), c.clone()))
                    .collect();
                let bytes = write_archive(&json!({"bindings": []}), &entries).unwrap();
                let (_, decoded) = read_bundle(&bytes).unwrap();
                prop_assert_eq!(decoded, entries);
            }
        }
    }
}
