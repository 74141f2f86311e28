//! Portable package archive.
//!
//! An archive is a zip container holding a manifest (dependency key →
//! payload files, id types and dbms infos), an archive-info document and
//! one blob per payload file at `<dependency key>/<file name>`.

pub mod info;
pub mod manifest;
pub mod store;

pub use info::{ARCHIVE_FORMAT_VERSION, ArchiveDetail, ArchiveInfo};
pub use manifest::{
    ARCHIVE_INFO_PATH, ARCHIVE_MANIFEST_PATH, ArchiveFile, ArchiveManifest, CONFIG_DIR, DbmsInfo,
    FileType, ManifestEntry, PayloadFile,
};
pub use store::{Archive, ArchiveMode};
