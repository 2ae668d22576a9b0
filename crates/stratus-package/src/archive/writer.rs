//! Zip serialisation of collected entries.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PackageError, PackageResult};

use super::walk::{EntrySource, SourceEntry};
use super::ArchivePackage;

/// Write `entries` in key order into an anonymous temporary file.
pub(super) fn write_package(entries: &BTreeMap<String, SourceEntry>) -> PackageResult<ArchivePackage> {
    let file = tempfile::tempfile()?;
    let mut zip = ZipWriter::new(file);

    for entry in entries.values() {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(entry.mode)
            .last_modified_time(zip_time(entry.modified));

        let name = entry.relative_path.as_str();
        match &entry.source {
            EntrySource::Link(target) => {
                zip.add_symlink(name, target.as_str(), options)
                    .map_err(|source| PackageError::Entry {
                        name: name.to_owned(),
                        source,
                    })?;
            }
            EntrySource::File(path) => {
                let mut reader = File::open(path).map_err(|source| PackageError::Read {
                    path: path.clone(),
                    source,
                })?;
                zip.start_file(name, options)
                    .map_err(|source| PackageError::Entry {
                        name: name.to_owned(),
                        source,
                    })?;
                std::io::copy(&mut reader, &mut zip).map_err(|source| PackageError::Read {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        debug!(
            mode = format!("{:o}", entry.mode),
            symlink = entry.is_symlink(),
            name,
            "added entry"
        );
    }

    let mut file = zip.finish().map_err(|source| PackageError::Entry {
        name: "central directory".to_owned(),
        source,
    })?;
    file.seek(SeekFrom::Start(0))?;
    let size = file.metadata()?.len();

    info!(bytes = size, entries = entries.len(), "zip archive written");

    Ok(ArchivePackage::new(file, size, entries.keys().cloned().collect()))
}

/// Zip timestamps have two-second resolution and start in 1980; anything
/// outside that range falls back to the format's epoch.
fn zip_time(time: SystemTime) -> zip::DateTime {
    let time: DateTime<Utc> = time.into();
    let parts = (
        u16::try_from(time.year()),
        u8::try_from(time.month()),
        u8::try_from(time.day()),
        u8::try_from(time.hour()),
        u8::try_from(time.minute()),
        u8::try_from(time.second()),
    );
    match parts {
        (Ok(year), Ok(month), Ok(day), Ok(hour), Ok(minute), Ok(second)) => {
            zip::DateTime::from_date_and_time(year, month, day, hour, minute, second)
                .unwrap_or_default()
        }
        _ => zip::DateTime::default(),
    }
}
