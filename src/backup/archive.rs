// dbbackup/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use tar::Builder;
use tracing::debug;
use walkdir::WalkDir;

/// Gzips a single raw dump file into `dest_path`.
pub fn gzip_file(source_path: &Path, dest_path: &Path) -> Result<()> {
    let source = File::open(source_path)
        .with_context(|| format!("Failed to open raw dump: {}", source_path.display()))?;
    let dest = File::create(dest_path)
        .with_context(|| format!("Failed to create artifact file: {}", dest_path.display()))?;

    let mut reader = BufReader::new(source);
    let mut encoder = GzEncoder::new(BufWriter::new(dest), Compression::default());
    io::copy(&mut reader, &mut encoder)
        .with_context(|| format!("Failed to compress {} into {}", source_path.display(), dest_path.display()))?;
    let writer = encoder
        .finish()
        .with_context(|| format!("Failed to finish Gzip encoding for: {}", dest_path.display()))?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|file| file.sync_all())
        .with_context(|| format!("Failed to flush artifact file: {}", dest_path.display()))?;

    debug!(source = %source_path.display(), dest = %dest_path.display(), "Gzipped dump");
    Ok(())
}

/// Creates a GZipped TAR archive from the regular files of `source_dir`.
///
/// Paths inside the archive are relative to `source_dir`.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        ));
    }

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!("Failed to create archive file: {}", archive_dest_path.display())
    })?;
    let enc = GzEncoder::new(BufWriter::new(archive_file), Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut entries = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;
        tar_builder.append_path_with_name(path, name).with_context(|| {
            format!("Failed to append file {} as {} to archive", path.display(), name.display())
        })?;
        entries += 1;
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to get inner encoder from tar builder for archive: {}",
            archive_dest_path.display()
        )
    })?;
    let writer = encoder.finish().with_context(|| {
        format!("Failed to finish Gzip encoding for archive: {}", archive_dest_path.display())
    })?;
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|file| file.sync_all())
        .with_context(|| format!("Failed to flush archive file: {}", archive_dest_path.display()))?;

    debug!(archive = %archive_dest_path.display(), entries, "Tar.gz archive created");
    Ok(())
}
