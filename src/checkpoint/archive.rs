use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::GzipDecoder;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_tar::Archive;

use super::ArchiveSizes;
use crate::prelude::*;

pub const CONFIG_DUMP_FILE: &str = "config.dump";
pub const SPEC_DUMP_FILE: &str = "spec.dump";
pub const NETWORK_STATUS_FILE: &str = "network.status";
pub const CONTAINERD_STATUS_FILE: &str = "status";
pub const STATS_DUMP_FILE: &str = "stats-dump";
pub const CHECKPOINT_DIRECTORY: &str = "checkpoint";
pub const ROOTFS_DIFF_TAR: &str = "rootfs-diff.tar";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

type ArchiveReader = Box<dyn AsyncRead + Unpin + Send>;

/// Which optional parts of the archive to unpack besides the container
/// metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionFilter {
    pub stats: bool,
    pub images: bool,
}

impl ExtractionFilter {
    fn wants(&self, path: &str) -> bool {
        match path {
            CONFIG_DUMP_FILE | SPEC_DUMP_FILE | NETWORK_STATUS_FILE | CONTAINERD_STATUS_FILE => {
                true
            }
            STATS_DUMP_FILE => self.stats,
            _ => self.images && is_under(path, CHECKPOINT_DIRECTORY),
        }
    }
}

/// Tar member names may start with `./`.
fn normalize(path: &Path) -> String {
    let path = path.to_string_lossy();
    path.strip_prefix("./").unwrap_or(&path).to_owned()
}

fn is_under(path: &str, directory: &str) -> bool {
    path.strip_prefix(directory)
        .is_some_and(|rest| rest.starts_with('/'))
}

async fn open_archive(archive_path: &Path) -> Result<Archive<ArchiveReader>> {
    let file = File::open(archive_path)
        .await
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader.fill_buf().await?.starts_with(&GZIP_MAGIC);

    let reader: ArchiveReader = if is_gzip {
        debug!("Reading {} as a gzip compressed archive", archive_path.display());
        Box::new(GzipDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    Ok(Archive::new(reader))
}

/// Unpack the metadata files of a checkpoint archive into `output_dir`.
///
/// Returns the archive-relative paths that were extracted.
pub async fn extract_metadata(
    archive_path: &Path,
    output_dir: &Path,
    filter: ExtractionFilter,
) -> Result<Vec<PathBuf>> {
    let mut archive = open_archive(archive_path).await?;
    let mut entries = archive.entries()?;
    let mut extracted = Vec::new();
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    while let Some(entry) = entries.next().await {
        let mut entry = entry
            .with_context(|| format!("Failed to read archive {}", archive_path.display()))?;
        let path = normalize(&entry.path()?);
        if !filter.wants(&path) {
            continue;
        }

        entry.unpack_in(output_dir).await.with_context(|| {
            format!(
                "Failed to extract {path} from {}",
                archive_path.display()
            )
        })?;
        trace!("Extracted {path}");
        extracted.push(PathBuf::from(path));
    }

    debug!(
        "Extracted {} files from {} to {}",
        extracted.len(),
        archive_path.display(),
        output_dir.display()
    );
    Ok(extracted)
}

/// Sum the sizes of the CRIU images and read the size of the rootfs diff.
pub async fn archive_sizes(archive_path: &Path) -> Result<ArchiveSizes> {
    let mut archive = open_archive(archive_path).await?;
    let mut entries = archive.entries()?;
    let mut sizes = ArchiveSizes::default();

    while let Some(entry) = entries.next().await {
        let entry = entry
            .with_context(|| format!("Failed to read archive {}", archive_path.display()))?;
        let header = entry.header();
        if !header.entry_type().is_file() {
            continue;
        }

        let path = normalize(&entry.path()?);
        if is_under(&path, CHECKPOINT_DIRECTORY) {
            sizes.checkpoint_size += header.size()?;
        } else if path == ROOTFS_DIFF_TAR {
            sizes.root_fs_diff_size = header.size()?;
        }
    }

    Ok(sizes)
}
