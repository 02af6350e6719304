use std::io::Write;
use std::path::PathBuf;

use crate::checkpoint::archive::{self, ExtractionFilter};
use crate::checkpoint::{CheckpointTask, ExtractedCheckpointSource};
use crate::config::{CheckpointTreeConfig, DisplayOptions};
use crate::prelude::*;
use crate::render::render_tree_view;
use clap::Args;
use tempfile::TempDir;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Checkpoint archives to inspect, rendered in the given order
    #[arg(required = true, value_name = "ARCHIVE")]
    pub archives: Vec<PathBuf>,

    /// Display an overview of the container mounts
    #[arg(short, long)]
    pub mounts: bool,

    /// Display the CRIU dump statistics
    #[arg(short, long)]
    pub stats: bool,

    /// Display the process tree of the checkpointed container
    #[arg(short, long)]
    pub ps_tree: bool,

    /// Display every available section
    #[arg(short = 'A', long)]
    pub all: bool,
}

impl InspectArgs {
    /// Sections requested on the command line.
    pub fn display_options(&self) -> DisplayOptions {
        DisplayOptions {
            mounts: self.mounts || self.all,
            stats: self.stats || self.all,
            ps_tree: self.ps_tree || self.all,
        }
    }
}

fn extraction_filter(options: &DisplayOptions) -> ExtractionFilter {
    ExtractionFilter {
        stats: options.stats,
        images: options.ps_tree,
    }
}

/// Unpack every archive into its own scratch directory and render the tree
/// views to `out`.
///
/// The scratch directories are removed once every tree has been written.
pub async fn inspect_archives<W: Write>(
    archives: &[PathBuf],
    options: &DisplayOptions,
    out: &mut W,
) -> Result<()> {
    for archive_path in archives {
        ensure!(
            archive_path.exists(),
            "checkpoint archive {} does not exist",
            archive_path.display()
        );
    }

    let filter = extraction_filter(options);
    let mut scratch_dirs = Vec::with_capacity(archives.len());
    let mut tasks = Vec::with_capacity(archives.len());
    for archive_path in archives {
        let scratch_dir = tempfile::Builder::new()
            .prefix("checkpoint-tree-")
            .tempdir()
            .context("Failed to create a temporary directory")?;
        archive::extract_metadata(archive_path, scratch_dir.path(), filter)
            .await
            .with_context(|| format!("Failed to extract {}", archive_path.display()))?;

        tasks.push(CheckpointTask::new(scratch_dir.path(), archive_path));
        scratch_dirs.push(scratch_dir);
    }

    render_tree_view(&tasks, &ExtractedCheckpointSource, options, out).await?;

    drop_scratch_dirs(scratch_dirs);
    Ok(())
}

fn drop_scratch_dirs(scratch_dirs: Vec<TempDir>) {
    for scratch_dir in scratch_dirs {
        let path = scratch_dir.path().to_path_buf();
        if let Err(e) = scratch_dir.close() {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

pub async fn run(args: InspectArgs, config: &CheckpointTreeConfig) -> Result<()> {
    let options = config.display.merge(args.display_options());
    debug!("Display options: {options:?}");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    inspect_archives(&args.archives, &options, &mut out).await
}
