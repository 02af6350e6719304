//! Facts about a checkpoint and the collaborators that retrieve them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::prelude::*;

pub mod archive;
pub mod criu;
pub mod metadata;
mod source;

pub use source::ExtractedCheckpointSource;

/// Deepest process hierarchy that will be assembled or rendered.
pub const MAX_PROCESS_TREE_DEPTH: usize = 1024;

/// One checkpoint to render: the directory its metadata was extracted to and
/// the archive it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTask {
    output_dir: PathBuf,
    archive_path: PathBuf,
}

impl CheckpointTask {
    pub fn new(output_dir: impl Into<PathBuf>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            archive_path: archive_path.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFacts {
    pub name: String,
    pub image: String,
    pub id: String,
    pub runtime: String,
    pub created: String,
    pub engine: String,
    pub ip: Option<String>,
    pub mac: Option<String>,
}

/// Sizes in bytes. A `root_fs_diff_size` of zero means the archive has no
/// rootfs diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSizes {
    pub checkpoint_size: u64,
    pub root_fs_diff_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountEntry {
    pub destination: String,
    pub mount_type: String,
    pub source: String,
}

/// Counters reported by CRIU for the dump, times in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub freezing_time: u32,
    pub frozen_time: u32,
    pub memdump_time: u32,
    pub memwrite_time: u32,
    pub pages_scanned: u64,
    pub pages_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessNode {
    pub pid: u32,
    pub comm: String,
    pub children: Vec<ProcessNode>,
}

impl ProcessNode {
    pub fn new(pid: u32, comm: impl Into<String>) -> Self {
        Self {
            pid,
            comm: comm.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ProcessNode>) -> Self {
        self.children = children;
        self
    }

    /// Number of processes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ProcessNode::count).sum::<usize>()
    }
}

/// Where the orchestrator gets its facts from.
#[async_trait]
pub trait CheckpointSource {
    async fn container_facts(&self, task: &CheckpointTask) -> Result<ContainerFacts>;

    async fn archive_sizes(&self, task: &CheckpointTask) -> Result<ArchiveSizes>;

    async fn mounts(&self, task: &CheckpointTask) -> Result<Vec<MountEntry>>;

    async fn dump_stats(&self, task: &CheckpointTask) -> Result<DumpStats>;

    async fn process_tree(&self, task: &CheckpointTask) -> Result<ProcessNode>;
}
