//! Optional subtrees appended below the root of a checkpoint tree.

use crate::checkpoint::{DumpStats, MAX_PROCESS_TREE_DEPTH, MountEntry, ProcessNode};
use crate::prelude::*;
use crate::tree::DisplayTree;

pub fn add_mounts_to_tree(tree: &mut DisplayTree, mounts: &[MountEntry]) {
    let mounts_tree = tree.add_branch("Overview of Mounts");
    for mount in mounts {
        let mount_tree = mounts_tree.add_branch(format!("Destination: {}", mount.destination));
        mount_tree.add_branch(format!("Type: {}", mount.mount_type));
        mount_tree.add_branch(format!("Source: {}", mount.source));
    }
}

/// The page counters keep the `us` suffix of the timing counters so the
/// output stays identical to what checkpoint tooling already prints.
pub fn add_dump_stats_to_tree(tree: &mut DisplayTree, stats: &DumpStats) {
    let stats_tree = tree.add_branch("CRIU dump statistics");
    stats_tree.add_branch(format!("Freezing Time: {} us", stats.freezing_time));
    stats_tree.add_branch(format!("Frozen Time: {} us", stats.frozen_time));
    stats_tree.add_branch(format!("Memdump Time: {} us", stats.memdump_time));
    stats_tree.add_branch(format!("Memwrite Time: {} us", stats.memwrite_time));
    stats_tree.add_branch(format!("Pages Scanned: {} us", stats.pages_scanned));
    stats_tree.add_branch(format!("Pages Written: {} us", stats.pages_written));
}

fn add_process_node(tree: &mut DisplayTree, process: &ProcessNode, depth: usize) -> Result<()> {
    ensure!(
        depth < MAX_PROCESS_TREE_DEPTH,
        "process tree exceeds the maximum depth of {MAX_PROCESS_TREE_DEPTH}"
    );
    let node = tree.add_meta_branch(process.pid, process.comm.as_str());
    for child in &process.children {
        add_process_node(node, child, depth + 1)?;
    }
    Ok(())
}

/// Mirror the process hierarchy under a `Process tree` branch, one meta
/// branch `(pid, comm)` per process, depth first.
pub fn add_process_tree_to_tree(tree: &mut DisplayTree, root: &ProcessNode) -> Result<()> {
    let ps_tree = tree.add_branch("Process tree");
    add_process_node(ps_tree, root, 0)
}
