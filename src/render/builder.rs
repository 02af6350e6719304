use crate::checkpoint::{ArchiveSizes, ContainerFacts};
use crate::helpers::format_size;
use crate::tree::DisplayTree;

/// Root label used when the container has no name.
pub const FALLBACK_ROOT_LABEL: &str = "Container";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Build the root of a checkpoint tree with its informational branches.
pub fn build_tree(facts: &ContainerFacts, sizes: &ArchiveSizes) -> DisplayTree {
    let root_label = if facts.name.is_empty() {
        FALLBACK_ROOT_LABEL
    } else {
        facts.name.as_str()
    };
    let mut tree = DisplayTree::new(root_label);

    tree.add_branch(format!("Image: {}", facts.image));
    tree.add_branch(format!("ID: {}", facts.id));
    tree.add_branch(format!("Runtime: {}", facts.runtime));
    tree.add_branch(format!("Created: {}", facts.created));
    tree.add_branch(format!("Engine: {}", facts.engine));

    if let Some(ip) = non_empty(&facts.ip) {
        tree.add_branch(format!("IP: {ip}"));
    }
    if let Some(mac) = non_empty(&facts.mac) {
        tree.add_branch(format!("MAC: {mac}"));
    }

    tree.add_branch(format!(
        "Checkpoint Size: {}",
        format_size(sizes.checkpoint_size)
    ));

    if sizes.root_fs_diff_size != 0 {
        tree.add_branch(format!(
            "Root Fs Diff Size: {}",
            format_size(sizes.root_fs_diff_size)
        ));
    }

    tree
}
