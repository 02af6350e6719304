mod builder;
mod enrich;

pub use builder::{FALLBACK_ROOT_LABEL, build_tree};
pub use enrich::{add_dump_stats_to_tree, add_mounts_to_tree, add_process_tree_to_tree};

use std::io::Write;

use crate::checkpoint::{CheckpointSource, CheckpointTask};
use crate::config::DisplayOptions;
use crate::prelude::*;
use crate::tree::DisplayTree;

/// Retrieve the facts of one checkpoint and compose its full tree.
///
/// Mounts, dump statistics and the process tree are only fetched when the
/// matching option is enabled, and are appended in that order.
pub async fn build_checkpoint_tree<S>(
    task: &CheckpointTask,
    source: &S,
    options: &DisplayOptions,
) -> Result<DisplayTree>
where
    S: CheckpointSource + ?Sized,
{
    let facts = source
        .container_facts(task)
        .await
        .context("failed to get container information")?;
    let sizes = source
        .archive_sizes(task)
        .await
        .context("failed to get archive sizes")?;

    let mut tree = build_tree(&facts, &sizes);

    if options.mounts {
        let mounts = source.mounts(task).await.context("failed to get mounts")?;
        add_mounts_to_tree(&mut tree, &mounts);
    }

    if options.stats {
        let stats = source
            .dump_stats(task)
            .await
            .context("failed to get dump statistics")?;
        add_dump_stats_to_tree(&mut tree, &stats);
    }

    if options.ps_tree {
        let ps_tree = source
            .process_tree(task)
            .await
            .context("failed to get process tree")?;
        add_process_tree_to_tree(&mut tree, &ps_tree)?;
    }

    Ok(tree)
}

/// Render every task in order, writing a header and the tree for each.
///
/// Processing stops at the first checkpoint that fails; nothing is written
/// for it.
pub async fn render_tree_view<S, W>(
    tasks: &[CheckpointTask],
    source: &S,
    options: &DisplayOptions,
    out: &mut W,
) -> Result<()>
where
    S: CheckpointSource + ?Sized,
    W: Write,
{
    for task in tasks {
        debug!("Building tree view for {}", task.archive_path().display());
        let tree = build_checkpoint_tree(task, source, options)
            .await
            .with_context(|| {
                format!(
                    "failed to inspect checkpoint {}",
                    task.archive_path().display()
                )
            })?;

        write!(
            out,
            "\nDisplaying container checkpoint tree view from {}\n\n",
            task.archive_path().display()
        )?;
        writeln!(out, "{tree}")?;
    }
    out.flush()?;

    Ok(())
}
