//! Reader for the CRIU image files needed by the tree view.
//!
//! An image is a magic header followed by length-prefixed protobuf entries.
//! Only the messages and fields that are displayed are declared here; prost
//! skips every other field.

use std::collections::HashMap;
use std::path::Path;

use prost::Message;

use super::{DumpStats, MAX_PROCESS_TREE_DEPTH, ProcessNode};
use crate::prelude::*;

pub const IMG_COMMON_MAGIC: u32 = 0x5456_4319;
pub const IMG_SERVICE_MAGIC: u32 = 0x5510_5940;
pub const STATS_MAGIC: u32 = 0x5709_3306;
pub const PSTREE_MAGIC: u32 = 0x5027_3030;
pub const CORE_MAGIC: u32 = 0x5505_3847;

pub const PSTREE_IMAGE: &str = "pstree.img";

#[derive(Clone, PartialEq, Message)]
pub struct StatsEntry {
    #[prost(message, optional, tag = "1")]
    pub dump: Option<DumpStatsEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DumpStatsEntry {
    #[prost(uint32, required, tag = "1")]
    pub freezing_time: u32,
    #[prost(uint32, required, tag = "2")]
    pub frozen_time: u32,
    #[prost(uint32, required, tag = "3")]
    pub memdump_time: u32,
    #[prost(uint32, required, tag = "4")]
    pub memwrite_time: u32,
    #[prost(uint64, required, tag = "5")]
    pub pages_scanned: u64,
    #[prost(uint64, required, tag = "6")]
    pub pages_skipped_parent: u64,
    #[prost(uint64, required, tag = "7")]
    pub pages_written: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct PstreeEntry {
    #[prost(uint32, required, tag = "1")]
    pub pid: u32,
    #[prost(uint32, required, tag = "2")]
    pub ppid: u32,
    #[prost(uint32, required, tag = "3")]
    pub pgid: u32,
    #[prost(uint32, required, tag = "4")]
    pub sid: u32,
    #[prost(uint32, repeated, packed = "false", tag = "5")]
    pub threads: Vec<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CoreEntry {
    #[prost(message, optional, tag = "3")]
    pub tc: Option<TaskCoreEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TaskCoreEntry {
    #[prost(string, required, tag = "6")]
    pub comm: String,
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Check the magic header of an image and return its entries.
pub fn decode_image<M: Message + Default>(data: &[u8], expected_magic: u32) -> Result<Vec<M>> {
    let mut offset = 0;
    let mut magic = read_u32(data, offset).context("Image is too short to hold a magic")?;
    offset += 4;
    if magic == IMG_COMMON_MAGIC || magic == IMG_SERVICE_MAGIC {
        magic = read_u32(data, offset).context("Image is too short to hold a magic")?;
        offset += 4;
    }
    ensure!(
        magic == expected_magic,
        "Unexpected image magic {magic:#010x}, expected {expected_magic:#010x}"
    );

    let mut entries = Vec::new();
    while offset < data.len() {
        let size = read_u32(data, offset)
            .with_context(|| format!("Truncated entry size at offset {offset}"))?
            as usize;
        offset += 4;
        let payload = data
            .get(offset..offset + size)
            .with_context(|| format!("Truncated entry at offset {offset}, expected {size} bytes"))?;
        entries.push(M::decode(payload)?);
        offset += size;
    }

    Ok(entries)
}

fn read_image<M: Message + Default>(path: &Path, expected_magic: u32) -> Result<Vec<M>> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_image(&data, expected_magic)
        .with_context(|| format!("Failed to decode {}", path.display()))
}

/// Read the dump counters from a `stats-dump` image.
pub fn read_dump_stats(path: &Path) -> Result<DumpStats> {
    let entry = read_image::<StatsEntry>(path, STATS_MAGIC)?
        .into_iter()
        .next()
        .with_context(|| format!("{} holds no entry", path.display()))?;
    let dump = entry
        .dump
        .with_context(|| format!("{} holds no dump statistics", path.display()))?;

    Ok(DumpStats {
        freezing_time: dump.freezing_time,
        frozen_time: dump.frozen_time,
        memdump_time: dump.memdump_time,
        memwrite_time: dump.memwrite_time,
        pages_scanned: dump.pages_scanned,
        pages_written: dump.pages_written,
    })
}

fn read_comm(images_dir: &Path, pid: u32) -> Result<String> {
    let path = images_dir.join(format!("core-{pid}.img"));
    let core = read_image::<CoreEntry>(&path, CORE_MAGIC)?
        .into_iter()
        .next()
        .with_context(|| format!("{} holds no entry", path.display()))?;
    let task = core
        .tc
        .with_context(|| format!("{} holds no task core", path.display()))?;
    Ok(task.comm)
}

/// Rebuild the process hierarchy from `pstree.img` and the core images in
/// `images_dir`.
pub fn read_process_tree(images_dir: &Path) -> Result<ProcessNode> {
    let entries = read_image::<PstreeEntry>(&images_dir.join(PSTREE_IMAGE), PSTREE_MAGIC)?;
    let processes = entries
        .iter()
        .map(|entry| Ok((entry.pid, entry.ppid, read_comm(images_dir, entry.pid)?)))
        .collect::<Result<Vec<_>>>()?;
    assemble_process_tree(&processes)
}

/// Build the owned hierarchy from `(pid, ppid, comm)` triples in image
/// order. Children keep the order in which they appear.
pub(crate) fn assemble_process_tree(processes: &[(u32, u32, String)]) -> Result<ProcessNode> {
    let mut root = None;
    let mut children: HashMap<u32, Vec<usize>> = HashMap::new();
    let mut known = HashMap::new();

    for (index, (pid, ppid, _)) in processes.iter().enumerate() {
        ensure!(
            known.insert(*pid, index).is_none(),
            "Process {pid} appears twice in the process tree"
        );
        if *ppid == 0 {
            ensure!(root.is_none(), "Process tree has more than one root");
            root = Some(index);
        } else {
            children.entry(*ppid).or_default().push(index);
        }
    }

    for (pid, ppid, _) in processes {
        if *ppid != 0 && !known.contains_key(ppid) {
            bail!("Process {pid} has unknown parent {ppid}");
        }
    }

    let root = root.context("Process tree has no root process")?;
    let tree = build_node(processes, &children, root, 0)?;
    ensure!(
        tree.count() == processes.len(),
        "Process tree has processes that are not reachable from the root"
    );
    Ok(tree)
}

fn build_node(
    processes: &[(u32, u32, String)],
    children: &HashMap<u32, Vec<usize>>,
    index: usize,
    depth: usize,
) -> Result<ProcessNode> {
    ensure!(
        depth < MAX_PROCESS_TREE_DEPTH,
        "process tree exceeds the maximum depth of {MAX_PROCESS_TREE_DEPTH}"
    );
    let (pid, _, comm) = &processes[index];
    let mut node = ProcessNode::new(*pid, comm.clone());
    if let Some(indexes) = children.get(pid) {
        for &child in indexes {
            node.children
                .push(build_node(processes, children, child, depth + 1)?);
        }
    }

    Ok(node)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn encode_image<M: Message>(magics: &[u32], entries: &[M]) -> Vec<u8> {
        let mut data = Vec::new();
        for magic in magics {
            data.extend_from_slice(&magic.to_le_bytes());
        }
        for entry in entries {
            let payload = entry.encode_to_vec();
            data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(&payload);
        }
        data
    }

    pub(crate) fn pstree_entry(pid: u32, ppid: u32) -> PstreeEntry {
        PstreeEntry {
            pid,
            ppid,
            pgid: pid,
            sid: pid,
            threads: vec![pid],
        }
    }

    pub(crate) fn core_entry(comm: &str) -> CoreEntry {
        CoreEntry {
            tc: Some(TaskCoreEntry {
                comm: comm.to_string(),
            }),
        }
    }

    /// Write `pstree.img` and one core image per process into `dir`.
    pub(crate) fn write_process_images(dir: &Path, processes: &[(u32, u32, &str)]) {
        let entries: Vec<PstreeEntry> = processes
            .iter()
            .map(|(pid, ppid, _)| pstree_entry(*pid, *ppid))
            .collect();
        std::fs::write(
            dir.join(PSTREE_IMAGE),
            encode_image(&[IMG_COMMON_MAGIC, PSTREE_MAGIC], &entries),
        )
        .unwrap();
        for (pid, _, comm) in processes {
            std::fs::write(
                dir.join(format!("core-{pid}.img")),
                encode_image(&[IMG_COMMON_MAGIC, CORE_MAGIC], &[core_entry(comm)]),
            )
            .unwrap();
        }
    }

    pub(crate) fn stats_image(stats: DumpStatsEntry) -> Vec<u8> {
        encode_image(
            &[IMG_SERVICE_MAGIC, STATS_MAGIC],
            &[StatsEntry { dump: Some(stats) }],
        )
    }

    fn owned(processes: &[(u32, u32, &str)]) -> Vec<(u32, u32, String)> {
        processes
            .iter()
            .map(|(pid, ppid, comm)| (*pid, *ppid, comm.to_string()))
            .collect()
    }

    #[test]
    fn test_decode_image_with_service_magic() {
        let data = stats_image(DumpStatsEntry {
            freezing_time: 1,
            ..Default::default()
        });
        let entries: Vec<StatsEntry> = decode_image(&data, STATS_MAGIC).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dump.as_ref().unwrap().freezing_time, 1);
    }

    #[test]
    fn test_decode_image_without_leading_magic() {
        let data = encode_image(&[PSTREE_MAGIC], &[pstree_entry(1, 0), pstree_entry(2, 1)]);
        let entries: Vec<PstreeEntry> = decode_image(&data, PSTREE_MAGIC).unwrap();
        assert_eq!(entries, vec![pstree_entry(1, 0), pstree_entry(2, 1)]);
    }

    #[test]
    fn test_decode_image_wrong_magic() {
        let data = encode_image(&[IMG_COMMON_MAGIC, CORE_MAGIC], &[core_entry("sh")]);
        let err = decode_image::<PstreeEntry>(&data, PSTREE_MAGIC).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected image magic 0x55053847, expected 0x50273030"
        );
    }

    #[test]
    fn test_decode_image_truncated_entry() {
        let mut data = encode_image(&[IMG_COMMON_MAGIC, CORE_MAGIC], &[core_entry("bash")]);
        data.truncate(data.len() - 2);
        let err = decode_image::<CoreEntry>(&data, CORE_MAGIC).unwrap_err();
        assert!(err.to_string().starts_with("Truncated entry at offset 12"));
    }

    #[test]
    fn test_decode_image_too_short() {
        assert!(decode_image::<CoreEntry>(&[0x19, 0x43], CORE_MAGIC).is_err());
    }

    #[test]
    fn test_read_dump_stats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats-dump");
        std::fs::write(
            &path,
            stats_image(DumpStatsEntry {
                freezing_time: 120,
                frozen_time: 3400,
                memdump_time: 560,
                memwrite_time: 780,
                pages_scanned: 9000,
                pages_skipped_parent: 5,
                pages_written: 1200,
            }),
        )
        .unwrap();

        let stats = read_dump_stats(&path).unwrap();
        assert_eq!(
            stats,
            DumpStats {
                freezing_time: 120,
                frozen_time: 3400,
                memdump_time: 560,
                memwrite_time: 780,
                pages_scanned: 9000,
                pages_written: 1200,
            }
        );
    }

    #[test]
    fn test_read_dump_stats_without_dump_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats-dump");
        std::fs::write(
            &path,
            encode_image(&[IMG_SERVICE_MAGIC, STATS_MAGIC], &[StatsEntry { dump: None }]),
        )
        .unwrap();

        let err = read_dump_stats(&path).unwrap_err();
        assert!(err.to_string().ends_with("holds no dump statistics"));
    }

    #[test]
    fn test_read_dump_stats_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_dump_stats(&dir.path().join("stats-dump")).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read"));
    }

    #[test]
    fn test_read_process_tree() {
        let dir = TempDir::new().unwrap();
        write_process_images(
            dir.path(),
            &[(1, 0, "init"), (5, 1, "sh"), (9, 1, "nginx"), (12, 5, "sleep")],
        );

        let tree = read_process_tree(dir.path()).unwrap();
        assert_eq!(
            tree,
            ProcessNode::new(1, "init").with_children(vec![
                ProcessNode::new(5, "sh").with_children(vec![ProcessNode::new(12, "sleep")]),
                ProcessNode::new(9, "nginx"),
            ])
        );
    }

    #[test]
    fn test_read_process_tree_missing_core_image() {
        let dir = TempDir::new().unwrap();
        write_process_images(dir.path(), &[(1, 0, "init")]);
        std::fs::write(
            dir.path().join(PSTREE_IMAGE),
            encode_image(
                &[IMG_COMMON_MAGIC, PSTREE_MAGIC],
                &[pstree_entry(1, 0), pstree_entry(2, 1)],
            ),
        )
        .unwrap();

        let err = read_process_tree(dir.path()).unwrap_err();
        assert!(err.to_string().contains("core-2.img"));
    }

    #[test]
    fn test_assemble_keeps_image_order() {
        let tree =
            assemble_process_tree(&owned(&[(1, 0, "init"), (30, 1, "c"), (20, 1, "b"), (10, 1, "a")]))
                .unwrap();
        let pids: Vec<u32> = tree.children.iter().map(|child| child.pid).collect();
        assert_eq!(pids, [30, 20, 10]);
        assert_eq!(tree.count(), 4);
    }

    #[test]
    fn test_assemble_rejects_orphans() {
        let err = assemble_process_tree(&owned(&[(1, 0, "init"), (7, 3, "orphan")])).unwrap_err();
        assert_eq!(err.to_string(), "Process 7 has unknown parent 3");
    }

    #[test]
    fn test_assemble_names_first_orphan_in_image_order() {
        let processes = owned(&[
            (1, 0, "init"),
            (9, 90, "a"),
            (8, 80, "b"),
            (7, 70, "c"),
            (6, 60, "d"),
        ]);
        for _ in 0..16 {
            let err = assemble_process_tree(&processes).unwrap_err();
            assert_eq!(err.to_string(), "Process 9 has unknown parent 90");
        }
    }

    #[test]
    fn test_assemble_requires_a_root() {
        let err = assemble_process_tree(&owned(&[(2, 1, "sh")])).unwrap_err();
        assert_eq!(err.to_string(), "Process 2 has unknown parent 1");

        let err = assemble_process_tree(&[]).unwrap_err();
        assert_eq!(err.to_string(), "Process tree has no root process");
    }

    #[test]
    fn test_assemble_rejects_detached_cycles() {
        let err = assemble_process_tree(&owned(&[(1, 0, "init"), (2, 3, "a"), (3, 2, "b")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Process tree has processes that are not reachable from the root"
        );
    }

    #[test]
    fn test_assemble_rejects_deep_chains() {
        let processes: Vec<(u32, u32, String)> = (1..=MAX_PROCESS_TREE_DEPTH as u32 + 1)
            .map(|pid| (pid, pid - 1, format!("p{pid}")))
            .collect();
        let err = assemble_process_tree(&processes).unwrap_err();
        assert_eq!(
            err.to_string(),
            "process tree exceeds the maximum depth of 1024"
        );
    }
}
