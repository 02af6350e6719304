use async_trait::async_trait;

use super::archive::{self, CHECKPOINT_DIRECTORY, STATS_DUMP_FILE};
use super::{
    ArchiveSizes, CheckpointSource, CheckpointTask, ContainerFacts, DumpStats, MountEntry,
    ProcessNode, criu, metadata,
};
use crate::prelude::*;

/// Reads facts from a checkpoint archive that was unpacked into the task's
/// output directory by [`archive::extract_metadata`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractedCheckpointSource;

#[async_trait]
impl CheckpointSource for ExtractedCheckpointSource {
    async fn container_facts(&self, task: &CheckpointTask) -> Result<ContainerFacts> {
        let config = metadata::read_container_config(task.output_dir())?;
        let spec = metadata::read_runtime_spec(task.output_dir())?;
        metadata::container_facts(task.output_dir(), &config, &spec)
    }

    async fn archive_sizes(&self, task: &CheckpointTask) -> Result<ArchiveSizes> {
        archive::archive_sizes(task.archive_path()).await
    }

    async fn mounts(&self, task: &CheckpointTask) -> Result<Vec<MountEntry>> {
        Ok(metadata::read_runtime_spec(task.output_dir())?.mount_entries())
    }

    async fn dump_stats(&self, task: &CheckpointTask) -> Result<DumpStats> {
        criu::read_dump_stats(&task.output_dir().join(STATS_DUMP_FILE))
    }

    async fn process_tree(&self, task: &CheckpointTask) -> Result<ProcessNode> {
        criu::read_process_tree(&task.output_dir().join(CHECKPOINT_DIRECTORY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::archive::tests::build_tar;
    use crate::checkpoint::archive::ExtractionFilter;
    use crate::checkpoint::criu::DumpStatsEntry;
    use crate::checkpoint::criu::tests::stats_image;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{"id":"abc123","name":"db","rootfsImageName":"postgres:16","runtime":"runc","createdTime":"2024-05-06T07:08:09Z"}"#;
    const SPEC: &str = r#"{"mounts":[{"destination":"/var/lib/postgresql","type":"bind","source":"/srv/pg"}],"annotations":{"io.container.manager":"libpod"}}"#;

    async fn extracted_task(dir: &TempDir, files: &[(&str, &[u8])]) -> CheckpointTask {
        let archive_path = dir.path().join("checkpoint.tar");
        tokio::fs::write(&archive_path, build_tar(files).await)
            .await
            .unwrap();
        let output_dir = dir.path().join("out");
        let filter = ExtractionFilter {
            stats: true,
            images: true,
        };
        archive::extract_metadata(&archive_path, &output_dir, filter)
            .await
            .unwrap();
        CheckpointTask::new(output_dir, archive_path)
    }

    #[test_log::test(tokio::test)]
    async fn test_reads_extracted_archive() {
        let dir = TempDir::new().unwrap();
        let stats = stats_image(DumpStatsEntry {
            freezing_time: 10,
            pages_written: 3,
            ..Default::default()
        });
        let task = extracted_task(
            &dir,
            &[
                ("config.dump", CONFIG.as_bytes()),
                ("spec.dump", SPEC.as_bytes()),
                ("stats-dump", stats.as_slice()),
            ],
        )
        .await;
        let source = ExtractedCheckpointSource;

        let facts = source.container_facts(&task).await.unwrap();
        assert_eq!(facts.name, "db");
        assert_eq!(facts.image, "postgres:16");
        assert_eq!(facts.created, "2024-05-06T07:08:09Z");

        let mounts = source.mounts(&task).await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].destination, "/var/lib/postgresql");

        let stats = source.dump_stats(&task).await.unwrap();
        assert_eq!(stats.freezing_time, 10);
        assert_eq!(stats.pages_written, 3);

        let sizes = source.archive_sizes(&task).await.unwrap();
        assert_eq!(sizes, ArchiveSizes::default());
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_process_images() {
        let dir = TempDir::new().unwrap();
        let task = extracted_task(
            &dir,
            &[
                ("config.dump", CONFIG.as_bytes()),
                ("spec.dump", SPEC.as_bytes()),
            ],
        )
        .await;

        let err = ExtractedCheckpointSource
            .process_tree(&task)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pstree.img"));
    }
}
