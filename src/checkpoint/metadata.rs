//! Container metadata stored next to the CRIU images in a checkpoint
//! archive, and the display facts derived from it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, FixedOffset, SecondsFormat, TimeZone};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::archive::{
    CONFIG_DUMP_FILE, CONTAINERD_STATUS_FILE, NETWORK_STATUS_FILE, SPEC_DUMP_FILE,
};
use super::{ContainerFacts, MountEntry};
use crate::prelude::*;

pub const CONTAINER_MANAGER_ANNOTATION: &str = "io.container.manager";
pub const CRIO_METADATA_ANNOTATION: &str = "io.kubernetes.cri-o.Metadata";
pub const CRIO_CREATED_ANNOTATION: &str = "io.kubernetes.cri-o.Created";
pub const CRIO_IP_ANNOTATION: &str = "io.kubernetes.cri-o.IP.0";

/// `config.dump`, written by the container engine at checkpoint time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rootfs_image_name: String,
    #[serde(default, rename = "runtime")]
    pub oci_runtime: String,
    #[serde(default)]
    pub created_time: Option<DateTime<FixedOffset>>,
}

/// The parts of the OCI runtime spec (`spec.dump`) shown in the tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default)]
    pub mounts: Vec<SpecMount>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpecMount {
    pub destination: String,
    #[serde(default, rename = "type")]
    pub mount_type: String,
    #[serde(default)]
    pub source: String,
}

impl RuntimeSpec {
    pub fn mount_entries(&self) -> Vec<MountEntry> {
        self.mounts
            .iter()
            .map(|mount| MountEntry {
                destination: mount.destination.clone(),
                mount_type: mount.mount_type.clone(),
                source: mount.source.clone(),
            })
            .collect()
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// `status`, written by containerd.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerdStatus {
    #[serde(default)]
    pub name: String,
    /// Nanoseconds since the epoch.
    #[serde(default)]
    pub created_time: i64,
}

/// `network.status`, written by Podman: network name to attached interfaces.
pub type NetworkStatus = BTreeMap<String, NetworkAttachment>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkAttachment {
    #[serde(default)]
    pub interfaces: BTreeMap<String, NetworkInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subnet {
    pub ipnet: String,
}

#[derive(Debug, Default, Deserialize)]
struct CrioMetadata {
    #[serde(default)]
    name: String,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_optional_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

pub fn read_container_config(checkpoint_dir: &Path) -> Result<ContainerConfig> {
    read_json(&checkpoint_dir.join(CONFIG_DUMP_FILE))
}

pub fn read_runtime_spec(checkpoint_dir: &Path) -> Result<RuntimeSpec> {
    read_json(&checkpoint_dir.join(SPEC_DUMP_FILE))
}

/// RFC 3339 at second precision, keeping the offset the timestamp was
/// written with.
fn format_timestamp<Tz: TimeZone>(timestamp: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// First address and MAC address found in the network status, in network
/// and interface name order.
fn network_addresses(status: &NetworkStatus) -> (Option<String>, Option<String>) {
    let Some(interface) = status
        .values()
        .flat_map(|attachment| attachment.interfaces.values())
        .next()
    else {
        return (None, None);
    };

    let ip = interface.subnets.first().map(|subnet| {
        subnet
            .ipnet
            .split_once('/')
            .map_or(subnet.ipnet.as_str(), |(address, _)| address)
            .to_owned()
    });
    let mac = Some(interface.mac_address.clone()).filter(|mac| !mac.is_empty());
    (ip, mac)
}

/// Derive the display facts for a checkpoint from its metadata files.
///
/// The container engine is selected by the `io.container.manager`
/// annotation; checkpoints without one are only understood when they carry
/// a containerd status file.
pub fn container_facts(
    checkpoint_dir: &Path,
    config: &ContainerConfig,
    spec: &RuntimeSpec,
) -> Result<ContainerFacts> {
    let mut facts = ContainerFacts {
        image: config.rootfs_image_name.clone(),
        id: config.id.clone(),
        runtime: config.oci_runtime.clone(),
        ..Default::default()
    };

    match spec.annotation(CONTAINER_MANAGER_ANNOTATION) {
        Some("libpod") => {
            facts.name = config.name.clone();
            facts.created = config.created_time.map(format_timestamp).unwrap_or_default();
            facts.engine = "Podman".to_string();
            let network: Option<NetworkStatus> =
                read_optional_json(&checkpoint_dir.join(NETWORK_STATUS_FILE))?;
            if let Some(network) = network {
                (facts.ip, facts.mac) = network_addresses(&network);
            }
        }
        Some("cri-o") => {
            let raw = spec.annotation(CRIO_METADATA_ANNOTATION).unwrap_or_default();
            let metadata: CrioMetadata = serde_json::from_str(raw)
                .with_context(|| format!("Failed to read {CRIO_METADATA_ANNOTATION}"))?;
            facts.name = metadata.name;
            facts.created = spec
                .annotation(CRIO_CREATED_ANNOTATION)
                .unwrap_or_default()
                .to_owned();
            facts.engine = "CRI-O".to_string();
            facts.ip = spec
                .annotation(CRIO_IP_ANNOTATION)
                .filter(|ip| !ip.is_empty())
                .map(str::to_owned);
        }
        manager => {
            let status: Option<ContainerdStatus> =
                read_optional_json(&checkpoint_dir.join(CONTAINERD_STATUS_FILE))?;
            let Some(status) = status else {
                bail!(
                    "unknown container manager found: {}",
                    manager.unwrap_or_default()
                );
            };
            facts.name = status.name;
            facts.created = format_timestamp(DateTime::from_timestamp_nanos(status.created_time));
            facts.engine = "containerd".to_string();
        }
    }

    debug!("Container facts for {}: {facts:?}", checkpoint_dir.display());
    Ok(facts)
}
