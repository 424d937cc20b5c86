//! Last-known-state overviews.
//!
//! One query per view fetches, for every project or hypervisor tag, the
//! latest metadata document and the latest sample of each interesting
//! series. A series with no sample yet comes back as null and reads as
//! zero, matching how the totals treat absent data.

use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::api::{ApiClient, ApiError};

pub const PROJECT_OVERVIEW_QUERY: &str = r#"
query {
  projects: tags(key: "project") {
    id: value
    metadata: last_metadata {
      last_updated: timestamp

      name: field(key: "name")
      description: field(key: "description")
      enabled: boolean_field(key: "enabled")
    }

    vcpus_total: last_sample_value(series: {metric: {name: "quota.vcpus"}, period: 0})
    vcpus_usage: last_sample_value(series: {metric: {name: "vm.vcpus.usage"}, period: 3600})

    memory_total: last_sample_value(series: {metric: {name: "quota.memory"}, period: 0})
    memory_usage: last_sample_value(series: {metric: {name: "vm.memory.usage"}, period: 3600})

    vms_total: last_sample_value(series: {metric: {name: "quota.instances"}, period: 0})
    vms_active: last_sample_value(series: {metric: {name: "vms.active"}, period: 3600})
    vms_deleted: last_sample_value(series: {metric: {name: "vms.deleted"}, period: 3600})
  }
}"#;

pub const HYPERVISOR_OVERVIEW_QUERY: &str = r#"
query {
  hypervisors: tags(key: "hypervisor") {
    hostname: value
    metadata: last_metadata {
      last_updated: timestamp

      type: field(key: "hypervisor_type")

      status: field(key: "status")
      state: field(key: "state")
      cores: integer_field(key: "vcpus")
      ip: field(key: "host_ip")

      disabled_reason: field(key: ["service", "disabled_reason"])
    }

    cpus_total: last_sample_value(series: {metric: {name: "hypervisor.cpus.total"}, period: 0})
    vcpus_total: last_sample_value(series: {metric: {name: "hypervisor.vcpus.total"}, period: 0})
    vcpus_used: last_sample_value(series: {metric: {name: "hypervisor.vcpus.used"}, period: 0})

    running_vms: last_sample_value(series: {metric: {name: "hypervisor.vms.running"}, period: 0})
    workload: last_sample_value(series: {metric: {name: "hypervisor.workload"}, period: 0})

    ram_total: last_sample_value(series: {metric: {name: "hypervisor.ram.total"}, period: 0})
    memory_total: last_sample_value(series: {metric: {name: "hypervisor.memory.total"}, period: 0})
    memory_used: last_sample_value(series: {metric: {name: "hypervisor.memory.used"}, period: 0})

    disk_total: last_sample_value(series: {metric: {name: "hypervisor.disk.total"}, period: 0})
    disk_used: last_sample_value(series: {metric: {name: "hypervisor.disk.used"}, period: 0})
    disk_free: last_sample_value(series: {metric: {name: "hypervisor.disk.free"}, period: 0})
    disk_free_least: last_sample_value(series: {metric: {name: "hypervisor.disk.free.least"}, period: 0})

    load_5m: last_sample_value(series: {metric: {name: "hypervisor.load.5m"}, period: 0})
    load_10m: last_sample_value(series: {metric: {name: "hypervisor.load.10m"}, period: 0})
    load_15m: last_sample_value(series: {metric: {name: "hypervisor.load.15m"}, period: 0})
  }
}"#;

fn zero_if_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.unwrap_or(0.0))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Latest known state of one project.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectOverview {
    pub id: String,
    #[serde(default)]
    pub metadata: Option<ProjectMeta>,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub vcpus_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub vcpus_usage: f64,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub memory_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub memory_usage: f64,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub vms_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub vms_active: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub vms_deleted: f64,
}

impl ProjectOverview {
    pub fn name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Usage series hold seconds of use per hourly bucket, so the last
    /// sample divided by 3600 is the average vcpus in use.
    pub fn vcpus_usage_percent(&self) -> f64 {
        self.vcpus_usage / 3600.0 / self.vcpus_total * 100.0
    }

    pub fn memory_usage_percent(&self) -> f64 {
        self.memory_usage / 3600.0 / self.memory_total * 100.0
    }

    pub fn vms_active_percent(&self) -> f64 {
        self.vms_active / self.vms_total * 100.0
    }

    /// Field-wise sum across projects.
    pub fn overall(projects: &[ProjectOverview]) -> ProjectOverview {
        projects
            .iter()
            .fold(ProjectOverview::default(), |mut acc, project| {
                acc.vcpus_total += project.vcpus_total;
                acc.vcpus_usage += project.vcpus_usage;

                acc.memory_total += project.memory_total;
                acc.memory_usage += project.memory_usage;

                acc.vms_total += project.vms_total;
                acc.vms_active += project.vms_active;
                acc.vms_deleted += project.vms_deleted;
                acc
            })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HypervisorMeta {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub cores: Option<i64>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Latest known state of one hypervisor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HypervisorOverview {
    pub hostname: String,
    #[serde(default)]
    pub metadata: Option<HypervisorMeta>,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub cpus_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub vcpus_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub vcpus_used: f64,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub running_vms: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub workload: f64,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub ram_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub memory_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub memory_used: f64,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub disk_total: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub disk_used: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub disk_free: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub disk_free_least: f64,

    #[serde(default, deserialize_with = "zero_if_null")]
    pub load_5m: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub load_10m: f64,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub load_15m: f64,
}

impl HypervisorOverview {
    pub fn is_enabled(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.status.as_deref())
            == Some("enabled")
    }

    pub fn cpus_used_percent(&self) -> f64 {
        self.vcpus_used / self.cpus_total * 100.0
    }

    pub fn vcpus_used_percent(&self) -> f64 {
        self.vcpus_used / self.vcpus_total * 100.0
    }

    pub fn ram_used_percent(&self) -> f64 {
        self.memory_used / self.ram_total * 100.0
    }

    pub fn memory_used_percent(&self) -> f64 {
        self.memory_used / self.memory_total * 100.0
    }

    /// Capacity totals across enabled hypervisors. Counts are summed,
    /// loads are averaged.
    pub fn totals(hypervisors: &[HypervisorOverview]) -> HypervisorOverview {
        let mut total = HypervisorOverview::default();

        for (idx, hypervisor) in hypervisors
            .iter()
            .filter(|hypervisor| hypervisor.is_enabled())
            .enumerate()
        {
            total.cpus_total += hypervisor.cpus_total;
            total.vcpus_total += hypervisor.vcpus_total;
            total.vcpus_used += hypervisor.vcpus_used;

            total.running_vms += hypervisor.running_vms;
            total.workload += hypervisor.workload;

            total.ram_total += hypervisor.ram_total;
            total.memory_total += hypervisor.memory_total;
            total.memory_used += hypervisor.memory_used;

            total.disk_total += hypervisor.disk_total;
            total.disk_used += hypervisor.disk_used;
            total.disk_free += hypervisor.disk_free;
            total.disk_free_least += hypervisor.disk_free_least;

            let n = idx as f64;
            total.load_5m = (total.load_5m * n + hypervisor.load_5m) / (n + 1.0);
            total.load_10m = (total.load_10m * n + hypervisor.load_10m) / (n + 1.0);
            total.load_15m = (total.load_15m * n + hypervisor.load_15m) / (n + 1.0);
        }

        total
    }
}

/// Severity bucket for a usage percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageClass {
    Danger,
    Warning,
    Success,
}

/// 90% and up is critical, 70% and up is worth watching. An undefined
/// percentage (no capacity) reads as fine.
pub fn usage_class(percent: f64) -> UsageClass {
    if percent >= 90.0 {
        UsageClass::Danger
    } else if percent >= 70.0 {
        UsageClass::Warning
    } else {
        UsageClass::Success
    }
}

pub async fn project_overview(client: &ApiClient) -> Result<Vec<ProjectOverview>, ApiError> {
    let data = client.graphql(PROJECT_OVERVIEW_QUERY, json!({})).await?;
    decode_list(&data, "projects")
}

pub async fn hypervisor_overview(client: &ApiClient) -> Result<Vec<HypervisorOverview>, ApiError> {
    let data = client.graphql(HYPERVISOR_OVERVIEW_QUERY, json!({})).await?;
    decode_list(&data, "hypervisors")
}

fn decode_list<T: serde::de::DeserializeOwned>(data: &Value, key: &str) -> Result<Vec<T>, ApiError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => Ok(serde_json::from_value(list.clone())?),
    }
}
