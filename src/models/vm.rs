//! VM model as described by the control plane

use crate::naming;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Power state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PowerState {
    Running,
    Deallocated,
    Stopping,
    Starting,
    Unknown,
}

impl PowerState {
    /// Parse the control plane's display string, e.g. `"VM running"`.
    pub fn parse(value: &str) -> Self {
        match value {
            "VM running" => PowerState::Running,
            "VM deallocated" => PowerState::Deallocated,
            "VM stopping" => PowerState::Stopping,
            "VM starting" => PowerState::Starting,
            _ => PowerState::Unknown,
        }
    }
}

impl From<String> for PowerState {
    fn from(value: String) -> Self {
        PowerState::parse(&value)
    }
}

impl From<PowerState> for String {
    fn from(state: PowerState) -> Self {
        state.to_string()
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Running => write!(f, "VM running"),
            PowerState::Deallocated => write!(f, "VM deallocated"),
            PowerState::Stopping => write!(f, "VM stopping"),
            PowerState::Starting => write!(f, "VM starting"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

impl Default for PowerState {
    fn default() -> Self {
        PowerState::Unknown
    }
}

/// Provisioning state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProvisioningState {
    Succeeded,
    Failed,
    InProgress,
    Unknown,
}

impl ProvisioningState {
    pub fn parse(value: &str) -> Self {
        match value {
            "Succeeded" => ProvisioningState::Succeeded,
            "Failed" => ProvisioningState::Failed,
            "Creating" | "Updating" | "Deleting" => ProvisioningState::InProgress,
            _ => ProvisioningState::Unknown,
        }
    }
}

impl From<String> for ProvisioningState {
    fn from(value: String) -> Self {
        ProvisioningState::parse(&value)
    }
}

impl From<ProvisioningState> for String {
    fn from(state: ProvisioningState) -> Self {
        state.to_string()
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisioningState::Succeeded => write!(f, "Succeeded"),
            ProvisioningState::Failed => write!(f, "Failed"),
            ProvisioningState::InProgress => write!(f, "InProgress"),
            ProvisioningState::Unknown => write!(f, "Unknown"),
        }
    }
}

impl Default for ProvisioningState {
    fn default() -> Self {
        ProvisioningState::Unknown
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    #[serde(default)]
    pub vm_size: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub offer: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub version: String,
}

impl ImageReference {
    /// Compact `publisher:offer:sku:version` form.
    pub fn as_urn(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.publisher, self.offer, self.sku, self.version
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default)]
    pub image_reference: Option<ImageReference>,
}

/// A VM instance as reported by `vm list --show-details`.
///
/// Fields default individually because a VM created in no-wait mode may be
/// listed before the control plane has filled in its detail fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub name: String,
    #[serde(default)]
    pub vm_id: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub hardware_profile: HardwareProfile,
    #[serde(default)]
    pub storage_profile: StorageProfile,
    #[serde(default)]
    pub provisioning_state: ProvisioningState,
    #[serde(default)]
    pub power_state: PowerState,
}

impl Vm {
    /// Pool-relative index recovered from the VM name.
    pub fn index(&self, pool: &str) -> Result<u32> {
        naming::vm_index(pool, &self.name)
    }

    /// Public network address of this VM. Derived, never stored.
    pub fn fqdn(&self) -> String {
        naming::vm_fqdn(&self.name, &self.location)
    }

    /// Blob name of this VM's unmanaged OS disk.
    pub fn os_disk_name(&self) -> String {
        os_disk_name(&self.name)
    }

    pub fn image_urn(&self) -> String {
        self.storage_profile
            .image_reference
            .as_ref()
            .map(ImageReference::as_urn)
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Blob name of the unmanaged OS disk belonging to `vm_name`.
pub fn os_disk_name(vm_name: &str) -> String {
    format!("{}_os_disk", vm_name)
}

/// A VM size record from `vm list-sizes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSize {
    pub name: String,
    pub number_of_cores: u32,
    pub memory_in_mb: u64,
    #[serde(default)]
    pub os_disk_size_in_mb: u64,
    #[serde(default)]
    pub resource_disk_size_in_mb: u64,
    #[serde(default)]
    pub max_data_disk_count: u32,
}

impl VmSize {
    pub fn memory_gb(&self) -> f64 {
        self.memory_in_mb as f64 / 1024.0
    }
}

/// Size-listing filters, applied client-side.
#[derive(Debug, Clone, Copy)]
pub struct SizeFilter {
    pub min_cores: u32,
    pub max_cores: u32,
    pub min_memory_gb: f64,
    pub max_memory_gb: f64,
}

impl Default for SizeFilter {
    fn default() -> Self {
        Self {
            min_cores: 0,
            max_cores: u32::MAX,
            min_memory_gb: 0.0,
            max_memory_gb: f64::INFINITY,
        }
    }
}

impl SizeFilter {
    pub fn matches(&self, size: &VmSize) -> bool {
        size.number_of_cores >= self.min_cores
            && size.number_of_cores <= self.max_cores
            && size.memory_gb() >= self.min_memory_gb
            && size.memory_gb() <= self.max_memory_gb
    }
}

/// Observed state of a pool. Never persisted, always re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No resource group.
    Absent,
    /// Resource group exists, zero VMs.
    Empty,
    /// At least one VM.
    Populated(usize),
}
