//! Typed control-plane requests.
//!
//! One struct per resource kind and operation. Each request validates its
//! fields and then renders the argument vector dispatched through a
//! [`CommandRunner`](super::CommandRunner), replacing string-built command
//! lines at the call sites.

use crate::{Error, Result};

pub trait CloudRequest {
    fn validate(&self) -> Result<()>;
    fn to_args(&self) -> Vec<String>;
}

fn opt(key: &str, value: &str) -> String {
    format!("--{}={}", key, value)
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(Error::Config(format!("{} cannot be empty", field)))
    } else {
        Ok(())
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

// ---- resource group ----

#[derive(Debug, Clone)]
pub struct ResourceGroupShow {
    pub name: String,
}

impl CloudRequest for ResourceGroupShow {
    fn validate(&self) -> Result<()> {
        require("resource group name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "group".into(),
            "show".into(),
            opt("name", &self.name),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ResourceGroupCreate {
    pub name: String,
    pub location: String,
}

impl CloudRequest for ResourceGroupCreate {
    fn validate(&self) -> Result<()> {
        require("resource group name", &self.name)?;
        require("location", &self.location)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "group".into(),
            "create".into(),
            opt("name", &self.name),
            opt("location", &self.location),
        ]
    }
}

// ---- virtual network ----

#[derive(Debug, Clone)]
pub struct VnetShow {
    pub group: String,
    pub name: String,
}

impl CloudRequest for VnetShow {
    fn validate(&self) -> Result<()> {
        require("vnet name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "vnet".into(),
            "show".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct VnetCreate {
    pub group: String,
    pub name: String,
    pub subnet: String,
    pub location: String,
}

impl CloudRequest for VnetCreate {
    fn validate(&self) -> Result<()> {
        require("vnet name", &self.name)?;
        require("subnet name", &self.subnet)?;
        require("location", &self.location)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "vnet".into(),
            "create".into(),
            opt("name", &self.name),
            opt("location", &self.location),
            opt("subnet-name", &self.subnet),
            opt("resource-group", &self.group),
        ]
    }
}

// ---- storage account ----

#[derive(Debug, Clone)]
pub struct StorageAccountShow {
    pub group: String,
    pub name: String,
}

impl CloudRequest for StorageAccountShow {
    fn validate(&self) -> Result<()> {
        require("storage account name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "account".into(),
            "show".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct StorageAccountCreate {
    pub group: String,
    pub name: String,
    pub location: String,
    pub sku: String,
    pub kind: String,
}

impl CloudRequest for StorageAccountCreate {
    fn validate(&self) -> Result<()> {
        require("storage account name", &self.name)?;
        require("location", &self.location)?;
        require("sku", &self.sku)?;
        require("kind", &self.kind)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "account".into(),
            "create".into(),
            opt("name", &self.name),
            opt("location", &self.location),
            opt("kind", &self.kind),
            opt("sku", &self.sku),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStringShow {
    pub group: String,
    pub account: String,
}

impl CloudRequest for ConnectionStringShow {
    fn validate(&self) -> Result<()> {
        require("storage account name", &self.account)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "account".into(),
            "show-connection-string".into(),
            opt("name", &self.account),
            opt("resource-group", &self.group),
        ]
    }
}

// ---- storage container ----

#[derive(Debug, Clone)]
pub struct ContainerExists {
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for ContainerExists {
    fn validate(&self) -> Result<()> {
        require("container name", &self.name)?;
        require("connection string", &self.connection_string)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "container".into(),
            "exists".into(),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ContainerCreate {
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for ContainerCreate {
    fn validate(&self) -> Result<()> {
        require("container name", &self.name)?;
        require("connection string", &self.connection_string)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "container".into(),
            "create".into(),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ContainerDelete {
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for ContainerDelete {
    fn validate(&self) -> Result<()> {
        require("container name", &self.name)?;
        require("connection string", &self.connection_string)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "container".into(),
            "delete".into(),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

/// Time-boxed access-token request scoped to one container.
#[derive(Debug, Clone)]
pub struct ContainerSasGenerate {
    pub name: String,
    pub connection_string: String,
    /// Permission letters, e.g. `lrwd` for list/read/write/delete.
    pub permissions: String,
    /// Expiry timestamp, `%Y-%m-%dT%H:%MZ`.
    pub expiry: String,
}

impl CloudRequest for ContainerSasGenerate {
    fn validate(&self) -> Result<()> {
        require("container name", &self.name)?;
        require("connection string", &self.connection_string)?;
        require("permissions", &self.permissions)?;
        require("expiry", &self.expiry)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "container".into(),
            "generate-sas".into(),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
            opt("permissions", &self.permissions),
            "--https-only".into(),
            opt("expiry", &self.expiry),
        ]
    }
}

// ---- blob ----

#[derive(Debug, Clone)]
pub struct BlobExists {
    pub container: String,
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for BlobExists {
    fn validate(&self) -> Result<()> {
        require("container name", &self.container)?;
        require("blob name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "blob".into(),
            "exists".into(),
            opt("container-name", &self.container),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BlobUpload {
    pub container: String,
    pub file: String,
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for BlobUpload {
    fn validate(&self) -> Result<()> {
        require("container name", &self.container)?;
        require("file path", &self.file)?;
        require("blob name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "blob".into(),
            "upload".into(),
            opt("container-name", &self.container),
            opt("file", &self.file),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BlobDownload {
    pub container: String,
    pub file: String,
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for BlobDownload {
    fn validate(&self) -> Result<()> {
        require("container name", &self.container)?;
        require("file path", &self.file)?;
        require("blob name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "blob".into(),
            "download".into(),
            opt("container-name", &self.container),
            opt("file", &self.file),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BlobDelete {
    pub container: String,
    pub name: String,
    pub connection_string: String,
}

impl CloudRequest for BlobDelete {
    fn validate(&self) -> Result<()> {
        require("container name", &self.container)?;
        require("blob name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "blob".into(),
            "delete".into(),
            opt("container-name", &self.container),
            opt("name", &self.name),
            opt("connection-string", &self.connection_string),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct BlobList {
    pub container: String,
    pub connection_string: String,
}

impl CloudRequest for BlobList {
    fn validate(&self) -> Result<()> {
        require("container name", &self.container)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "storage".into(),
            "blob".into(),
            "list".into(),
            opt("container-name", &self.container),
            opt("connection-string", &self.connection_string),
        ]
    }
}

// ---- public address ----

#[derive(Debug, Clone)]
pub struct PublicIpShow {
    pub group: String,
    pub name: String,
}

impl CloudRequest for PublicIpShow {
    fn validate(&self) -> Result<()> {
        require("public IP name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "public-ip".into(),
            "show".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PublicIpCreate {
    pub group: String,
    pub name: String,
    pub location: String,
    /// DNS label giving the VM its stable public address.
    pub dns_name: String,
}

impl CloudRequest for PublicIpCreate {
    fn validate(&self) -> Result<()> {
        require("public IP name", &self.name)?;
        require("location", &self.location)?;
        require("dns name", &self.dns_name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "public-ip".into(),
            "create".into(),
            opt("name", &self.name),
            opt("location", &self.location),
            opt("dns-name", &self.dns_name),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PublicIpDelete {
    pub group: String,
    pub name: String,
}

impl CloudRequest for PublicIpDelete {
    fn validate(&self) -> Result<()> {
        require("public IP name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "public-ip".into(),
            "delete".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ]
    }
}

// ---- network interface ----

#[derive(Debug, Clone)]
pub struct NicShow {
    pub group: String,
    pub name: String,
}

impl CloudRequest for NicShow {
    fn validate(&self) -> Result<()> {
        require("NIC name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "nic".into(),
            "show".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct NicCreate {
    pub group: String,
    pub name: String,
    pub location: String,
    pub vnet: String,
    pub subnet: String,
    pub public_ip: String,
}

impl CloudRequest for NicCreate {
    fn validate(&self) -> Result<()> {
        require("NIC name", &self.name)?;
        require("location", &self.location)?;
        require("vnet name", &self.vnet)?;
        require("subnet name", &self.subnet)?;
        require("public IP name", &self.public_ip)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "nic".into(),
            "create".into(),
            opt("name", &self.name),
            opt("location", &self.location),
            opt("vnet-name", &self.vnet),
            opt("subnet", &self.subnet),
            opt("public-ip-address", &self.public_ip),
            opt("resource-group", &self.group),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct NicDelete {
    pub group: String,
    pub name: String,
}

impl CloudRequest for NicDelete {
    fn validate(&self) -> Result<()> {
        require("NIC name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "network".into(),
            "nic".into(),
            "delete".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ]
    }
}

// ---- VM instance ----

#[derive(Debug, Clone)]
pub struct VmList {
    pub group: String,
}

impl CloudRequest for VmList {
    fn validate(&self) -> Result<()> {
        require("resource group name", &self.group)
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = strings(&["vm", "list", "--show-details"]);
        args.push(opt("resource-group", &self.group));
        args
    }
}

#[derive(Debug, Clone)]
pub struct VmListSizes {
    pub location: String,
}

impl CloudRequest for VmListSizes {
    fn validate(&self) -> Result<()> {
        require("location", &self.location)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "vm".into(),
            "list-sizes".into(),
            opt("location", &self.location),
        ]
    }
}

/// VM creation. Binds to an already-existing network interface and an
/// unmanaged OS disk blob name inside the pool's OS-disk container.
#[derive(Debug, Clone)]
pub struct VmCreate {
    pub group: String,
    pub name: String,
    pub size: String,
    pub image: String,
    pub location: String,
    pub nic: String,
    pub admin_user: String,
    pub ssh_key_path: String,
    pub storage_account: String,
    pub storage_container: String,
    pub os_disk_name: String,
    pub no_wait: bool,
}

impl CloudRequest for VmCreate {
    fn validate(&self) -> Result<()> {
        require("VM name", &self.name)?;
        require("VM size", &self.size)?;
        require("VM image", &self.image)?;
        require("location", &self.location)?;
        require("NIC name", &self.nic)?;
        require("admin user", &self.admin_user)?;
        require("SSH key path", &self.ssh_key_path)?;
        require("storage account", &self.storage_account)?;
        require("storage container", &self.storage_container)?;
        require("OS disk name", &self.os_disk_name)
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "vm".into(),
            "create".into(),
            opt("name", &self.name),
            opt("ssh-key-value", &self.ssh_key_path),
            opt("image", &self.image),
            opt("location", &self.location),
            opt("size", &self.size),
            opt("nics", &self.nic),
            "--use-unmanaged-disk".into(),
            opt("storage-account", &self.storage_account),
            opt("storage-container-name", &self.storage_container),
            opt("os-disk-name", &self.os_disk_name),
            opt("admin-username", &self.admin_user),
            opt("resource-group", &self.group),
        ];
        if self.no_wait {
            args.push("--no-wait".into());
        }
        args
    }
}

#[derive(Debug, Clone)]
pub struct VmStart {
    pub group: String,
    pub name: String,
    pub no_wait: bool,
}

impl CloudRequest for VmStart {
    fn validate(&self) -> Result<()> {
        require("VM name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "vm".into(),
            "start".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ];
        if self.no_wait {
            args.push("--no-wait".into());
        }
        args
    }
}

#[derive(Debug, Clone)]
pub struct VmDeallocate {
    pub group: String,
    pub name: String,
    pub no_wait: bool,
}

impl CloudRequest for VmDeallocate {
    fn validate(&self) -> Result<()> {
        require("VM name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "vm".into(),
            "deallocate".into(),
            opt("name", &self.name),
            opt("resource-group", &self.group),
        ];
        if self.no_wait {
            args.push("--no-wait".into());
        }
        args
    }
}

#[derive(Debug, Clone)]
pub struct VmDelete {
    pub group: String,
    pub name: String,
}

impl CloudRequest for VmDelete {
    fn validate(&self) -> Result<()> {
        require("VM name", &self.name)
    }

    fn to_args(&self) -> Vec<String> {
        vec![
            "vm".into(),
            "delete".into(),
            opt("name", &self.name),
            "--yes".into(),
            opt("resource-group", &self.group),
        ]
    }
}
