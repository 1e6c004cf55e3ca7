//! Idempotent resource provisioning against the control plane.
//!
//! Every resource kind gets the same treatment: `exists` asks the control
//! plane, `ensure` creates only what is missing, `delete` skips what is
//! already gone. Re-running a provisioning sequence after a partial
//! failure is therefore safe.

use crate::cloud::cli::CommandRunner;
use crate::cloud::requests::*;
use crate::config::PoolSettings;
use crate::models::{os_disk_name, Vm, VmSize};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub struct Provisioner {
    runner: Arc<dyn CommandRunner>,
    group: String,
    settings: Arc<PoolSettings>,
    // Both lookups are stable for the lifetime of a process, so they are
    // resolved once and cached.
    connection_string: RwLock<Option<String>>,
    location: RwLock<Option<String>>,
}

impl Provisioner {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        group: impl Into<String>,
        settings: Arc<PoolSettings>,
    ) -> Self {
        Self {
            runner,
            group: group.into(),
            settings,
            connection_string: RwLock::new(None),
            location: RwLock::new(None),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    fn dispatch(&self, request: &dyn CloudRequest) -> Result<Option<Value>> {
        request.validate()?;
        self.runner.run(&request.to_args())
    }

    fn dispatch_expecting(&self, request: &dyn CloudRequest, what: &str) -> Result<Value> {
        self.dispatch(request)?
            .ok_or_else(|| Error::Cloud(format!("control plane returned no {}", what)))
    }

    // ---- resource group ----

    pub fn group_exists(&self) -> Result<bool> {
        Ok(self
            .dispatch(&ResourceGroupShow {
                name: self.group.clone(),
            })?
            .is_some())
    }

    pub fn create_group(&self, location: &str) -> Result<Value> {
        self.dispatch_expecting(
            &ResourceGroupCreate {
                name: self.group.clone(),
                location: location.to_string(),
            },
            "resource group",
        )
    }

    /// Region of the pool's resource group.
    pub fn location(&self) -> Result<String> {
        if let Some(location) = self.location.read().clone() {
            return Ok(location);
        }
        let group = self
            .dispatch(&ResourceGroupShow {
                name: self.group.clone(),
            })?
            .ok_or_else(|| Error::PoolNotFound(self.group.clone()))?;
        let location = group["location"]
            .as_str()
            .ok_or_else(|| Error::Cloud("resource group has no location".to_string()))?
            .to_string();
        *self.location.write() = Some(location.clone());
        Ok(location)
    }

    // ---- virtual network ----

    pub fn ensure_vnet(&self) -> Result<Value> {
        // The vnet and its single subnet share the pool name.
        let show = VnetShow {
            group: self.group.clone(),
            name: self.group.clone(),
        };
        if let Some(existing) = self.dispatch(&show)? {
            tracing::info!(vnet = %self.group, "virtual network already exists, skipping create");
            return Ok(existing);
        }
        self.dispatch_expecting(
            &VnetCreate {
                group: self.group.clone(),
                name: self.group.clone(),
                subnet: self.group.clone(),
                location: self.location()?,
            },
            "virtual network",
        )
    }

    // ---- storage account ----

    pub fn ensure_storage_account(&self) -> Result<Value> {
        let show = StorageAccountShow {
            group: self.group.clone(),
            name: self.group.clone(),
        };
        if let Some(existing) = self.dispatch(&show)? {
            tracing::info!(account = %self.group, "storage account already exists, skipping create");
            return Ok(existing);
        }
        self.dispatch_expecting(
            &StorageAccountCreate {
                group: self.group.clone(),
                name: self.group.clone(),
                location: self.location()?,
                sku: self.settings.storage_sku.clone(),
                kind: self.settings.storage_kind.clone(),
            },
            "storage account",
        )
    }

    pub fn connection_string(&self) -> Result<String> {
        if let Some(cs) = self.connection_string.read().clone() {
            return Ok(cs);
        }
        let value = self.dispatch_expecting(
            &ConnectionStringShow {
                group: self.group.clone(),
                account: self.group.clone(),
            },
            "connection string",
        )?;
        let cs = value["connectionString"]
            .as_str()
            .ok_or_else(|| Error::Cloud("malformed connection string response".to_string()))?
            .to_string();
        *self.connection_string.write() = Some(cs.clone());
        Ok(cs)
    }

    // ---- storage containers ----

    pub fn container_exists(&self, name: &str) -> Result<bool> {
        let value = self.dispatch_expecting(
            &ContainerExists {
                name: name.to_string(),
                connection_string: self.connection_string()?,
            },
            "container existence",
        )?;
        Ok(value["exists"].as_bool().unwrap_or(false))
    }

    pub fn ensure_container(&self, name: &str) -> Result<()> {
        if self.container_exists(name)? {
            return Ok(());
        }
        self.dispatch(&ContainerCreate {
            name: name.to_string(),
            connection_string: self.connection_string()?,
        })?;
        tracing::info!(container = name, "storage container created");
        Ok(())
    }

    pub fn delete_container(&self, name: &str) -> Result<()> {
        if !self.container_exists(name)? {
            return Ok(());
        }
        self.dispatch(&ContainerDelete {
            name: name.to_string(),
            connection_string: self.connection_string()?,
        })?;
        Ok(())
    }

    pub fn generate_container_sas(&self, container: &str, expiry: &str) -> Result<String> {
        let value = self.dispatch_expecting(
            &ContainerSasGenerate {
                name: container.to_string(),
                connection_string: self.connection_string()?,
                permissions: "lrwd".to_string(),
                expiry: expiry.to_string(),
            },
            "access token",
        )?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Cloud("malformed access token response".to_string()))
    }

    // ---- blobs ----

    pub fn blob_exists(&self, container: &str, name: &str) -> Result<bool> {
        let value = self.dispatch_expecting(
            &BlobExists {
                container: container.to_string(),
                name: name.to_string(),
                connection_string: self.connection_string()?,
            },
            "blob existence",
        )?;
        Ok(value["exists"].as_bool().unwrap_or(false))
    }

    /// Upload a local file, creating the container if absent.
    pub fn upload_blob(&self, container: &str, file: &Path, name: &str) -> Result<()> {
        self.ensure_container(container)?;
        self.dispatch(&BlobUpload {
            container: container.to_string(),
            file: file.display().to_string(),
            name: name.to_string(),
            connection_string: self.connection_string()?,
        })?;
        Ok(())
    }

    /// Download a blob to a local file, creating parent directories.
    pub fn download_blob(&self, container: &str, file: &Path, name: &str) -> Result<()> {
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.dispatch(&BlobDownload {
            container: container.to_string(),
            file: file.display().to_string(),
            name: name.to_string(),
            connection_string: self.connection_string()?,
        })?;
        Ok(())
    }

    pub fn delete_blob(&self, container: &str, name: &str) -> Result<()> {
        if !self.blob_exists(container, name)? {
            return Ok(());
        }
        self.dispatch(&BlobDelete {
            container: container.to_string(),
            name: name.to_string(),
            connection_string: self.connection_string()?,
        })?;
        Ok(())
    }

    pub fn list_blobs(&self, container: &str) -> Result<Vec<String>> {
        let value = self
            .dispatch(&BlobList {
                container: container.to_string(),
                connection_string: self.connection_string()?,
            })?
            .unwrap_or(Value::Array(Vec::new()));
        let blobs = value.as_array().cloned().unwrap_or_default();
        Ok(blobs
            .iter()
            .filter_map(|b| b["name"].as_str().map(str::to_string))
            .collect())
    }

    // ---- OS disk blobs ----

    pub fn os_disk_blob_exists(&self, vm_name: &str) -> Result<bool> {
        self.blob_exists(
            &self.settings.os_container,
            &format!("{}.vhd", os_disk_name(vm_name)),
        )
    }

    pub fn delete_os_disk_blob(&self, vm_name: &str) -> Result<()> {
        self.delete_blob(
            &self.settings.os_container,
            &format!("{}.vhd", os_disk_name(vm_name)),
        )
    }

    // ---- public addresses ----

    pub fn public_ip_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .dispatch(&PublicIpShow {
                group: self.group.clone(),
                name: name.to_string(),
            })?
            .is_some())
    }

    pub fn ensure_public_ip(&self, name: &str) -> Result<Value> {
        let show = PublicIpShow {
            group: self.group.clone(),
            name: name.to_string(),
        };
        if let Some(existing) = self.dispatch(&show)? {
            tracing::info!(ip = name, "public IP already exists, skipping create");
            return Ok(existing);
        }
        self.dispatch_expecting(
            &PublicIpCreate {
                group: self.group.clone(),
                name: name.to_string(),
                location: self.location()?,
                dns_name: name.to_string(),
            },
            "public IP",
        )
    }

    pub fn delete_public_ip(&self, name: &str) -> Result<()> {
        if !self.public_ip_exists(name)? {
            return Ok(());
        }
        self.dispatch(&PublicIpDelete {
            group: self.group.clone(),
            name: name.to_string(),
        })?;
        Ok(())
    }

    // ---- network interfaces ----

    pub fn nic_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .dispatch(&NicShow {
                group: self.group.clone(),
                name: name.to_string(),
            })?
            .is_some())
    }

    pub fn ensure_nic(&self, name: &str) -> Result<Value> {
        let show = NicShow {
            group: self.group.clone(),
            name: name.to_string(),
        };
        if let Some(existing) = self.dispatch(&show)? {
            tracing::info!(nic = name, "NIC already exists, skipping create");
            return Ok(existing);
        }
        self.dispatch_expecting(
            &NicCreate {
                group: self.group.clone(),
                name: name.to_string(),
                location: self.location()?,
                vnet: self.group.clone(),
                subnet: self.group.clone(),
                // The address shares the VM's name by convention.
                public_ip: name.to_string(),
            },
            "NIC",
        )
    }

    pub fn delete_nic(&self, name: &str) -> Result<()> {
        if !self.nic_exists(name)? {
            return Ok(());
        }
        self.dispatch(&NicDelete {
            group: self.group.clone(),
            name: name.to_string(),
        })?;
        Ok(())
    }

    // ---- VM instances ----

    pub fn list_vms(&self) -> Result<Vec<Vm>> {
        let value = self
            .dispatch(&VmList {
                group: self.group.clone(),
            })?
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(value)?)
    }

    pub fn list_sizes(&self, location: &str) -> Result<Vec<VmSize>> {
        let value = self
            .dispatch(&VmListSizes {
                location: location.to_string(),
            })?
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(value)?)
    }

    pub fn create_vm(
        &self,
        name: &str,
        size: &str,
        ssh_public_key: &Path,
        no_wait: bool,
    ) -> Result<()> {
        self.dispatch(&VmCreate {
            group: self.group.clone(),
            name: name.to_string(),
            size: size.to_string(),
            image: self.settings.vm_image.clone(),
            location: self.location()?,
            nic: name.to_string(),
            admin_user: self.settings.vm_user.clone(),
            ssh_key_path: ssh_public_key.display().to_string(),
            storage_account: self.group.clone(),
            storage_container: self.settings.os_container.clone(),
            os_disk_name: os_disk_name(name),
            no_wait,
        })?;
        Ok(())
    }

    pub fn start_vm(&self, name: &str, no_wait: bool) -> Result<()> {
        self.dispatch(&VmStart {
            group: self.group.clone(),
            name: name.to_string(),
            no_wait,
        })?;
        Ok(())
    }

    pub fn deallocate_vm(&self, name: &str, no_wait: bool) -> Result<()> {
        self.dispatch(&VmDeallocate {
            group: self.group.clone(),
            name: name.to_string(),
            no_wait,
        })?;
        Ok(())
    }

    pub fn delete_vm(&self, name: &str) -> Result<()> {
        self.dispatch(&VmDelete {
            group: self.group.clone(),
            name: name.to_string(),
        })?;
        Ok(())
    }
}
