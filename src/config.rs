//! Pool settings with builder pattern

use std::path::PathBuf;

/// Default VM image SKU.
pub const DEFAULT_VM_IMAGE: &str = "canonical:UbuntuServer:16.04-LTS:latest";

/// Settings shared by every operation on a pool. Defaults reproduce the
/// well-known container names and file prefixes of the on-disk layout, so
/// two processes pointed at the same pool agree on where everything lives.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Container holding the unmanaged OS disk blobs.
    pub os_container: String,
    /// Container shared by workloads for input/output data.
    pub data_container: String,
    /// Container mirroring the pool SSH keypair.
    pub ssh_key_container: String,
    /// Container mirroring every distributed secret file.
    pub secrets_container: String,
    /// Prefix of access-token filenames.
    pub sas_prefix: String,
    /// Prefix of every pool-scoped local file.
    pub file_prefix: String,
    /// Local directory holding pool SSH keypairs.
    pub ssh_key_dir: PathBuf,
    /// Local directory mirroring the secrets container.
    pub secrets_dir: PathBuf,
    /// Pool-directory subdirectory names and the entry script they carry.
    pub setup_dir: String,
    pub deploy_dir: String,
    pub task_dir: String,
    pub entry_script: String,
    /// Admin user baked into each VM at creation.
    pub vm_user: String,
    /// Image SKU used for new VMs.
    pub vm_image: String,
    /// Storage account redundancy and kind.
    pub storage_sku: String,
    pub storage_kind: String,
    /// Days a newly issued access token stays valid.
    pub sas_expiry_days: i64,
    /// Upper bound on concurrent per-VM workers during fan-out.
    pub fanout_workers: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            os_container: "vhds".to_string(),
            data_container: "data".to_string(),
            ssh_key_container: "sshkeys".to_string(),
            secrets_container: "vmsecrets".to_string(),
            sas_prefix: "sas_storage_container".to_string(),
            file_prefix: "azure_vm_pool".to_string(),
            ssh_key_dir: PathBuf::from("private-pool-ssh-keys"),
            secrets_dir: PathBuf::from("secrets"),
            setup_dir: "setup".to_string(),
            deploy_dir: "deploy".to_string(),
            task_dir: "task".to_string(),
            entry_script: "run.sh".to_string(),
            vm_user: "vm-admin".to_string(),
            vm_image: DEFAULT_VM_IMAGE.to_string(),
            storage_sku: "Standard_LRS".to_string(),
            storage_kind: "Storage".to_string(),
            sas_expiry_days: 14,
            fanout_workers: 4,
        }
    }
}

impl PoolSettings {
    pub fn builder() -> PoolSettingsBuilder {
        PoolSettingsBuilder::default()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.fanout_workers == 0 {
            return Err(crate::Error::Config(
                "fanout_workers must be at least 1".into(),
            ));
        }
        if self.entry_script.is_empty() {
            return Err(crate::Error::Config("entry_script cannot be empty".into()));
        }
        if self.sas_expiry_days < 0 {
            return Err(crate::Error::Config(
                "sas_expiry_days cannot be negative".into(),
            ));
        }
        Ok(())
    }

    /// Filename of the pool's private key, e.g. `azure_vm_pool_demo`.
    pub fn private_key_filename(&self, pool: &str) -> String {
        format!("{}_{}", self.file_prefix, pool)
    }

    /// Filename of the pool's public key, e.g. `azure_vm_pool_demo.pub`.
    pub fn public_key_filename(&self, pool: &str) -> String {
        format!("{}.pub", self.private_key_filename(pool))
    }

    /// Filename of an access-token file scoped to `container`.
    pub fn token_filename(&self, pool: &str, container: &str) -> String {
        format!(
            "{}_{}_{}_{}.txt",
            self.file_prefix, pool, self.sas_prefix, container
        )
    }
}

#[derive(Default)]
pub struct PoolSettingsBuilder {
    settings: PoolSettings,
}

impl PoolSettingsBuilder {
    pub fn vm_image(mut self, image: impl Into<String>) -> Self {
        self.settings.vm_image = image.into();
        self
    }

    pub fn vm_user(mut self, user: impl Into<String>) -> Self {
        self.settings.vm_user = user.into();
        self
    }

    pub fn sas_expiry_days(mut self, days: i64) -> Self {
        self.settings.sas_expiry_days = days;
        self
    }

    pub fn fanout_workers(mut self, workers: usize) -> Self {
        self.settings.fanout_workers = workers;
        self
    }

    pub fn ssh_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.ssh_key_dir = dir.into();
        self
    }

    pub fn secrets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.secrets_dir = dir.into();
        self
    }

    pub fn build(self) -> PoolSettings {
        self.settings
    }

    pub fn build_validated(self) -> crate::Result<PoolSettings> {
        let settings = self.build();
        settings.validate()?;
        Ok(settings)
    }
}
