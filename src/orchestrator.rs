//! Pool lifecycle orchestration.
//!
//! Reads observed pool state from the provisioner, decides what work is
//! outstanding, and fans per-VM steps out through the remote executor with
//! credentials from the secret store. Fan-out is all-VMs-always: one VM
//! failing never halts or rolls back the others, and every pass ends with
//! an aggregated per-VM report and a tabular snapshot of the pool.

use crate::cloud::{CommandRunner, Provisioner};
use crate::config::PoolSettings;
use crate::models::{PoolState, PowerState, SizeFilter, Vm, VmSize};
use crate::naming;
use crate::remote::{RemoteExecutor, SshTransport, Transport};
use crate::report::{self, FanoutReport, VmOutcome};
use crate::secrets::{AccessToken, SecretStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// How cloud-affecting calls wait for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Block until the control plane confirms each operation.
    #[default]
    Wait,
    /// Issue each request and return immediately. The caller is
    /// responsible for polling pool status before dependent operations;
    /// there is no completion callback.
    NoWait,
}

impl DispatchMode {
    pub fn no_wait(self) -> bool {
        matches!(self, DispatchMode::NoWait)
    }
}

/// Options for `create-pool`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Create the resource group if it does not exist. Requires `location`.
    pub force: bool,
    pub location: Option<String>,
    pub mode: DispatchMode,
}

pub struct PoolOrchestrator {
    pool: String,
    settings: Arc<PoolSettings>,
    provisioner: Arc<Provisioner>,
    secrets: SecretStore,
    executor: RemoteExecutor,
}

impl PoolOrchestrator {
    pub fn new(
        pool: impl Into<String>,
        settings: PoolSettings,
        runner: Arc<dyn CommandRunner>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        settings.validate()?;
        let pool = pool.into();
        let settings = Arc::new(settings);
        let provisioner = Arc::new(Provisioner::new(runner, pool.clone(), settings.clone()));
        let secrets = SecretStore::new(provisioner.clone(), settings.clone(), pool.clone());

        Ok(Self {
            executor: RemoteExecutor::new(transport),
            pool,
            settings,
            provisioner,
            secrets,
        })
    }

    /// Construct with the standard SSH transport, keyed by the pool's
    /// private key.
    pub fn with_ssh_transport(
        pool: impl Into<String>,
        settings: PoolSettings,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let pool = pool.into();
        let key_path = settings
            .ssh_key_dir
            .join(settings.private_key_filename(&pool));
        let transport = Arc::new(SshTransport::new(settings.vm_user.clone(), key_path));
        Self::new(pool, settings, runner, transport)
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Observed state of the pool; never persisted, always re-derived.
    pub fn pool_state(&self) -> Result<PoolState> {
        if !self.provisioner.group_exists()? {
            return Ok(PoolState::Absent);
        }
        let vms = self.provisioner.list_vms()?;
        if vms.is_empty() {
            Ok(PoolState::Empty)
        } else {
            Ok(PoolState::Populated(vms.len()))
        }
    }

    // ---- queries ----

    pub fn show_pool(&self) -> Result<Vec<Vm>> {
        if !self.provisioner.group_exists()? {
            return Err(Error::PoolNotFound(self.pool.clone()));
        }
        let vms = self.provisioner.list_vms()?;
        self.print_pool_table(&vms);
        Ok(vms)
    }

    pub fn list_sizes(&self, location: Option<&str>, filter: &SizeFilter) -> Result<Vec<VmSize>> {
        let location = match location {
            Some(location) => location.to_string(),
            None => self.provisioner.location()?,
        };
        let sizes: Vec<VmSize> = self
            .provisioner
            .list_sizes(&location)?
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        println!(
            "VM sizes available in '{}':\n{}",
            location,
            report::size_table(&sizes)
        );
        Ok(sizes)
    }

    // ---- pool creation ----

    pub fn create_pool(
        &self,
        num_vms: u32,
        size: &str,
        options: &CreateOptions,
    ) -> Result<FanoutReport> {
        naming::validate_pool_name(&self.pool)?;
        if size.is_empty() {
            return Err(Error::Config("VM size is required".to_string()));
        }

        match self.pool_state()? {
            PoolState::Absent => match (options.force, options.location.as_deref()) {
                (true, Some(location)) => {
                    tracing::info!(pool = %self.pool, location, "creating resource group");
                    self.provisioner.create_group(location)?;
                }
                _ => return Err(Error::PoolNotFound(self.pool.clone())),
            },
            PoolState::Populated(_) => {
                self.print_pool_table(&self.provisioner.list_vms()?);
                return Err(Error::PoolAlreadyPopulated(self.pool.clone()));
            }
            PoolState::Empty => {}
        }

        let started = Instant::now();
        tracing::info!(
            pool = %self.pool,
            num_vms,
            image = %self.settings.vm_image,
            "creating pool"
        );

        tracing::info!(account = %self.pool, "ensuring storage account exists");
        self.provisioner.ensure_storage_account()?;

        tracing::info!(pool = %self.pool, "creating pool keypair");
        let keypair = self.secrets.generate_keypair()?;
        self.secrets.publish_keypair()?;

        tracing::info!(container = %self.settings.data_container, "ensuring data container exists");
        self.provisioner
            .ensure_container(&self.settings.data_container)?;

        tracing::info!(vnet = %self.pool, "ensuring virtual network exists");
        self.provisioner.ensure_vnet()?;

        let indices: Vec<u32> = (0..num_vms).collect();
        let report = self.fan_out(
            "create-pool",
            &indices,
            |i| naming::vm_name(&self.pool, *i),
            |i| {
                self.create_vm_at(*i, size, &keypair.public_key, options.mode)
                    .map_err(|e| e.to_string())
            },
        );

        let vms = self.provisioner.list_vms()?;
        tracing::info!("clearing stale host identities");
        for vm in &vms {
            self.executor.forget_host_identity(&vm.fqdn());
        }
        tracing::info!("probing connectivity to each VM");
        for vm in &vms {
            if !self.executor.probe_reachable(&vm.fqdn()) {
                tracing::warn!(vm = %vm.name, "VM not reachable yet");
            }
        }

        self.print_pool_table(&vms);
        tracing::info!(
            pool = %self.pool,
            elapsed = %report::format_elapsed(started.elapsed()),
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Provision one VM slot: public address, then the interface bound to
    /// it, then a clean disk name, then the instance itself.
    fn create_vm_at(
        &self,
        index: u32,
        size: &str,
        public_key: &Path,
        mode: DispatchMode,
    ) -> Result<()> {
        let name = naming::vm_name(&self.pool, index);

        self.provisioner.ensure_public_ip(&name)?;
        self.provisioner.ensure_nic(&name)?;

        if self.provisioner.os_disk_blob_exists(&name)? {
            tracing::info!(vm = %name, "deleting stale OS disk blob");
            self.provisioner.delete_os_disk_blob(&name)?;
        }

        if mode.no_wait() {
            tracing::info!(vm = %name, "initiating VM creation");
        } else {
            tracing::info!(vm = %name, "creating VM");
        }
        self.provisioner
            .create_vm(&name, size, public_key, mode.no_wait())
    }

    // ---- workload operations ----

    pub fn setup_pool(&self, pool_dir: &Path, mode: DispatchMode) -> Result<FanoutReport> {
        let vms = self.require_populated()?;
        let started = Instant::now();
        tracing::info!(pool = %self.pool, count = vms.len(), "setting up pool");

        let source = pool_dir.join(&self.settings.setup_dir);
        let report = self.fan_out(
            "setup-pool",
            &vms,
            |vm| vm.name.clone(),
            |vm| self.run_directory_on_vm(vm, &source, &self.settings.setup_dir, mode.no_wait()),
        );

        if mode.no_wait() {
            tracing::info!(
                "setup launched on each VM; attach to the remote session to check progress"
            );
        } else {
            tracing::info!(
                elapsed = %report::format_elapsed(started.elapsed()),
                "{}",
                report.summary()
            );
        }
        Ok(report)
    }

    pub fn deploy_task(&self, pool_dir: &Path) -> Result<FanoutReport> {
        let vms = self.require_populated()?;
        let started = Instant::now();

        // Idempotent pre-clean: stop whatever is still running first.
        self.kill_task()?;

        tracing::info!(pool = %self.pool, count = vms.len(), "deploying task");
        let source = pool_dir.join(&self.settings.task_dir);
        let report = self.fan_out(
            "deploy-task",
            &vms,
            |vm| vm.name.clone(),
            |vm| {
                if self
                    .executor
                    .copy_directory(&vm.fqdn(), &source, &self.settings.task_dir)
                {
                    Ok(())
                } else {
                    Err(format!("copy of '{}' failed", source.display()))
                }
            },
        );

        tracing::info!(
            elapsed = %report::format_elapsed(started.elapsed()),
            "task deployed; run 'start-task' to launch it"
        );
        Ok(report)
    }

    pub fn start_task(&self) -> Result<FanoutReport> {
        let vms = self.require_populated()?;
        tracing::info!(pool = %self.pool, count = vms.len(), "starting task");

        let script = format!("{}/{}", self.settings.task_dir, self.settings.entry_script);
        let report = self.fan_out(
            "start-task",
            &vms,
            |vm| vm.name.clone(),
            |vm| {
                let host = vm.fqdn();
                let mut failures = Vec::new();
                if !self.executor.make_executable(&host, &script) {
                    failures.push(format!("chmod of '{}' failed", script));
                }
                if !self.executor.run_command(&host, &script, true) {
                    failures.push(format!("launch of '{}' failed", script));
                }
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(failures.join("; "))
                }
            },
        );
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    pub fn kill_task(&self) -> Result<FanoutReport> {
        let vms = self.require_populated()?;
        tracing::info!(pool = %self.pool, count = vms.len(), "killing task");

        let report = self.fan_out(
            "kill-task",
            &vms,
            |vm| vm.name.clone(),
            |vm| {
                if self.executor.kill_all_detached(&vm.fqdn()) {
                    Ok(())
                } else {
                    Err("no detached session killed".to_string())
                }
            },
        );
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    // ---- power operations ----

    pub fn start_all(&self, mode: DispatchMode) -> Result<FanoutReport> {
        let vms = self.require_populated()?;
        let started = Instant::now();
        tracing::info!(pool = %self.pool, count = vms.len(), "starting pool");

        let report = self.fan_out(
            "start-all",
            &vms,
            |vm| vm.name.clone(),
            |vm| {
                if vm.power_state == PowerState::Running {
                    tracing::info!(vm = %vm.name, "already running, skipping");
                    return Ok(());
                }
                self.provisioner
                    .start_vm(&vm.name, mode.no_wait())
                    .map_err(|e| e.to_string())
            },
        );

        self.print_pool_table(&self.provisioner.list_vms()?);
        if mode.no_wait() {
            tracing::info!("startup initiated; run 'show-pool' to check completion");
        } else {
            tracing::info!(
                elapsed = %report::format_elapsed(started.elapsed()),
                "{}",
                report.summary()
            );
        }
        Ok(report)
    }

    pub fn stop_all(&self, mode: DispatchMode) -> Result<FanoutReport> {
        let vms = self.require_populated()?;
        let started = Instant::now();
        tracing::info!(pool = %self.pool, count = vms.len(), "stopping pool");

        let report = self.fan_out(
            "stop-all",
            &vms,
            |vm| vm.name.clone(),
            |vm| {
                if vm.power_state == PowerState::Deallocated {
                    tracing::info!(vm = %vm.name, "already deallocated, skipping");
                    return Ok(());
                }
                self.provisioner
                    .deallocate_vm(&vm.name, mode.no_wait())
                    .map_err(|e| e.to_string())
            },
        );

        self.print_pool_table(&self.provisioner.list_vms()?);
        if mode.no_wait() {
            tracing::info!("shutdown initiated; run 'show-pool' to check completion");
        } else {
            tracing::info!(
                elapsed = %report::format_elapsed(started.elapsed()),
                "{}",
                report.summary()
            );
        }
        Ok(report)
    }

    // ---- pool deletion ----

    /// Delete every VM and its attached resources, then the OS-disk
    /// container. `confirm` is consulted once before any side effect;
    /// declining aborts cleanly.
    pub fn delete_pool(&self, confirm: impl FnOnce(&[Vm]) -> bool) -> Result<FanoutReport> {
        if !self.provisioner.group_exists()? {
            return Err(Error::PoolNotFound(self.pool.clone()));
        }
        let vms = self.provisioner.list_vms()?;
        self.print_pool_table(&vms);

        if vms.is_empty() {
            tracing::info!(pool = %self.pool, "no VMs in pool");
            return Ok(FanoutReport::empty("delete-pool"));
        }
        if !confirm(&vms) {
            tracing::info!("pool delete cancelled");
            return Err(Error::Aborted);
        }

        let started = Instant::now();
        tracing::info!(pool = %self.pool, count = vms.len(), "deleting pool");
        let report = self.fan_out(
            "delete-pool",
            &vms,
            |vm| vm.name.clone(),
            |vm| self.delete_vm_resources(vm),
        );

        tracing::info!(container = %self.settings.os_container, "deleting OS disk container");
        self.provisioner
            .delete_container(&self.settings.os_container)?;

        self.print_pool_table(&self.provisioner.list_vms()?);
        tracing::info!(
            pool = %self.pool,
            elapsed = %report::format_elapsed(started.elapsed()),
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Tear down one VM and everything attached to it, attempting every
    /// resource even when an earlier one fails.
    fn delete_vm_resources(&self, vm: &Vm) -> std::result::Result<(), String> {
        let mut failures = Vec::new();

        tracing::info!(vm = %vm.name, "deleting VM");
        if let Err(e) = self.provisioner.delete_vm(&vm.name) {
            failures.push(format!("VM: {}", e));
        }
        tracing::info!(vm = %vm.name, "deleting NIC");
        if let Err(e) = self.provisioner.delete_nic(&vm.name) {
            failures.push(format!("NIC: {}", e));
        }
        tracing::info!(vm = %vm.name, "deleting public IP");
        if let Err(e) = self.provisioner.delete_public_ip(&vm.name) {
            failures.push(format!("public IP: {}", e));
        }
        tracing::info!(vm = %vm.name, "deleting OS disk blob");
        if let Err(e) = self.provisioner.delete_os_disk_blob(&vm.name) {
            failures.push(format!("OS disk blob: {}", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    // ---- secrets ----

    pub fn refresh_sas(&self) -> Result<AccessToken> {
        if !self.provisioner.group_exists()? {
            return Err(Error::PoolNotFound(self.pool.clone()));
        }
        tracing::info!(pool = %self.pool, "refreshing access token");
        self.secrets.issue_access_token()
    }

    pub fn get_ssh(&self) -> Result<FanoutReport> {
        if !self.provisioner.group_exists()? {
            return Err(Error::PoolNotFound(self.pool.clone()));
        }
        tracing::info!(pool = %self.pool, "fetching pool keypair");
        self.secrets.fetch_keypair()?;

        let vms = self.provisioner.list_vms()?;
        tracing::info!("clearing stale host identities");
        for vm in &vms {
            self.executor.forget_host_identity(&vm.fqdn());
        }

        tracing::info!("probing connectivity to each VM");
        let report = self.fan_out(
            "get-ssh",
            &vms,
            |vm| vm.name.clone(),
            |vm| {
                if self.executor.probe_reachable(&vm.fqdn()) {
                    Ok(())
                } else {
                    Err("not reachable".to_string())
                }
            },
        );
        Ok(report)
    }

    pub fn get_secrets(&self) -> Result<Vec<PathBuf>> {
        if !self.provisioner.group_exists()? {
            return Err(Error::PoolNotFound(self.pool.clone()));
        }
        tracing::info!(pool = %self.pool, "fetching pool secrets");
        self.secrets.fetch_all()
    }

    // ---- local pool directory ----

    /// Create the `setup/`, `deploy/` and `task/` subdirectories and
    /// mirror the local secrets directory into each, replacing any stale
    /// copy so no secret outlives its source.
    pub fn init_directory(&self, pool_dir: &Path) -> Result<()> {
        tracing::info!(dir = %pool_dir.display(), "initialising pool directory");
        std::fs::create_dir_all(pool_dir)?;

        let secrets_name = self
            .settings
            .secrets_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "secrets".into());

        for sub in [
            &self.settings.deploy_dir,
            &self.settings.setup_dir,
            &self.settings.task_dir,
        ] {
            let dir = pool_dir.join(sub);
            std::fs::create_dir_all(&dir)?;

            if !self.settings.secrets_dir.is_dir() {
                tracing::warn!(
                    secrets = %self.settings.secrets_dir.display(),
                    "no local secrets directory; run 'get-secrets' first"
                );
                continue;
            }
            let dest = dir.join(&secrets_name);
            if dest.exists() {
                std::fs::remove_dir_all(&dest)?;
            }
            copy_dir_recursive(&self.settings.secrets_dir, &dest)?;
        }
        Ok(())
    }

    // ---- shared plumbing ----

    fn require_populated(&self) -> Result<Vec<Vm>> {
        if !self.provisioner.group_exists()? {
            return Err(Error::PoolNotFound(self.pool.clone()));
        }
        let vms = self.provisioner.list_vms()?;
        if vms.is_empty() {
            return Err(Error::PoolEmpty(self.pool.clone()));
        }
        Ok(vms)
    }

    fn print_pool_table(&self, vms: &[Vm]) {
        println!("{}", report::vm_table(&self.pool, vms));
    }

    /// Upload a directory to the VM, mark its entry script executable and
    /// run it. All three steps are attempted even after a failure so the
    /// outcome lists everything that went wrong.
    fn run_directory_on_vm(
        &self,
        vm: &Vm,
        source: &Path,
        remote_dir: &str,
        detach: bool,
    ) -> std::result::Result<(), String> {
        let host = vm.fqdn();
        let script = format!("{}/{}", remote_dir, self.settings.entry_script);
        let mut failures = Vec::new();

        if !self.executor.copy_directory(&host, source, remote_dir) {
            failures.push(format!("copy of '{}' failed", source.display()));
        }
        if !self.executor.make_executable(&host, &script) {
            failures.push(format!("chmod of '{}' failed", script));
        }
        if !self.executor.run_command(&host, &script, detach) {
            failures.push(format!("run of '{}' failed", script));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    /// Apply `step` to every item on a bounded pool of worker threads and
    /// collect one outcome per item, in item order. Item failures are
    /// recorded, never propagated.
    fn fan_out<T, N, F>(&self, operation: &str, items: &[T], name: N, step: F) -> FanoutReport
    where
        T: Sync,
        N: Fn(&T) -> String + Sync,
        F: Fn(&T) -> std::result::Result<(), String> + Sync,
    {
        let collected: Mutex<Vec<(usize, VmOutcome)>> = Mutex::new(Vec::with_capacity(items.len()));
        let cursor = AtomicUsize::new(0);
        let workers = self.settings.fanout_workers.min(items.len().max(1));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(i) else { break };
                    let label = name(item);
                    let outcome = match step(item) {
                        Ok(()) => VmOutcome::ok(label),
                        Err(error) => {
                            tracing::warn!(vm = %label, operation, error = %error, "step failed");
                            VmOutcome::failed(label, error)
                        }
                    };
                    collected.lock().push((i, outcome));
                });
            }
        });

        let mut entries = collected.into_inner();
        entries.sort_by_key(|(i, _)| *i);
        FanoutReport::new(operation, entries.into_iter().map(|(_, o)| o).collect())
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
