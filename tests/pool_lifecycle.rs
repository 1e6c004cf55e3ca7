//! End-to-end pool lifecycle tests against an in-memory control plane and
//! a recording SSH transport.

use azpool::cloud::CommandRunner;
use azpool::models::Vm;
use azpool::orchestrator::{CreateOptions, DispatchMode, PoolOrchestrator};
use azpool::remote::Transport;
use azpool::{Error, PoolSettings, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct VmRec {
    size: String,
    power: String,
}

#[derive(Default)]
struct CloudState {
    group_location: Option<String>,
    storage_account: bool,
    vnet: bool,
    containers: HashSet<String>,
    blobs: HashMap<String, HashSet<String>>,
    public_ips: HashSet<String>,
    nics: HashSet<String>,
    vms: BTreeMap<String, VmRec>,
    container_deletes: HashMap<String, usize>,
}

/// In-memory control plane that interprets the same argument vectors the
/// real CLI client would dispatch.
#[derive(Default)]
struct FakeCloud {
    state: Mutex<CloudState>,
}

fn opt(args: &[String], key: &str) -> Option<String> {
    let prefix = format!("--{}=", key);
    args.iter()
        .find_map(|a| a.strip_prefix(&prefix).map(str::to_string))
}

impl FakeCloud {
    fn seed_group(&self, location: &str) {
        self.state.lock().group_location = Some(location.to_string());
    }

    fn vm_names(&self) -> Vec<String> {
        self.state.lock().vms.keys().cloned().collect()
    }

    fn container_delete_count(&self, name: &str) -> usize {
        *self
            .state
            .lock()
            .container_deletes
            .get(name)
            .unwrap_or(&0)
    }

    fn blob_names(&self, container: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .blobs
            .get(container)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn has_storage_account(&self) -> bool {
        self.state.lock().storage_account
    }
}

impl CommandRunner for FakeCloud {
    fn run(&self, args: &[String]) -> Result<Option<Value>> {
        let mut state = self.state.lock();
        let location = state
            .group_location
            .clone()
            .unwrap_or_else(|| "westeurope".to_string());

        let verbs: Vec<&str> = args
            .iter()
            .take_while(|a| !a.starts_with("--"))
            .map(String::as_str)
            .collect();

        let value = match verbs.as_slice() {
            ["group", "show"] => state
                .group_location
                .clone()
                .map(|l| json!({"name": opt(args, "name"), "location": l})),
            ["group", "create"] => {
                state.group_location = opt(args, "location");
                Some(json!({"name": opt(args, "name")}))
            }
            ["network", "vnet", "show"] => state.vnet.then(|| json!({"name": opt(args, "name")})),
            ["network", "vnet", "create"] => {
                state.vnet = true;
                Some(json!({"name": opt(args, "name")}))
            }
            ["storage", "account", "show"] => state
                .storage_account
                .then(|| json!({"name": opt(args, "name")})),
            ["storage", "account", "create"] => {
                state.storage_account = true;
                Some(json!({"name": opt(args, "name")}))
            }
            ["storage", "account", "show-connection-string"] => {
                Some(json!({"connectionString": "fake-connection-string"}))
            }
            ["storage", "container", "exists"] => {
                let name = opt(args, "name").unwrap_or_default();
                Some(json!({"exists": state.containers.contains(&name)}))
            }
            ["storage", "container", "create"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.containers.insert(name.clone());
                Some(json!({"created": true}))
            }
            ["storage", "container", "delete"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.containers.remove(&name);
                state.blobs.remove(&name);
                *state.container_deletes.entry(name).or_insert(0) += 1;
                Some(json!({"deleted": true}))
            }
            ["storage", "container", "generate-sas"] => {
                Some(Value::String("se=fake&sig=fake-signature".to_string()))
            }
            ["storage", "blob", "exists"] => {
                let container = opt(args, "container-name").unwrap_or_default();
                let name = opt(args, "name").unwrap_or_default();
                let exists = state
                    .blobs
                    .get(&container)
                    .map(|b| b.contains(&name))
                    .unwrap_or(false);
                Some(json!({"exists": exists}))
            }
            ["storage", "blob", "upload"] => {
                let container = opt(args, "container-name").unwrap_or_default();
                let name = opt(args, "name").unwrap_or_default();
                state.blobs.entry(container).or_default().insert(name);
                Some(json!({}))
            }
            ["storage", "blob", "download"] => {
                let file = opt(args, "file").unwrap_or_default();
                let name = opt(args, "name").unwrap_or_default();
                if let Some(parent) = Path::new(&file).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&file, format!("content of {}", name))?;
                Some(json!({}))
            }
            ["storage", "blob", "delete"] => {
                let container = opt(args, "container-name").unwrap_or_default();
                let name = opt(args, "name").unwrap_or_default();
                if let Some(blobs) = state.blobs.get_mut(&container) {
                    blobs.remove(&name);
                }
                Some(json!({}))
            }
            ["storage", "blob", "list"] => {
                let container = opt(args, "container-name").unwrap_or_default();
                let blobs: Vec<Value> = state
                    .blobs
                    .get(&container)
                    .map(|b| b.iter().map(|n| json!({"name": n})).collect())
                    .unwrap_or_default();
                Some(Value::Array(blobs))
            }
            ["network", "public-ip", "show"] => {
                let name = opt(args, "name").unwrap_or_default();
                state
                    .public_ips
                    .contains(&name)
                    .then(|| json!({"name": name}))
            }
            ["network", "public-ip", "create"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.public_ips.insert(name.clone());
                Some(json!({"name": name}))
            }
            ["network", "public-ip", "delete"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.public_ips.remove(&name);
                Some(json!({}))
            }
            ["network", "nic", "show"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.nics.contains(&name).then(|| json!({"name": name}))
            }
            ["network", "nic", "create"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.nics.insert(name.clone());
                Some(json!({"name": name}))
            }
            ["network", "nic", "delete"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.nics.remove(&name);
                Some(json!({}))
            }
            ["vm", "list"] => {
                let vms: Vec<Value> = state
                    .vms
                    .iter()
                    .map(|(name, rec)| {
                        json!({
                            "name": name,
                            "vmId": format!("id-{}", name),
                            "location": location,
                            "hardwareProfile": {"vmSize": rec.size},
                            "storageProfile": {"imageReference": {
                                "publisher": "canonical",
                                "offer": "UbuntuServer",
                                "sku": "16.04-LTS",
                                "version": "latest"
                            }},
                            "provisioningState": "Succeeded",
                            "powerState": rec.power,
                        })
                    })
                    .collect();
                Some(Value::Array(vms))
            }
            ["vm", "list-sizes"] => Some(json!([
                {"name": "Standard_DS1_v2", "numberOfCores": 1, "memoryInMb": 3584,
                 "osDiskSizeInMb": 1047552, "resourceDiskSizeInMb": 7168, "maxDataDiskCount": 4},
                {"name": "Standard_DS2_v2", "numberOfCores": 2, "memoryInMb": 7168,
                 "osDiskSizeInMb": 1047552, "resourceDiskSizeInMb": 14336, "maxDataDiskCount": 8},
            ])),
            ["vm", "create"] => {
                let name = opt(args, "name").unwrap_or_default();
                let size = opt(args, "size").unwrap_or_default();
                let disk = opt(args, "os-disk-name").unwrap_or_default();
                let container = opt(args, "storage-container-name").unwrap_or_default();
                // The control plane creates the disk container on demand.
                state.containers.insert(container.clone());
                state
                    .blobs
                    .entry(container)
                    .or_default()
                    .insert(format!("{}.vhd", disk));
                state.vms.insert(
                    name.clone(),
                    VmRec {
                        size,
                        power: "VM running".to_string(),
                    },
                );
                Some(json!({"name": name}))
            }
            ["vm", "start"] => {
                let name = opt(args, "name").unwrap_or_default();
                if let Some(rec) = state.vms.get_mut(&name) {
                    rec.power = "VM running".to_string();
                }
                Some(json!({}))
            }
            ["vm", "deallocate"] => {
                let name = opt(args, "name").unwrap_or_default();
                if let Some(rec) = state.vms.get_mut(&name) {
                    rec.power = "VM deallocated".to_string();
                }
                Some(json!({}))
            }
            ["vm", "delete"] => {
                let name = opt(args, "name").unwrap_or_default();
                state.vms.remove(&name);
                Some(json!({}))
            }
            other => panic!("unexpected control-plane command: {:?}", other),
        };
        Ok(value)
    }
}

/// Transport that records calls and can be told to fail for given hosts.
#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<String>>,
    failing_hosts: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().insert(host.to_string());
    }
}

impl Transport for RecordingTransport {
    fn exec(&self, host: &str, command: &str) -> Result<bool> {
        self.calls.lock().push(format!("exec {} {}", host, command));
        Ok(!self.failing_hosts.lock().contains(host))
    }

    fn copy_dir(&self, host: &str, local: &Path, remote: &str) -> Result<bool> {
        self.calls
            .lock()
            .push(format!("copy {} {} {}", host, local.display(), remote));
        Ok(!self.failing_hosts.lock().contains(host))
    }

    fn forget_host(&self, host: &str) -> Result<()> {
        self.calls.lock().push(format!("forget {}", host));
        Ok(())
    }
}

struct Fixture {
    cloud: Arc<FakeCloud>,
    transport: Arc<RecordingTransport>,
    orchestrator: PoolOrchestrator,
    temp: TempDir,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let key_dir = temp.path().join("keys");
    let settings = PoolSettings::builder()
        .ssh_key_dir(&key_dir)
        .secrets_dir(temp.path().join("secrets"))
        .fanout_workers(2)
        .build();

    // Seed the keypair so creation skips generation, exercising the
    // no-overwrite contract without shelling out to ssh-keygen.
    std::fs::create_dir_all(&key_dir).unwrap();
    std::fs::write(key_dir.join("azure_vm_pool_demo"), "private key").unwrap();
    std::fs::write(key_dir.join("azure_vm_pool_demo.pub"), "public key").unwrap();

    let cloud = Arc::new(FakeCloud::default());
    cloud.seed_group("westeurope");
    let transport = Arc::new(RecordingTransport::default());
    let orchestrator = PoolOrchestrator::new(
        "demo",
        settings,
        cloud.clone(),
        transport.clone(),
    )
    .unwrap();

    Fixture {
        cloud,
        transport,
        orchestrator,
        temp,
    }
}

fn create_demo_pool(f: &Fixture, num_vms: u32) {
    let report = f
        .orchestrator
        .create_pool(num_vms, "Standard_DS1_v2", &CreateOptions::default())
        .unwrap();
    assert_eq!(report.outcomes.len(), num_vms as usize);
    assert!(report.all_ok());
}

fn host(vm: &str) -> String {
    format!("{}.westeurope.cloudapp.azure.com", vm)
}

#[test]
fn test_create_show_delete_lifecycle() {
    let f = fixture();

    create_demo_pool(&f, 2);

    // Bootstrap resources exist exactly as the ordering demands.
    assert!(f.cloud.has_storage_account());
    assert_eq!(f.cloud.vm_names(), vec!["demo-0", "demo-1"]);
    assert_eq!(
        f.cloud.blob_names("sshkeys"),
        vec!["azure_vm_pool_demo", "azure_vm_pool_demo.pub"]
    );
    assert_eq!(
        f.cloud.blob_names("vhds"),
        vec!["demo-0_os_disk.vhd", "demo-1_os_disk.vhd"]
    );

    let vms: Vec<Vm> = f.orchestrator.show_pool().unwrap();
    assert_eq!(vms.len(), 2);
    assert_eq!(vms[0].name, "demo-0");
    assert_eq!(vms[1].name, "demo-1");

    let report = f.orchestrator.delete_pool(|vms| vms.len() == 2).unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.all_ok());

    assert!(f.cloud.vm_names().is_empty());
    assert!(f.cloud.blob_names("vhds").is_empty());
    assert_eq!(f.cloud.container_delete_count("vhds"), 1);
}

#[test]
fn test_create_pool_absent_without_force_fails() {
    let f = fixture();
    f.cloud.state.lock().group_location = None;

    let err = f
        .orchestrator
        .create_pool(2, "Standard_DS1_v2", &CreateOptions::default())
        .unwrap_err();

    assert!(matches!(err, Error::PoolNotFound(_)));
    assert!(!f.cloud.has_storage_account());
}

#[test]
fn test_create_pool_force_creates_group() {
    let f = fixture();
    f.cloud.state.lock().group_location = None;

    let options = CreateOptions {
        force: true,
        location: Some("westeurope".to_string()),
        mode: DispatchMode::Wait,
    };
    let report = f
        .orchestrator
        .create_pool(1, "Standard_DS1_v2", &options)
        .unwrap();

    assert!(report.all_ok());
    assert_eq!(f.cloud.vm_names(), vec!["demo-0"]);
}

#[test]
fn test_create_pool_twice_is_a_precondition_error() {
    let f = fixture();
    create_demo_pool(&f, 1);

    let err = f
        .orchestrator
        .create_pool(1, "Standard_DS1_v2", &CreateOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::PoolAlreadyPopulated(_)));
}

#[test]
fn test_create_pool_is_idempotent_over_leftover_resources() {
    let f = fixture();

    // Leftovers of a previously interrupted creation.
    {
        let mut state = f.cloud.state.lock();
        state.public_ips.insert("demo-0".to_string());
        state.nics.insert("demo-0".to_string());
        state
            .blobs
            .entry("vhds".to_string())
            .or_default()
            .insert("demo-0_os_disk.vhd".to_string());
        state.containers.insert("vhds".to_string());
    }

    create_demo_pool(&f, 1);

    let state = f.cloud.state.lock();
    assert_eq!(state.public_ips.len(), 1);
    assert_eq!(state.nics.len(), 1);
}

#[test]
fn test_fanout_reports_every_vm_on_partial_failure() {
    let f = fixture();
    create_demo_pool(&f, 3);
    f.transport.fail_host(&host("demo-1"));

    let report = f.orchestrator.kill_task().unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded(), 2);
    let failed: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| !o.ok)
        .map(|o| o.vm.as_str())
        .collect();
    assert_eq!(failed, vec!["demo-1"]);
}

#[test]
fn test_delete_pool_on_empty_pool_does_nothing() {
    let f = fixture();

    let report = f
        .orchestrator
        .delete_pool(|_| panic!("confirmation must not be requested for an empty pool"))
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(f.cloud.container_delete_count("vhds"), 0);
}

#[test]
fn test_delete_pool_declined_has_no_side_effects() {
    let f = fixture();
    create_demo_pool(&f, 1);

    let err = f.orchestrator.delete_pool(|_| false).unwrap_err();
    assert!(matches!(err, Error::Aborted));
    assert_eq!(f.cloud.vm_names(), vec!["demo-0"]);
}

#[test]
fn test_deploy_task_kills_then_replaces_directory() {
    let f = fixture();
    create_demo_pool(&f, 1);

    let pool_dir = f.temp.path().join("pool");
    std::fs::create_dir_all(pool_dir.join("task")).unwrap();
    std::fs::write(pool_dir.join("task/run.sh"), "#!/bin/sh\n").unwrap();

    let report = f.orchestrator.deploy_task(&pool_dir).unwrap();
    assert!(report.all_ok());

    let calls = f.transport.calls();
    let kill = calls
        .iter()
        .position(|c| c == &format!("exec {} killall screen", host("demo-0")))
        .expect("task must be killed before deployment");
    let remove = calls
        .iter()
        .position(|c| c == &format!("exec {} rm -rf task", host("demo-0")))
        .expect("stale directory must be removed");
    let copy = calls
        .iter()
        .position(|c| c.starts_with(&format!("copy {} ", host("demo-0"))))
        .expect("directory must be copied");
    assert!(kill < remove && remove < copy);
}

#[test]
fn test_setup_pool_no_wait_launches_detached() {
    let f = fixture();
    create_demo_pool(&f, 1);

    let pool_dir = f.temp.path().join("pool");
    std::fs::create_dir_all(pool_dir.join("setup")).unwrap();
    std::fs::write(pool_dir.join("setup/run.sh"), "#!/bin/sh\n").unwrap();

    f.orchestrator
        .setup_pool(&pool_dir, DispatchMode::NoWait)
        .unwrap();

    let calls = f.transport.calls();
    assert!(calls.contains(&format!(
        "exec {} screen -d -m setup/run.sh",
        host("demo-0")
    )));
    assert!(calls.contains(&format!("exec {} chmod +x setup/run.sh", host("demo-0"))));
}

#[test]
fn test_start_task_runs_detached_entry_script() {
    let f = fixture();
    create_demo_pool(&f, 2);

    let report = f.orchestrator.start_task().unwrap();
    assert!(report.all_ok());

    let calls = f.transport.calls();
    for vm in ["demo-0", "demo-1"] {
        assert!(calls.contains(&format!("exec {} chmod +x task/run.sh", host(vm))));
        assert!(calls.contains(&format!("exec {} screen -d -m task/run.sh", host(vm))));
    }
}

#[test]
fn test_power_operations_skip_vms_already_in_target_state() {
    let f = fixture();
    create_demo_pool(&f, 2);

    // Both freshly created VMs report running; start-all has nothing to do.
    let report = f.orchestrator.start_all(DispatchMode::Wait).unwrap();
    assert!(report.all_ok());

    let report = f.orchestrator.stop_all(DispatchMode::Wait).unwrap();
    assert!(report.all_ok());
    {
        let state = f.cloud.state.lock();
        assert!(state.vms.values().all(|v| v.power == "VM deallocated"));
    }

    // A second stop-all sees deallocated VMs and skips them.
    let report = f.orchestrator.stop_all(DispatchMode::Wait).unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.all_ok());
}

#[test]
fn test_refresh_sas_writes_and_publishes_token() {
    let f = fixture();
    create_demo_pool(&f, 1);

    let token = f.orchestrator.refresh_sas().unwrap();

    assert_eq!(token.expires.timestamp() % 60, 0);
    assert!(token.path.is_file());
    assert_eq!(
        std::fs::read_to_string(&token.path).unwrap(),
        "se=fake&sig=fake-signature"
    );
    assert_eq!(
        f.cloud.blob_names("vmsecrets"),
        vec!["azure_vm_pool_demo_sas_storage_container_data.txt"]
    );
}

#[test]
fn test_get_secrets_mirrors_secrets_container() {
    let f = fixture();
    create_demo_pool(&f, 1);
    f.orchestrator.refresh_sas().unwrap();

    // Start from a clean local directory to prove everything re-downloads.
    std::fs::remove_dir_all(f.temp.path().join("secrets")).unwrap();
    let fetched = f.orchestrator.get_secrets().unwrap();

    assert_eq!(fetched.len(), 1);
    assert!(fetched[0].is_file());
    assert!(fetched[0].ends_with("azure_vm_pool_demo_sas_storage_container_data.txt"));
}

#[test]
fn test_get_ssh_restores_keypair_and_probes() {
    let f = fixture();
    create_demo_pool(&f, 2);

    let report = f.orchestrator.get_ssh().unwrap();
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.all_ok());

    let calls = f.transport.calls();
    for vm in ["demo-0", "demo-1"] {
        assert!(calls.contains(&format!("forget {}", host(vm))));
        assert!(calls.contains(&format!("exec {} exit", host(vm))));
    }
}

#[test]
fn test_workload_operations_require_a_populated_pool() {
    let f = fixture();

    let err = f.orchestrator.start_task().unwrap_err();
    assert!(matches!(err, Error::PoolEmpty(_)));

    let err = f.orchestrator.kill_task().unwrap_err();
    assert!(matches!(err, Error::PoolEmpty(_)));

    f.cloud.state.lock().group_location = None;
    let err = f.orchestrator.show_pool().unwrap_err();
    assert!(matches!(err, Error::PoolNotFound(_)));
}
