//! VM pool CLI

use azpool::cloud::AzureCli;
use azpool::models::SizeFilter;
use azpool::orchestrator::{CreateOptions, DispatchMode, PoolOrchestrator};
use azpool::{Error, PoolSettings};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "azpool")]
#[command(about = "Manage a pool of cloud VMs as one logical unit", long_about = None)]
struct Cli {
    /// Name of the VM pool resource group
    pool: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List VM sizes available in the pool's region
    ListSizes {
        /// Region to list sizes for (defaults to the pool's region)
        #[arg(long, short = 'l')]
        location: Option<String>,
        /// Only show sizes with at least this many cores
        #[arg(long, default_value_t = 0)]
        min_cores: u32,
        /// Only show sizes with at most this many cores
        #[arg(long)]
        max_cores: Option<u32>,
        /// Only show sizes with at least this much memory (GB)
        #[arg(long, default_value_t = 0.0)]
        min_memory: f64,
        /// Only show sizes with at most this much memory (GB)
        #[arg(long)]
        max_memory: Option<f64>,
    },
    /// Create a pool of VMs with shared storage, network and keys
    CreatePool {
        /// Number of VMs to create
        #[arg(long, short = 'n')]
        num_vms: u32,
        /// Size of each VM (see 'list-sizes')
        #[arg(long, short = 's')]
        vm_size: String,
        /// Image SKU, e.g. 'canonical:UbuntuServer:16.04-LTS:latest'
        #[arg(long)]
        vm_image: Option<String>,
        /// Create the resource group if it does not exist (requires --location)
        #[arg(long, short = 'f')]
        force: bool,
        /// Region for a newly created resource group, e.g. westeurope
        #[arg(long, short = 'l')]
        location: Option<String>,
        /// Do not wait for each VM creation to complete
        #[arg(long)]
        no_wait: bool,
    },
    /// Delete every VM in the pool along with its NIC, address and OS disk
    DeletePool,
    /// Show the VMs currently in the pool
    ShowPool,
    /// Upload and run the setup directory on every VM
    SetupPool {
        /// Directory containing the 'setup' subdirectory
        #[arg(long, short = 'd')]
        pool_directory: PathBuf,
        /// Launch setup detached instead of waiting for it to finish
        #[arg(long)]
        no_wait: bool,
    },
    /// Start every VM in the pool
    StartAll {
        /// Do not wait for each VM to start
        #[arg(long)]
        no_wait: bool,
    },
    /// Deallocate every VM in the pool
    StopAll {
        /// Do not wait for each VM to deallocate
        #[arg(long)]
        no_wait: bool,
    },
    /// Upload the task directory to every VM (kills any running task first)
    DeployTask {
        /// Directory containing the 'task' subdirectory
        #[arg(long, short = 'd')]
        pool_directory: PathBuf,
    },
    /// Launch the deployed task on every VM, detached
    StartTask {
        /// Directory containing the 'task' subdirectory
        #[arg(long, short = 'd')]
        pool_directory: PathBuf,
    },
    /// Kill detached task sessions on every VM
    KillTask,
    /// Issue a fresh access token for the pool data container
    RefreshSas {
        /// Days the new token stays valid
        #[arg(long)]
        sas_expiry_days: Option<i64>,
    },
    /// Download the pool keypair and verify connectivity to each VM
    GetSsh,
    /// Download every secret published for this pool
    GetSecrets,
    /// Create the local pool directory layout and seed it with secrets
    InitDirectory {
        /// Pool directory to initialise
        #[arg(long, short = 'd')]
        pool_directory: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {}
        Err(Error::Aborted) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> azpool::Result<()> {
    let mut builder = PoolSettings::builder();
    if let Commands::CreatePool {
        vm_image: Some(image),
        ..
    } = &cli.command
    {
        builder = builder.vm_image(image.clone());
    }
    if let Commands::RefreshSas {
        sas_expiry_days: Some(days),
    } = &cli.command
    {
        builder = builder.sas_expiry_days(*days);
    }
    let settings = builder.build_validated()?;

    let client = Arc::new(AzureCli::connect()?);
    let orchestrator = PoolOrchestrator::with_ssh_transport(cli.pool.clone(), settings, client)?;

    match cli.command {
        Commands::ListSizes {
            location,
            min_cores,
            max_cores,
            min_memory,
            max_memory,
        } => {
            let filter = SizeFilter {
                min_cores,
                max_cores: max_cores.unwrap_or(u32::MAX),
                min_memory_gb: min_memory,
                max_memory_gb: max_memory.unwrap_or(f64::INFINITY),
            };
            orchestrator.list_sizes(location.as_deref(), &filter)?;
        }
        Commands::CreatePool {
            num_vms,
            vm_size,
            force,
            location,
            no_wait,
            ..
        } => {
            let options = CreateOptions {
                force,
                location,
                mode: mode(no_wait),
            };
            orchestrator.create_pool(num_vms, &vm_size, &options)?;
        }
        Commands::DeletePool => {
            orchestrator.delete_pool(|vms| confirm_delete(vms.len()))?;
        }
        Commands::ShowPool => {
            orchestrator.show_pool()?;
        }
        Commands::SetupPool {
            pool_directory,
            no_wait,
        } => {
            orchestrator.setup_pool(&pool_directory, mode(no_wait))?;
        }
        Commands::StartAll { no_wait } => {
            orchestrator.start_all(mode(no_wait))?;
        }
        Commands::StopAll { no_wait } => {
            orchestrator.stop_all(mode(no_wait))?;
        }
        Commands::DeployTask { pool_directory } => {
            orchestrator.deploy_task(&pool_directory)?;
        }
        Commands::StartTask { pool_directory } => {
            // The task itself was uploaded by deploy-task; the directory is
            // only checked locally to catch a wrong path early.
            if !pool_directory.is_dir() {
                return Err(Error::Config(format!(
                    "pool directory '{}' does not exist",
                    pool_directory.display()
                )));
            }
            orchestrator.start_task()?;
        }
        Commands::KillTask => {
            orchestrator.kill_task()?;
        }
        Commands::RefreshSas { .. } => {
            orchestrator.refresh_sas()?;
        }
        Commands::GetSsh => {
            orchestrator.get_ssh()?;
        }
        Commands::GetSecrets => {
            orchestrator.get_secrets()?;
        }
        Commands::InitDirectory { pool_directory } => {
            orchestrator.init_directory(&pool_directory)?;
        }
    }
    Ok(())
}

fn mode(no_wait: bool) -> DispatchMode {
    if no_wait {
        DispatchMode::NoWait
    } else {
        DispatchMode::Wait
    }
}

fn confirm_delete(count: usize) -> bool {
    print!(
        "Are you sure you want to delete all {} of the above VMs? (y/n): ",
        count
    );
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim() == "y"
}
