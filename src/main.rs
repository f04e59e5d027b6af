use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};

use v2v_helper::config::HelperConfig;
use v2v_helper::convert::{ConversionRequest, DiskConverter, RootTarget};
use v2v_helper::exec::SystemExecutor;
use v2v_helper::guest::{GuestCommandRunner, GuestCustomizer, GuestInspector, os_release_field};
use v2v_helper::logging;
use v2v_helper::models::{CancelToken, OsFamily, VirtualDisk};
use v2v_helper::orchestrator::{FirstbootScript, Orchestrator, RunPlan, select_root};
use v2v_helper::repair::{NtfsRepairer, RepairOutcome};
use v2v_helper::timing::TimingTracker;

/// Guest disk conversion helper for migrated virtual machines
#[derive(Parser, Debug)]
#[clap(name = "v2v-helper", version, about = "Inspect, convert and fix up migrated guest disks")]
struct Args {
    /// Config file (defaults to $V2V_HELPER_CONFIG, then the user config dir)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect the guest: partitions, bootable volume, OS root and LVM
    Inspect {
        /// Guest disks in attachment order
        #[clap(short, long = "disk", required = true)]
        disks: Vec<PathBuf>,
    },
    /// Convert a single disk in place
    Convert {
        #[clap(short, long)]
        disk: PathBuf,
        /// libvirt domain XML describing the guest
        #[clap(short, long)]
        xml: PathBuf,
        #[clap(short, long)]
        os: OsFamily,
        /// Driver package URL for Windows guests
        #[clap(long)]
        driver_url: Option<String>,
        /// Root device; resolved by inspecting the disk when omitted
        #[clap(long)]
        root: Option<String>,
    },
    /// Run ntfsfix on every partition of the given host disks
    RepairNtfs {
        #[clap(required = true)]
        disks: Vec<String>,
    },
    /// Upload the wildcard DHCP network config into a Linux guest
    CustomizeNetwork {
        #[clap(short, long = "disk", required = true)]
        disks: Vec<PathBuf>,
    },
    /// Stage a first-boot script
    Firstboot {
        #[clap(short, long)]
        name: String,
        /// File holding the script body
        #[clap(short, long)]
        script: PathBuf,
    },
    /// Inspect, convert and fix up one guest
    Run {
        #[clap(short, long = "disk", required = true)]
        disks: Vec<PathBuf>,
        #[clap(short, long)]
        xml: PathBuf,
        #[clap(short, long)]
        os: OsFamily,
        #[clap(long)]
        driver_url: Option<String>,
        /// First-boot script as NAME=PATH, may be repeated
        #[clap(long = "firstboot", value_parser = parse_firstboot)]
        firstboot: Vec<(String, PathBuf)>,
    },
}

fn parse_firstboot(value: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{}'", value))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{}'", value));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let source = HelperConfig::resolve_path(args.config.as_deref());
    let config = match &source {
        Some(path) => HelperConfig::load_file(path)?,
        None => HelperConfig::default(),
    };
    let _log_guard = logging::init(config.logging.dir.as_deref());
    match &source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => debug!("No configuration file found, using defaults"),
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling running tools");
                cancel.cancel();
            }
        });
    }

    let result = dispatch(args.command, config, &cancel).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn dispatch(command: Command, config: HelperConfig, cancel: &CancelToken) -> Result<()> {
    let executor = SystemExecutor;

    match command {
        Command::Inspect { disks } => {
            let disks = VirtualDisk::from_paths(disks);
            let runner = GuestCommandRunner::new(&executor, &config.tools);
            let inspector = GuestInspector::new(&runner);

            let snapshot = inspector.snapshot(&disks, cancel).await?;
            println!("Partitions: {}", snapshot.partitions.join(", "));
            println!("OS root: {}", snapshot.os_root);
            match snapshot.lvm_root() {
                Ok(lv) => println!("LVM root: {}", lv),
                Err(e) => println!("LVM root: none ({})", e),
            }
            match inspector.bootable_volume(&snapshot, &disks, cancel).await {
                Ok(volume) => println!(
                    "Bootable: {} on disk {} ({} partition {})",
                    volume.partition, volume.position, volume.device, volume.partition_number
                ),
                Err(e) => println!("Bootable: none ({})", e),
            }
            if let Ok(release) = inspector.os_release(&disks, cancel).await {
                if let Some(name) = os_release_field(&release, "pretty_name")
                    .or_else(|| os_release_field(&release, "name"))
                {
                    println!("OS: {}", name);
                }
            }
        }
        Command::Convert {
            disk,
            xml,
            os,
            driver_url,
            root,
        } => {
            let root = match root {
                Some(device) => RootTarget::Fixed(device),
                None => {
                    let disks = VirtualDisk::from_paths([disk.clone()]);
                    let runner = GuestCommandRunner::new(&executor, &config.tools);
                    let inspector = GuestInspector::new(&runner);
                    let snapshot = inspector.snapshot(&disks, cancel).await?;
                    let bootable = inspector.bootable_volume(&snapshot, &disks, cancel).await.ok();
                    let lvm_root = snapshot.lvm_root().ok();
                    select_root(&config, &snapshot, bootable.as_ref(), lvm_root.as_deref())
                }
            };

            let converter = DiskConverter::new(&executor, &config);
            let elapsed = converter
                .convert(
                    &ConversionRequest {
                        disk: &disk,
                        descriptor: &xml,
                        os_family: os,
                        driver_url: driver_url.as_deref(),
                        root,
                    },
                    cancel,
                )
                .await?;
            println!("Converted {} in {:?}", disk.display(), elapsed);
        }
        Command::RepairNtfs { disks } => {
            let repairer = NtfsRepairer::new(&executor, &config.tools);
            for disk in disks {
                let report = repairer.repair_disk(&disk, cancel).await;
                if let Some(reason) = &report.listing_error {
                    println!("{}: skipped ({})", disk, reason);
                }
                for partition in &report.partitions {
                    match &partition.outcome {
                        RepairOutcome::Repaired => println!("{}: fixed", partition.partition),
                        RepairOutcome::Failed(reason) => {
                            println!("{}: failed ({})", partition.partition, reason)
                        }
                    }
                }
            }
        }
        Command::CustomizeNetwork { disks } => {
            let disks = VirtualDisk::from_paths(disks);
            let runner = GuestCommandRunner::new(&executor, &config.tools);
            let customizer = GuestCustomizer::new(&runner, &config);
            let staged = customizer.add_wildcard_network(&disks, cancel).await?;
            println!(
                "Uploaded {} to {}",
                staged.display(),
                config.paths.guest_network_config.display()
            );
        }
        Command::Firstboot { name, script } => {
            let body = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script {}", script.display()))?;
            let runner = GuestCommandRunner::new(&executor, &config.tools);
            let customizer = GuestCustomizer::new(&runner, &config);
            let path = customizer.add_firstboot_script(&body, &name)?;
            println!("Staged {}", path.display());
        }
        Command::Run {
            disks,
            xml,
            os,
            driver_url,
            firstboot,
        } => {
            let mut firstboot_scripts = Vec::with_capacity(firstboot.len());
            for (name, path) in firstboot {
                let body = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read script {}", path.display()))?;
                firstboot_scripts.push(FirstbootScript { name, body });
            }

            let plan = RunPlan {
                disks: VirtualDisk::from_paths(disks),
                descriptor: xml,
                os_family: os,
                driver_url,
                firstboot_scripts,
            };
            let orchestrator = Orchestrator::new(executor, config);
            let report = orchestrator.run(&plan, TimingTracker::new(), cancel).await?;

            println!("Root: {}", report.root.device());
            let failed: usize = report.repairs.iter().map(|r| r.failed().count()).sum();
            if failed > 0 {
                println!("NTFS repair failed on {} partition(s)", failed);
            }
            println!("Total conversion time: {:?}", report.timing.summary().total);
        }
    }

    if cancel.is_cancelled() {
        bail!("cancelled");
    }
    Ok(())
}
