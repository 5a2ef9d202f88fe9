use std::fs;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use log::{error, info, warn};
use reqwest::blocking::Client;

use ocidist::Credentials;
use ota_rs::apps::{AppsManager, ComposeCli, InstallMode};
use ota_rs::bootloader::{Bootloader, BootloaderLite};
use ota_rs::config::Config;
use ota_rs::sysroot::{OstreeCli, Sysroot};
use ota_rs::target::Target;
use ota_rs::tree::InstallCode;
use ota_rs::tuf::GatewayTuf;
use ota_rs::update::{Controller, UpdateStatus};
use ota_rs::version_store::FileVersionStore;
use ota_rs::CancelToken;

const DOWNLOAD_TIMEOUT: u64 = 3600;
const HTTP_CONN_TIMEOUT: u64 = 20;

const STATE_DIR: &str = "/var/sota";

#[derive(FromArgs, Debug)]
/// OTA agent for devices running an ostree rootfs and compose apps.
struct Args {
    /// path to the agent configuration
    #[argh(option, short = 'c', default = "PathBuf::from(\"/var/sota/sota.toml\")")]
    config: PathBuf,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Check(CheckArgs),
    Install(InstallArgs),
    Complete(CompleteArgs),
}

#[derive(FromArgs, Debug)]
/// check in with the metadata server and list update candidates
#[argh(subcommand, name = "check")]
struct CheckArgs {}

#[derive(FromArgs, Debug)]
/// download and stage an update
#[argh(subcommand, name = "install")]
struct InstallArgs {
    /// install this version instead of the latest
    #[argh(option)]
    version: Option<i64>,

    /// install this target name instead of the latest
    #[argh(option)]
    target: Option<String>,

    /// install mode: `all` (default) or `delay-app-install`
    #[argh(option, default = "InstallMode::All")]
    install_mode: InstallMode,

    /// allow installing a version older than the current one
    #[argh(switch)]
    force: bool,
}

#[derive(FromArgs, Debug)]
/// finalize or roll back a staged update after reboot
#[argh(subcommand, name = "complete")]
struct CompleteArgs {}

fn build_controller(cfg: Config) -> Result<Controller> {
    #[rustfmt::skip]
    let http = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONN_TIMEOUT))
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT))
        .build()
        .context("failed to build the HTTP client")?;

    let state_dir = PathBuf::from(STATE_DIR);
    fs::create_dir_all(&state_dir).context(format!("failed to create {STATE_DIR}"))?;

    let sysroot: Rc<dyn Sysroot> = Rc::new(OstreeCli::open(&cfg.sysroot)?);
    let bootloader: Rc<dyn Bootloader> = Rc::new(BootloaderLite::new(sysroot.clone()));

    let tuf = Box::new(GatewayTuf::new(http.clone(), &cfg.server, &state_dir));
    let store = Box::new(FileVersionStore::open(&state_dir.join("installed_versions.json")));

    let creds = Credentials::for_treehub(&cfg.ostree_server);
    let registry = ocidist::Client::new(http.clone(), creds);
    let apps = AppsManager::new(registry, Box::new(ComposeCli), &state_dir.join("compose-apps"));

    Ok(Controller::new(cfg, sysroot, bootloader, tuf, store, Some(Box::new(apps)), http))
}

fn check(ctrl: &Controller) -> UpdateStatus {
    let (status, targets) = ctrl.check_in();

    for target in &targets {
        println!("{}\t{}\t{}", target.version(), target.name(), target.sha256());
    }

    status
}

fn select_target(ctrl: &Controller, args: &InstallArgs) -> Option<Target> {
    if let Some(version) = args.version {
        return ctrl.get_by_version(version);
    }
    if let Some(name) = &args.target {
        return ctrl.get_by_name(name);
    }
    ctrl.get_latest(ctrl.hardware_id())
}

fn install(ctrl: &Controller, args: &InstallArgs) -> UpdateStatus {
    let (status, _) = ctrl.check_in();
    if !matches!(status, UpdateStatus::Ok | UpdateStatus::CheckinOkCached) {
        return UpdateStatus::TufMetaPullFailure;
    }

    let Some(target) = select_target(ctrl, args) else {
        error!("no matching target");
        return UpdateStatus::TufTargetNotFound;
    };

    if ctrl.is_installation_in_progress() {
        error!("an installation is already pending, run `complete` first");
        return UpdateStatus::InstallationInProgress;
    }

    if ctrl.is_rollback(&target) {
        error!("target {} was already rolled back on this device", target.name());
        return UpdateStatus::TufTargetNotFound;
    }

    if ctrl.is_blocked_downgrade(&target, args.force) {
        error!("target {} is older than the running version, pass --force to downgrade", target.name());
        return UpdateStatus::InstallDowngradeAttempt;
    }

    info!("installing {}", target.name());
    let installer = ctrl.installer(target, "cli install");

    let downloaded = installer.download(&CancelToken::new());
    match downloaded.code {
        InstallCode::Ok => {}
        InstallCode::DownloadFailedNoSpace => {
            error!("{}", downloaded.description);
            return UpdateStatus::DownloadFailureNoSpace;
        }
        InstallCode::VerificationFailed => {
            error!("{}", downloaded.description);
            return UpdateStatus::DownloadFailureVerificationFailed;
        }
        _ => {
            error!("{}", downloaded.description);
            return UpdateStatus::DownloadFailure;
        }
    }

    let installed = installer.install();
    match installed.code {
        InstallCode::Ok => finish_apps(ctrl, installer.target(), args.install_mode),
        InstallCode::NeedCompletion => {
            // pull the app set now; finalization after reboot only starts it
            if args.install_mode == InstallMode::All {
                if let Err(err) = ctrl.sync_apps_for(installer.target(), InstallMode::DelayAppInstall) {
                    error!("failed to pull apps: {err:#}");
                    return UpdateStatus::InstallAppPullFailure;
                }
            }

            if ctrl.is_boot_fw_update_in_progress() {
                UpdateStatus::InstallNeedsRebootForBootFw
            } else {
                UpdateStatus::InstallNeedsReboot
            }
        }
        _ => {
            error!("{}", installed.description);
            UpdateStatus::UnknownError
        }
    }
}

fn finish_apps(ctrl: &Controller, target: &Target, mode: InstallMode) -> UpdateStatus {
    match mode {
        InstallMode::All => match ctrl.sync_apps_for(target, InstallMode::All) {
            Ok(()) => UpdateStatus::Ok,
            Err(err) => {
                error!("failed to sync apps: {err:#}");
                UpdateStatus::InstallAppPullFailure
            }
        },
        InstallMode::DelayAppInstall => match ctrl.sync_apps_for(target, InstallMode::DelayAppInstall) {
            Ok(()) => {
                ctrl.defer_app_finalization(target);
                UpdateStatus::InstallAppsNeedFinalization
            }
            Err(err) => {
                error!("failed to pull apps: {err:#}");
                UpdateStatus::InstallAppPullFailure
            }
        },
    }
}

fn run(args: &Args) -> Result<UpdateStatus> {
    let cfg = Config::load(&args.config)?;
    let ctrl = build_controller(cfg)?;

    let status = match &args.command {
        Command::Check(_) => check(&ctrl),
        Command::Install(install_args) => install(&ctrl, install_args),
        Command::Complete(_) => ctrl.complete_installation(),
    };

    Ok(status)
}

fn main() {
    env_logger::init();

    let args: Args = argh::from_env();

    let status = match run(&args) {
        Ok(status) => status,
        Err(err) => {
            error!("{err:#}");
            UpdateStatus::UnknownError
        }
    };

    if status != UpdateStatus::Ok {
        warn!("exiting with status {status:?} ({})", status.exit_code());
    }

    process::exit(status.exit_code() as i32);
}
