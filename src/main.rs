// src/main.rs

//! Service entry-point: Windows service or console fallback.
//!
//! 1. Parse configuration & set up structured logging
//! 2. Validate every collector definition
//! 3. Register with the SCM (or run as a console app stopped by Ctrl-C)
//! 4. Start the collectors one by one
//! 5. Wait for Stop / Shutdown or the first collector exit, then stop all

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, Result};
use chrono::Local;
use crossbeam::channel::{self, Receiver};
use fern::Dispatch;
use log::{Level, LevelFilter};
use std::{
    fs,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    thread,
    time::Duration,
};

// ───── local imports ────────────────────────────────────────────────────────
use tracehound::collector::{ShutdownCause, Supervisor};
use tracehound::config::model::SourceKind;
use tracehound::config::{load_master_config, validate_all, MasterConfig, CONFIG_FILE_NAME};
use tracehound::etw::{ReplayFactory, SourceFactory};
use tracehound::hound_log;

// ───── service constants ────────────────────────────────────────────────────
const SERVICE_NAME: &str = "Tracehound";

// ───── helpers ──────────────────────────────────────────────────────────────

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable must live in some directory")
}

/// `Logs/ServiceLog_<YYYY_MM_DD>.txt` unless the config names a file.
fn log_file_path(exe_dir: &Path, master: &MasterConfig) -> PathBuf {
    match master.logging.file.as_deref() {
        Some(file) => exe_dir.join(file),
        None => exe_dir
            .join("Logs")
            .join(format!("ServiceLog_{}.txt", Local::now().format("%Y_%m_%d"))),
    }
}

/// Configure global logging as requested in `master.logging`.
fn setup_logging(exe_dir: &Path, master: &MasterConfig) -> Result<()> {
    let level = match master.logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(), // Only print the target (module path)
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if master.logging.enable {
        let path = log_file_path(exe_dir, master);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("cannot create log directory {}", dir.display()))?;
        }
        dispatch = dispatch.chain(fern::log_file(&path).with_context(|| format!("cannot open {}", path.display()))?);
    }

    dispatch.apply().context("logging setup failed")?;
    Ok(())
}

fn source_factory(exe_dir: &Path, master: &MasterConfig) -> Result<Arc<dyn SourceFactory>> {
    let factory: Arc<dyn SourceFactory> = match master.source.kind {
        SourceKind::Replay => Arc::new(ReplayFactory::new(master.source.replay_dir(exe_dir)?)),
    };
    Ok(factory)
}

/// Hooks the host uses to report service state transitions.
trait StatusReporter {
    fn running(&self);
    fn stopping(&self, wait_hint: Duration);
}

/// Console mode has nobody to report to.
struct Console;

impl StatusReporter for Console {
    fn running(&self) {}
    fn stopping(&self, _wait_hint: Duration) {}
}

// ───── service logic ────────────────────────────────────────────────────────

fn run_service(shutdown: &Receiver<()>, status: &dyn StatusReporter) -> Result<ShutdownCause> {
    // 1 ─ Context
    let exe_dir = exe_dir()?;
    let config_path = exe_dir.join(CONFIG_FILE_NAME);
    let master = load_master_config(&config_path).with_context(|| format!("loading {}", config_path.display()))?;

    // 2 ─ Logging
    setup_logging(&exe_dir, &master)?;
    hound_log!(Level::Info, "service", "Service bootstrap initiated");

    // 3 ─ Collectors
    let configs = validate_all(&master.collectors).map_err(|e| {
        hound_log!(Level::Error, "config", "[{}] {}", e.code(), e);
        e
    })?;
    let grace = master.service.shutdown_grace()?;
    let mut supervisor = Supervisor::new(source_factory(&exe_dir, &master)?).with_shutdown_grace(grace);
    supervisor.start(configs)?;

    status.running();
    hound_log!(Level::Info, "service", "Service running");

    // 4 ─ Wait for shutdown
    let cause = supervisor.wait(shutdown);
    status.stopping(grace + Duration::from_secs(5));
    supervisor.shutdown();
    hound_log!(Level::Info, "service", "Service stopped ({:?})", cause);
    Ok(cause)
}

fn exit_code(result: &Result<ShutdownCause>) -> i32 {
    match result {
        Ok(cause) if !cause.is_error() => 0,
        _ => 1,
    }
}

fn report_failure(result: &Result<ShutdownCause>) {
    if let Err(e) = result {
        // Logging may not be up yet: always print as well.
        eprintln!("[{}][ERROR][service] {:#}", Local::now().to_rfc3339(), e);
        log::error!("service failed: {:#}", e);
    }
}

fn run_console() -> i32 {
    let (tx, rx) = channel::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    }) {
        eprintln!("[{}][WARN][main] Ctrl-C handler unavailable: {}", Local::now().to_rfc3339(), e);
    }
    let result = run_service(&rx, &Console);
    report_failure(&result);
    exit_code(&result)
}

#[cfg(windows)]
mod service {
    use super::*;
    use std::ffi::OsString;
    use windows_service::{
        define_windows_service,
        service::{
            ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus, ServiceType,
        },
        service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle},
        service_dispatcher,
    };

    define_windows_service!(ffi_service_main, service_main);

    struct Scm {
        handle: ServiceStatusHandle,
    }

    impl Scm {
        fn set(&self, state: ServiceState, exit_code: u32, wait_hint: Duration) {
            let controls_accepted = match state {
                ServiceState::Running => ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN,
                _ => ServiceControlAccept::empty(),
            };
            let status = ServiceStatus {
                service_type: ServiceType::OWN_PROCESS,
                current_state: state,
                controls_accepted,
                exit_code: ServiceExitCode::ServiceSpecific(exit_code),
                checkpoint: 0,
                wait_hint,
                process_id: None,
            };
            if let Err(e) = self.handle.set_service_status(status) {
                log::warn!("SCM status update failed: {}", e);
            }
        }
    }

    impl StatusReporter for Scm {
        fn running(&self) {
            self.set(ServiceState::Running, 0, Duration::ZERO);
        }

        fn stopping(&self, wait_hint: Duration) {
            self.set(ServiceState::StopPending, 0, wait_hint);
        }
    }

    fn service_main(_args: Vec<OsString>) {
        let (tx, rx) = channel::bounded(1);
        let handle = match service_control_handler::register(SERVICE_NAME, move |ctrl| match ctrl {
            ServiceControl::Stop | ServiceControl::Shutdown => {
                log::warn!("Stop requested via SCM");
                let _ = tx.try_send(());
                ServiceControlHandlerResult::NoError
            }
            ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
            _ => ServiceControlHandlerResult::NotImplemented,
        }) {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("[{}][ERROR][service] SCM registration failed: {}", Local::now().to_rfc3339(), e);
                return;
            }
        };

        let scm = Scm { handle };
        scm.set(ServiceState::StartPending, 0, Duration::from_secs(30));
        let result = run_service(&rx, &scm);
        report_failure(&result);
        scm.set(ServiceState::Stopped, exit_code(&result) as u32, Duration::ZERO);
    }

    /// Hands the thread to the SCM dispatcher; fails when not started as a service.
    pub fn dispatch() -> windows_service::Result<()> {
        service_dispatcher::start(SERVICE_NAME, ffi_service_main)
    }
}

#[cfg(windows)]
fn main() {
    // If registering as a service fails, run as a plain console app.
    if let Err(e) = service::dispatch() {
        eprintln!(
            "[{}][ERROR][main] Not a service: {} – falling back to console.",
            Local::now().to_rfc3339(),
            e
        );
        process::exit(run_console());
    }
}

#[cfg(not(windows))]
fn main() {
    process::exit(run_console());
}
