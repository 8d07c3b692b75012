#[macro_use]
extern crate log;
extern crate ctrlc;
extern crate simplelog;
use simplelog::*;

use solarmax::config::{Config, General, DEFAULT_CONFIG_FILE};
use std::env;
use std::fs::OpenOptions;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod worker;
use crate::worker::InverterWorker;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn logging_init(general: &General) -> Result<()> {
    let mut builder = ConfigBuilder::new();
    builder.set_time_format_rfc3339();
    let _ = builder.set_time_offset_to_local();
    let conf = builder.build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![];
    loggers.push(TermLogger::new(
        general.log_level,
        conf.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));

    let mut logfile_error: Option<String> = None;
    if let Some(ref log_path) = general.log {
        let logfile = OpenOptions::new().create(true).append(true).open(log_path);
        match logfile {
            Ok(logfile) => {
                loggers.push(WriteLogger::new(LevelFilter::Info, conf, logfile));
            }
            Err(e) => {
                logfile_error = Some(format!(
                    "Error creating/opening log file: {:?}: {:?}",
                    log_path, e
                ));
            }
        }
    }

    CombinedLogger::init(loggers)?;
    if let Some(e) = logfile_error {
        error!("{}", e);
        warn!("Will do console logging only...");
    }
    Ok(())
}

fn run(config: Config) -> Result<()> {
    if config.inverters.is_empty() {
        warn!("No [inverter] sections configured, nothing to do");
        return Ok(());
    }

    //Ctrl-C / SIGTERM support
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let mut threads = vec![];

    for inverter in config.inverters {
        info!(
            "{}: inverter at {}:{}, device {}",
            inverter.name, inverter.host, inverter.port, inverter.device
        );
        let mut worker = InverterWorker {
            name: format!("solarmax: {}", inverter.name),
            poll_interval: config.general.poll_interval,
            stats_interval: config.general.stats_interval,
            config: inverter,
        };
        let worker_cancel_flag = cancel_flag.clone();
        let thread_builder = thread::Builder::new().name(worker.config.name.clone()); //thread name
        let thread_handler = thread_builder.spawn(move || {
            worker.worker(worker_cancel_flag);
        })?;
        threads.push(thread_handler);
    }

    debug!("Entering main loop...");
    loop {
        if !running.load(Ordering::SeqCst) {
            info!("Ctrl-C or SIGTERM signal detected, exiting...");
            break;
        }

        thread::sleep(Duration::from_millis(50));
    }

    info!("Stopping all threads...");
    //inform all threads about termination
    cancel_flag.store(true, Ordering::SeqCst);
    //wait for termination
    for t in threads {
        let _ = t.join();
    }
    Ok(())
}

fn main() {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = logging_init(&config.general) {
        eprintln!("Cannot initialize logging subsystem: {}", e);
        process::exit(1);
    }
    info!("Welcome to solarmax (SolarMax inverter telemetry daemon)");
    info!("Using config file: {}", config_path);

    if let Err(e) = run(config) {
        error!("{}", e);
        process::exit(1);
    }
    info!("Done, exiting");
}
