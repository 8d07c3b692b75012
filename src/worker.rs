use solarmax::config::InverterConfig;
use solarmax::telemetry::{alarm_descriptions, status_description};
use solarmax::{Clock, Command, Connection, InverterClient, SkipProbe, SolarMaxError, SystemClock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const CONNECT_RETRY_SECS: u64 = 10; //secs to wait when the port refuses a reachable host
pub const LOOP_PAUSE_MS: u64 = 30;

/// Last known status and alarm word; changes are worth a warning.
pub struct InverterState {
    pub last_change: Instant,
    pub status: Option<u32>,
    pub alarm: Option<u32>,
}

impl Default for InverterState {
    fn default() -> Self {
        Self {
            last_change: Instant::now(),
            status: None,
            alarm: None,
        }
    }
}

fn status_label(status: Option<u32>) -> String {
    match status {
        Some(code) => status_description(code)
            .map(String::from)
            .unwrap_or_else(|| format!("unknown ({})", code)),
        None => "none".into(),
    }
}

fn energy_label(energy: Option<f64>) -> String {
    match energy {
        Some(kwh) => format!("{:.1} kWh", kwh),
        None => "n/a".into(),
    }
}

impl InverterState {
    pub fn set_new_status(&mut self, thread_name: &str, status: u32) -> bool {
        if self.status == Some(status) {
            return false;
        }
        if self.status.is_none() {
            info!("{}: inverter status: {}", thread_name, status_label(Some(status)));
        } else {
            warn!(
                "{}: inverter status changed from {:?} to {:?} after {}",
                thread_name,
                status_label(self.status),
                status_label(Some(status)),
                humantime::format_duration(Duration::from_secs(self.last_change.elapsed().as_secs()))
            );
        }
        self.status = Some(status);
        self.last_change = Instant::now();
        true
    }

    pub fn set_new_alarm(&mut self, thread_name: &str, alarm: u32) -> bool {
        if self.alarm == Some(alarm) {
            return false;
        }
        if alarm == 0 {
            if self.alarm.is_some() {
                warn!("{}: alarms cleared", thread_name);
            }
        } else {
            error!(
                "{}: inverter alarm {:#X}: {}",
                thread_name,
                alarm,
                alarm_descriptions(alarm)
            );
        }
        self.alarm = Some(alarm);
        true
    }
}

pub struct InverterWorker {
    pub name: String,
    pub config: InverterConfig,
    pub poll_interval: Duration,
    pub stats_interval: Duration,
}

impl InverterWorker {
    fn client(&self, cancel_flag: Arc<AtomicBool>) -> InverterClient {
        let mut connection = Connection::new(self.config.host.clone(), self.config.port)
            .with_read_timeout(self.config.read_timeout)
            .with_cancel_flag(cancel_flag);
        if !self.config.ping {
            connection = connection.with_probe(Box::new(SkipProbe));
        }
        InverterClient::new(connection, self.config.device).with_name(self.name.clone())
    }

    fn show_device_info(&self, client: &mut InverterClient) {
        match client.inverter_type() {
            Some(code) => info!("{}: model: {}", self.name, Command::InverterType.describe(code)),
            None => warn!("{}: cannot read the inverter type", self.name),
        }
        if let Some(version) = client.software_version() {
            info!("{}: software version: {}", self.name, version);
        }
        if let Some(capacity) = client.installed_capacity() {
            info!("{}: installed capacity: {} W", self.name, capacity);
        }
        if let Some(time) = client.inverter_time() {
            info!("{}: inverter clock: {}", self.name, time.format("%F %H:%M"));
        }
    }

    /// Reads the whole command table; stops early when the link drops.
    fn poll(&self, client: &mut InverterClient, state: &mut InverterState) -> Option<f64> {
        let started = Instant::now();
        let mut readings: Vec<String> = vec![];
        let mut energy_day = None;

        for command in Command::all() {
            if !client.is_connected() {
                warn!("{}: connection lost during poll", self.name);
                break;
            }
            let raw = match client.read(command) {
                Some(raw) => raw,
                None => continue,
            };
            debug!("{}: {}: {}", self.name, command.name(), command.describe(raw));
            match command {
                Command::Status => {
                    state.set_new_status(&self.name, raw);
                }
                Command::AlarmCode => {
                    state.set_new_alarm(&self.name, raw);
                }
                Command::EnergyDay => energy_day = Some(command.scale(raw)),
                Command::AcOutput
                | Command::VoltageDc
                | Command::CurrentDc
                | Command::TemperaturePowerUnitOne => {
                    readings.push(format!("{}: {}", command.code(), command.describe(raw)))
                }
                _ => {}
            }
        }

        let elapsed = started.elapsed();
        if !readings.is_empty() {
            info!(
                "{}: {} [poll took {} ms]",
                self.name,
                readings.join(", "),
                elapsed.as_millis()
            );
        }
        energy_day
    }

    fn show_stats(&self, client: &InverterClient, energy_day: Option<f64>) {
        info!(
            "{}: 📊 inverter query statistics: ok: {}, errors: {}, daily energy yield: {}",
            self.name,
            client.poll_ok,
            client.poll_errors,
            energy_label(energy_day)
        );
    }

    pub fn worker(&mut self, worker_cancel_flag: Arc<AtomicBool>) {
        info!("{}: Starting thread", self.name);
        let mut client = self.client(worker_cancel_flag.clone());
        let mut state = InverterState::default();
        let mut retry_clock = SystemClock;
        let mut poll_interval: Option<Instant> = None;
        let mut stats_interval = Instant::now();
        let mut energy_day: Option<f64> = None;
        let mut first_attempt = true;

        loop {
            if worker_cancel_flag.load(Ordering::SeqCst) {
                debug!("{}: Got terminate signal from main", self.name);
                break;
            }

            if !client.is_connected() {
                let result = if first_attempt {
                    client.open()
                } else {
                    client.reconnect()
                };
                first_attempt = false;
                match result {
                    Ok(()) => {
                        poll_interval = None;
                        self.show_device_info(&mut client);
                    }
                    Err(SolarMaxError::Cancelled) => break,
                    Err(e @ SolarMaxError::Unreachable { .. }) => {
                        // reconnect() does the waiting
                        error!("{}: {}", self.name, e);
                        continue;
                    }
                    Err(e) => {
                        error!("{}: {}", self.name, e);
                        if !retry_clock.sleep(
                            Duration::from_secs(CONNECT_RETRY_SECS),
                            &worker_cancel_flag,
                        ) {
                            break;
                        }
                        continue;
                    }
                }
            }

            if stats_interval.elapsed() > self.stats_interval {
                stats_interval = Instant::now();
                self.show_stats(&client, energy_day);
            }

            if poll_interval.map_or(true, |last| last.elapsed() > self.poll_interval) {
                poll_interval = Some(Instant::now());
                if let Some(value) = self.poll(&mut client, &mut state) {
                    energy_day = Some(value);
                }
            }

            thread::sleep(Duration::from_millis(LOOP_PAUSE_MS));
        }

        self.show_stats(&client, energy_day);
        client.disconnect();
        info!("{}: thread stopped", self.name);
    }
}
