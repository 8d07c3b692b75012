use crate::client::InverterClient;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

/// The telemetry quantities answered by the data query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    AcOutput,
    OperatingHours,
    DateYear,
    DateMonth,
    DateDay,
    EnergyYear,
    EnergyMonth,
    EnergyDay,
    EnergyTotal,
    InstalledCapacity,
    MainsCycleDuration,
    NetworkAddress,
    RelativeOutput,
    SoftwareVersion,
    VoltageDc,
    VoltagePhaseOne,
    CurrentDc,
    CurrentPhaseOne,
    TemperaturePowerUnitOne,
    InverterType,
    TimeMinutes,
    TimeHours,
    Status,
    AlarmCode,
}

struct CommandInfo {
    command: Command,
    code: &'static str,
    name: &'static str,
    unit: &'static str,
    // raw value * gain, rounded to `decimals`
    gain: Option<(f64, i32)>,
}

#[rustfmt::skip]
const COMMAND_TABLE: [CommandInfo; 24] = [
    CommandInfo { command: Command::AcOutput, code: "PAC", name: "AC output", unit: "W", gain: Some((0.5, 1)) },
    CommandInfo { command: Command::OperatingHours, code: "KHR", name: "operating hours", unit: "h", gain: None },
    CommandInfo { command: Command::DateYear, code: "DYR", name: "date year", unit: "a", gain: None },
    CommandInfo { command: Command::DateMonth, code: "DMT", name: "date month", unit: "m", gain: None },
    CommandInfo { command: Command::DateDay, code: "DDY", name: "date day", unit: "d", gain: None },
    CommandInfo { command: Command::EnergyYear, code: "KYR", name: "energy year", unit: "kWh", gain: None },
    CommandInfo { command: Command::EnergyMonth, code: "KMT", name: "energy month", unit: "kWh", gain: None },
    CommandInfo { command: Command::EnergyDay, code: "KDY", name: "energy day", unit: "kWh", gain: Some((0.1, 1)) },
    CommandInfo { command: Command::EnergyTotal, code: "KT0", name: "energy total", unit: "kWh", gain: None },
    CommandInfo { command: Command::InstalledCapacity, code: "PIN", name: "installed capacity", unit: "W", gain: Some((0.5, 1)) },
    CommandInfo { command: Command::MainsCycleDuration, code: "TNP", name: "mains cycle duration", unit: "μs", gain: None },
    CommandInfo { command: Command::NetworkAddress, code: "ADR", name: "network address", unit: "", gain: None },
    CommandInfo { command: Command::RelativeOutput, code: "PRL", name: "relative output", unit: "%", gain: None },
    CommandInfo { command: Command::SoftwareVersion, code: "SWV", name: "software version", unit: "", gain: None },
    CommandInfo { command: Command::VoltageDc, code: "UDC", name: "DC voltage", unit: "V", gain: Some((0.1, 1)) },
    CommandInfo { command: Command::VoltagePhaseOne, code: "UL1", name: "phase 1 voltage", unit: "V", gain: Some((0.1, 1)) },
    CommandInfo { command: Command::CurrentDc, code: "IDC", name: "DC current", unit: "A", gain: Some((0.01, 2)) },
    CommandInfo { command: Command::CurrentPhaseOne, code: "IL1", name: "phase 1 current", unit: "A", gain: Some((0.01, 2)) },
    CommandInfo { command: Command::TemperaturePowerUnitOne, code: "TKK", name: "power unit 1 temperature", unit: "°C", gain: None },
    CommandInfo { command: Command::InverterType, code: "TYP", name: "type", unit: "", gain: None },
    CommandInfo { command: Command::TimeMinutes, code: "TMI", name: "time minutes", unit: "min", gain: None },
    CommandInfo { command: Command::TimeHours, code: "THR", name: "time hours", unit: "h", gain: None },
    CommandInfo { command: Command::Status, code: "SYS", name: "status", unit: "", gain: None },
    CommandInfo { command: Command::AlarmCode, code: "SAL", name: "alarm", unit: "", gain: None },
];

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

impl Command {
    pub fn all() -> impl Iterator<Item = Command> {
        COMMAND_TABLE.iter().map(|info| info.command)
    }

    fn info(self) -> &'static CommandInfo {
        // every variant has exactly one row
        &COMMAND_TABLE[self as usize]
    }

    /// The 3-character code sent on the wire.
    pub fn code(self) -> &'static str {
        self.info().code
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn unit(self) -> &'static str {
        self.info().unit
    }

    /// Physical value of a raw reading.
    pub fn scale(self, raw: u32) -> f64 {
        match self.info().gain {
            Some((gain, decimals)) => round_to(raw as f64 * gain, decimals),
            None => raw as f64,
        }
    }

    /// Human readable value with unit, or label for the coded quantities.
    pub fn describe(self, raw: u32) -> String {
        match self {
            Command::InverterType => match model_description(raw) {
                Some(model) => format!("{} ({})", model, raw),
                None => format!("unknown model ({})", raw),
            },
            Command::Status => match status_description(raw) {
                Some(status) => format!("{} ({})", status, raw),
                None => format!("unknown status ({})", raw),
            },
            Command::AlarmCode => alarm_descriptions(raw),
            _ if self.unit().is_empty() => self.scale(raw).to_string(),
            _ => format!("{} {}", self.scale(raw), self.unit()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        COMMAND_TABLE
            .iter()
            .find(|info| info.code.eq_ignore_ascii_case(s))
            .map(|info| info.command)
            .ok_or_else(|| format!("unknown command code: {:?}", s))
    }
}

pub fn model_description(code: u32) -> Option<&'static str> {
    match code {
        20010 => Some("SolarMax 2000S"),
        20020 => Some("SolarMax 3000S"),
        20030 => Some("SolarMax 4200S"),
        20040 => Some("SolarMax 6000S"),
        _ => None,
    }
}

pub fn status_description(code: u32) -> Option<&'static str> {
    match code {
        20000 => Some("No communication"),
        20001 => Some("Running"),
        20002 => Some("Irradiance too low"),
        20003 => Some("Starting up"),
        20004 => Some("Running on MPP"),
        20005 => Some("Fan running"),
        20006 => Some("Running on maximum power"),
        20007 => Some("Temperature limitation"),
        20008 => Some("Mains operation"),
        _ => None,
    }
}

#[rustfmt::skip]
const ALARM_TABLE: [(u32, &str); 18] = [
    (0, "no error"),
    (1, "external fault 1"),
    (2, "insulation fault DC side"),
    (4, "earth fault current too large"),
    (8, "midpoint earth fuse blown"),
    (16, "external alarm 2"),
    (32, "long-term temperature limitation"),
    (64, "AC feed-in error"),
    (128, "external alarm 4"),
    (256, "fan failure"),
    (512, "fuse blown"),
    (1024, "temperature sensor failure"),
    (2048, "alarm 12"),
    (4096, "alarm 13"),
    (8192, "alarm 14"),
    (16384, "alarm 15"),
    (32768, "alarm 16"),
    (65536, "alarm 17"),
];

/// Label of an alarm code as reported (a single alarm bit, or 0).
pub fn alarm_description(code: u32) -> Option<&'static str> {
    ALARM_TABLE
        .iter()
        .find(|(value, _)| *value == code)
        .map(|(_, name)| *name)
}

/// All alarms set in `code`, joined with `" | "`.
pub fn alarm_descriptions(code: u32) -> String {
    if code == 0 {
        return ALARM_TABLE[0].1.into();
    }
    let mut descr = String::from("");
    for (mask, name) in ALARM_TABLE.iter().skip(1) {
        if code & mask != 0 {
            descr = descr.add(*name).add(" | ");
        }
    }
    let known = ALARM_TABLE.iter().fold(0u32, |acc, (mask, _)| acc | *mask);
    if code & !known != 0 {
        descr = descr.add(&format!("unknown bits 0x{:X}", code & !known));
    }
    if descr.ends_with(" | ") {
        descr.truncate(descr.len() - 3);
    }
    descr
}

/// Named accessors. Each one issues exactly one query; a missing reading
/// stays `None` through the scaling.
impl InverterClient {
    pub fn read(&mut self, command: Command) -> Option<u32> {
        self.query(command.code())
    }

    fn read_scaled(&mut self, command: Command) -> Option<f64> {
        self.read(command).map(|raw| command.scale(raw))
    }

    pub fn ac_output(&mut self) -> Option<f64> {
        self.read_scaled(Command::AcOutput)
    }

    pub fn operating_hours(&mut self) -> Option<u32> {
        self.read(Command::OperatingHours)
    }

    pub fn date_year(&mut self) -> Option<u32> {
        self.read(Command::DateYear)
    }

    pub fn date_month(&mut self) -> Option<u32> {
        self.read(Command::DateMonth)
    }

    pub fn date_day(&mut self) -> Option<u32> {
        self.read(Command::DateDay)
    }

    pub fn energy_year(&mut self) -> Option<u32> {
        self.read(Command::EnergyYear)
    }

    pub fn energy_month(&mut self) -> Option<u32> {
        self.read(Command::EnergyMonth)
    }

    pub fn energy_day(&mut self) -> Option<f64> {
        self.read_scaled(Command::EnergyDay)
    }

    pub fn energy_total(&mut self) -> Option<u32> {
        self.read(Command::EnergyTotal)
    }

    pub fn installed_capacity(&mut self) -> Option<f64> {
        self.read_scaled(Command::InstalledCapacity)
    }

    pub fn mains_cycle_duration(&mut self) -> Option<u32> {
        self.read(Command::MainsCycleDuration)
    }

    pub fn network_address(&mut self) -> Option<u32> {
        self.read(Command::NetworkAddress)
    }

    pub fn relative_output(&mut self) -> Option<u32> {
        self.read(Command::RelativeOutput)
    }

    pub fn software_version(&mut self) -> Option<u32> {
        self.read(Command::SoftwareVersion)
    }

    pub fn voltage_dc(&mut self) -> Option<f64> {
        self.read_scaled(Command::VoltageDc)
    }

    pub fn voltage_phase_one(&mut self) -> Option<f64> {
        self.read_scaled(Command::VoltagePhaseOne)
    }

    pub fn current_dc(&mut self) -> Option<f64> {
        self.read_scaled(Command::CurrentDc)
    }

    pub fn current_phase_one(&mut self) -> Option<f64> {
        self.read_scaled(Command::CurrentPhaseOne)
    }

    pub fn temperature_power_unit_one(&mut self) -> Option<u32> {
        self.read(Command::TemperaturePowerUnitOne)
    }

    pub fn inverter_type(&mut self) -> Option<u32> {
        self.read(Command::InverterType)
    }

    pub fn time_minutes(&mut self) -> Option<u32> {
        self.read(Command::TimeMinutes)
    }

    pub fn time_hours(&mut self) -> Option<u32> {
        self.read(Command::TimeHours)
    }

    pub fn model(&mut self) -> Option<&'static str> {
        self.inverter_type().and_then(model_description)
    }

    pub fn status(&mut self) -> Option<&'static str> {
        self.read(Command::Status).and_then(status_description)
    }

    pub fn alarm_code(&mut self) -> Option<&'static str> {
        self.read(Command::AlarmCode).and_then(alarm_description)
    }

    /// The inverter's own clock, assembled from five queries.
    pub fn inverter_time(&mut self) -> Option<NaiveDateTime> {
        let year = self.date_year()?;
        let month = self.date_month()?;
        let day = self.date_day()?;
        let hour = self.time_hours()?;
        let minute = self.time_minutes()?;
        inverter_datetime(year, month, day, hour, minute)
    }
}

fn inverter_datetime(year: u32, month: u32, day: u32, hour: u32, minute: u32) -> Option<NaiveDateTime> {
    // some firmware reports a 2-digit year
    let year = if year < 100 { year + 2000 } else { year };
    NaiveDate::from_ymd_opt(year as i32, month, day)?.and_hms_opt(hour, minute, 0)
}
