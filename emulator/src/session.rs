use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use hx711_core::clock::{ClockConfig, DEFAULT_CLOCK_HZ, Tick, Ticks};
use hx711_core::device::{Sample, SampleReport};
use hx711_core::driver::{ConfigRequest, Hx711Driver, MAX_DEVICES};
use hx711_core::protocol::commands::{CommandError, CommandExecutor, CommandOutcome};
use hx711_core::protocol::grammar::{self, Message};
use hx711_core::sim::SimulatedGpio;
use hx711_core::telemetry::EventId;

/// Conversion time used when a channel's data rate cannot be derived.
const FALLBACK_CONVERSION_TICKS: Ticks = 100_000;

/// Reports kept for [`Session::reports`]; older ones are dropped.
pub const REPORT_HISTORY: usize = 256;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "config_hx711",
        "config_hx711 oid=<n> dout_pin=<n> sck_pin=<n> gain=<1-3> sample_interval=<n> comm_delay=<us> sps=<n>",
    ),
    (
        "query_hx711",
        "query_hx711 oid=<n> clock=<n> sample_ticks=<n> sample_count=<n> rest_ticks=<n> min_value=<n> max_value=<n> range_check_count=<n>",
    ),
    (
        "advance",
        "advance <ticks>                 - run virtual time forward",
    ),
    (
        "load",
        "load <dout_pin> <value>...      - queue conversion results on a chip",
    ),
    (
        "stall",
        "stall <dout_pin> [on|off]       - hold a chip's DOUT high",
    ),
    (
        "status",
        "status                          - display bus and channel state",
    ),
    (
        "help",
        "help [topic]                    - show help for a command",
    ),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Interactive,
    SingleChannel,
    ContendedBus,
    StalledAdc,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Interactive => "transcripts/emulator-session.log",
            TranscriptProfile::SingleChannel => "transcripts/emulator-single-channel.log",
            TranscriptProfile::ContendedBus => "transcripts/emulator-contended-bus.log",
            TranscriptProfile::StalledAdc => "transcripts/emulator-stalled-adc.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Interactive => "HX711 Emulator session transcript",
            TranscriptProfile::SingleChannel => "HX711 Emulator single channel transcript",
            TranscriptProfile::ContendedBus => "HX711 Emulator contended bus transcript",
            TranscriptProfile::StalledAdc => "HX711 Emulator stalled ADC transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        [
            ("session", Self::Interactive),
            ("single", Self::SingleChannel),
            ("contended", Self::ContendedBus),
            ("stalled", Self::StalledAdc),
        ]
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(tag))
        .map(|(_, profile)| profile)
        .ok_or_else(|| format!("Unknown transcript profile `{tag}`"))
    }

    /// Picks the profile from command-line arguments (program name
    /// excluded): `--profile <tag>`, `--profile=<tag>` or a bare tag.
    /// No arguments selects [`TranscriptProfile::Interactive`].
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let Some(arg) = args.next() else {
            return Ok(Self::Interactive);
        };
        let tag = match arg.strip_prefix("--profile") {
            Some("") => args
                .next()
                .ok_or_else(|| "Expected value after --profile".to_string())?,
            Some(rest) => match rest.strip_prefix('=') {
                Some(value) => value.to_string(),
                None => return Err(format!("Unknown option `{arg}`")),
            },
            None => arg,
        };
        if let Some(extra) = args.next() {
            return Err(format!("Unexpected argument `{extra}`"));
        }
        Self::from_tag(&tag)
    }
}

/// Console session: a driver, the simulated chips it talks to and the
/// virtual clock both share.
pub struct Session<W: Write = BufWriter<File>> {
    executor: CommandExecutor<Hx711Driver>,
    gpio: SimulatedGpio<MAX_DEVICES>,
    transcript: TranscriptLogger<W>,
    telemetry_cursor: EventId,
    reports: VecDeque<SampleReport>,
    fired: Vec<SampleReport>,
}

impl Session {
    pub fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let transcript = TranscriptLogger::create(profile)?;
        Ok(Self::with_transcript(transcript))
    }
}

impl<W: Write> Session<W> {
    pub fn with_writer(profile: TranscriptProfile, writer: W) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile, writer)?;
        Ok(Self::with_transcript(transcript))
    }

    fn with_transcript(transcript: TranscriptLogger<W>) -> Self {
        Self {
            executor: CommandExecutor::new(Hx711Driver::new(ClockConfig::new(DEFAULT_CLOCK_HZ))),
            gpio: SimulatedGpio::new(),
            transcript,
            telemetry_cursor: 0,
            reports: VecDeque::with_capacity(REPORT_HISTORY),
            fired: Vec::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Tick {
        self.gpio.now()
    }

    /// The most recent [`REPORT_HISTORY`] reports, oldest first.
    pub fn reports(&self) -> &VecDeque<SampleReport> {
        &self.reports
    }

    pub fn into_transcript(self) -> W {
        self.transcript.writer
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.now();
        self.transcript.append_line(now, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let lines = match words.next() {
            Some(word) if word.eq_ignore_ascii_case("help") => handle_help(words.next()),
            Some(word) if word.eq_ignore_ascii_case("advance") => {
                return self.handle_advance(words.next());
            }
            Some(word) if word.eq_ignore_ascii_case("load") => self.handle_load(words),
            Some(word) if word.eq_ignore_ascii_case("stall") => {
                self.handle_stall(words.next(), words.next())
            }
            Some(word) if word.eq_ignore_ascii_case("status") => self.handle_status(),
            _ => self.handle_protocol(trimmed),
        };

        self.record_output(now, &lines)?;
        self.flush_telemetry()?;
        Ok(lines)
    }

    fn handle_protocol(&mut self, line: &str) -> Vec<String> {
        let now = self.now();
        let message = match grammar::parse(line) {
            Ok(message) => message,
            Err(err) => return vec![format!("ERR syntax {err}")],
        };

        if let Message::Config(request) = &message
            && let Err(detail) = self.wire_chip(request)
        {
            return vec![format!("ERR sim {detail}")];
        }

        match self.executor.dispatch(message, now, &mut self.gpio) {
            Ok(CommandOutcome::Configured { oid }) => vec![format!("OK config_hx711 oid={oid}")],
            Ok(CommandOutcome::Querying { oid, first_wake }) => {
                vec![format!("OK query_hx711 oid={oid} first_wake={first_wake}")]
            }
            Err(err) => vec![describe_command_error(&err)],
        }
    }

    /// Attaches a simulated chip to the pins a new channel names.
    fn wire_chip(&mut self, request: &ConfigRequest) -> Result<(), String> {
        if self.gpio.chip(request.dout_pin).is_some() {
            return Ok(());
        }
        let conversion = self
            .executor
            .control()
            .clock()
            .period_from_rate("sps", request.sps)
            .unwrap_or(FALLBACK_CONVERSION_TICKS);
        self.gpio
            .attach(request.dout_pin, request.sck_pin, conversion)
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    fn handle_advance(&mut self, argument: Option<&str>) -> io::Result<Vec<String>> {
        let started = self.now();
        let Some(ticks) = argument.and_then(|value| value.parse::<Ticks>().ok()) else {
            let lines = vec!["ERR advance expects a tick count".to_string()];
            self.record_output(started, &lines)?;
            return Ok(lines);
        };

        let target = started + ticks;
        let mut lines = Vec::new();
        while let Some(wake) = self.executor.control().next_wake()
            && !target.is_before(wake)
        {
            self.gpio.advance(wake);
            self.fired.clear();
            let driver = self.executor.control_mut();
            if let Err(err) = driver.run_due(wake, &mut self.gpio, &mut self.fired) {
                lines.push(format!("ERR schedule {err}"));
                break;
            }
            self.flush_telemetry()?;
            for report in self.fired.drain(..) {
                let line = report.to_string();
                self.transcript.append_line(wake, TranscriptRole::Emulator, &line)?;
                lines.push(line);
                if self.reports.len() == REPORT_HISTORY {
                    self.reports.pop_front();
                }
                self.reports.push_back(report);
            }
        }
        self.gpio.advance(target);

        let summary = format!("OK advance now={target}");
        self.transcript.append_line(target, TranscriptRole::Emulator, &summary)?;
        lines.push(summary);
        Ok(lines)
    }

    fn handle_load<'a>(&mut self, mut words: impl Iterator<Item = &'a str>) -> Vec<String> {
        let Some(pin) = words.next().and_then(|value| value.parse().ok()) else {
            return vec!["ERR load expects <dout_pin> <value>...".to_string()];
        };
        let Some(chip) = self.gpio.chip_mut(pin) else {
            return vec![format!("ERR sim no chip on pin {pin}")];
        };

        let mut queued = 0usize;
        for word in words {
            let Ok(value) = word.parse::<Sample>() else {
                return vec![format!("ERR load invalid value `{word}`")];
            };
            if chip.push_value(value).is_err() {
                return vec![format!("ERR sim sample queue full after {queued} values")];
            }
            queued += 1;
        }
        vec![format!("OK load pin={pin} queued={queued}")]
    }

    fn handle_stall(&mut self, pin: Option<&str>, mode: Option<&str>) -> Vec<String> {
        let Some(pin) = pin.and_then(|value| value.parse().ok()) else {
            return vec!["ERR stall expects <dout_pin> [on|off]".to_string()];
        };
        let stalled = match mode {
            None => true,
            Some(mode) if mode.eq_ignore_ascii_case("on") => true,
            Some(mode) if mode.eq_ignore_ascii_case("off") => false,
            Some(other) => return vec![format!("ERR stall unknown mode `{other}`")],
        };
        match self.gpio.chip_mut(pin) {
            Some(chip) => {
                chip.set_stalled(stalled);
                vec![format!("OK stall pin={pin} stalled={stalled}")]
            }
            None => vec![format!("ERR sim no chip on pin {pin}")],
        }
    }

    fn handle_status(&self) -> Vec<String> {
        let driver = self.executor.control();
        let bus = driver.bus();
        let mut lines = vec![format!(
            "now={} bus pending={} reserved_until={}",
            self.now(),
            bus.pending(),
            bus.reserved_until()
        )];
        for device in driver.devices() {
            let wake = driver
                .pending_wake(device.oid())
                .map_or_else(|| "idle".to_string(), |tick| tick.to_string());
            let config = device.config();
            lines.push(format!(
                "  oid={} dout={} sck={} gain_pulses={} claim={:?} bit={} wake={wake}",
                device.oid(),
                config.data_pin,
                config.clock_pin,
                config.gain_pulses,
                device.claim(),
                device.bit_index(),
            ));
        }
        lines
    }

    fn record_output(&mut self, tick: Tick, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript.append_line(tick, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }

    fn flush_telemetry(&mut self) -> io::Result<()> {
        let telemetry = self.executor.control().telemetry();
        let next = telemetry.next_id();
        for record in telemetry.since(self.telemetry_cursor) {
            self.transcript.append_line(
                record.tick,
                TranscriptRole::Telemetry,
                &record.to_string(),
            )?;
        }
        self.telemetry_cursor = next;
        Ok(())
    }
}

fn handle_help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn describe_command_error(error: &CommandError<'_>) -> String {
    match error {
        CommandError::Parse(err) => format!("ERR syntax {err}"),
        CommandError::Config(err) => format!("ERR config {err}"),
        CommandError::Lookup(err) => format!("ERR lookup {err}"),
        CommandError::Gpio(err) => format!("ERR gpio {err}"),
        CommandError::Schedule(err) => format!("ERR schedule {err}"),
        CommandError::Unsupported(what) => format!("ERR unsupported {what}"),
    }
}

struct TranscriptLogger<W: Write> {
    writer: W,
}

impl TranscriptLogger<BufWriter<File>> {
    fn create(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Self::new(profile, BufWriter::new(file))
    }
}

impl<W: Write> TranscriptLogger<W> {
    fn new(profile: TranscriptProfile, writer: W) -> io::Result<Self> {
        let mut logger = Self { writer };
        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are virtual clock ticks at {DEFAULT_CLOCK_HZ} Hz"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, tick: Tick, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[t={:>10}] {} {}", tick.raw(), role.prefix(), line)?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
    Telemetry,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
            TranscriptRole::Telemetry => "TLM <",
        }
    }
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}
