//! Command dispatcher.
//!
//! Glues parsed lines to the acquisition driver: `config_hx711` creates a
//! channel and `query_hx711` (re)arms it. The executor stays `no_std`
//! friendly so firmware and emulator share the same implementation.

use crate::clock::Tick;
use crate::device::Oid;
use crate::driver::{ConfigError, ConfigRequest, Hx711Driver, QueryError, QueryRequest};
use crate::gpio::{Gpio, GpioError};
use crate::registry::NotFoundError;
use crate::timer::TimerError;

use super::grammar::{self, Message};

/// Command execution successes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandOutcome {
    /// A channel was created or replaced.
    Configured { oid: Oid },
    /// Acquisition was armed; the first clock edge is due at `first_wake`.
    Querying { oid: Oid, first_wake: Tick },
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    Config(ConfigError),
    Lookup(NotFoundError),
    Gpio(GpioError),
    Schedule(TimerError),
    /// The line parsed but is not something the MCU accepts.
    Unsupported(&'static str),
}

impl core::fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CommandError::Parse(err) => write!(f, "parse error: {err}"),
            CommandError::Config(err) => write!(f, "config error: {err}"),
            CommandError::Lookup(err) => write!(f, "lookup error: {err}"),
            CommandError::Gpio(err) => write!(f, "gpio error: {err}"),
            CommandError::Schedule(err) => write!(f, "schedule error: {err}"),
            CommandError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<ConfigError> for CommandError<'_> {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Gpio(err) => Self::Gpio(err),
            other => Self::Config(other),
        }
    }
}

impl From<QueryError> for CommandError<'_> {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::NotFound(err) => Self::Lookup(err),
            QueryError::Timer(err) => Self::Schedule(err),
        }
    }
}

/// Abstraction over the acquisition driver used by the dispatcher.
pub trait ChannelControl {
    fn configure_channel<G>(&mut self, request: &ConfigRequest, gpio: &mut G) -> Result<(), ConfigError>
    where
        G: Gpio + ?Sized;

    fn start_channel<G>(&mut self, request: &QueryRequest, now: Tick, gpio: &mut G) -> Result<Tick, QueryError>
    where
        G: Gpio + ?Sized;
}

impl<const DEVICES: usize> ChannelControl for Hx711Driver<DEVICES> {
    fn configure_channel<G>(&mut self, request: &ConfigRequest, gpio: &mut G) -> Result<(), ConfigError>
    where
        G: Gpio + ?Sized,
    {
        self.configure(request, gpio)
    }

    fn start_channel<G>(&mut self, request: &QueryRequest, now: Tick, gpio: &mut G) -> Result<Tick, QueryError>
    where
        G: Gpio + ?Sized,
    {
        self.start_acquisition(request, now, gpio)
    }
}

/// Dispatches command lines into the driver.
pub struct CommandExecutor<C> {
    control: C,
}

impl<C> CommandExecutor<C> {
    /// Creates a new executor around the provided driver.
    pub const fn new(control: C) -> Self {
        Self { control }
    }

    /// Returns an immutable reference to the underlying driver.
    pub fn control(&self) -> &C {
        &self.control
    }

    /// Returns a mutable reference to the underlying driver.
    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Consumes the executor and yields the inner driver.
    pub fn into_inner(self) -> C {
        self.control
    }
}

impl<C> CommandExecutor<C>
where
    C: ChannelControl,
{
    /// Parses and executes a command line received at `now`.
    pub fn execute<'a, G>(
        &mut self,
        line: &'a str,
        now: Tick,
        gpio: &mut G,
    ) -> Result<CommandOutcome, CommandError<'a>>
    where
        G: Gpio + ?Sized,
    {
        let message = grammar::parse(line)?;
        self.dispatch(message, now, gpio)
    }

    /// Executes an already parsed message.
    pub fn dispatch<'a, G>(
        &mut self,
        message: Message,
        now: Tick,
        gpio: &mut G,
    ) -> Result<CommandOutcome, CommandError<'a>>
    where
        G: Gpio + ?Sized,
    {
        match message {
            Message::Config(request) => {
                self.control.configure_channel(&request, gpio)?;
                Ok(CommandOutcome::Configured { oid: request.oid })
            }
            Message::Query(request) => {
                let first_wake = self.control.start_channel(&request, now, gpio)?;
                Ok(CommandOutcome::Querying {
                    oid: request.oid,
                    first_wake,
                })
            }
            Message::Report(_) => Err(CommandError::Unsupported("hx711_in_state is a response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockConfig;
    use crate::driver::DEVICE_SCHEMA;
    use crate::sim::SimulatedGpio;

    const CONFIG: &str =
        "config_hx711 oid=0 dout_pin=4 sck_pin=5 gain=1 sample_interval=10 comm_delay=1 sps=10";
    const QUERY: &str = "query_hx711 oid=0 clock=0 sample_ticks=0 sample_count=0 rest_ticks=0 min_value=0 max_value=0 range_check_count=0";

    fn executor() -> (CommandExecutor<Hx711Driver<4>>, SimulatedGpio<2>) {
        let mut gpio = SimulatedGpio::new();
        gpio.attach(4, 5, 100).expect("attach");
        (
            CommandExecutor::new(Hx711Driver::new(ClockConfig::new(1_000_000))),
            gpio,
        )
    }

    #[test]
    fn config_then_query_arms_channel() {
        let (mut executor, mut gpio) = executor();

        assert_eq!(
            executor.execute(CONFIG, Tick::ZERO, &mut gpio),
            Ok(CommandOutcome::Configured { oid: 0 })
        );
        assert_eq!(
            executor.execute(QUERY, Tick::new(1_000), &mut gpio),
            Ok(CommandOutcome::Querying {
                oid: 0,
                first_wake: Tick::new(101_000),
            })
        );
        assert_eq!(executor.control().next_wake(), Some(Tick::new(101_000)));
    }

    #[test]
    fn query_before_config_is_a_lookup_error() {
        let (mut executor, mut gpio) = executor();
        assert_eq!(
            executor.execute(QUERY, Tick::ZERO, &mut gpio),
            Err(CommandError::Lookup(NotFoundError {
                oid: 0,
                schema: DEVICE_SCHEMA
            }))
        );
    }

    #[test]
    fn bad_pin_surfaces_gpio_error() {
        let (mut executor, mut gpio) = executor();
        let error = executor
            .execute(
                "config_hx711 oid=0 dout_pin=9 sck_pin=5 gain=1 sample_interval=10 comm_delay=1 sps=10",
                Tick::ZERO,
                &mut gpio,
            )
            .expect_err("pin 9 is not wired");
        assert_eq!(error, CommandError::Gpio(GpioError::InvalidPin(9)));
        assert!(executor.control().device(0).is_none());
    }

    #[test]
    fn invalid_gain_surfaces_config_error() {
        let (mut executor, mut gpio) = executor();
        let error = executor
            .execute(
                "config_hx711 oid=0 dout_pin=4 sck_pin=5 gain=0 sample_interval=10 comm_delay=1 sps=10",
                Tick::ZERO,
                &mut gpio,
            )
            .expect_err("gain 0 is invalid");
        assert_eq!(error, CommandError::Config(ConfigError::InvalidGain(0)));
    }

    #[test]
    fn parse_error_is_returned() {
        let (mut executor, mut gpio) = executor();
        let error = executor
            .execute("config_hx711 oid=0", Tick::ZERO, &mut gpio)
            .expect_err("parse should fail");
        assert!(matches!(error, CommandError::Parse(_)));
    }

    #[test]
    fn report_lines_are_not_commands() {
        let (mut executor, mut gpio) = executor();
        let error = executor
            .execute("hx711_in_state oid=0 next_clock=1 value=2", Tick::ZERO, &mut gpio)
            .expect_err("responses are not accepted");
        assert!(matches!(error, CommandError::Unsupported(_)));
    }
}
