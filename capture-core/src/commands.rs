//! Operator console grammar.
//!
//! One command per line, keywords case-insensitive:
//!
//! ```text
//! select <0|1|2>
//! acquire <duration>
//! capture <duration>
//! save
//! load [count]
//! status
//! help
//! ```
//!
//! Durations take a `us`, `ms` or `s` suffix; a bare integer is microseconds,
//! the unit of the sampling period.

use core::fmt;
use core::time::Duration;

use winnow::ascii::{Caseless, digit1, space0, space1};
use winnow::combinator::{alt, delimited, opt, preceded};
use winnow::prelude::*;
use winnow::token::literal;

use crate::channel::AdcChannel;

/// Parsed console command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Select(AdcChannel),
    Acquire(Duration),
    /// Acquire, save, then read back what was stored.
    Capture(Duration),
    Save,
    /// Read back `count` samples, or the last saved count when omitted.
    Load(Option<usize>),
    Status,
    Help,
}

/// Column at which parsing stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandParseError {
    pub offset: usize,
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised command at column {}", self.offset)
    }
}

pub const HELP_TEXT: &str = "\
select <0|1|2>       make ADC0..ADC2 the active channel
acquire <duration>   sample the active channel (e.g. 800us, 5ms, 1s)
capture <duration>   acquire, save to flash, and read back
save                 store the last acquisition
load [count]         read samples back from flash
status               show channel, sampler and storage state
help                 this text";

/// Parses one console line; trailing line terminators are ignored.
pub fn parse_command(line: &str) -> Result<Command, CommandParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    command.parse(line).map_err(|err| CommandParseError {
        offset: err.offset(),
    })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    delimited(
        space0,
        alt((select, acquire, capture, save, load, status, help)),
        space0,
    )
    .parse_next(input)
}

fn select(input: &mut &str) -> ModalResult<Command> {
    preceded((literal(Caseless("select")), space1), channel)
        .map(Command::Select)
        .parse_next(input)
}

fn acquire(input: &mut &str) -> ModalResult<Command> {
    preceded((literal(Caseless("acquire")), space1), duration)
        .map(Command::Acquire)
        .parse_next(input)
}

fn capture(input: &mut &str) -> ModalResult<Command> {
    preceded((literal(Caseless("capture")), space1), duration)
        .map(Command::Capture)
        .parse_next(input)
}

fn save(input: &mut &str) -> ModalResult<Command> {
    literal(Caseless("save"))
        .value(Command::Save)
        .parse_next(input)
}

fn load(input: &mut &str) -> ModalResult<Command> {
    preceded(literal(Caseless("load")), opt(preceded(space1, count)))
        .map(Command::Load)
        .parse_next(input)
}

fn status(input: &mut &str) -> ModalResult<Command> {
    literal(Caseless("status"))
        .value(Command::Status)
        .parse_next(input)
}

fn help(input: &mut &str) -> ModalResult<Command> {
    literal(Caseless("help"))
        .value(Command::Help)
        .parse_next(input)
}

fn channel(input: &mut &str) -> ModalResult<AdcChannel> {
    digit1
        .try_map(|digits: &str| digits.parse::<u8>())
        .verify_map(AdcChannel::from_index)
        .parse_next(input)
}

fn count(input: &mut &str) -> ModalResult<usize> {
    digit1
        .try_map(|digits: &str| digits.parse::<usize>())
        .parse_next(input)
}

fn duration(input: &mut &str) -> ModalResult<Duration> {
    let value = digit1
        .try_map(|digits: &str| digits.parse::<u64>())
        .parse_next(input)?;
    let unit = opt(alt((
        literal(Caseless("us")),
        literal(Caseless("ms")),
        literal(Caseless("s")),
    )))
    .parse_next(input)?;

    Ok(match unit {
        Some(unit) if unit.eq_ignore_ascii_case("ms") => Duration::from_millis(value),
        Some(unit) if unit.eq_ignore_ascii_case("s") => Duration::from_secs(value),
        _ => Duration::from_micros(value),
    })
}
