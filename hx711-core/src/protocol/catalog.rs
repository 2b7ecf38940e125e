//! Command dictionary shared by the parser, the dispatcher, and help output.
//!
//! Each message is a name followed by `key=value` parameters. The format
//! letters follow the MCU command dictionary: `%c` is an 8-bit unsigned
//! value, `%u` a 32-bit unsigned value, and `%i` a 32-bit signed value.

use core::fmt;

/// Upper bound on parameters per message.
pub const MAX_PARAMS: usize = 8;

/// Which message a descriptor describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageTag {
    ConfigHx711,
    QueryHx711,
    InState,
}

/// Direction of a message relative to the MCU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host to MCU.
    Command,
    /// MCU to host.
    Response,
}

/// Wire type of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamKind {
    /// `%c`
    Byte,
    /// `%u`
    Unsigned,
    /// `%i`
    Signed,
}

impl ParamKind {
    /// Format letter as written in the dictionary.
    #[must_use]
    pub const fn format(self) -> &'static str {
        match self {
            ParamKind::Byte => "%c",
            ParamKind::Unsigned => "%u",
            ParamKind::Signed => "%i",
        }
    }

    /// Inclusive value range accepted for this kind.
    #[must_use]
    pub const fn range(self) -> (i64, i64) {
        match self {
            ParamKind::Byte => (0, u8::MAX as i64),
            ParamKind::Unsigned => (0, u32::MAX as i64),
            ParamKind::Signed => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageSpec {
    pub name: &'static str,
    pub tag: MessageTag,
    pub direction: Direction,
    pub params: &'static [ParamSpec],
    pub summary: &'static str,
}

impl MessageSpec {
    /// Position of the parameter named `key`, compared case-insensitively.
    #[must_use]
    pub fn param_index(&self, key: &str) -> Option<usize> {
        self.params
            .iter()
            .position(|param| param.name.eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for MessageSpec {
    /// Renders the dictionary signature, e.g. `query_hx711 oid=%c ...`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for param in self.params {
            write!(f, " {}={}", param.name, param.kind.format())?;
        }
        Ok(())
    }
}

const fn param(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec { name, kind }
}

const CONFIG_PARAMS: &[ParamSpec] = &[
    param("oid", ParamKind::Byte),
    param("dout_pin", ParamKind::Unsigned),
    param("sck_pin", ParamKind::Unsigned),
    param("gain", ParamKind::Unsigned),
    param("sample_interval", ParamKind::Unsigned),
    param("comm_delay", ParamKind::Unsigned),
    param("sps", ParamKind::Unsigned),
];

const QUERY_PARAMS: &[ParamSpec] = &[
    param("oid", ParamKind::Byte),
    param("clock", ParamKind::Unsigned),
    param("sample_ticks", ParamKind::Unsigned),
    param("sample_count", ParamKind::Byte),
    param("rest_ticks", ParamKind::Unsigned),
    param("min_value", ParamKind::Unsigned),
    param("max_value", ParamKind::Unsigned),
    param("range_check_count", ParamKind::Byte),
];

const IN_STATE_PARAMS: &[ParamSpec] = &[
    param("oid", ParamKind::Byte),
    param("next_clock", ParamKind::Unsigned),
    param("value", ParamKind::Signed),
];

pub const MESSAGES: &[MessageSpec] = &[
    MessageSpec {
        name: "config_hx711",
        tag: MessageTag::ConfigHx711,
        direction: Direction::Command,
        params: CONFIG_PARAMS,
        summary: "create an HX711 channel on a data/clock pin pair",
    },
    MessageSpec {
        name: "query_hx711",
        tag: MessageTag::QueryHx711,
        direction: Direction::Command,
        params: QUERY_PARAMS,
        summary: "(re)start periodic acquisition on a channel",
    },
    MessageSpec {
        name: "hx711_in_state",
        tag: MessageTag::InState,
        direction: Direction::Response,
        params: IN_STATE_PARAMS,
        summary: "completed conversion and the start of the next cycle",
    },
];

const _: () = {
    let mut index = 0;
    while index < MESSAGES.len() {
        assert!(MESSAGES[index].params.len() <= MAX_PARAMS);
        index += 1;
    }
};

/// Looks up a message by name, ignoring ASCII case.
#[must_use]
pub fn find(name: &str) -> Option<&'static MessageSpec> {
    MESSAGES
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Descriptor for a known tag.
#[must_use]
pub fn spec(tag: MessageTag) -> &'static MessageSpec {
    match tag {
        MessageTag::ConfigHx711 => &MESSAGES[0],
        MessageTag::QueryHx711 => &MESSAGES[1],
        MessageTag::InState => &MESSAGES[2],
    }
}

/// Messages travelling in `direction`.
pub fn messages(direction: Direction) -> impl Iterator<Item = &'static MessageSpec> {
    MESSAGES
        .iter()
        .filter(move |spec| spec.direction == direction)
}
