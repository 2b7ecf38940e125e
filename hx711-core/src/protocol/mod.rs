//! Text protocol shared between firmware and emulator targets.
//!
//! Lines are lexed and parsed by [`grammar`] against the message dictionary
//! in [`catalog`], then executed by [`commands::CommandExecutor`]. This module
//! also renders requests back into their wire form, which the host-side
//! channel configuration uses to build command lines.

pub mod catalog;
pub mod commands;
pub mod grammar;

use core::fmt;

use crate::driver::{ConfigRequest, QueryRequest};

impl fmt::Display for ConfigRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config_hx711 oid={} dout_pin={} sck_pin={} gain={} sample_interval={} comm_delay={} sps={}",
            self.oid,
            self.dout_pin,
            self.sck_pin,
            self.gain,
            self.sample_interval,
            self.comm_delay_us,
            self.sps
        )
    }
}

impl fmt::Display for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "query_hx711 oid={} clock={} sample_ticks={} sample_count={} rest_ticks={} min_value={} max_value={} range_check_count={}",
            self.oid,
            self.clock,
            self.sample_ticks,
            self.sample_count,
            self.rest_ticks,
            self.min_value,
            self.max_value,
            self.range_check_count
        )
    }
}
