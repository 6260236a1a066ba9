// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Runtime configuration: how often the epoch tick and GC sweep run, how
//! many concurrent sessions a [`crate::runtime::Runtime`] can hand out,
//! and the trie's fan-out.

use crate::error::{Result, YakushimaError};
use std::time::Duration;

/// A fan-out below 3 can't hold a separator plus two children; above 15
/// overruns the permutation word's 4-bit-per-rank slot addressing (see
/// [`crate::permutation`]) and the `u64` key-slice/length-tag packing.
const FANOUT_RANGE: std::ops::RangeInclusive<usize> = 3..=15;

/// Tuning knobs for a [`crate::runtime::Runtime`]. `Default` matches the
/// reference implementation's compiled-in constants.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the background epoch-tick and GC-sweep threads wake up.
    pub epoch_tick_interval: Duration,
    /// Size of the fixed session table; bounds how many threads can hold
    /// an open [`crate::session::Token`] at once.
    pub max_sessions: usize,
    /// Trie fan-out; validated to lie in `[3, 15]` at construction time.
    pub fanout: usize,
}

impl Config {
    /// Fails with [`YakushimaError::InvalidConfig`] if `fanout` is outside
    /// `[3, 15]`.
    pub fn new(epoch_tick_interval: Duration, max_sessions: usize, fanout: usize) -> Result<Self> {
        if !FANOUT_RANGE.contains(&fanout) {
            return Err(YakushimaError::InvalidConfig(format!(
                "fanout must be in {}..={}, got {fanout}",
                FANOUT_RANGE.start(),
                FANOUT_RANGE.end()
            )));
        }
        Ok(Self {
            epoch_tick_interval,
            max_sessions,
            fanout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            epoch_tick_interval: Duration::from_millis(40),
            max_sessions: 300,
            fanout: 15,
        }
    }
}
