// servo-pid: A fixed-period PID controller library for servo drive loops
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Holding-register table used by a host to drive a control loop.
//!
//! A host exchanges 16-bit signed registers with the loop: a terminate flag,
//! the target setpoint and the Kp/Ki gains scaled to fixed point. Kp and Ki
//! carry their own scale, since some drives publish Kp with an extra decimal.
//! The register transport itself is behind [`RegisterBank`].

use std::sync::{Arc, Mutex};

use log::warn;

use crate::PidError;

/// Fixed-point scale applied to gains stored in registers.
pub const DEFAULT_GAIN_SCALE: f64 = 1000.0;

/// Kp scale of velocity loops that publish Kp with four decimals.
pub const FINE_GAIN_SCALE: f64 = 10_000.0;

/// Addresses and scaling of the control registers.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegisterMap {
    pub terminate: u16,
    pub target: u16,
    pub kp: u16,
    pub ki: u16,
    pub kp_scale: f64,
    pub ki_scale: f64,
}

impl Default for RegisterMap {
    fn default() -> Self {
        RegisterMap {
            terminate: 0,
            target: 1,
            kp: 2,
            ki: 3,
            kp_scale: DEFAULT_GAIN_SCALE,
            ki_scale: DEFAULT_GAIN_SCALE,
        }
    }
}

/// Decoded view of one read of the register table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterSnapshot {
    pub terminate: bool,
    pub target: f64,
    pub kp: f64,
    pub ki: f64,
    /// Kp register as read, before scaling
    pub kp_raw: i16,
    /// Ki register as read, before scaling
    pub ki_raw: i16,
}

impl RegisterMap {
    pub fn validate(&self) -> Result<(), PidError> {
        if !(self.kp_scale.is_finite() && self.kp_scale > 0.0) {
            return Err(PidError::InvalidConfiguration(
                "kp scale must be a positive finite number",
            ));
        }
        if !(self.ki_scale.is_finite() && self.ki_scale > 0.0) {
            return Err(PidError::InvalidConfiguration(
                "ki scale must be a positive finite number",
            ));
        }
        Ok(())
    }

    /// Number of registers, starting at address 0, needed to cover the map.
    pub fn span(&self) -> usize {
        let highest = self
            .terminate
            .max(self.target)
            .max(self.kp)
            .max(self.ki);
        highest as usize + 1
    }

    /// Decode a table read from address 0.
    pub fn decode(&self, table: &[i16]) -> Result<RegisterSnapshot, PidError> {
        let needed = self.span();
        if table.len() < needed {
            return Err(PidError::RegisterTableTooShort {
                needed,
                actual: table.len(),
            });
        }

        Ok(RegisterSnapshot {
            terminate: table[self.terminate as usize] != 0,
            target: f64::from(table[self.target as usize]),
            kp: self.decode_kp(table[self.kp as usize]),
            ki: self.decode_ki(table[self.ki as usize]),
            kp_raw: table[self.kp as usize],
            ki_raw: table[self.ki as usize],
        })
    }

    pub fn decode_kp(&self, raw: i16) -> f64 {
        f64::from(raw) / self.kp_scale
    }

    pub fn decode_ki(&self, raw: i16) -> f64 {
        f64::from(raw) / self.ki_scale
    }

    /// Scale Kp to its register value, rounding to nearest and saturating
    /// at the `i16` range.
    pub fn encode_kp(&self, kp: f64) -> i16 {
        encode_scaled("kp", kp, self.kp_scale)
    }

    /// Scale Ki to its register value, rounding to nearest and saturating
    /// at the `i16` range.
    pub fn encode_ki(&self, ki: f64) -> i16 {
        encode_scaled("ki", ki, self.ki_scale)
    }
}

fn encode_scaled(name: &str, gain: f64, scale: f64) -> i16 {
    let scaled = (gain * scale).round();
    if !(f64::from(i16::MIN)..=f64::from(i16::MAX)).contains(&scaled) {
        warn!(
            "{} {} does not fit a register at scale {}, saturating",
            name, gain, scale
        );
    }
    // `as` saturates out-of-range floats and maps NaN to 0
    scaled as i16
}

/// Access to a table of holding registers.
pub trait RegisterBank {
    type Error: std::error::Error;

    /// Read `out.len()` registers starting at `start`.
    fn read_holding(&mut self, start: u16, out: &mut [i16]) -> Result<(), Self::Error>;

    /// Write `values` to consecutive registers starting at `start`.
    fn write_holding(&mut self, start: u16, values: &[i16]) -> Result<(), Self::Error>;
}

/// An in-memory register table.
///
/// Clones share the same table, so a test or a simulated host can poke
/// registers while a [`Supervisor`](crate::Supervisor) polls them.
#[derive(Debug, Clone)]
pub struct MemoryRegisters {
    table: Arc<Mutex<Vec<i16>>>,
}

impl MemoryRegisters {
    pub fn new(len: usize) -> Self {
        MemoryRegisters {
            table: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    pub fn set(&self, address: u16, value: i16) -> Result<(), PidError> {
        let mut table = self.table.lock().map_err(|_| PidError::MutexPoisoned)?;
        let len = table.len();
        let slot = table
            .get_mut(address as usize)
            .ok_or(PidError::RegisterOutOfRange {
                start: address,
                count: 1,
                len,
            })?;
        *slot = value;
        Ok(())
    }

    pub fn get(&self, address: u16) -> Result<i16, PidError> {
        let table = self.table.lock().map_err(|_| PidError::MutexPoisoned)?;
        table
            .get(address as usize)
            .copied()
            .ok_or(PidError::RegisterOutOfRange {
                start: address,
                count: 1,
                len: table.len(),
            })
    }

    pub fn snapshot(&self) -> Result<Vec<i16>, PidError> {
        let table = self.table.lock().map_err(|_| PidError::MutexPoisoned)?;
        Ok(table.clone())
    }
}

impl RegisterBank for MemoryRegisters {
    type Error = PidError;

    fn read_holding(&mut self, start: u16, out: &mut [i16]) -> Result<(), PidError> {
        let table = self.table.lock().map_err(|_| PidError::MutexPoisoned)?;
        let begin = start as usize;
        let source = table
            .get(begin..begin + out.len())
            .ok_or(PidError::RegisterOutOfRange {
                start,
                count: out.len(),
                len: table.len(),
            })?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn write_holding(&mut self, start: u16, values: &[i16]) -> Result<(), PidError> {
        let mut table = self.table.lock().map_err(|_| PidError::MutexPoisoned)?;
        let len = table.len();
        let begin = start as usize;
        let target = table
            .get_mut(begin..begin + values.len())
            .ok_or(PidError::RegisterOutOfRange {
                start,
                count: values.len(),
                len,
            })?;
        target.copy_from_slice(values);
        Ok(())
    }
}
