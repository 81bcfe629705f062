// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Register file access.
//!
//! Every IP block of the pipeline (Video PHY, DP TX and DP RX subsystems) is a 32-bit memory mapped
//! register file. All the protocol code is written against the [`Registers`] trait so that it runs
//! the same way on top of a mapped [UIO](crate::uio::Uio) device and on top of the in-memory
//! [`MemRegisters`] used for tests and dry runs.

use std::collections::HashMap;

/// Access to a 32-bit register file.
///
/// Offsets are in bytes from the start of the register file. Reads take `&mut self` because
/// reading some registers (FIFOs, clear-on-read status) has side effects.
pub trait Registers {
    /// Reads register at `offset`.
    fn read(&mut self, offset: u32) -> u32;

    /// Writes `value` to register at `offset`.
    fn write(&mut self, offset: u32, value: u32);

    /// Sets `bits` in register at `offset`.
    fn set(&mut self, offset: u32, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value | bits);
    }

    /// Clears `bits` in register at `offset`.
    fn clear(&mut self, offset: u32, bits: u32) {
        let value = self.read(offset);
        self.write(offset, value & !bits);
    }

    /// Replaces bits selected by `mask` with `value`.
    fn update(&mut self, offset: u32, mask: u32, value: u32) {
        let old = self.read(offset);
        let new = (old & !mask) | (value & mask);
        if old != new {
            self.write(offset, new);
        }
    }
}

impl<R: Registers + ?Sized> Registers for Box<R> {
    fn read(&mut self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&mut self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }
}

/// In-memory register file.
///
/// Registers that were never written read as zero. Every write is recorded so that tests can
/// check what was programmed and in which order.
///
/// # Examples
/// ```
/// use dptools::regs::{MemRegisters, Registers};
///
/// let mut regs = MemRegisters::new();
/// regs.write(0x80, 1);
/// regs.set(0x80, 0x10);
///
/// assert_eq!(regs.read(0x80), 0x11);
/// assert_eq!(regs.writes(), &[(0x80, 1), (0x80, 0x11)]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemRegisters {
    values: HashMap<u32, u32>,
    writes: Vec<(u32, u32)>,
}

impl MemRegisters {
    /// Creates an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Presets register value without recording it as a write.
    pub fn preset(&mut self, offset: u32, value: u32) {
        self.values.insert(offset, value);
    }

    /// Returns current value of a register without side effects.
    pub fn peek(&self, offset: u32) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    /// Returns all writes done so far in order.
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }

    /// Returns values written to `offset` in order.
    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Forgets the write log.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl Registers for MemRegisters {
    fn read(&mut self, offset: u32) -> u32 {
        self.peek(offset)
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.writes.push((offset, value));
        self.values.insert(offset, value);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn update_bits() {
        let mut regs = MemRegisters::new();
        regs.preset(0x7c, 0xffff_ffff);

        regs.update(0x7c, 0xf, 0x3);
        assert_eq!(regs.peek(0x7c), 0xffff_fff3);

        // Same value again is not written.
        regs.update(0x7c, 0xf, 0x3);
        assert_eq!(regs.writes_to(0x7c).len(), 1);

        regs.clear(0x7c, 0xffff_0000);
        assert_eq!(regs.peek(0x7c), 0xfff3);
    }

    #[test]
    fn boxed() {
        let mut regs: Box<dyn Registers> = Box::new(MemRegisters::new());
        regs.write(0x10, 5);
        regs.set(0x10, 2);
        assert_eq!(regs.read(0x10), 7);
    }
}
