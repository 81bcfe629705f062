// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! AUX channel transport of the DP TX core.
//!
//! [`submit()`] performs a single AUX request through the core registers. [`transfer()`] retries
//! it for a bounded time. The [`AuxChannel`] trait builds the DPCD accessors on top of a transfer
//! implementation and handles the native reply codes.

use std::fmt::{self, Display};
use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::dpcd::{self, LinkStatus, ReceiverCaps};
use crate::regs::Registers;
use crate::util;

/// AUX related registers of the DP TX core.
pub mod reg {
    pub const ENABLE: u32 = 0x080;
    pub const AUX_COMMAND: u32 = 0x100;
    pub const AUX_COMMAND_CMD_SHIFT: u32 = 8;
    pub const AUX_COMMAND_ADDRESS_ONLY: u32 = 1 << 12;
    pub const AUX_COMMAND_BYTES_MASK: u32 = crate::genmask!(3, 0);
    pub const AUX_WRITE_FIFO: u32 = 0x104;
    pub const AUX_ADDRESS: u32 = 0x108;
    pub const CLK_DIVIDER: u32 = 0x10c;
    pub const CLK_DIVIDER_AUX_FILTER_SHIFT: u32 = 8;
    pub const INTR_SIGNAL_STATE: u32 = 0x130;
    pub const INTR_SIGNAL_STATE_HPD: u32 = 1 << 0;
    pub const INTR_SIGNAL_STATE_REQUEST: u32 = 1 << 1;
    pub const INTR_SIGNAL_STATE_REPLY: u32 = 1 << 2;
    pub const INTR_SIGNAL_STATE_REPLY_TIMEOUT: u32 = 1 << 3;
    pub const AUX_REPLY_DATA: u32 = 0x134;
    pub const AUX_REPLY_CODE: u32 = 0x138;
    pub const INTR_MASK: u32 = 0x144;
    pub const REPLY_DATA_CNT: u32 = 0x148;
    pub const REPLY_DATA_CNT_MASK: u32 = 0xff;
}

const CLK_DIVIDER_MHZ: u64 = 1_000_000;
/// Longest payload of a single AUX request.
pub const MAX_PAYLOAD: usize = 16;
/// Number of times a DEFER reply is retried.
pub const DEFER_RETRIES: usize = 32;

const REPLY_POLLS: usize = 3;
const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(1);
const TRANSFER_SLICE: Duration = Duration::from_micros(400);

/// AUX request command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuxCommand {
    I2cWrite,
    I2cRead,
    I2cWriteStatus,
    I2cWriteMot,
    I2cReadMot,
    NativeWrite,
    NativeRead,
}

impl AuxCommand {
    /// Returns the 4-bit request code.
    pub fn code(&self) -> u32 {
        match self {
            Self::I2cWrite => 0x0,
            Self::I2cRead => 0x1,
            Self::I2cWriteStatus => 0x2,
            Self::I2cWriteMot => 0x4,
            Self::I2cReadMot => 0x5,
            Self::NativeWrite => 0x8,
            Self::NativeRead => 0x9,
        }
    }

    /// Converts request code into command.
    pub fn from_code(code: u32) -> Option<Self> {
        let cmd = match code {
            0x0 => Self::I2cWrite,
            0x1 => Self::I2cRead,
            0x2 => Self::I2cWriteStatus,
            0x4 => Self::I2cWriteMot,
            0x5 => Self::I2cReadMot,
            0x8 => Self::NativeWrite,
            0x9 => Self::NativeRead,
            _ => return None,
        };
        Some(cmd)
    }

    pub fn is_read(&self) -> bool {
        self.code() & 0x1 != 0
    }
}

impl Display for AuxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::I2cWrite => "I2C write",
            Self::I2cRead => "I2C read",
            Self::I2cWriteStatus => "I2C write status",
            Self::I2cWriteMot => "I2C write MOT",
            Self::I2cReadMot => "I2C read MOT",
            Self::NativeWrite => "native write",
            Self::NativeRead => "native read",
        };
        write!(f, "{s}")
    }
}

/// Reply code returned by the sink.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuxReply {
    Ack,
    Nack,
    Defer,
    I2cNack,
    I2cDefer,
}

impl AuxReply {
    pub fn code(&self) -> u32 {
        match self {
            Self::Ack => 0x0,
            Self::Nack => 0x1,
            Self::Defer => 0x2,
            Self::I2cNack => 0x4,
            Self::I2cDefer => 0x8,
        }
    }

    /// Decodes the `AUX_REPLY_CODE` register value.
    pub fn from_code(code: u32) -> Result<Self> {
        let reply = match code {
            0x0 => Self::Ack,
            0x1 => Self::Nack,
            0x2 => Self::Defer,
            0x4 => Self::I2cNack,
            0x8 => Self::I2cDefer,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unknown AUX reply code {:#x}", code),
                ))
            }
        };
        Ok(reply)
    }
}

impl Display for AuxReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Defer => "DEFER",
            Self::I2cNack => "I2C NACK",
            Self::I2cDefer => "I2C DEFER",
        };
        write!(f, "{s}")
    }
}

/// Submits a single AUX request.
///
/// For writes `buf` holds the payload, for reads it receives the reply data. An empty `buf` sends
/// an address-only request. Fails with [`ErrorKind::ResourceBusy`] without touching any register
/// if a previous request is still in flight, with [`ErrorKind::TimedOut`] if no reply arrives and
/// with [`ErrorKind::InvalidData`] if an acknowledged read returns a different number of bytes
/// than requested.
pub fn submit<R: Registers + ?Sized>(
    regs: &mut R,
    cmd: AuxCommand,
    address: u32,
    buf: &mut [u8],
) -> Result<AuxReply> {
    if buf.len() > MAX_PAYLOAD {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("AUX payload of {} bytes too long", buf.len()),
        ));
    }

    if regs.read(reg::INTR_SIGNAL_STATE) & reg::INTR_SIGNAL_STATE_REQUEST != 0 {
        return Err(Error::from(ErrorKind::ResourceBusy));
    }

    regs.write(reg::AUX_ADDRESS, address);
    if !cmd.is_read() {
        for b in buf.iter() {
            regs.write(reg::AUX_WRITE_FIFO, *b as u32);
        }
    }

    let mut command = cmd.code() << reg::AUX_COMMAND_CMD_SHIFT;
    if buf.is_empty() {
        command |= reg::AUX_COMMAND_ADDRESS_ONLY;
    } else {
        command |= (buf.len() as u32 - 1) & reg::AUX_COMMAND_BYTES_MASK;
    }
    regs.write(reg::AUX_COMMAND, command);

    let mut timed_out = false;
    let replied = util::wait_for(REPLY_POLLS, REPLY_POLL_INTERVAL, || {
        let state = regs.read(reg::INTR_SIGNAL_STATE);
        if state & reg::INTR_SIGNAL_STATE_REPLY != 0 {
            return true;
        }
        timed_out = state & reg::INTR_SIGNAL_STATE_REPLY_TIMEOUT != 0;
        timed_out
    });
    if !replied || timed_out {
        return Err(Error::from(ErrorKind::TimedOut));
    }

    let reply = AuxReply::from_code(regs.read(reg::AUX_REPLY_CODE))?;

    if cmd.is_read() && reply == AuxReply::Ack && !buf.is_empty() {
        let count = regs.read(reg::REPLY_DATA_CNT) & reg::REPLY_DATA_CNT_MASK;
        if count as usize != buf.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("AUX reply has {} bytes, expected {}", count, buf.len()),
            ));
        }
        for b in buf.iter_mut() {
            *b = regs.read(reg::AUX_REPLY_DATA) as u8;
        }
    }

    Ok(reply)
}

/// Submits AUX request retrying for up to `timeout`.
///
/// The request is retried in 400 µs slices while the core is busy or the reply times out. If the
/// sink is known to be disconnected (`connected` is `false`) the transfer stops early with
/// [`ErrorKind::NotConnected`]. Other errors are returned immediately.
pub fn transfer<R: Registers + ?Sized>(
    regs: &mut R,
    connected: &AtomicBool,
    timeout: Duration,
    cmd: AuxCommand,
    address: u32,
    buf: &mut [u8],
) -> Result<AuxReply> {
    let iterations = (timeout.as_micros() / TRANSFER_SLICE.as_micros()).max(1);
    let mut last = Error::from(ErrorKind::TimedOut);

    for i in 0..iterations {
        match submit(regs, cmd, address, buf) {
            Ok(reply) => {
                debug!("AUX {} at {:#07x}: {} after {} retries", cmd, address, reply, i);
                return Ok(reply);
            }
            Err(err) if matches!(err.kind(), ErrorKind::ResourceBusy | ErrorKind::TimedOut) => {
                last = err
            }
            Err(err) => return Err(err),
        }

        if !connected.load(Ordering::Acquire) {
            info!("no connected AUX device");
            return Err(Error::from(ErrorKind::NotConnected));
        }

        thread::sleep(TRANSFER_SLICE);
    }

    info!(
        "AUX {} at {:#07x} failed after {} iterations: {}",
        cmd, address, iterations, last
    );

    Err(last)
}

/// Sets up the AUX clock divider from the AXI clock rate and enables the core.
pub fn init_aux<R: Registers + ?Sized>(regs: &mut R, aux_clk_hz: u64) -> Result<()> {
    if aux_clk_hz < CLK_DIVIDER_MHZ {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "AUX clock should be higher than 1 MHz",
        ));
    }

    // Pulse width must be between 0.4 and 0.6 µs.
    let min = 4 * aux_clk_hz / 10_000_000;
    let max = 6 * aux_clk_hz / 10_000_000;
    let width = (8..=48)
        .step_by(8)
        .find(|w| *w >= min && *w <= max)
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "AUX clock frequency too high"))?;

    let value = (width << reg::CLK_DIVIDER_AUX_FILTER_SHIFT) as u32
        | (aux_clk_hz / CLK_DIVIDER_MHZ) as u32;
    debug!("AUX clock divider {:#x}", value);

    regs.write(reg::CLK_DIVIDER, value);
    regs.write(reg::ENABLE, 1);

    Ok(())
}

/// Disables the core and masks all interrupts.
pub fn exit_aux<R: Registers + ?Sized>(regs: &mut R) {
    regs.write(reg::ENABLE, 0);
    regs.write(reg::INTR_MASK, 0xfff);
}

/// An AUX channel.
///
/// Implementors provide the raw [`transfer()`](AuxChannel::transfer) and get DPCD access on top
/// of it.
pub trait AuxChannel {
    /// Performs one AUX request and returns the reply of the sink.
    fn transfer(&mut self, cmd: AuxCommand, address: u32, buf: &mut [u8]) -> Result<AuxReply>;

    /// Reads DPCD registers starting from `address` into `buf`.
    fn dpcd_read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        for (i, chunk) in buf.chunks_mut(MAX_PAYLOAD).enumerate() {
            native(self, AuxCommand::NativeRead, address + (i * MAX_PAYLOAD) as u32, chunk)?;
        }
        Ok(())
    }

    /// Writes `data` to DPCD registers starting from `address`.
    fn dpcd_write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        for (i, chunk) in data.chunks(MAX_PAYLOAD).enumerate() {
            let mut chunk = chunk.to_vec();
            native(
                self,
                AuxCommand::NativeWrite,
                address + (i * MAX_PAYLOAD) as u32,
                &mut chunk,
            )?;
        }
        Ok(())
    }

    fn dpcd_readb(&mut self, address: u32) -> Result<u8> {
        let mut buf = [0; 1];
        self.dpcd_read(address, &mut buf)?;
        Ok(buf[0])
    }

    fn dpcd_writeb(&mut self, address: u32, value: u8) -> Result<()> {
        self.dpcd_write(address, &[value])
    }

    /// Reads the six link status bytes starting from `LANE0_1_STATUS`.
    fn read_link_status(&mut self) -> Result<LinkStatus> {
        let mut buf = [0; dpcd::LINK_STATUS_SIZE];
        self.dpcd_read(dpcd::LANE0_1_STATUS, &mut buf)?;
        Ok(LinkStatus::new(buf))
    }

    /// Reads the receiver capability field.
    fn read_caps(&mut self) -> Result<ReceiverCaps> {
        let mut buf = [0; dpcd::RECEIVER_CAP_SIZE];
        self.dpcd_read(dpcd::DPCD_REV, &mut buf)?;
        Ok(ReceiverCaps::new(buf))
    }
}

// Native request with DEFER handling.
fn native<A: AuxChannel + ?Sized>(
    aux: &mut A,
    cmd: AuxCommand,
    address: u32,
    buf: &mut [u8],
) -> Result<()> {
    for _ in 0..DEFER_RETRIES {
        match aux.transfer(cmd, address, buf)? {
            AuxReply::Ack => return Ok(()),
            AuxReply::Defer => {
                debug!("AUX {} at {:#07x} deferred", cmd, address);
                thread::sleep(TRANSFER_SLICE);
            }
            reply => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("AUX {} at {:#07x}: {}", cmd, address, reply),
                ))
            }
        }
    }

    Err(Error::new(
        ErrorKind::TimedOut,
        format!("AUX {} at {:#07x}: too many DEFERs", cmd, address),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regs::MemRegisters;

    #[test]
    fn busy_without_writes() {
        let mut regs = MemRegisters::new();
        regs.preset(reg::INTR_SIGNAL_STATE, reg::INTR_SIGNAL_STATE_REQUEST);

        let mut buf = [0; 2];
        let err = submit(&mut regs, AuxCommand::NativeRead, 0x202, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceBusy);
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn short_read_is_error() {
        let mut regs = MemRegisters::new();
        regs.preset(reg::INTR_SIGNAL_STATE, reg::INTR_SIGNAL_STATE_REPLY);
        regs.preset(reg::AUX_REPLY_CODE, AuxReply::Ack.code());
        regs.preset(reg::REPLY_DATA_CNT, 4);

        let mut buf = [0; 6];
        let err = submit(&mut regs, AuxCommand::NativeRead, 0x202, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn command_encoding() {
        let mut regs = MemRegisters::new();
        regs.preset(reg::INTR_SIGNAL_STATE, reg::INTR_SIGNAL_STATE_REPLY);

        let mut buf = [0x01, 0x02, 0x03];
        let reply = submit(&mut regs, AuxCommand::NativeWrite, 0x103, &mut buf).unwrap();
        assert_eq!(reply, AuxReply::Ack);
        assert_eq!(regs.writes_to(reg::AUX_ADDRESS), vec![0x103]);
        assert_eq!(regs.writes_to(reg::AUX_WRITE_FIFO), vec![1, 2, 3]);
        assert_eq!(regs.writes_to(reg::AUX_COMMAND), vec![0x802]);

        regs.clear_writes();
        submit(&mut regs, AuxCommand::I2cWriteMot, 0x50, &mut []).unwrap();
        assert_eq!(regs.writes_to(reg::AUX_COMMAND), vec![0x400 | 0x1000]);
    }

    #[test]
    fn reply_timeout() {
        let mut regs = MemRegisters::new();
        let mut buf = [0; 1];
        assert_eq!(
            submit(&mut regs, AuxCommand::NativeRead, 0, &mut buf)
                .unwrap_err()
                .kind(),
            ErrorKind::TimedOut
        );

        regs.preset(
            reg::INTR_SIGNAL_STATE,
            reg::INTR_SIGNAL_STATE_REPLY_TIMEOUT,
        );
        assert_eq!(
            submit(&mut regs, AuxCommand::NativeRead, 0, &mut buf)
                .unwrap_err()
                .kind(),
            ErrorKind::TimedOut
        );
    }

    #[test]
    fn transfer_stops_when_disconnected() {
        let mut regs = MemRegisters::new();
        regs.preset(reg::INTR_SIGNAL_STATE, reg::INTR_SIGNAL_STATE_REQUEST);
        let mut buf = [0; 1];

        let connected = AtomicBool::new(false);
        let err = transfer(
            &mut regs,
            &connected,
            Duration::from_millis(50),
            AuxCommand::NativeRead,
            0,
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);

        let connected = AtomicBool::new(true);
        let err = transfer(
            &mut regs,
            &connected,
            Duration::from_millis(1),
            AuxCommand::NativeRead,
            0,
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceBusy);
    }

    #[test]
    fn transfer_does_not_retry_short_reads() {
        let mut regs = MemRegisters::new();
        regs.preset(reg::INTR_SIGNAL_STATE, reg::INTR_SIGNAL_STATE_REPLY);
        regs.preset(reg::REPLY_DATA_CNT, 1);
        let connected = AtomicBool::new(true);

        let mut buf = [0; 2];
        let err = transfer(
            &mut regs,
            &connected,
            Duration::from_millis(50),
            AuxCommand::NativeRead,
            0,
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(regs.writes_to(reg::AUX_COMMAND).len(), 1);
    }

    #[test]
    fn aux_clock() {
        let mut regs = MemRegisters::new();
        init_aux(&mut regs, 100_000_000).unwrap();
        assert_eq!(regs.peek(reg::CLK_DIVIDER), 40 << 8 | 100);
        assert_eq!(regs.peek(reg::ENABLE), 1);

        assert_eq!(
            init_aux(&mut regs, 999_999).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert!(init_aux(&mut regs, 1_000_000_000).is_err());

        exit_aux(&mut regs);
        assert_eq!(regs.peek(reg::ENABLE), 0);
        assert_eq!(regs.peek(reg::INTR_MASK), 0xfff);
    }

    struct Deferring {
        defers: usize,
        calls: usize,
    }

    impl AuxChannel for Deferring {
        fn transfer(&mut self, _: AuxCommand, _: u32, buf: &mut [u8]) -> Result<AuxReply> {
            self.calls += 1;
            if self.calls <= self.defers {
                return Ok(AuxReply::Defer);
            }
            buf.fill(0xaa);
            Ok(AuxReply::Ack)
        }
    }

    #[test]
    fn defer_retries() {
        let mut aux = Deferring { defers: 3, calls: 0 };
        assert_eq!(aux.dpcd_readb(0x0).unwrap(), 0xaa);
        assert_eq!(aux.calls, 4);

        let mut aux = Deferring {
            defers: usize::MAX,
            calls: 0,
        };
        assert_eq!(aux.dpcd_readb(0x0).unwrap_err().kind(), ErrorKind::TimedOut);
        assert_eq!(aux.calls, DEFER_RETRIES);
    }

    #[test]
    fn long_reads_are_split() {
        let mut aux = Deferring { defers: 0, calls: 0 };
        let mut buf = [0; 40];
        aux.dpcd_read(0x0, &mut buf).unwrap();
        assert_eq!(aux.calls, 3);
        assert!(buf.iter().all(|b| *b == 0xaa));
    }
}
