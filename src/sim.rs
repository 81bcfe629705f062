// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Simulated hardware.
//!
//! [`SimGt`] stands in for the GT transceivers, [`SimTxCore`] for the DP TX core register file
//! and [`SimSink`] for a DisplayPort sink answering AUX requests. They let the protocol code run
//! without the FPGA, both in tests and with the `--simulate` option of the tools.
//!
//! # Examples
//! ```
//! use dptools::aux::AuxChannel;
//! use dptools::dpcd;
//! use dptools::linkrate::LinkRate;
//! use dptools::sim::SimSink;
//!
//! let mut sink = SimSink::new(dpcd::DPCD_REV_14, LinkRate::Hbr3, 4);
//! assert_eq!(sink.dpcd_readb(dpcd::MAX_LINK_RATE).unwrap(), 0x1e);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Error, ErrorKind, Result};
use std::sync::{Arc, Mutex};

use log::trace;

use crate::aux::{reg, AuxChannel, AuxCommand, AuxReply};
use crate::dpcd;
use crate::drive::{DriveSettings, PeLevel, VsLevel};
use crate::linkrate::{ChannelId, LinkRate, PllType, RefClkSrc};
use crate::phy::{Direction, Transceiver};
use crate::regs::{MemRegisters, Registers};
use crate::tx;

/// Transceiver operation recorded by [`SimGt`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GtOp {
    RefClk(RefClkSrc, u64),
    LineRate(ChannelId, u64),
    PllInit(ChannelId, PllType, PllType),
    ClkInit(ChannelId, Direction),
    ResetGtPll(ChannelId, Direction, bool),
    BufgGtReset(Direction, bool),
    WaitPmaResetDone(ChannelId, Direction),
    WaitPllLock(ChannelId),
    WaitResetDone(ChannelId, Direction),
}

/// Interrupt state of [`SimGt`].
#[derive(Clone, Debug, Default)]
pub struct SimInterrupts {
    /// Value returned from the status register.
    pub status: u32,
    /// Masks passed to enable, in order.
    pub enabled: Vec<u32>,
    /// Masks passed to disable, in order.
    pub disabled: Vec<u32>,
}

/// Simulated GT quad.
///
/// Every operation succeeds and PLLs are always locked. The state is shared through `Arc`s so
/// that it can be inspected after the transceiver was moved into a [`VideoPhy`](crate::phy::VideoPhy).
#[derive(Default)]
pub struct SimGt {
    log: Arc<Mutex<Vec<GtOp>>>,
    drivers: Arc<Mutex<HashMap<ChannelId, (u8, u8)>>>,
    drp: Arc<Mutex<HashMap<(ChannelId, u16), u16>>>,
    interrupts: Arc<Mutex<SimInterrupts>>,
    busy_clk_inits: usize,
}

impl SimGt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the first `count` clock initializations fail with [`ErrorKind::ResourceBusy`].
    pub fn busy_clk_inits(mut self, count: usize) -> Self {
        self.busy_clk_inits = count;
        self
    }

    /// Presets DRP register `addr` of `ch`.
    pub fn drp_preset(self, ch: ChannelId, addr: u16, value: u16) -> Self {
        if let Ok(mut drp) = self.drp.lock() {
            drp.insert((ch, addr), value);
        }
        self
    }

    /// Operations performed so far.
    pub fn log(&self) -> Arc<Mutex<Vec<GtOp>>> {
        self.log.clone()
    }

    /// Pre-emphasis and swing codes per channel.
    pub fn drivers(&self) -> Arc<Mutex<HashMap<ChannelId, (u8, u8)>>> {
        self.drivers.clone()
    }

    /// DRP registers.
    pub fn drp(&self) -> Arc<Mutex<HashMap<(ChannelId, u16), u16>>> {
        self.drp.clone()
    }

    pub fn interrupts(&self) -> Arc<Mutex<SimInterrupts>> {
        self.interrupts.clone()
    }

    fn push(&self, op: GtOp) {
        trace!("GT {:?}", op);
        if let Ok(mut log) = self.log.lock() {
            log.push(op);
        }
    }
}

fn poisoned() -> Error {
    Error::new(ErrorKind::Other, "simulation state poisoned")
}

impl Transceiver for SimGt {
    fn cfg_quad_ref_clk(&mut self, src: RefClkSrc, hz: u64) {
        self.push(GtOp::RefClk(src, hz));
    }

    fn cfg_line_rate(&mut self, ch: ChannelId, hz: u64) -> Result<()> {
        self.push(GtOp::LineRate(ch, hz));
        Ok(())
    }

    fn pll_initialize(
        &mut self,
        ch: ChannelId,
        _qpll_src: RefClkSrc,
        _cpll_src: RefClkSrc,
        tx_pll: PllType,
        rx_pll: PllType,
    ) -> Result<()> {
        self.push(GtOp::PllInit(ch, tx_pll, rx_pll));
        Ok(())
    }

    fn clk_initialize(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        self.push(GtOp::ClkInit(ch, dir));
        if self.busy_clk_inits > 0 {
            self.busy_clk_inits -= 1;
            return Err(Error::from(ErrorKind::ResourceBusy));
        }
        Ok(())
    }

    fn reset_gt_pll(&mut self, ch: ChannelId, dir: Direction, hold: bool) {
        self.push(GtOp::ResetGtPll(ch, dir, hold));
    }

    fn bufg_gt_reset(&mut self, dir: Direction, hold: bool) {
        self.push(GtOp::BufgGtReset(dir, hold));
    }

    fn wait_for_pma_reset_done(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        self.push(GtOp::WaitPmaResetDone(ch, dir));
        Ok(())
    }

    fn wait_for_pll_lock(&mut self, ch: ChannelId) -> Result<()> {
        self.push(GtOp::WaitPllLock(ch));
        Ok(())
    }

    fn wait_for_reset_done(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        self.push(GtOp::WaitResetDone(ch, dir));
        Ok(())
    }

    fn pll_locked(&mut self, _ch: ChannelId) -> bool {
        true
    }

    fn drp_read(&mut self, ch: ChannelId, addr: u16) -> Result<u16> {
        let drp = self.drp.lock().map_err(|_| poisoned())?;
        Ok(drp.get(&(ch, addr)).copied().unwrap_or(0))
    }

    fn drp_write(&mut self, ch: ChannelId, addr: u16, value: u16) -> Result<()> {
        let mut drp = self.drp.lock().map_err(|_| poisoned())?;
        drp.insert((ch, addr), value);
        Ok(())
    }

    fn set_tx_pre_emphasis(&mut self, ch: ChannelId, code: u8) {
        if let Ok(mut drivers) = self.drivers.lock() {
            drivers.entry(ch).or_default().0 = code;
        }
    }

    fn set_tx_diff_swing(&mut self, ch: ChannelId, code: u8) {
        if let Ok(mut drivers) = self.drivers.lock() {
            drivers.entry(ch).or_default().1 = code;
        }
    }

    fn intr_enable(&mut self, mask: u32) {
        if let Ok(mut irq) = self.interrupts.lock() {
            irq.enabled.push(mask);
        }
    }

    fn intr_disable(&mut self, mask: u32) {
        if let Ok(mut irq) = self.interrupts.lock() {
            irq.disabled.push(mask);
        }
    }

    fn intr_status(&mut self) -> u32 {
        self.interrupts.lock().map_or(0, |irq| irq.status)
    }
}

/// When a simulated sink reports a training phase done.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lock {
    /// On the first status read.
    Immediately,
    /// After the given number of status reads in the phase.
    AfterReads(usize),
    /// Once the voltage swing reaches the level.
    AtSwing(VsLevel),
    /// Only when the link runs at the given rate or lower.
    AtRate(LinkRate),
    Never,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Request {
    Fixed(DriveSettings),
    Climb,
}

/// Simulated DisplayPort sink.
///
/// Holds the DPCD register space and answers link status reads according to its clock recovery
/// and channel equalization [`Lock`] policies.
#[derive(Clone, Debug)]
pub struct SimSink {
    dpcd: BTreeMap<u32, u8>,
    plugged: bool,
    cr: Lock,
    eq: Lock,
    request: Request,
    trained: bool,
    status_reads: usize,
    phase_reads: usize,
    bw_writes: Vec<u8>,
}

impl SimSink {
    /// Creates a sink with DPCD revision `rev` supporting `rate` over `lanes` lanes.
    ///
    /// The sink supports enhanced framing and downspread, TPS3 from DPCD 1.2 and TPS4 from DPCD
    /// 1.4. Both training phases complete on the first status read.
    pub fn new(rev: u8, rate: LinkRate, lanes: u8) -> Self {
        let mut dpcd = BTreeMap::new();

        let mut lane_caps = lanes | dpcd::ENHANCED_FRAME_CAP;
        if rev >= dpcd::DPCD_REV_12 {
            lane_caps |= dpcd::TPS3_SUPPORTED;
        }
        let mut downspread = dpcd::MAX_DOWNSPREAD_0_5;
        if rev >= dpcd::DPCD_REV_14 {
            downspread |= dpcd::TPS4_SUPPORTED;
        }

        dpcd.insert(dpcd::DPCD_REV, rev);
        dpcd.insert(dpcd::MAX_LINK_RATE, rate.bw_code());
        dpcd.insert(dpcd::MAX_LANE_COUNT, lane_caps);
        dpcd.insert(dpcd::MAX_DOWNSPREAD, downspread);
        dpcd.insert(dpcd::SET_POWER, dpcd::SET_POWER_D3);

        Self {
            dpcd,
            plugged: true,
            cr: Lock::Immediately,
            eq: Lock::Immediately,
            request: Request::Fixed(DriveSettings::default()),
            trained: false,
            status_reads: 0,
            phase_reads: 0,
            bw_writes: Vec::new(),
        }
    }

    /// Disconnects the sink.
    pub fn unplugged(mut self) -> Self {
        self.plugged = false;
        self
    }

    /// Sets the clock recovery policy.
    pub fn cr(mut self, lock: Lock) -> Self {
        self.cr = lock;
        self
    }

    /// Sets the channel equalization policy.
    pub fn eq(mut self, lock: Lock) -> Self {
        self.eq = lock;
        self
    }

    /// Always requests `settings` from the source.
    pub fn requesting(mut self, settings: DriveSettings) -> Self {
        self.request = Request::Fixed(settings);
        self
    }

    /// Requests one voltage swing level more than the source currently drives.
    pub fn climbing(mut self) -> Self {
        self.request = Request::Climb;
        self
    }

    pub fn is_plugged(&self) -> bool {
        self.plugged
    }

    pub fn set_plugged(&mut self, plugged: bool) {
        self.plugged = plugged;
    }

    /// Returns DPCD register `address`.
    pub fn dpcd(&self, address: u32) -> u8 {
        self.dpcd.get(&address).copied().unwrap_or(0)
    }

    /// Number of link status reads.
    pub fn status_reads(&self) -> usize {
        self.status_reads
    }

    /// Values written to `LINK_BW_SET` in order.
    pub fn bw_writes(&self) -> &[u8] {
        &self.bw_writes
    }

    pub fn reset_counters(&mut self) {
        self.status_reads = 0;
        self.bw_writes.clear();
    }

    fn pattern(&self) -> u8 {
        self.dpcd(dpcd::TRAINING_PATTERN_SET) & 0xf
    }

    fn swing(&self) -> VsLevel {
        VsLevel::from(self.dpcd(dpcd::TRAINING_LANE0_SET) & dpcd::TRAINING_LANE_VS_MASK)
    }

    fn pre_emphasis(&self) -> PeLevel {
        PeLevel::from(
            (self.dpcd(dpcd::TRAINING_LANE0_SET) & dpcd::TRAINING_LANE_PE_MASK)
                >> dpcd::TRAINING_LANE_PE_SHIFT,
        )
    }

    fn locked(&self, lock: Lock) -> bool {
        match lock {
            Lock::Immediately => true,
            Lock::AfterReads(n) => self.phase_reads > n,
            Lock::AtSwing(vs) => self.swing() >= vs,
            Lock::AtRate(rate) => LinkRate::from_bw_code(self.dpcd(dpcd::LINK_BW_SET))
                .map_or(false, |r| r <= rate),
            Lock::Never => false,
        }
    }

    fn link_status(&mut self) -> [u8; dpcd::LINK_STATUS_SIZE] {
        self.status_reads += 1;
        self.phase_reads += 1;

        let (cr, eq) = match self.pattern() {
            0 => (self.trained, self.trained),
            1 => (self.locked(self.cr), false),
            _ => {
                let eq = self.locked(self.eq);
                self.trained = eq;
                (true, eq)
            }
        };

        let mut nibble = 0;
        if cr {
            nibble |= dpcd::LANE_CR_DONE;
        }
        if eq {
            nibble |= dpcd::LANE_CHANNEL_EQ_DONE | dpcd::LANE_SYMBOL_LOCKED;
        }

        let lanes = (self.dpcd(dpcd::LANE_COUNT_SET) & dpcd::MAX_LANE_COUNT_MASK).min(4);
        let mut status = [0; dpcd::LINK_STATUS_SIZE];
        for lane in 0..lanes as usize {
            status[lane / 2] |= nibble << (4 * (lane % 2));
        }
        if eq {
            status[2] = dpcd::INTERLANE_ALIGN_DONE;
        }

        let request = match self.request {
            Request::Fixed(settings) => settings,
            Request::Climb => DriveSettings::new(
                VsLevel::from(self.swing() as u8 + 1),
                self.pre_emphasis(),
            ),
        };
        let adjust = request.vs as u8 | (request.pe as u8) << 2;
        status[4] = adjust | adjust << 4;
        status[5] = adjust | adjust << 4;

        status
    }

    /// Reads `len` DPCD bytes from `address`.
    pub fn read(&mut self, address: u32, len: usize) -> Vec<u8> {
        if address == dpcd::LANE0_1_STATUS {
            let mut data = self.link_status().to_vec();
            data.resize(len, 0);
            return data;
        }
        (0..len as u32).map(|i| self.dpcd(address + i)).collect()
    }

    /// Writes `data` to DPCD starting from `address`.
    pub fn write(&mut self, address: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            let address = address + i as u32;
            match address {
                dpcd::LINK_BW_SET => self.bw_writes.push(*b),
                dpcd::TRAINING_PATTERN_SET => {
                    if *b & 0xf != self.pattern() {
                        self.phase_reads = 0;
                        if *b & 0xf != 0 {
                            self.trained = false;
                        }
                    }
                }
                _ => (),
            }
            self.dpcd.insert(address, *b);
        }
    }
}

impl AuxChannel for SimSink {
    fn transfer(&mut self, cmd: AuxCommand, address: u32, buf: &mut [u8]) -> Result<AuxReply> {
        if !self.plugged {
            return Err(Error::from(ErrorKind::TimedOut));
        }
        match cmd {
            AuxCommand::NativeRead => {
                let data = self.read(address, buf.len());
                buf.copy_from_slice(&data);
            }
            AuxCommand::NativeWrite => self.write(address, buf),
            _ => return Ok(AuxReply::I2cNack),
        }
        Ok(AuxReply::Ack)
    }
}

/// Simulated DP TX core with a sink attached.
///
/// Plain registers behave like [`MemRegisters`]. Writing `AUX_COMMAND` runs the request against
/// the [`SimSink`] and latches the reply for the AUX reply registers.
#[derive(Clone, Debug)]
pub struct SimTxCore {
    core: MemRegisters,
    sink: SimSink,
    fifo: Vec<u8>,
    reply: VecDeque<u8>,
    replied: bool,
    timed_out: bool,
    request_pending: bool,
    short_reply: Option<u32>,
    defers: usize,
    phy_ready: bool,
    phy_status_reads: usize,
}

impl SimTxCore {
    pub fn new(sink: SimSink) -> Self {
        Self {
            core: MemRegisters::new(),
            sink,
            fifo: Vec::new(),
            reply: VecDeque::new(),
            replied: false,
            timed_out: false,
            request_pending: false,
            short_reply: None,
            defers: 0,
            phy_ready: true,
            phy_status_reads: 0,
        }
    }

    /// Keeps the AUX request in flight forever.
    pub fn request_pending(mut self) -> Self {
        self.request_pending = true;
        self
    }

    /// Reports `count` reply bytes for every native read.
    pub fn short_reply(mut self, count: u32) -> Self {
        self.short_reply = Some(count);
        self
    }

    /// Answers the next `count` requests with DEFER.
    pub fn defer_replies(mut self, count: usize) -> Self {
        self.defers = count;
        self
    }

    pub fn set_phy_ready(&mut self, ready: bool) {
        self.phy_ready = ready;
    }

    /// Number of `PHY_STATUS` reads so far.
    pub fn phy_status_reads(&self) -> usize {
        self.phy_status_reads
    }

    /// Backing register file.
    pub fn core(&self) -> &MemRegisters {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut MemRegisters {
        &mut self.core
    }

    pub fn sink(&self) -> &SimSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut SimSink {
        &mut self.sink
    }

    fn execute(&mut self, command: u32) {
        let fifo: Vec<u8> = self.fifo.drain(..).collect();
        self.reply.clear();
        self.replied = false;
        self.timed_out = false;

        if !self.sink.is_plugged() {
            self.timed_out = true;
            return;
        }

        self.replied = true;

        if self.defers > 0 {
            self.defers -= 1;
            self.core
                .preset(reg::AUX_REPLY_CODE, AuxReply::Defer.code());
            self.core.preset(reg::REPLY_DATA_CNT, 0);
            return;
        }

        let address = self.core.peek(reg::AUX_ADDRESS);
        let cmd = AuxCommand::from_code((command >> reg::AUX_COMMAND_CMD_SHIFT) & 0xf);
        let len = if command & reg::AUX_COMMAND_ADDRESS_ONLY != 0 {
            0
        } else {
            (command & reg::AUX_COMMAND_BYTES_MASK) as usize + 1
        };

        trace!("AUX {:?} at {:#07x}, {} bytes", cmd, address, len);

        let (code, count) = match cmd {
            Some(AuxCommand::NativeRead) => {
                self.reply.extend(self.sink.read(address, len));
                (AuxReply::Ack, self.short_reply.unwrap_or(len as u32))
            }
            Some(AuxCommand::NativeWrite) => {
                self.sink.write(address, &fifo);
                (AuxReply::Ack, 0)
            }
            _ => (AuxReply::I2cNack, 0),
        };

        self.core.preset(reg::AUX_REPLY_CODE, code.code());
        self.core.preset(reg::REPLY_DATA_CNT, count);
    }
}

impl Registers for SimTxCore {
    fn read(&mut self, offset: u32) -> u32 {
        match offset {
            reg::INTR_SIGNAL_STATE => {
                let mut state = 0;
                if self.sink.is_plugged() {
                    state |= reg::INTR_SIGNAL_STATE_HPD;
                }
                if self.request_pending {
                    state |= reg::INTR_SIGNAL_STATE_REQUEST;
                }
                if self.replied {
                    state |= reg::INTR_SIGNAL_STATE_REPLY;
                }
                if self.timed_out {
                    state |= reg::INTR_SIGNAL_STATE_REPLY_TIMEOUT;
                }
                state
            }
            reg::AUX_REPLY_DATA => self.reply.pop_front().unwrap_or(0) as u32,
            tx::reg::PHY_STATUS => {
                self.phy_status_reads += 1;
                if self.phy_ready {
                    tx::reg::PHY_STATUS_LANES_READY_MASK | tx::reg::PHY_STATUS_FPGA_PLL_LOCKED
                } else {
                    0
                }
            }
            _ => self.core.read(offset),
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        self.core.write(offset, value);
        match offset {
            reg::AUX_WRITE_FIFO => self.fifo.push(value as u8),
            reg::AUX_COMMAND => self.execute(value),
            _ => (),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aux;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn read(core: &mut SimTxCore, address: u32, buf: &mut [u8]) -> Result<AuxReply> {
        let connected = AtomicBool::new(true);
        aux::transfer(
            core,
            &connected,
            Duration::from_millis(2),
            AuxCommand::NativeRead,
            address,
            buf,
        )
    }

    #[test]
    fn aux_through_core() {
        let mut core = SimTxCore::new(SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 2));
        let mut buf = [0; 3];
        assert_eq!(read(&mut core, dpcd::DPCD_REV, &mut buf).unwrap(), AuxReply::Ack);
        assert_eq!(buf, [0x12, 0x14, 0xc2]);

        let mut data = [0x0a];
        aux::submit(&mut core, AuxCommand::NativeWrite, dpcd::LINK_BW_SET, &mut data).unwrap();
        assert_eq!(core.sink().bw_writes(), &[0x0a]);
    }

    #[test]
    fn busy_core() {
        let mut core =
            SimTxCore::new(SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 2)).request_pending();
        let mut buf = [0; 1];
        assert_eq!(
            read(&mut core, 0, &mut buf).unwrap_err().kind(),
            ErrorKind::ResourceBusy
        );
        assert!(core.core().writes_to(reg::AUX_COMMAND).is_empty());
    }

    #[test]
    fn short_and_deferred_replies() {
        let mut core =
            SimTxCore::new(SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 2)).short_reply(1);
        let mut buf = [0; 2];
        assert_eq!(
            read(&mut core, 0, &mut buf).unwrap_err().kind(),
            ErrorKind::InvalidData
        );

        let mut core =
            SimTxCore::new(SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 2)).defer_replies(2);
        let mut buf = [0; 1];
        assert_eq!(read(&mut core, 0, &mut buf).unwrap(), AuxReply::Defer);
        assert_eq!(read(&mut core, 0, &mut buf).unwrap(), AuxReply::Defer);
        assert_eq!(read(&mut core, 0, &mut buf).unwrap(), AuxReply::Ack);
        assert_eq!(buf[0], 0x12);
    }

    #[test]
    fn sink_phases() {
        let mut sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4)
            .cr(Lock::AfterReads(1))
            .eq(Lock::Never);
        sink.write(dpcd::LANE_COUNT_SET, &[4]);
        sink.write(dpcd::TRAINING_PATTERN_SET, &[0x21]);

        let status = sink.read_link_status().unwrap();
        assert!(!status.clock_recovery_ok(4));
        let status = sink.read_link_status().unwrap();
        assert!(status.clock_recovery_ok(4));

        sink.write(dpcd::TRAINING_PATTERN_SET, &[0x22]);
        let status = sink.read_link_status().unwrap();
        assert!(status.clock_recovery_ok(4));
        assert!(!status.channel_eq_ok(4));
        assert_eq!(sink.status_reads(), 3);
    }

    #[test]
    fn climbing_requests() {
        let mut sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 1).climbing();
        sink.write(dpcd::TRAINING_LANE0_SET, &[0x01]);
        let status = sink.read_link_status().unwrap();
        assert_eq!(status.adjust_voltage_swing(0), 2);
        assert_eq!(status.adjust_pre_emphasis(0), 0);
    }
}
