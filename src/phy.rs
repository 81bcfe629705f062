// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Video PHY configuration sequencer.
//!
//! The Video PHY wraps the quad of GT transceivers shared by the DP RX and DP TX subsystems. The
//! low level transceiver operations live behind the [`Transceiver`] trait (see
//! [`Vphy`](crate::vphy::Vphy) for the register implementation); this module sequences them to
//! program line rates, resets and drive levels.
//!
//! The PHY is shared and every operation must be called with the device lock held. The shared form
//! is [`PhyHandle`].

use std::fmt::{self, Display};
use std::io::{Error, ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::PhyConfig;
use crate::drive::{self, DriveSettings, DriveTable, PeLevel, VsLevel};
use crate::linkrate::{self, ChannelId, LinkRate, LinkRateEntry, PllType, RefClkSrc};

/// Direction of a transceiver path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Rx,
    Tx,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rx => "RX",
            Self::Tx => "TX",
        };
        write!(f, "{s}")
    }
}

/// Transceiver generation of the FPGA.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransceiverType {
    Gtxe2,
    Gthe2,
    Gtpe2,
    Gthe3,
    Gthe4,
    Gtye4,
}

impl Display for TransceiverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gtxe2 => "GTXE2",
            Self::Gthe2 => "GTHE2",
            Self::Gtpe2 => "GTPE2",
            Self::Gthe3 => "GTHE3",
            Self::Gthe4 => "GTHE4",
            Self::Gtye4 => "GTYE4",
        };
        write!(f, "{s}")
    }
}

/// DRP addresses used by the sequencer.
pub mod drp {
    pub const RX_DATA_WIDTH: u16 = 0x03;
    pub const RX_INT_DATA_WIDTH: u16 = 0x66;
    pub const TX_DATA_WIDTH: u16 = 0x7a;
    pub const TX_INT_DATA_WIDTH: u16 = 0x85;
}

/// Low level operations of a quad of GT transceivers.
///
/// Channel arguments may name a group (`Cha`, `Cmna`) in which case the operation applies to every
/// member.
pub trait Transceiver: Send {
    /// Records the frequency of reference clock `src`.
    fn cfg_quad_ref_clk(&mut self, src: RefClkSrc, hz: u64);

    /// Records the line rate to be generated on `ch`.
    fn cfg_line_rate(&mut self, ch: ChannelId, hz: u64) -> Result<()>;

    /// Selects the reference clocks and the PLLs feeding TX and RX.
    fn pll_initialize(
        &mut self,
        ch: ChannelId,
        qpll_src: RefClkSrc,
        cpll_src: RefClkSrc,
        tx_pll: PllType,
        rx_pll: PllType,
    ) -> Result<()>;

    /// Programs the PLL dividers of `dir` for the configured line rate.
    ///
    /// Returns [`ErrorKind::ResourceBusy`] if the DRP interface is busy.
    fn clk_initialize(&mut self, ch: ChannelId, dir: Direction) -> Result<()>;

    /// Asserts (`hold == true`) or releases the GT and PLL resets of `ch`.
    fn reset_gt_pll(&mut self, ch: ChannelId, dir: Direction, hold: bool);

    /// Asserts or releases the reset of the BUFG_GT clock buffer of `dir`.
    fn bufg_gt_reset(&mut self, dir: Direction, hold: bool);

    fn wait_for_pma_reset_done(&mut self, ch: ChannelId, dir: Direction) -> Result<()>;

    fn wait_for_pll_lock(&mut self, ch: ChannelId) -> Result<()>;

    fn wait_for_reset_done(&mut self, ch: ChannelId, dir: Direction) -> Result<()>;

    /// Returns `true` if the PLL feeding `ch` is locked.
    fn pll_locked(&mut self, ch: ChannelId) -> bool;

    fn drp_read(&mut self, ch: ChannelId, addr: u16) -> Result<u16>;

    fn drp_write(&mut self, ch: ChannelId, addr: u16, value: u16) -> Result<()>;

    /// Writes the TX pre-cursor (pre-emphasis) code of `ch`.
    fn set_tx_pre_emphasis(&mut self, ch: ChannelId, code: u8);

    /// Writes the TX differential swing code of `ch`.
    fn set_tx_diff_swing(&mut self, ch: ChannelId, code: u8);

    fn intr_enable(&mut self, mask: u32);

    fn intr_disable(&mut self, mask: u32);

    /// Reads the latched interrupt status.
    fn intr_status(&mut self) -> u32;
}

/// Set of PHY interrupt events.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PhyEvents(u32);

impl PhyEvents {
    pub const TX_RESET_DONE: u32 = 0x1;
    pub const RX_RESET_DONE: u32 = 0x2;
    pub const CPLL_LOCK: u32 = 0x4;
    pub const QPLL0_LOCK: u32 = 0x8;
    pub const TX_ALIGN_DONE: u32 = 0x10;
    pub const QPLL1_LOCK: u32 = 0x20;
    pub const TX_CLKDET_FREQ_CHANGE: u32 = 0x40;
    pub const RX_CLKDET_FREQ_CHANGE: u32 = 0x80;
    pub const TX_TMR_TIMEOUT: u32 = 0x4000_0000;
    pub const RX_TMR_TIMEOUT: u32 = 0x8000_0000;

    /// Every interrupt the sequencer services.
    pub const ALL: u32 = Self::TX_RESET_DONE
        | Self::RX_RESET_DONE
        | Self::CPLL_LOCK
        | Self::QPLL0_LOCK
        | Self::TX_ALIGN_DONE
        | Self::QPLL1_LOCK
        | Self::TX_CLKDET_FREQ_CHANGE
        | Self::RX_CLKDET_FREQ_CHANGE
        | Self::TX_TMR_TIMEOUT
        | Self::RX_TMR_TIMEOUT;

    const NAMES: [(u32, &'static str); 10] = [
        (Self::TX_RESET_DONE, "TX reset done"),
        (Self::RX_RESET_DONE, "RX reset done"),
        (Self::CPLL_LOCK, "CPLL lock"),
        (Self::QPLL0_LOCK, "QPLL0 lock"),
        (Self::TX_ALIGN_DONE, "TX align done"),
        (Self::QPLL1_LOCK, "QPLL1 lock"),
        (Self::TX_CLKDET_FREQ_CHANGE, "TX frequency change"),
        (Self::RX_CLKDET_FREQ_CHANGE, "RX frequency change"),
        (Self::TX_TMR_TIMEOUT, "TX timer timeout"),
        (Self::RX_TMR_TIMEOUT, "RX timer timeout"),
    ];

    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Display for PhyEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

/// Runtime state of one PHY lane.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhyLane {
    index: usize,
    direction: Option<Direction>,
    share_laneclk: Option<u32>,
    locked: bool,
    controller: u32,
    instance: u32,
}

impl PhyLane {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Direction assigned by the controller using the lane or `None` if not yet resolved.
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Lane whose clock this lane shares, if any.
    pub fn share_laneclk(&self) -> Option<u32> {
        self.share_laneclk
    }

    /// Lock state of the PLL feeding the lane as of the last serviced interrupt.
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn controller(&self) -> u32 {
        self.controller
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    fn channel(&self) -> ChannelId {
        ChannelId::CHANNELS[self.index % ChannelId::CHANNELS.len()]
    }
}

/// Operations requested by the DP controllers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhyOptions {
    /// Program line rate `code` (Mb/s) for `direction`.
    SetRate { code: u32, direction: Direction },
    /// Apply drive levels to all TX lanes.
    SetVoltages { vs: VsLevel, pe: PeLevel },
    /// Reset the RX PLL.
    Reset,
}

/// Number of clock initialization attempts before line rate programming is aborted.
pub const CLK_INIT_RETRIES: usize = 100;

/// Line rate programmed by [`VideoPhy::init()`] before the TX rate.
const INIT_LINE_RATE: u32 = 8100;
/// TX line rate programmed at the end of [`VideoPhy::init()`].
const INIT_TX_LINE_RATE: u32 = 5400;

/// The Video PHY device.
pub struct VideoPhy {
    gt: Box<dyn Transceiver>,
    table: &'static dyn DriveTable,
    config: PhyConfig,
    lanes: Vec<PhyLane>,
    settings: DriveSettings,
    tx_rate: Option<LinkRate>,
    rx_rate: Option<LinkRate>,
}

/// Shared Video PHY.
pub type PhyHandle = Arc<Mutex<VideoPhy>>;

/// Locks the PHY.
pub fn lock(handle: &PhyHandle) -> Result<MutexGuard<'_, VideoPhy>> {
    handle
        .lock()
        .map_err(|_| Error::new(ErrorKind::Other, "PHY lock poisoned"))
}

impl VideoPhy {
    /// Creates PHY on top of `gt`.
    ///
    /// The drive table is picked from the configured transceiver type and the lanes are created
    /// from the configured lane count.
    pub fn new(gt: Box<dyn Transceiver>, config: PhyConfig) -> Result<Self> {
        let table = drive::table_for(config.transceiver_type)?;
        let lanes = (0..config.lanes as usize).map(PhyLane::new).collect();

        debug!(
            "{} PHY with {} lanes, {} drive table",
            config.transceiver_type,
            config.lanes,
            table.name()
        );

        Ok(Self {
            gt,
            table,
            config,
            lanes,
            settings: DriveSettings::default(),
            tx_rate: None,
            rx_rate: None,
        })
    }

    /// Wraps the PHY into a shareable handle.
    pub fn into_handle(self) -> PhyHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &PhyConfig {
        &self.config
    }

    pub fn lanes(&self) -> &[PhyLane] {
        &self.lanes
    }

    /// Drive settings last applied.
    pub fn drive_settings(&self) -> DriveSettings {
        self.settings
    }

    /// Line rate last programmed for TX.
    pub fn tx_rate(&self) -> Option<LinkRate> {
        self.tx_rate
    }

    /// Line rate last programmed for RX.
    pub fn rx_rate(&self) -> Option<LinkRate> {
        self.rx_rate
    }

    /// Gives access to the underlying transceiver.
    pub fn transceiver(&mut self) -> &mut dyn Transceiver {
        self.gt.as_mut()
    }

    fn clk_initialize(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        for attempt in 1..=CLK_INIT_RETRIES {
            match self.gt.clk_initialize(ch, dir) {
                Ok(()) => {
                    debug!("{} {} clock initialized after {} attempts", ch, dir, attempt);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::ResourceBusy => continue,
                Err(err) => return Err(err),
            }
        }

        error!(
            "{} {} clock initialization exhausted after {} attempts",
            ch, dir, CLK_INIT_RETRIES
        );

        Err(Error::new(
            ErrorKind::TimedOut,
            "transceiver clock initialization exhausted",
        ))
    }

    fn program_tx(&mut self, entry: &LinkRateEntry) -> Result<()> {
        debug!(
            "TX line rate {} using {} on {}",
            entry.rate, entry.tx_pll, entry.tx_channel
        );

        self.gt
            .cfg_quad_ref_clk(entry.qpll_refclk, entry.qpll_refclk_hz);
        self.gt
            .cfg_quad_ref_clk(entry.cpll_refclk, entry.cpll_refclk_hz);
        self.gt
            .cfg_line_rate(entry.tx_channel, entry.line_rate_hz)?;
        self.gt.pll_initialize(
            entry.tx_channel,
            entry.qpll_refclk,
            entry.cpll_refclk,
            entry.tx_pll,
            entry.rx_pll,
        )?;

        // Nothing has been reset yet so bail out here and keep the old PLL running.
        self.clk_initialize(entry.tx_channel, Direction::Tx)?;

        self.gt.reset_gt_pll(ChannelId::Cha, Direction::Tx, true);
        self.gt.reset_gt_pll(ChannelId::Cha, Direction::Tx, false);

        let status = self
            .gt
            .wait_for_pma_reset_done(ChannelId::Cha, Direction::Tx)
            .and_then(|_| self.gt.wait_for_pll_lock(entry.tx_channel))
            .and_then(|_| self.gt.wait_for_reset_done(ChannelId::Cha, Direction::Tx));
        if let Err(err) = status {
            error!("TX GT configuration at {} failed: {}", entry.rate, err);
            return Err(err);
        }

        self.tx_rate = Some(entry.rate);
        info!("TX line rate set to {}", entry.rate);

        Ok(())
    }

    /// Programs TX line rate `code` (Mb/s).
    ///
    /// Uses the CPLL or QPLL1 variant of the link rate table depending on the configuration. If
    /// the transceiver stays busy for [`CLK_INIT_RETRIES`] clock initialization attempts the
    /// programming is aborted with [`ErrorKind::TimedOut`] before any reset is pulsed.
    pub fn configure_tx(&mut self, code: u32) -> Result<()> {
        let entry = linkrate::lookup(code, self.config.tx_cpll).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("unsupported line rate {}", code),
            )
        })?;
        self.program_tx(entry)
    }

    /// Programs RX line rate after the source changed the link bandwidth.
    ///
    /// The PLL reset is left asserted and released by [`rx_pll_reset()`](Self::rx_pll_reset).
    pub fn rx_link_bandwidth(&mut self, rate: LinkRate) -> Result<()> {
        debug!("RX line rate {}", rate);

        // QPLL and CPLL both run from the onboard clock.
        self.gt
            .cfg_quad_ref_clk(RefClkSrc::Onboard, linkrate::ONBOARD_REFCLK_HZ);
        self.gt.cfg_line_rate(ChannelId::Cha, rate.hz())?;
        self.gt.cfg_line_rate(ChannelId::Cmn1, rate.hz())?;

        self.gt.reset_gt_pll(ChannelId::Cha, Direction::Rx, true);
        self.gt.pll_initialize(
            ChannelId::Cha,
            RefClkSrc::Onboard,
            RefClkSrc::Onboard,
            PllType::Qpll1,
            PllType::Cpll,
        )?;
        self.clk_initialize(ChannelId::Cha, Direction::Rx)?;

        self.rx_rate = Some(rate);

        Ok(())
    }

    /// Pulses the RX PLL reset and waits for the RX path to come up.
    pub fn rx_pll_reset(&mut self) -> Result<()> {
        self.gt.bufg_gt_reset(Direction::Rx, true);
        self.gt.reset_gt_pll(ChannelId::Cha, Direction::Rx, true);
        self.gt.reset_gt_pll(ChannelId::Cha, Direction::Rx, false);
        self.gt.bufg_gt_reset(Direction::Rx, false);

        self.gt.wait_for_reset_done(ChannelId::Cha, Direction::Rx)?;
        self.gt.wait_for_pll_lock(ChannelId::Cha)
    }

    /// Applies drive `settings` to all four TX channels.
    pub fn adjust_drive(&mut self, settings: DriveSettings) {
        let settings = settings.clamp();
        let pe = self.table.pre_emphasis(settings.pe);
        let swing = self.table.diff_swing(settings);

        debug!(
            "TX drive {}: pre-emphasis {:#x}, diff swing {:#x}",
            settings, pe, swing
        );

        for ch in ChannelId::CHANNELS {
            self.gt.set_tx_pre_emphasis(ch, pe);
        }
        for ch in ChannelId::CHANNELS {
            self.gt.set_tx_diff_swing(ch, swing);
        }

        self.settings = settings;
    }

    /// Performs an operation requested by a DP controller.
    pub fn configure(&mut self, opts: PhyOptions) -> Result<()> {
        match opts {
            PhyOptions::SetRate {
                code,
                direction: Direction::Tx,
            } => self.configure_tx(code),
            PhyOptions::SetRate {
                code,
                direction: Direction::Rx,
            } => {
                let rate = LinkRate::from_code(code).ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidInput,
                        format!("unsupported line rate {}", code),
                    )
                })?;
                self.rx_link_bandwidth(rate)
            }
            PhyOptions::SetVoltages { vs, pe } => {
                self.adjust_drive(DriveSettings::new(vs, pe));
                Ok(())
            }
            PhyOptions::Reset => self.rx_pll_reset(),
        }
    }

    /// Resolves lane `lane` for a controller.
    ///
    /// `args` are `[controller, instance, share_laneclk, direction_tx]` as given in the controller
    /// description.
    pub fn xlate(&mut self, lane: usize, args: &[u32]) -> Result<&PhyLane> {
        let [controller, instance, share_laneclk, direction_tx] = args else {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("expected 4 lane arguments, got {}", args.len()),
            ));
        };

        let entry = self
            .lanes
            .get_mut(lane)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no PHY lane {}", lane)))?;

        entry.controller = *controller;
        entry.instance = *instance;
        entry.share_laneclk = Some(*share_laneclk);
        entry.direction = Some(if *direction_tx != 0 {
            Direction::Tx
        } else {
            Direction::Rx
        });

        debug!(
            "lane {} assigned to controller {}.{} ({})",
            lane,
            controller,
            instance,
            entry.direction.map(|d| d.to_string()).unwrap_or_default()
        );

        Ok(entry)
    }

    /// Switches the RX and/or TX datapath of all channels into 2-byte mode.
    pub fn set_two_byte(&mut self, rx: bool, tx: bool) -> Result<()> {
        if rx {
            self.update_drp(drp::RX_DATA_WIDTH, 0x1e0, 0x60)?;
            self.update_drp(drp::RX_INT_DATA_WIDTH, 0x3, 0x0)?;
            debug!("RX channels configured for 2-byte mode");
        }
        if tx {
            self.update_drp(drp::TX_DATA_WIDTH, 0xf, 0x3)?;
            self.update_drp(drp::TX_INT_DATA_WIDTH, 0xc00, 0x0)?;
            debug!("TX channels configured for 2-byte mode");
        }
        Ok(())
    }

    // Reads the value from the first channel and writes it to all of them.
    fn update_drp(&mut self, addr: u16, clear: u16, set: u16) -> Result<()> {
        let value = (self.gt.drp_read(ChannelId::Ch1, addr)? & !clear) | set;
        for ch in ChannelId::CHANNELS {
            self.gt.drp_write(ch, addr, value)?;
        }
        Ok(())
    }

    fn pulse_reset(&mut self, dir: Direction) {
        self.gt.reset_gt_pll(ChannelId::Cha, dir, true);
        self.gt.bufg_gt_reset(dir, true);
        self.gt.reset_gt_pll(ChannelId::Cha, dir, false);
        self.gt.bufg_gt_reset(dir, false);
    }

    /// Brings the PHY up.
    ///
    /// Initializes both directions for 8.1 Gb/s, switches the datapath into 2-byte mode, applies
    /// the lowest drive level, pulses the TX and RX resets and finally programs the default TX
    /// line rate.
    pub fn init(&mut self) -> Result<()> {
        let entry = linkrate::lookup(INIT_LINE_RATE, self.config.tx_cpll)
            .ok_or(Error::from(ErrorKind::InvalidInput))?;

        self.gt
            .cfg_quad_ref_clk(entry.qpll_refclk, entry.qpll_refclk_hz);
        self.gt
            .cfg_quad_ref_clk(entry.cpll_refclk, entry.cpll_refclk_hz);
        self.gt.cfg_line_rate(ChannelId::Cha, entry.line_rate_hz)?;
        self.gt.cfg_line_rate(ChannelId::Cmn1, entry.line_rate_hz)?;
        self.gt.pll_initialize(
            ChannelId::Cha,
            entry.qpll_refclk,
            entry.cpll_refclk,
            entry.tx_pll,
            entry.rx_pll,
        )?;
        self.clk_initialize(entry.tx_channel, Direction::Tx)?;
        self.clk_initialize(entry.rx_channel, Direction::Rx)?;

        let swing = self.table.diff_swing(DriveSettings::default());
        for ch in ChannelId::CHANNELS {
            self.gt.set_tx_diff_swing(ch, swing);
        }

        if let Err(err) = self.set_two_byte(true, true) {
            warn!("failed to switch to 2-byte mode: {}", err);
        }

        self.pulse_reset(Direction::Tx);
        self.pulse_reset(Direction::Rx);

        self.configure_tx(INIT_TX_LINE_RATE)?;

        self.gt.intr_enable(PhyEvents::ALL);

        info!("{} PHY initialized", self.config.transceiver_type);

        Ok(())
    }

    /// Masks further PHY interrupts until the bottom half has run.
    pub fn irq_top_half(&mut self) {
        self.gt.intr_disable(PhyEvents::ALL);
    }

    /// Services pending PHY interrupts and unmasks them again.
    pub fn irq_bottom_half(&mut self) -> PhyEvents {
        let events = PhyEvents::new(self.gt.intr_status());

        debug!("PHY interrupt status {:#010x}: {}", events.bits(), events);

        if events.contains(PhyEvents::CPLL_LOCK)
            || events.contains(PhyEvents::QPLL0_LOCK)
            || events.contains(PhyEvents::QPLL1_LOCK)
        {
            for i in 0..self.lanes.len() {
                let ch = self.lanes[i].channel();
                let locked = self.gt.pll_locked(ch);
                if self.lanes[i].locked != locked {
                    debug!("lane {} PLL {}", i, if locked { "locked" } else { "unlocked" });
                }
                self.lanes[i].locked = locked;
            }
        }

        self.gt.intr_enable(PhyEvents::ALL);

        events
    }
}

/// Runs both interrupt halves with the PHY lock held.
pub fn service_interrupt(handle: &PhyHandle) -> Result<PhyEvents> {
    let mut phy = lock(handle)?;
    phy.irq_top_half();
    Ok(phy.irq_bottom_half())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::{GtOp, SimGt};

    fn phy(gt: SimGt) -> VideoPhy {
        let config = PhyConfig {
            transceiver_type: TransceiverType::Gthe4,
            lanes: 4,
            tx_cpll: true,
        };
        VideoPhy::new(Box::new(gt), config).unwrap()
    }

    #[test]
    fn configure_tx_sequence() {
        let gt = SimGt::new();
        let log = gt.log();
        let mut phy = phy(gt);

        phy.configure_tx(8100).unwrap();
        assert_eq!(phy.tx_rate(), Some(LinkRate::Hbr3));

        let ops = log.lock().unwrap().clone();
        assert_eq!(
            ops,
            vec![
                GtOp::RefClk(RefClkSrc::Onboard, 270_000_000),
                GtOp::RefClk(RefClkSrc::Onboard, 270_000_000),
                GtOp::LineRate(ChannelId::Cha, 8_100_000_000),
                GtOp::PllInit(ChannelId::Cha, PllType::Cpll, PllType::Cpll),
                GtOp::ClkInit(ChannelId::Cha, Direction::Tx),
                GtOp::ResetGtPll(ChannelId::Cha, Direction::Tx, true),
                GtOp::ResetGtPll(ChannelId::Cha, Direction::Tx, false),
                GtOp::WaitPmaResetDone(ChannelId::Cha, Direction::Tx),
                GtOp::WaitPllLock(ChannelId::Cha),
                GtOp::WaitResetDone(ChannelId::Cha, Direction::Tx),
            ]
        );
    }

    #[test]
    fn clock_init_exhaustion_aborts() {
        let gt = SimGt::new().busy_clk_inits(usize::MAX);
        let log = gt.log();
        let mut phy = phy(gt);

        let err = phy.configure_tx(5400).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert_eq!(phy.tx_rate(), None);

        let ops = log.lock().unwrap();
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, GtOp::ClkInit(..)))
                .count(),
            CLK_INIT_RETRIES
        );
        assert!(!ops.iter().any(|op| matches!(op, GtOp::ResetGtPll(..))));
    }

    #[test]
    fn clock_init_retries_while_busy() {
        let gt = SimGt::new().busy_clk_inits(3);
        let log = gt.log();
        let mut phy = phy(gt);

        phy.configure_tx(2700).unwrap();

        let ops = log.lock().unwrap();
        assert_eq!(
            ops.iter()
                .filter(|op| matches!(op, GtOp::ClkInit(..)))
                .count(),
            4
        );
    }

    #[test]
    fn unsupported_rate() {
        let mut phy = phy(SimGt::new());
        assert_eq!(
            phy.configure_tx(3240).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        let opts = PhyOptions::SetRate {
            code: 1000,
            direction: Direction::Rx,
        };
        assert_eq!(
            phy.configure(opts).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn qpll_variant_waits_for_common_lock() {
        let gt = SimGt::new();
        let log = gt.log();
        let config = PhyConfig {
            transceiver_type: TransceiverType::Gthe4,
            lanes: 4,
            tx_cpll: false,
        };
        let mut phy = VideoPhy::new(Box::new(gt), config).unwrap();

        phy.configure_tx(1620).unwrap();

        let ops = log.lock().unwrap();
        assert!(ops.contains(&GtOp::PllInit(ChannelId::Cmn1, PllType::Qpll1, PllType::Cpll)));
        assert!(ops.contains(&GtOp::WaitPllLock(ChannelId::Cmn1)));
    }

    #[test]
    fn rx_sequences() {
        let gt = SimGt::new();
        let log = gt.log();
        let mut phy = phy(gt);

        phy.configure(PhyOptions::SetRate {
            code: 5400,
            direction: Direction::Rx,
        })
        .unwrap();
        phy.configure(PhyOptions::Reset).unwrap();
        assert_eq!(phy.rx_rate(), Some(LinkRate::Hbr2));

        let ops = log.lock().unwrap();
        let reset = ops
            .iter()
            .position(|op| *op == GtOp::ResetGtPll(ChannelId::Cha, Direction::Rx, true))
            .unwrap();
        let init = ops
            .iter()
            .position(|op| *op == GtOp::PllInit(ChannelId::Cha, PllType::Qpll1, PllType::Cpll))
            .unwrap();
        assert!(reset < init);
        assert!(ops.contains(&GtOp::LineRate(ChannelId::Cmn1, 5_400_000_000)));

        let tail: Vec<_> = ops.iter().rev().take(6).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                GtOp::BufgGtReset(Direction::Rx, true),
                GtOp::ResetGtPll(ChannelId::Cha, Direction::Rx, true),
                GtOp::ResetGtPll(ChannelId::Cha, Direction::Rx, false),
                GtOp::BufgGtReset(Direction::Rx, false),
                GtOp::WaitResetDone(ChannelId::Cha, Direction::Rx),
                GtOp::WaitPllLock(ChannelId::Cha),
            ]
        );
    }

    #[test]
    fn drive_levels_through_table() {
        let gt = SimGt::new();
        let drivers = gt.drivers();
        let mut phy = phy(gt);

        phy.configure(PhyOptions::SetVoltages {
            vs: VsLevel::V1,
            pe: PeLevel::P3,
        })
        .unwrap();

        // Clamped to V1P2.
        assert_eq!(
            phy.drive_settings(),
            DriveSettings::new(VsLevel::V1, PeLevel::P2)
        );
        let drivers = drivers.lock().unwrap();
        for ch in ChannelId::CHANNELS {
            assert_eq!(drivers.get(&ch), Some(&(0x16, 0x07)));
        }
    }

    #[test]
    fn two_byte_mode() {
        let gt = SimGt::new()
            .drp_preset(ChannelId::Ch1, drp::RX_DATA_WIDTH, 0x01ff)
            .drp_preset(ChannelId::Ch1, drp::TX_DATA_WIDTH, 0xf80f);
        let drp_regs = gt.drp();
        let mut phy = phy(gt);

        phy.set_two_byte(true, true).unwrap();

        let drp_regs = drp_regs.lock().unwrap();
        for ch in ChannelId::CHANNELS {
            assert_eq!(drp_regs.get(&(ch, drp::RX_DATA_WIDTH)), Some(&0x007f));
            assert_eq!(drp_regs.get(&(ch, drp::TX_DATA_WIDTH)), Some(&0xf803));
            assert_eq!(drp_regs.get(&(ch, drp::TX_INT_DATA_WIDTH)), Some(&0x0000));
        }
    }

    #[test]
    fn lanes() {
        let mut phy = phy(SimGt::new());

        let lane = phy.xlate(2, &[1, 0, 0, 1]).unwrap();
        assert_eq!(lane.direction(), Some(Direction::Tx));
        assert_eq!(lane.share_laneclk(), Some(0));

        assert_eq!(
            phy.xlate(0, &[1, 0, 0]).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            phy.xlate(4, &[1, 0, 0, 0]).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn interrupts() {
        let gt = SimGt::new();
        let irq = gt.interrupts();
        let handle = phy(gt).into_handle();

        irq.lock().unwrap().status = PhyEvents::CPLL_LOCK | PhyEvents::TX_RESET_DONE;

        let events = service_interrupt(&handle).unwrap();
        assert!(events.contains(PhyEvents::CPLL_LOCK));
        assert!(!events.contains(PhyEvents::QPLL1_LOCK));
        assert_eq!(events.to_string(), "TX reset done, CPLL lock");

        let phy = lock(&handle).unwrap();
        assert!(phy.lanes().iter().all(|l| l.locked()));
        let irq = irq.lock().unwrap();
        assert_eq!(irq.disabled, vec![PhyEvents::ALL]);
        assert_eq!(irq.enabled.last(), Some(&PhyEvents::ALL));
    }

    #[test]
    fn init_sequence() {
        let gt = SimGt::new();
        let log = gt.log();
        let mut phy = phy(gt);

        phy.init().unwrap();
        assert_eq!(phy.tx_rate(), Some(LinkRate::Hbr2));

        let ops = log.lock().unwrap();
        assert_eq!(ops[2], GtOp::LineRate(ChannelId::Cha, 8_100_000_000));
        assert!(ops.contains(&GtOp::ClkInit(ChannelId::Cha, Direction::Rx)));
        assert!(ops.contains(&GtOp::BufgGtReset(Direction::Tx, true)));
    }
}
