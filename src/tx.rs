// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! DisplayPort TX subsystem.
//!
//! [`DpTx`] owns the register file of the DP TX core and drives the sink through the AUX channel.
//! It detects the sink, picks the link configuration for a video mode, programs the main stream
//! and runs [link training](crate::training) when enabled.

use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::aux::{self, AuxChannel, AuxCommand, AuxReply};
use crate::config::TxConfig;
use crate::dpcd::{self, ReceiverCaps};
use crate::drive::DriveSettings;
use crate::linkrate::LinkRate;
use crate::phy::{self, PhyHandle};
use crate::regs::Registers;
use crate::training::{self, TrainingReport};
use crate::util;

/// DP TX core registers.
pub mod reg {
    pub use crate::aux::reg::*;
    use crate::util::{RegBit, RegField};

    pub const LINK_BW_SET: u32 = 0x000;
    pub const LANE_CNT_SET: u32 = 0x004;
    pub const ENHANCED_FRAME_EN: u32 = 0x008;
    pub const TRAINING_PATTERN_SET: u32 = 0x00c;
    pub const SCRAMBLING_DISABLE: u32 = 0x014;
    pub const DOWNSPREAD_CTL: u32 = 0x018;
    pub const SW_RESET: u32 = 0x01c;
    pub const ENABLE_MAIN_STREAM: u32 = 0x084;
    pub const LINE_RESET_DISABLE: u32 = 0x0f0;
    pub const VERSION: u32 = 0x0f8;
    pub const CORE_ID: u32 = 0x0fc;

    pub const INTR_STATUS: u32 = 0x140;
    pub const INTR_HPD_IRQ: u32 = 1 << 0;
    pub const INTR_HPD_EVENT: u32 = 1 << 1;
    pub const INTR_HPD_PULSE: u32 = 1 << 4;
    pub const INTR_CHBUF_UNDERFLOW_MASK: u32 = 0x3f0000;
    pub const INTR_CHBUF_OVERFLOW_MASK: u32 = 0xfc00000;
    pub const HPD_DURATION: u32 = 0x150;

    pub const MAIN_STREAM_HTOTAL: u32 = 0x180;
    pub const MAIN_STREAM_VTOTAL: u32 = 0x184;
    pub const MAIN_STREAM_POLARITY: u32 = 0x188;
    pub const MAIN_STREAM_POLARITY_HSYNC_SHIFT: u32 = 0;
    pub const MAIN_STREAM_POLARITY_VSYNC_SHIFT: u32 = 1;
    pub const MAIN_STREAM_HSWIDTH: u32 = 0x18c;
    pub const MAIN_STREAM_VSWIDTH: u32 = 0x190;
    pub const MAIN_STREAM_HRES: u32 = 0x194;
    pub const MAIN_STREAM_VRES: u32 = 0x198;
    pub const MAIN_STREAM_HSTART: u32 = 0x19c;
    pub const MAIN_STREAM_VSTART: u32 = 0x1a0;
    pub const MAIN_STREAM_MISC0: u32 = 0x1a4;
    pub type MainStreamMisc0Sync = RegBit<0>;
    pub type MainStreamMisc0Bpc = RegField<7, 5>;
    pub const MAIN_STREAM_MISC1: u32 = 0x1a8;
    pub const M_VID: u32 = 0x1ac;
    pub const TRANSFER_UNIT_SIZE: u32 = 0x1b0;
    pub const N_VID: u32 = 0x1b4;
    pub const USER_PIXEL_WIDTH: u32 = 0x1b8;
    pub const USER_DATA_CNT_PER_LANE: u32 = 0x1bc;
    pub const MIN_BYTES_PER_TU: u32 = 0x1c4;
    pub const FRAC_BYTES_PER_TU: u32 = 0x1c8;
    pub const INIT_WAIT: u32 = 0x1cc;

    pub const PHY_CONFIG: u32 = 0x200;
    pub const PHY_CONFIG_ALL_RESET: u32 = (1 << 0) | (1 << 1) | (1 << 8) | (1 << 9);
    pub const PHY_VOLTAGE_DIFF_LANE_0: u32 = 0x220;
    pub const PHY_CLOCK_FEEDBACK_SETTING: u32 = 0x234;
    pub const PHY_POWER_DOWN: u32 = 0x238;
    pub const PHY_PRECURSOR_LANE_0: u32 = 0x23c;
    pub const PHY_POSTCURSOR_LANE_0: u32 = 0x24c;
    pub const PHY_STATUS: u32 = 0x280;
    pub const PHY_STATUS_LANES_READY_MASK: u32 = crate::genmask!(3, 0);
    pub const PHY_STATUS_FPGA_PLL_LOCKED: u32 = 1 << 6;
}

/// Highest pixel clock the core can carry in kHz.
pub const MAX_PIXEL_CLOCK_KHZ: u32 = 3_000_000;
/// Default transfer unit size.
const TRANSFER_UNIT_SIZE: u32 = 64;

const HPD_POLLS: usize = 10;
const HPD_POLL_INTERVAL: Duration = Duration::from_millis(100);
const HPD_CONNECTED_POLLS: usize = 50;
const HPD_PULSE_MIN_US: u32 = 500;
const PHY_READY_POLLS: usize = 100;
const POWER_UP_TRIES: usize = 3;

/// Display timings of a video mode.
///
/// Follows the DRM mode line layout, horizontal values in pixels and vertical values in lines.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VideoMode {
    /// Pixel clock in kHz.
    pub clock: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
    pub hsync_positive: bool,
    pub vsync_positive: bool,
}

impl VideoMode {
    /// CEA-861 1920x1080 at 60 Hz.
    pub const FHD_60: VideoMode = VideoMode {
        clock: 148500,
        hdisplay: 1920,
        hsync_start: 2008,
        hsync_end: 2052,
        htotal: 2200,
        vdisplay: 1080,
        vsync_start: 1084,
        vsync_end: 1089,
        vtotal: 1125,
        hsync_positive: true,
        vsync_positive: true,
    };

    /// CEA-861 3840x2160 at 60 Hz.
    pub const UHD_60: VideoMode = VideoMode {
        clock: 594000,
        hdisplay: 3840,
        hsync_start: 4016,
        hsync_end: 4104,
        htotal: 4400,
        vdisplay: 2160,
        vsync_start: 2168,
        vsync_end: 2178,
        vtotal: 2250,
        hsync_positive: true,
        vsync_positive: true,
    };

    /// Checks that the sync pulse of both axes lies between the active area and the total.
    pub fn validate(&self) -> Result<()> {
        let horizontal = self.hdisplay <= self.hsync_start
            && self.hsync_start <= self.hsync_end
            && self.hsync_end <= self.htotal;
        let vertical = self.vdisplay <= self.vsync_start
            && self.vsync_start <= self.vsync_end
            && self.vsync_end <= self.vtotal;

        if !horizontal || !vertical || self.htotal == 0 || self.vtotal == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "invalid mode timings {}x{} (htotal {}, vtotal {})",
                    self.hdisplay, self.vdisplay, self.htotal, self.vtotal
                ),
            ));
        }

        Ok(())
    }
}

/// Negotiated link configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkMode {
    pub rate: LinkRate,
    pub lanes: u8,
    /// Pixel clock of the mode in kHz.
    pub pclock: u32,
}

/// Interrupts reported by [`DpTx::handle_interrupt()`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxInterrupt {
    /// Sink was connected or disconnected.
    pub hpd_event: bool,
    /// Sink requested attention with an IRQ_HPD pulse.
    pub hpd_pulse: bool,
    pub underflow: bool,
    pub overflow: bool,
}

/// Returns the highest pixel clock in kHz carried by `lanes` lanes at `rate`.
///
/// # Examples
/// ```
/// use dptools::linkrate::LinkRate;
/// use dptools::tx;
///
/// assert_eq!(tx::max_pixel_clock(LinkRate::Hbr3, 4, 24), 1_080_000);
/// ```
pub fn max_pixel_clock(rate: LinkRate, lanes: u8, bpp: u32) -> u32 {
    if bpp == 0 {
        return 0;
    }
    ((rate.khz() as u64 * lanes as u64 * 8) / bpp as u64) as u32
}

fn bpc_index(bpc: u8) -> u32 {
    match bpc {
        6 => 0,
        10 => 2,
        12 => 3,
        16 => 4,
        _ => 1,
    }
}

/// The DP TX subsystem.
pub struct DpTx<R: Registers> {
    regs: R,
    config: TxConfig,
    phy: PhyHandle,
    connected: Arc<AtomicBool>,
    enabled: bool,
    caps: ReceiverCaps,
    max_rate: LinkRate,
    max_lanes: u8,
    mode: Option<LinkMode>,
    misc0: u32,
    ppc: u32,
    report: Option<TrainingReport>,
}

impl<R: Registers> DpTx<R> {
    /// Takes the core over.
    ///
    /// Validates `config`, disables the transmitter and releases the PHY resets of the core.
    pub fn new(mut regs: R, config: TxConfig, phy: PhyHandle) -> Result<Self> {
        config.validate()?;

        regs.write(reg::ENABLE, 0);
        regs.write(reg::ENABLE_MAIN_STREAM, 0);
        regs.clear(reg::PHY_CONFIG, reg::PHY_CONFIG_ALL_RESET);

        let misc0 = reg::MainStreamMisc0Bpc::set_field(
            config.color_format.misc0(),
            bpc_index(config.bpc),
        );
        let misc0 = reg::MainStreamMisc0Sync::set_bit(misc0, config.sync);

        debug!(
            "DP TX {} bpc {}, max {} x{}",
            config.color_format,
            config.bpc,
            config.max_rate(),
            config.max_lanes
        );

        Ok(Self {
            max_rate: config.max_rate(),
            max_lanes: config.max_lanes,
            regs,
            config,
            phy,
            connected: Arc::new(AtomicBool::new(false)),
            enabled: false,
            caps: ReceiverCaps::default(),
            mode: None,
            misc0,
            ppc: 1,
            report: None,
        })
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Gives direct access to the core registers.
    pub fn registers(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Returns the shared Video PHY.
    pub fn phy(&self) -> &PhyHandle {
        &self.phy
    }

    /// Returns the flag tracking the sink connection.
    ///
    /// Interrupt handling keeps it current and AUX transfers stop retrying once it is cleared.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Receiver capabilities read by the last successful [`detect()`](Self::detect).
    pub fn caps(&self) -> &ReceiverCaps {
        &self.caps
    }

    /// Highest link rate usable with the sink.
    pub fn max_rate(&self) -> LinkRate {
        self.max_rate
    }

    /// Highest lane count usable with the sink.
    pub fn max_lanes(&self) -> u8 {
        self.max_lanes
    }

    /// Lowers the link limits further, for instance from the command line.
    pub fn limit_link(&mut self, rate: Option<LinkRate>, lanes: Option<u8>) -> Result<()> {
        if let Some(rate) = rate {
            self.max_rate = self.max_rate.min(rate);
        }
        if let Some(lanes) = lanes {
            if !matches!(lanes, 1 | 2 | 4) {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid lane count {}", lanes),
                ));
            }
            self.max_lanes = self.max_lanes.min(lanes);
        }
        Ok(())
    }

    /// Link configuration picked for the current mode.
    pub fn link_mode(&self) -> Option<LinkMode> {
        self.mode
    }

    pub(crate) fn set_link_mode(&mut self, mode: LinkMode) {
        self.mode = Some(mode);
    }

    /// Bits per pixel of the main stream.
    pub fn bpp(&self) -> u32 {
        self.config.bpp()
    }

    /// Pixels per clock programmed by [`set_stream()`](Self::set_stream).
    pub fn pixels_per_clock(&self) -> u32 {
        self.ppc
    }

    /// Report of the last link training.
    pub fn last_report(&self) -> Option<&TrainingReport> {
        self.report.as_ref()
    }

    /// Reads the core version register.
    pub fn version(&mut self) -> u32 {
        self.regs.read(reg::VERSION)
    }

    fn hpd(&mut self) -> bool {
        self.regs.read(reg::INTR_SIGNAL_STATE) & reg::INTR_SIGNAL_STATE_HPD != 0
    }

    /// Detects the sink.
    ///
    /// Waits up to one second for HPD. When the sink is present sets up AUX, reads the sink
    /// capabilities, limits the link by them and programs the PHY for the highest usable rate.
    /// Returns `true` if a sink is connected.
    pub fn detect(&mut self) -> Result<bool> {
        let regs = &mut self.regs;
        let present = util::wait_for(HPD_POLLS, HPD_POLL_INTERVAL, || {
            regs.read(reg::INTR_SIGNAL_STATE) & reg::INTR_SIGNAL_STATE_HPD != 0
        });
        if !present {
            debug!("no sink connected");
            self.connected.store(false, Ordering::Release);
            return Ok(false);
        }

        self.connected.store(true, Ordering::Release);
        aux::init_aux(&mut self.regs, self.config.aux_clock_hz)?;

        let caps = match self.read_caps() {
            Ok(caps) => caps,
            Err(err) => {
                info!("DPCD read failed: {}", err);
                self.connected.store(false, Ordering::Release);
                return Ok(false);
            }
        };

        let sink_rate = caps.max_link_rate().unwrap_or(LinkRate::Rbr);
        self.max_rate = sink_rate.min(self.config.max_rate());
        self.max_lanes = caps.max_lane_count().clamp(1, 4).min(self.config.max_lanes);
        if self.max_lanes == 3 {
            self.max_lanes = 2;
        }
        self.caps = caps;

        info!(
            "sink DPCD {:#04x} connected, link {} x{}",
            caps.revision(),
            self.max_rate,
            self.max_lanes
        );

        phy::lock(&self.phy)?.configure_tx(self.max_rate.code())?;

        Ok(true)
    }

    /// Checks that a mode with pixel clock `clock` (kHz) can be carried.
    pub fn mode_valid(&self, clock: u32) -> Result<()> {
        if clock > MAX_PIXEL_CLOCK_KHZ {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("pixel clock {} kHz too high", clock),
            ));
        }

        let max = max_pixel_clock(self.max_rate, self.max_lanes, self.bpp());
        if clock > max {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("pixel clock {} kHz exceeds link bandwidth {} kHz", clock, max),
            ));
        }

        Ok(())
    }

    /// Picks link configuration for pixel clock `pclock` (kHz).
    ///
    /// With `current` set the next lower rate is picked, otherwise the highest usable rate. The
    /// lane count is halved from the maximum while the lower count still carries the mode.
    pub fn mode_configure(&mut self, pclock: u32, current: Option<LinkRate>) -> Result<LinkMode> {
        if current == Some(LinkRate::Rbr) {
            info!("can't downshift, already at the lowest rate");
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "already at the lowest link rate",
            ));
        }

        let rate = LinkRate::ALL
            .into_iter()
            .rev()
            .filter(|r| current.map_or(true, |c| *r < c))
            .find(|r| *r <= self.max_rate)
            .unwrap_or(LinkRate::Rbr);

        let bpp = self.bpp();
        let mut lanes = self.max_lanes;
        if pclock > max_pixel_clock(rate, lanes, bpp) {
            error!("failed to configure link for {} kHz at {}", pclock, rate);
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("{} kHz does not fit {} x{}", pclock, rate, lanes),
            ));
        }
        while lanes > 1 && pclock <= max_pixel_clock(rate, lanes / 2, bpp) {
            lanes /= 2;
        }

        let mode = LinkMode {
            rate,
            lanes,
            pclock,
        };
        debug!("link configured for {} kHz: {} x{}", pclock, rate, lanes);
        self.mode = Some(mode);

        Ok(mode)
    }

    fn set_transfer_unit(&mut self, mode: &VideoMode, link: &LinkMode) {
        let tu = TRANSFER_UNIT_SIZE;
        self.regs.write(reg::TRANSFER_UNIT_SIZE, tu);

        let vid_kbytes = mode.clock as u64 * self.bpp() as u64 / 8;
        let bw = link.rate.khz() as u64;
        let avg_bytes_per_tu = (vid_kbytes * tu as u64 / (link.lanes as u64 * bw / 1000)) as u32;

        let min_bytes = avg_bytes_per_tu / 1000;
        self.regs.write(reg::MIN_BYTES_PER_TU, min_bytes);
        self.regs
            .write(reg::FRAC_BYTES_PER_TU, (avg_bytes_per_tu % 1000) * 1024 / 1000);

        let init_wait = if tu < min_bytes {
            0
        } else if min_bytes <= 4 {
            tu
        } else {
            tu - min_bytes
        };
        self.regs.write(reg::INIT_WAIT, init_wait);
    }

    /// Picks the link for `mode` and programs the main stream attributes.
    pub fn set_stream(&mut self, mode: &VideoMode) -> Result<()> {
        mode.validate()?;
        self.mode_valid(mode.clock)?;
        let link = self.mode_configure(mode.clock, None)?;

        let polarity = (mode.vsync_positive as u32) << reg::MAIN_STREAM_POLARITY_VSYNC_SHIFT
            | (mode.hsync_positive as u32) << reg::MAIN_STREAM_POLARITY_HSYNC_SHIFT;

        self.regs.write(reg::MAIN_STREAM_HTOTAL, mode.htotal);
        self.regs.write(reg::MAIN_STREAM_VTOTAL, mode.vtotal);
        self.regs.write(reg::MAIN_STREAM_POLARITY, polarity);
        self.regs
            .write(reg::MAIN_STREAM_HSWIDTH, mode.hsync_end - mode.hsync_start);
        self.regs
            .write(reg::MAIN_STREAM_VSWIDTH, mode.vsync_end - mode.vsync_start);
        self.regs.write(reg::MAIN_STREAM_HRES, mode.hdisplay);
        self.regs.write(reg::MAIN_STREAM_VRES, mode.vdisplay);
        self.regs
            .write(reg::MAIN_STREAM_HSTART, mode.htotal - mode.hsync_start);
        self.regs
            .write(reg::MAIN_STREAM_VSTART, mode.vtotal - mode.vsync_start);
        self.regs.write(reg::MAIN_STREAM_MISC0, self.misc0);
        self.regs.write(reg::MAIN_STREAM_MISC1, 0);

        self.regs.write(reg::N_VID, link.rate.khz());
        self.regs.write(reg::M_VID, mode.clock);

        self.ppc = if mode.clock > 530_000 {
            4
        } else if mode.clock > 270_000 {
            2
        } else {
            1
        };
        self.regs.write(reg::USER_PIXEL_WIDTH, self.ppc);

        // Native 16-bit datapath.
        let lanes = link.lanes as u32;
        let wpl = (mode.hdisplay * self.bpp()).div_ceil(16);
        self.regs.write(
            reg::USER_DATA_CNT_PER_LANE,
            (wpl + wpl % lanes).saturating_sub(lanes),
        );

        self.set_transfer_unit(mode, &link);

        info!(
            "main stream {}x{} {} kHz, {} pixels per clock",
            mode.hdisplay, mode.vdisplay, mode.clock, self.ppc
        );

        Ok(())
    }

    /// Waits for the TX PHY lanes and the FPGA PLL.
    pub(crate) fn phy_ready(&mut self) -> Result<()> {
        let ready = reg::PHY_STATUS_LANES_READY_MASK | reg::PHY_STATUS_FPGA_PLL_LOCKED;
        let regs = &mut self.regs;
        if util::wait_for(PHY_READY_POLLS, Duration::from_millis(1), || {
            regs.read(reg::PHY_STATUS) & ready == ready
        }) {
            Ok(())
        } else {
            error!("PHY isn't ready");
            Err(Error::new(ErrorKind::NotFound, "TX PHY not ready"))
        }
    }

    /// Writes drive `settings` to the lane registers of the core.
    pub(crate) fn set_core_drive(&mut self, settings: DriveSettings) {
        let levels = settings.tx_core_levels();
        for lane in 0..4 {
            self.regs.write(reg::PHY_PRECURSOR_LANE_0 + 4 * lane, 0);
            self.regs
                .write(reg::PHY_VOLTAGE_DIFF_LANE_0 + 4 * lane, levels.voltage);
            self.regs
                .write(reg::PHY_POSTCURSOR_LANE_0 + 4 * lane, levels.postcursor);
        }
    }

    /// Wakes up the sink.
    pub fn power_up_sink(&mut self) -> Result<()> {
        let mut result = Ok(());
        for _ in 0..POWER_UP_TRIES {
            result = self.dpcd_writeb(dpcd::SET_POWER, dpcd::SET_POWER_D0);
            if result.is_ok() {
                break;
            }
            thread::sleep(Duration::from_micros(300));
        }
        // Some monitors take time to wake up.
        thread::sleep(Duration::from_millis(self.config.power_on_delay_ms));
        result
    }

    /// Enables the transmitter.
    ///
    /// Sets up AUX, wakes the sink and trains the link for the configured mode, then enables the
    /// main stream. The main stream is enabled even if training fails, in which case the training
    /// error is returned. The report is kept in [`last_report()`](Self::last_report).
    pub fn enable(&mut self) -> Result<TrainingReport> {
        self.enabled = true;
        aux::init_aux(&mut self.regs, self.config.aux_clock_hz)?;

        let result = if !self.is_connected() {
            Err(Error::new(ErrorKind::NotConnected, "no sink connected"))
        } else {
            match self.power_up_sink() {
                Ok(()) => training::train_loop(self),
                Err(err) => {
                    info!("DP AUX failed: {}", err);
                    Err(err)
                }
            }
        };

        self.regs.write(reg::LINE_RESET_DISABLE, 0);
        self.regs.write(reg::LINE_RESET_DISABLE, 1);
        self.regs.write(reg::ENABLE_MAIN_STREAM, 1);

        result
    }

    pub(crate) fn set_report(&mut self, report: TrainingReport) {
        self.report = Some(report);
    }

    /// Turns the main stream off.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.regs.write(reg::ENABLE_MAIN_STREAM, 0);
    }

    /// Shuts the core down.
    pub fn shutdown(&mut self) {
        self.disable();
        aux::exit_aux(&mut self.regs);
        self.regs.write(reg::PHY_POWER_DOWN, 0xf);
    }

    fn hpd_connected(&mut self) -> bool {
        let regs = &mut self.regs;
        util::wait_for(HPD_CONNECTED_POLLS, Duration::from_millis(1), || {
            regs.read(reg::INTR_SIGNAL_STATE) & reg::INTR_SIGNAL_STATE_HPD != 0
        })
    }

    /// Services a TX interrupt.
    ///
    /// Returns `None` if nothing unmasked was pending.
    pub fn handle_interrupt(&mut self) -> Option<TxInterrupt> {
        let status = self.regs.read(reg::INTR_STATUS) & !self.regs.read(reg::INTR_MASK);
        if status == 0 {
            return None;
        }

        let mut irq = TxInterrupt {
            hpd_event: status & reg::INTR_HPD_EVENT != 0,
            hpd_pulse: status & reg::INTR_HPD_PULSE != 0,
            underflow: status & reg::INTR_CHBUF_UNDERFLOW_MASK != 0,
            overflow: status & reg::INTR_CHBUF_OVERFLOW_MASK != 0,
        };

        if irq.hpd_event {
            let connected = self.hpd();
            info!(
                "HPD event, sink {}",
                if connected { "connected" } else { "disconnected" }
            );
            self.connected.store(connected, Ordering::Release);
        } else if irq.hpd_pulse && self.hpd_connected() {
            let duration = self.regs.read(reg::HPD_DURATION);
            debug!("HPD pulse of {} µs", duration);
            if duration >= HPD_PULSE_MIN_US {
                self.regs.write(reg::INTR_MASK, reg::INTR_HPD_PULSE);
            }
        } else {
            irq.hpd_pulse = false;
        }

        if irq.underflow {
            warn!("channel buffer underflow");
        }
        if irq.overflow {
            warn!("channel buffer overflow");
        }

        Some(irq)
    }
}

impl<R: Registers> AuxChannel for DpTx<R> {
    fn transfer(&mut self, cmd: AuxCommand, address: u32, buf: &mut [u8]) -> Result<AuxReply> {
        let timeout = Duration::from_millis(self.config.aux_timeout_ms);
        aux::transfer(&mut self.regs, &self.connected, timeout, cmd, address, buf)
    }
}
