// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! DisplayPort RX subsystem.
//!
//! The RX core trains with the upstream source on its own and reports what happens through its
//! interrupt cause registers. [`DpRx::handle_interrupt()`] picks the most important pending cause,
//! checks it against the current [`RxState`] and runs the remediation that belongs to it. Once
//! valid video is received the main stream attributes are decoded into [`StreamProperties`].

use std::fmt::{self, Display};
use std::io::{Error, ErrorKind, Result};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::{ColorFormat, RxConfig};
use crate::linkrate::LinkRate;
use crate::phy::{self, PhyHandle};
use crate::regs::Registers;
use crate::util;

/// DP RX core registers.
pub mod reg {
    use crate::util::{RegBit, RegField};

    pub const LINK_ENABLE: u32 = 0x000;
    pub const AUX_CLK_DIVIDER: u32 = 0x004;
    pub const AUX_DEFER_SHIFT: u32 = 24;
    pub const LINE_RESET_DISABLE: u32 = 0x008;
    pub const DTG: u32 = 0x00c;
    pub const DTG_ENABLE: u32 = 1 << 0;
    pub const PIXEL_WIDTH: u32 = 0x010;
    pub const INTR_MASK: u32 = 0x014;
    pub const SOFT_RESET: u32 = 0x01c;
    pub const SOFT_RESET_VIDEO: u32 = 1 << 0;
    pub const SOFT_RESET_AUX: u32 = 1 << 7;
    pub const HPD_INTERRUPT: u32 = 0x02c;
    pub const HPD_INTERRUPT_ASSERT: u32 = 1 << 1;
    pub const HPD_INTERRUPT_LENGTH_SHIFT: u32 = 16;
    pub const INTR_CAUSE: u32 = 0x040;
    pub const INTR_MASK_1: u32 = 0x044;
    pub const INTR_CAUSE_1: u32 = 0x048;
    pub const CRC_CONFIG: u32 = 0x074;
    pub const CRC_EN: u32 = 1 << 5;
    pub const LOCAL_EDID_VIDEO: u32 = 0x084;
    pub const VIDEO_UNSUPPORTED: u32 = 0x094;
    pub const LINK_BW_SET: u32 = 0x09c;
    pub const LANE_CNT_SET: u32 = 0x0a0;
    pub const LANE_CNT_SET_TPS3: u32 = 0x40;
    pub const LANE_CNT_SET_ENHANCED_FRAME_CAP: u32 = 0x80;
    pub const TP_SET: u32 = 0x0a4;
    pub const TP_SET_AUX_RD_INTERVAL_SHIFT: u32 = 8;
    pub const TP_SET_AUX_RD_INTERVAL_SET: u32 = 1 << 15;
    pub const CTRL_DPCD: u32 = 0x0b8;
    pub const MST_CAP: u32 = 0x0d0;
    pub const SINK_COUNT: u32 = 0x0d4;

    pub const PHY_REG: u32 = 0x200;
    pub const PHY_REG_GTPLL_RESET: u32 = 1 << 0;
    pub const PHY_REG_GTRX_RESET: u32 = 1 << 1;
    pub const PHY_REG_RESET_AT_TRAIN_ITER: u32 = 1 << 23;
    pub const PHY_REG_RESET_AT_LINK_RATE_CHANGE: u32 = 1 << 24;
    pub const PHY_REG_RESET_AT_TP1_START: u32 = 1 << 25;
    pub const PHY_REG_INIT: u32 = 0x3800_0000;
    pub const MIN_VOLTAGE_SWING: u32 = 0x214;
    pub const CDR_CONTROL_CONFIG: u32 = 0x21c;
    pub const CDR_CONTROL_TDLOCK_DP159: u32 = 0x1388;
    pub const CDR_CONTROL_DISABLE_TIMEOUT: u32 = 0x4000_0000;
    pub const BS_IDLE_TIME: u32 = 0x220;

    pub const DPCD_LINK_BW_SET: u32 = 0x400;
    pub const DPCD_LANE_COUNT_SET: u32 = 0x404;
    pub const DPCD_SET_POWER_STATE: u32 = 0x438;
    pub const CABLE_POWER_UP: u32 = 1 << 0;

    pub const MSA_HRES: u32 = 0x500;
    pub const MSA_HTOTAL: u32 = 0x510;
    pub const MSA_VHEIGHT: u32 = 0x514;
    pub const MSA_VTOTAL: u32 = 0x524;
    pub const MSA_MISC0: u32 = 0x528;
    pub type MsaMisc0Format = RegField<2, 1>;
    pub type MsaMisc0Bpc = RegField<7, 5>;
    pub const MSA_MISC1: u32 = 0x52c;
    pub type MsaMisc1Interlace = RegBit<0>;
    pub const MSA_MVID: u32 = 0x530;
    pub const MSA_NVID: u32 = 0x534;

    pub const INTR_POWER_STATE: u32 = 1 << 1;
    pub const INTR_NO_VIDEO: u32 = 1 << 2;
    pub const INTR_VBLANK: u32 = 1 << 3;
    pub const INTR_TRAINING_LOST: u32 = 1 << 4;
    pub const INTR_VIDEO: u32 = 1 << 6;
    pub const INTR_TRAINING_DONE: u32 = 1 << 14;
    pub const INTR_BW_CHANGE: u32 = 1 << 15;
    pub const INTR_TP1: u32 = 1 << 16;
    pub const INTR_TP2: u32 = 1 << 17;
    pub const INTR_TP3: u32 = 1 << 18;
    pub const INTR_CRC_TEST: u32 = 1 << 30;
    pub const INTR_UNPLUG: u32 = 1 << 31;
    pub const INTR_ALL: u32 = 0xf9ff_ffff;
    pub const INTR_TRAINING: u32 =
        INTR_TP1 | INTR_TP2 | INTR_TP3 | INTR_POWER_STATE | INTR_CRC_TEST | INTR_BW_CHANGE;

    pub const INTR_1_ACCESS_ERROR_CNT: u32 = 1 << 28;
    pub const INTR_1_ACCESS_LINK_QUAL: u32 = 1 << 29;
    pub const INTR_1_ACCESS_LANE_SET: u32 = 1 << 30;
    pub const INTR_1_TP4: u32 = 1 << 31;
    pub const INTR_1_ALL: u32 = 0xffff_ffff;
    pub const INTR_1_TRAINING: u32 =
        INTR_1_TP4 | INTR_1_ACCESS_LANE_SET | INTR_1_ACCESS_LINK_QUAL | INTR_1_ACCESS_ERROR_CNT;
}

const HPD_PULSE_SHORT_US: u32 = 750;
const HPD_PULSE_LONG_US: u32 = 5000;
const AUX_DEFER_COUNT: u32 = 6;
// 16 ms
const AUX_RD_INTERVAL_16MS: u32 = 4;
const BS_IDLE_TIMEOUT: u32 = 0x0091_ffff;
const MIN_VOLTAGE_SWING: u32 = 1 | (1 << 2) | (4 << 4) | (1 << 12);

/// State of the RX link as seen by the dispatcher.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum RxState {
    #[default]
    Unplugged,
    Training,
    Trained,
    NoVideo,
    Streaming,
}

impl Display for RxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unplugged => "unplugged",
            Self::Training => "training",
            Self::Trained => "trained",
            Self::NoVideo => "no video",
            Self::Streaming => "streaming",
        };
        write!(f, "{s}")
    }
}

/// Interrupt causes handled by the dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum RxEvent {
    Unplug,
    TrainingPattern1,
    TrainingLost,
    TrainingDone,
    NoVideo,
    ValidVideo,
    PowerState,
}

impl RxEvent {
    /// Events from the most to the least important.
    pub const PRIORITY: [RxEvent; 7] = [
        Self::Unplug,
        Self::TrainingPattern1,
        Self::TrainingLost,
        Self::TrainingDone,
        Self::NoVideo,
        Self::ValidVideo,
        Self::PowerState,
    ];

    /// Bit of the event in the interrupt cause register.
    pub fn bit(&self) -> u32 {
        match self {
            Self::Unplug => reg::INTR_UNPLUG,
            Self::TrainingPattern1 => reg::INTR_TP1,
            Self::TrainingLost => reg::INTR_TRAINING_LOST,
            Self::TrainingDone => reg::INTR_TRAINING_DONE,
            Self::NoVideo => reg::INTR_NO_VIDEO,
            Self::ValidVideo => reg::INTR_VIDEO,
            Self::PowerState => reg::INTR_POWER_STATE,
        }
    }

    /// Returns the most important event pending in `cause`.
    ///
    /// # Examples
    /// ```
    /// use dptools::rx::{reg, RxEvent};
    ///
    /// let cause = reg::INTR_VIDEO | reg::INTR_TRAINING_LOST;
    /// assert_eq!(RxEvent::from_cause(cause), Some(RxEvent::TrainingLost));
    /// assert_eq!(RxEvent::from_cause(reg::INTR_VBLANK), None);
    /// ```
    pub fn from_cause(cause: u32) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|e| cause & e.bit() != 0)
    }

    /// Returns the state `event` leads to from `state` or `None` if it is not expected there.
    pub fn transition(&self, state: RxState) -> Option<RxState> {
        use RxState::*;

        match (self, state) {
            (Self::Unplug, _) => Some(Unplugged),
            (Self::TrainingPattern1, _) => Some(Training),
            (Self::PowerState, s) => Some(s),
            (Self::TrainingLost, Unplugged) => None,
            (Self::TrainingLost, _) => Some(Training),
            (Self::TrainingDone, Training) => Some(Trained),
            (Self::NoVideo, Trained | NoVideo | Streaming) => Some(NoVideo),
            (Self::ValidVideo, Trained | NoVideo | Streaming) => Some(Streaming),
            _ => None,
        }
    }
}

impl Display for RxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unplug => "cable unplug",
            Self::TrainingPattern1 => "training pattern 1",
            Self::TrainingLost => "training lost",
            Self::TrainingDone => "training done",
            Self::NoVideo => "no video",
            Self::ValidVideo => "valid video",
            Self::PowerState => "power state",
        };
        write!(f, "{s}")
    }
}

/// Result of one dispatcher run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Dispatch {
    pub event: RxEvent,
    pub from: RxState,
    pub to: RxState,
    /// `false` if the event was unexpected and its remediation skipped.
    pub handled: bool,
}

/// Main stream attributes decoded from the MSA registers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct StreamProperties {
    /// Recovered pixel clock in MHz.
    pub clock_mhz: u32,
    pub pixels_per_clock: u32,
    /// Frame rate rounded up to a multiple of 5.
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub interlaced: bool,
    pub color_format: ColorFormat,
    pub bpc: u8,
}

const BPC: [u8; 5] = [6, 8, 10, 12, 16];

/// The DP RX subsystem.
pub struct DpRx<R: Registers> {
    regs: R,
    config: RxConfig,
    phy: PhyHandle,
    state: RxState,
    valid_stream: bool,
    streaming: bool,
    cable_connected: bool,
    unexpected: usize,
    properties: Option<StreamProperties>,
}

impl<R: Registers> DpRx<R> {
    pub fn new(regs: R, config: RxConfig, phy: PhyHandle) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            regs,
            config,
            phy,
            state: RxState::default(),
            valid_stream: false,
            streaming: false,
            cable_connected: false,
            unexpected: 0,
            properties: None,
        })
    }

    pub fn registers(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// `true` once valid video has been received and decoded.
    pub fn valid_stream(&self) -> bool {
        self.valid_stream
    }

    /// `true` if the source powered the link up.
    pub fn cable_connected(&self) -> bool {
        self.cable_connected
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Number of events that were not expected in the state they arrived in.
    pub fn unexpected_events(&self) -> usize {
        self.unexpected
    }

    /// Properties of the last valid stream.
    pub fn properties(&self) -> Option<&StreamProperties> {
        self.properties.as_ref()
    }

    // Registers mirrored in the DPCD of the core are writable only in this window.
    fn dpcd_write(&mut self, offset: u32, value: u32) {
        self.regs.write(reg::CTRL_DPCD, 1);
        self.regs.write(offset, value);
        self.regs.write(reg::CTRL_DPCD, 0);
    }

    fn enable_interrupts(&mut self, mask: u32, mask_1: u32) {
        self.regs.clear(reg::INTR_MASK, mask);
        self.regs.clear(reg::INTR_MASK_1, mask_1);
    }

    fn disable_interrupts(&mut self, mask: u32, mask_1: u32) {
        self.regs.set(reg::INTR_MASK, mask);
        self.regs.set(reg::INTR_MASK_1, mask_1);
    }

    fn set_link_enable(&mut self, enable: bool) {
        self.regs.write(reg::LINK_ENABLE, enable as u32);
    }

    fn set_training_params(&mut self) {
        self.regs.write(reg::MIN_VOLTAGE_SWING, MIN_VOLTAGE_SWING);

        let divider = self.regs.read(reg::AUX_CLK_DIVIDER);
        self.dpcd_write(
            reg::AUX_CLK_DIVIDER,
            divider | AUX_DEFER_COUNT << reg::AUX_DEFER_SHIFT,
        );
        self.dpcd_write(
            reg::TP_SET,
            AUX_RD_INTERVAL_16MS << reg::TP_SET_AUX_RD_INTERVAL_SHIFT
                | reg::TP_SET_AUX_RD_INTERVAL_SET,
        );

        self.enable_interrupts(reg::INTR_ALL, reg::INTR_1_ALL);
        self.set_link_enable(true);
        self.regs.set(reg::DTG, reg::DTG_ENABLE);
        self.set_link_enable(false);

        self.disable_interrupts(reg::INTR_ALL, reg::INTR_1_ALL);
        self.enable_interrupts(reg::INTR_ALL, reg::INTR_1_ALL);

        let divider = self.regs.read(reg::AUX_CLK_DIVIDER) & 0xf0ff_00ff;
        self.regs.write(
            reg::AUX_CLK_DIVIDER,
            divider | AUX_DEFER_COUNT << reg::AUX_DEFER_SHIFT,
        );
        self.regs.write(reg::BS_IDLE_TIME, BS_IDLE_TIMEOUT);
        self.regs.clear(reg::CRC_CONFIG, reg::CRC_EN);

        self.set_link_enable(true);
    }

    /// Initializes the core for the configured link and enables it.
    pub fn core_init(&mut self) -> Result<()> {
        let divider = self.config.axi_clock_hz / 1_000_000;
        if divider == 0 || divider > 0xff {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("unsupported AXI clock {} Hz", self.config.axi_clock_hz),
            ));
        }

        let rate = self.config.max_rate();
        let lanes = self.config.max_lanes as u32;

        self.dpcd_write(reg::LINK_BW_SET, rate.bw_code() as u32);
        self.dpcd_write(
            reg::LANE_CNT_SET,
            lanes | reg::LANE_CNT_SET_TPS3 | reg::LANE_CNT_SET_ENHANCED_FRAME_CAP,
        );

        self.set_link_enable(false);
        self.regs.write(reg::AUX_CLK_DIVIDER, divider as u32);
        self.regs.write(
            reg::PHY_REG,
            reg::PHY_REG_GTPLL_RESET | reg::PHY_REG_GTRX_RESET,
        );
        self.regs.write(reg::PHY_REG, reg::PHY_REG_GTRX_RESET);
        self.regs
            .write(reg::CDR_CONTROL_CONFIG, reg::CDR_CONTROL_TDLOCK_DP159);
        self.regs.write(
            reg::PHY_REG,
            reg::PHY_REG_RESET_AT_TRAIN_ITER
                | reg::PHY_REG_RESET_AT_LINK_RATE_CHANGE
                | reg::PHY_REG_RESET_AT_TP1_START,
        );

        self.regs.write(reg::MST_CAP, 0);
        self.regs.write(reg::LOCAL_EDID_VIDEO, 1);
        // SST
        self.regs.write(reg::SINK_COUNT, 1);
        self.regs
            .clear(reg::CDR_CONTROL_CONFIG, reg::CDR_CONTROL_DISABLE_TIMEOUT);

        self.set_training_params();

        info!("DP RX initialized for {} x{}", rate, lanes);

        Ok(())
    }

    fn generate_hpd(&mut self, duration_us: u32) {
        self.regs.write(
            reg::HPD_INTERRUPT,
            duration_us << reg::HPD_INTERRUPT_LENGTH_SHIFT | reg::HPD_INTERRUPT_ASSERT,
        );
    }

    fn pulse_soft_reset(&mut self, bits: u32) {
        self.regs.set(reg::SOFT_RESET, bits);
        self.regs.clear(reg::SOFT_RESET, bits);
    }

    fn reset_dtg(&mut self) {
        self.regs.clear(reg::DTG, reg::DTG_ENABLE);
        self.regs.set(reg::DTG, reg::DTG_ENABLE);
    }

    fn set_pixel_width(&mut self, width: u32) {
        self.regs.clear(reg::DTG, reg::DTG_ENABLE);
        self.regs.write(reg::PIXEL_WIDTH, width);
        self.regs.set(reg::DTG, reg::DTG_ENABLE);
    }

    fn unplug(&mut self) {
        info!("cable unplugged");

        self.disable_interrupts(reg::INTR_UNPLUG, 0);
        self.generate_hpd(HPD_PULSE_SHORT_US);
        self.pulse_soft_reset(reg::SOFT_RESET_VIDEO);

        self.disable_interrupts(reg::INTR_ALL, reg::INTR_1_ALL);
        self.enable_interrupts(reg::INTR_TRAINING, reg::INTR_1_TRAINING);
        self.generate_hpd(HPD_PULSE_LONG_US);
    }

    fn training_pattern_1(&mut self) -> Result<()> {
        let code = self.regs.read(reg::DPCD_LINK_BW_SET) as u8;
        let rate = LinkRate::from_bw_code(code).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("unsupported link bandwidth {:#x}", code),
            )
        })?;
        debug!("training started at {}", rate);

        {
            let mut phy = phy::lock(&self.phy)?;
            phy.rx_link_bandwidth(rate)?;
            self.regs.write(reg::PHY_REG, reg::PHY_REG_INIT);
            phy.rx_pll_reset()?;
        }

        self.enable_interrupts(reg::INTR_ALL, 0);
        self.disable_interrupts(reg::INTR_UNPLUG, 0);

        Ok(())
    }

    fn training_lost(&mut self) {
        info!("training lost");

        self.valid_stream = false;
        self.generate_hpd(HPD_PULSE_SHORT_US);
        self.pulse_soft_reset(reg::SOFT_RESET_AUX);
    }

    fn no_video(&mut self) {
        info!("no video");

        self.valid_stream = false;
        self.regs.write(reg::VIDEO_UNSUPPORTED, 1);
        self.enable_interrupts(reg::INTR_VBLANK, 0);
        self.disable_interrupts(reg::INTR_NO_VIDEO, 0);
        self.reset_dtg();
        self.pulse_soft_reset(reg::SOFT_RESET_VIDEO);
    }

    fn valid_video(&mut self) -> bool {
        self.regs.write(reg::VIDEO_UNSUPPORTED, 0);

        match self.stream_properties() {
            Ok(props) => {
                info!(
                    "valid video {}x{}{} at {} Hz, {} {} bpc",
                    props.width,
                    props.height,
                    if props.interlaced { "i" } else { "p" },
                    props.frame_rate,
                    props.color_format,
                    props.bpc
                );
                self.properties = Some(props);
                self.valid_stream = true;
            }
            Err(err) => {
                warn!("failed to decode stream: {}", err);
                self.valid_stream = false;
            }
        }

        self.valid_stream
    }

    fn power_state(&mut self) {
        self.cable_connected =
            self.regs.read(reg::DPCD_SET_POWER_STATE) & reg::CABLE_POWER_UP != 0;
        debug!(
            "power state changed, cable {}",
            if self.cable_connected { "powered" } else { "down" }
        );
    }

    fn remediate(&mut self, event: RxEvent, to: RxState) -> Result<RxState> {
        match event {
            RxEvent::Unplug => self.unplug(),
            RxEvent::TrainingPattern1 => self.training_pattern_1()?,
            RxEvent::TrainingLost => self.training_lost(),
            RxEvent::TrainingDone => info!("training done"),
            RxEvent::NoVideo => self.no_video(),
            RxEvent::ValidVideo => {
                if !self.valid_video() {
                    return Ok(RxState::NoVideo);
                }
            }
            RxEvent::PowerState => self.power_state(),
        }
        Ok(to)
    }

    /// Services one RX interrupt.
    ///
    /// Only the most important unmasked cause is handled. Returns `None` if nothing the dispatcher
    /// knows about was pending.
    pub fn handle_interrupt(&mut self) -> Result<Option<Dispatch>> {
        let cause = self.regs.read(reg::INTR_CAUSE) & !self.regs.read(reg::INTR_MASK);
        let cause_1 = self.regs.read(reg::INTR_CAUSE_1) & !self.regs.read(reg::INTR_MASK_1);

        if cause_1 != 0 {
            debug!("RX cause 1 {:#010x}", cause_1);
        }

        let Some(event) = RxEvent::from_cause(cause) else {
            if cause != 0 {
                debug!("RX cause {:#010x} ignored", cause);
            }
            return Ok(None);
        };

        let from = self.state;
        let Some(to) = event.transition(from) else {
            self.unexpected += 1;
            warn!("unexpected {} event while {}", event, from);
            return Ok(Some(Dispatch {
                event,
                from,
                to: from,
                handled: false,
            }));
        };

        let to = match self.remediate(event, to) {
            Ok(to) => to,
            Err(err) => {
                error!("handling {} failed: {}", event, err);
                return Err(err);
            }
        };

        if from != to {
            debug!("RX {} -> {}", from, to);
        }
        self.state = to;

        Ok(Some(Dispatch {
            event,
            from,
            to,
            handled: true,
        }))
    }

    /// Decodes the main stream attributes and programs the pixel width.
    pub fn stream_properties(&mut self) -> Result<StreamProperties> {
        let mvid = self.regs.read(reg::MSA_MVID) as u64;
        let nvid = self.regs.read(reg::MSA_NVID) as u64;
        let width = self.regs.read(reg::MSA_HRES);
        let mut height = self.regs.read(reg::MSA_VHEIGHT);
        let misc0 = self.regs.read(reg::MSA_MISC0);
        let vtotal = self.regs.read(reg::MSA_VTOTAL) as u64;
        let htotal = self.regs.read(reg::MSA_HTOTAL) as u64;
        let link_bw = self.regs.read(reg::DPCD_LINK_BW_SET) as u64;
        let lanes = self.regs.read(reg::DPCD_LANE_COUNT_SET);

        if nvid == 0 || htotal == 0 || vtotal == 0 {
            return Err(Error::new(ErrorKind::InvalidData, "MSA not valid"));
        }

        let clock_mhz = u32::try_from(link_bw * 27 * mvid / nvid).map_err(|_| {
            Error::new(
                ErrorKind::InvalidData,
                format!("recovered clock out of range (MVID {} NVID {})", mvid, nvid),
            )
        })?;
        let clock_hz = clock_mhz as u64 * 1_000_000;

        let pixels_per_clock = if clock_hz > 540_000_000 && lanes == 4 {
            4
        } else if clock_hz > 270_000_000 && lanes != 1 {
            2
        } else {
            1
        };
        self.regs.write(reg::LINE_RESET_DISABLE, 1);
        self.set_pixel_width(pixels_per_clock);

        let frame_rate = (clock_hz / (htotal * vtotal)) as u32;
        let frame_rate = util::roundup(frame_rate, 5);

        let color_format = match reg::MsaMisc0Format::get_field(misc0) {
            0 => ColorFormat::Rgb,
            1 => ColorFormat::YCbCr422,
            2 => ColorFormat::YCbCr444,
            f => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unsupported color format {}", f),
                ))
            }
        };
        let bpc_code = reg::MsaMisc0Bpc::get_field(misc0);
        let bpc = *BPC.get(bpc_code as usize).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("unsupported bpc code {}", bpc_code),
            )
        })?;

        let interlaced = reg::MsaMisc1Interlace::get_bit(self.regs.read(reg::MSA_MISC1));
        if interlaced {
            height *= 2;
        }

        Ok(StreamProperties {
            clock_mhz,
            pixels_per_clock,
            frame_rate,
            width,
            height,
            interlaced,
            color_format,
            bpc,
        })
    }

    /// Starts or stops streaming.
    pub fn set_streaming(&mut self, enable: bool) -> Result<()> {
        if enable && !self.valid_stream {
            return Err(Error::new(ErrorKind::InvalidInput, "no valid stream"));
        }
        if enable == self.streaming {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                if enable {
                    "already streaming"
                } else {
                    "streaming already stopped"
                },
            ));
        }

        self.streaming = enable;
        debug!("streaming {}", if enable { "started" } else { "stopped" });

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config;
    use crate::linkrate::ChannelId;
    use crate::phy::{Direction, VideoPhy};
    use crate::regs::MemRegisters;
    use crate::sim::{GtOp, SimGt};

    fn rx(gt: SimGt) -> DpRx<MemRegisters> {
        let config = config::default().unwrap();
        let phy = VideoPhy::new(Box::new(gt), config.phy)
            .unwrap()
            .into_handle();
        DpRx::new(MemRegisters::new(), config.rx, phy).unwrap()
    }

    fn raise(rx: &mut DpRx<MemRegisters>, cause: u32) -> Option<Dispatch> {
        rx.registers().preset(reg::INTR_CAUSE, cause);
        rx.registers().clear_writes();
        rx.handle_interrupt().unwrap()
    }

    fn uhd_msa(regs: &mut MemRegisters) {
        regs.preset(reg::DPCD_LINK_BW_SET, 0x1e);
        regs.preset(reg::DPCD_LANE_COUNT_SET, 4);
        regs.preset(reg::MSA_MVID, 594);
        regs.preset(reg::MSA_NVID, 810);
        regs.preset(reg::MSA_HRES, 3840);
        regs.preset(reg::MSA_VHEIGHT, 2160);
        regs.preset(reg::MSA_HTOTAL, 4400);
        regs.preset(reg::MSA_VTOTAL, 2250);
        regs.preset(reg::MSA_MISC0, 1 << 5);
    }

    #[test]
    fn priority() {
        let mut rx = rx(SimGt::new());

        let all = RxEvent::PRIORITY.iter().fold(0, |acc, e| acc | e.bit());
        let d = raise(&mut rx, all).unwrap();
        assert_eq!(d.event, RxEvent::Unplug);
        assert!(d.handled);

        // Only the unplug remediation ran.
        let regs = rx.registers();
        assert_eq!(
            regs.writes_to(reg::HPD_INTERRUPT),
            vec![750 << 16 | 0x2, 5000 << 16 | 0x2]
        );
        assert!(regs.writes_to(reg::PHY_REG).is_empty());
        assert!(regs.writes_to(reg::VIDEO_UNSUPPORTED).is_empty());
    }

    #[test]
    fn unplug_masks() {
        let mut rx = rx(SimGt::new());
        raise(&mut rx, reg::INTR_UNPLUG).unwrap();

        let regs = rx.registers();
        assert_eq!(regs.peek(reg::INTR_MASK), reg::INTR_ALL & !reg::INTR_TRAINING);
        assert_eq!(
            regs.peek(reg::INTR_MASK_1),
            reg::INTR_1_ALL & !reg::INTR_1_TRAINING
        );
        assert_eq!(regs.writes_to(reg::SOFT_RESET), vec![0x1, 0x0]);
        assert_eq!(rx.state(), RxState::Unplugged);
    }

    #[test]
    fn masked_causes_are_ignored() {
        let mut rx = rx(SimGt::new());
        rx.registers().preset(reg::DPCD_LINK_BW_SET, 0x06);
        rx.registers().preset(reg::INTR_MASK, reg::INTR_UNPLUG);

        let d = raise(&mut rx, reg::INTR_UNPLUG | reg::INTR_TP1);
        assert_eq!(d.unwrap().event, RxEvent::TrainingPattern1);

        rx.registers().preset(reg::INTR_MASK, 0);
        assert_eq!(raise(&mut rx, reg::INTR_VBLANK), None);
        assert_eq!(raise(&mut rx, 0), None);
    }

    #[test]
    fn training_sequence() {
        let gt = SimGt::new();
        let log = gt.log();
        let mut rx = rx(gt);
        rx.registers().preset(reg::DPCD_LINK_BW_SET, 0x14);

        let d = raise(&mut rx, reg::INTR_TP1).unwrap();
        assert_eq!((d.from, d.to), (RxState::Unplugged, RxState::Training));
        assert_eq!(rx.registers().writes_to(reg::PHY_REG), vec![reg::PHY_REG_INIT]);
        assert_eq!(rx.registers().peek(reg::INTR_MASK), reg::INTR_UNPLUG);

        let ops = log.lock().unwrap().clone();
        assert!(ops.contains(&GtOp::LineRate(ChannelId::Cha, 5_400_000_000)));
        assert!(ops.contains(&GtOp::BufgGtReset(Direction::Rx, false)));

        let d = raise(&mut rx, reg::INTR_TRAINING_DONE).unwrap();
        assert_eq!(d.to, RxState::Trained);

        uhd_msa(rx.registers());
        let d = raise(&mut rx, reg::INTR_VIDEO).unwrap();
        assert_eq!(d.to, RxState::Streaming);
        assert!(rx.valid_stream());
        assert_eq!(rx.registers().writes_to(reg::VIDEO_UNSUPPORTED), vec![0]);

        let d = raise(&mut rx, reg::INTR_NO_VIDEO).unwrap();
        assert_eq!(d.to, RxState::NoVideo);
        assert!(!rx.valid_stream());
        let regs = rx.registers();
        assert_eq!(regs.peek(reg::VIDEO_UNSUPPORTED), 1);
        assert_eq!(regs.peek(reg::INTR_MASK) & reg::INTR_NO_VIDEO, reg::INTR_NO_VIDEO);

        let d = raise(&mut rx, reg::INTR_TRAINING_LOST).unwrap();
        assert_eq!(d.to, RxState::Training);
        assert_eq!(rx.registers().writes_to(reg::SOFT_RESET), vec![0x80, 0x0]);
        assert_eq!(rx.unexpected_events(), 0);
    }

    #[test]
    fn unexpected_events_are_skipped() {
        let mut rx = rx(SimGt::new());

        let d = raise(&mut rx, reg::INTR_VIDEO).unwrap();
        assert!(!d.handled);
        assert_eq!(d.to, RxState::Unplugged);
        assert!(rx.registers().writes().is_empty());

        let d = raise(&mut rx, reg::INTR_TRAINING_DONE).unwrap();
        assert!(!d.handled);
        assert_eq!(rx.unexpected_events(), 2);

        // Power state changes are fine anywhere.
        rx.registers().preset(reg::DPCD_SET_POWER_STATE, 1);
        let d = raise(&mut rx, reg::INTR_POWER_STATE).unwrap();
        assert!(d.handled);
        assert!(rx.cable_connected());
        assert_eq!(rx.state(), RxState::Unplugged);
    }

    #[test]
    fn bad_stream_falls_back_to_no_video() {
        let mut rx = rx(SimGt::new());
        rx.registers().preset(reg::DPCD_LINK_BW_SET, 0x0a);
        raise(&mut rx, reg::INTR_TP1).unwrap();
        raise(&mut rx, reg::INTR_TRAINING_DONE).unwrap();

        let d = raise(&mut rx, reg::INTR_VIDEO).unwrap();
        assert!(d.handled);
        assert_eq!(d.to, RxState::NoVideo);
        assert!(!rx.valid_stream());
        assert!(rx.set_streaming(true).is_err());
    }

    #[test]
    fn stream_decode() {
        let mut rx = rx(SimGt::new());
        uhd_msa(rx.registers());

        let props = rx.stream_properties().unwrap();
        assert_eq!(props.clock_mhz, 594);
        assert_eq!(props.pixels_per_clock, 4);
        assert_eq!(props.frame_rate, 60);
        assert_eq!((props.width, props.height), (3840, 2160));
        assert_eq!(props.color_format, ColorFormat::Rgb);
        assert_eq!(props.bpc, 8);
        assert!(!props.interlaced);
        assert_eq!(rx.registers().peek(reg::PIXEL_WIDTH), 4);
        assert_eq!(rx.registers().peek(reg::LINE_RESET_DISABLE), 1);

        let regs = rx.registers();
        regs.preset(reg::DPCD_LANE_COUNT_SET, 2);
        regs.preset(reg::MSA_MISC0, 6 << 1 | 2 << 5);
        regs.preset(reg::MSA_MISC1, 1);
        let props = rx.stream_properties().unwrap();
        assert_eq!(props.pixels_per_clock, 2);
        assert_eq!(props.color_format, ColorFormat::YCbCr444);
        assert_eq!(props.bpc, 10);
        assert_eq!(props.height, 4320);

        rx.registers().preset(reg::MSA_MISC0, 3 << 1);
        assert!(rx.stream_properties().is_err());
        rx.registers().preset(reg::MSA_MISC0, 0);
        rx.registers().preset(reg::MSA_NVID, 0);
        assert_eq!(
            rx.stream_properties().unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }

    #[test]
    fn recovered_clock_out_of_range() {
        let mut rx = rx(SimGt::new());
        uhd_msa(rx.registers());
        rx.registers().preset(reg::MSA_MVID, 0xffff_ffff);
        rx.registers().preset(reg::MSA_NVID, 1);

        assert_eq!(
            rx.stream_properties().unwrap_err().kind(),
            ErrorKind::InvalidData
        );
        assert!(rx.registers().writes_to(reg::PIXEL_WIDTH).is_empty());
    }

    #[test]
    fn core_init_sequence() {
        let mut rx = rx(SimGt::new());
        rx.core_init().unwrap();

        let regs = rx.registers();
        assert_eq!(regs.writes_to(reg::LINK_BW_SET), vec![0x1e]);
        assert_eq!(regs.writes_to(reg::LANE_CNT_SET), vec![0xc4]);
        assert_eq!(
            regs.writes_to(reg::PHY_REG),
            vec![0x3, 0x2, (1 << 23) | (1 << 24) | (1 << 25)]
        );
        assert_eq!(regs.peek(reg::AUX_CLK_DIVIDER), 6 << 24 | 100);
        assert_eq!(regs.peek(reg::MIN_VOLTAGE_SWING), 0x1045);
        assert_eq!(regs.peek(reg::TP_SET), 0x8400);
        assert_eq!(regs.peek(reg::BS_IDLE_TIME), 0x0091_ffff);
        assert_eq!(regs.peek(reg::CDR_CONTROL_CONFIG), 0x1388);
        assert_eq!(regs.peek(reg::DTG), 1);
        assert_eq!(regs.peek(reg::INTR_MASK), 0);
        assert_eq!(regs.writes_to(reg::LINK_ENABLE), vec![0, 1, 0, 1]);
        assert_eq!(regs.peek(reg::CTRL_DPCD), 0);
    }

    #[test]
    fn streaming_control() {
        let mut rx = rx(SimGt::new());
        assert_eq!(
            rx.set_streaming(true).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert!(rx.set_streaming(false).is_err());

        rx.registers().preset(reg::DPCD_LINK_BW_SET, 0x1e);
        raise(&mut rx, reg::INTR_TP1).unwrap();
        raise(&mut rx, reg::INTR_TRAINING_DONE).unwrap();
        uhd_msa(rx.registers());
        raise(&mut rx, reg::INTR_VIDEO).unwrap();

        rx.set_streaming(true).unwrap();
        assert!(rx.is_streaming());
        assert!(rx.set_streaming(true).is_err());
        rx.set_streaming(false).unwrap();
        assert!(!rx.is_streaming());
        assert_eq!(rx.properties().map(|p| p.frame_rate), Some(60));
    }

    #[test]
    fn unknown_bandwidth() {
        let mut rx = rx(SimGt::new());
        rx.registers().preset(reg::DPCD_LINK_BW_SET, 0x0b);
        rx.registers().preset(reg::INTR_CAUSE, reg::INTR_TP1);
        assert_eq!(
            rx.handle_interrupt().unwrap_err().kind(),
            ErrorKind::InvalidData
        );
        assert_eq!(rx.state(), RxState::Unplugged);
    }

    #[test]
    fn unplug_from_any_state() {
        for cause in [reg::INTR_TP1, reg::INTR_TRAINING_DONE, reg::INTR_NO_VIDEO] {
            let mut rx = rx(SimGt::new());
            rx.registers().preset(reg::DPCD_LINK_BW_SET, 0x0a);
            raise(&mut rx, reg::INTR_TP1).unwrap();
            raise(&mut rx, cause).unwrap();
            let d = raise(&mut rx, reg::INTR_UNPLUG).unwrap();
            assert!(d.handled);
            assert_eq!(d.to, RxState::Unplugged);
        }
    }
}
