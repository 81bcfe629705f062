// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! DisplayPort Configuration Data (DPCD) registers of the sink.
//!
//! Only the registers the link training and sink power management need are defined here. The
//! names of the rest are available through [`register_name()`] for dumping.

use std::fmt::{self, Display};
use std::time::Duration;

use lazy_static::lazy_static;
use serde_json::Value;

use crate::{genmask_t, linkrate::LinkRate, DATA_DIR};

pub const DPCD_REV: u32 = 0x000;
pub const MAX_LINK_RATE: u32 = 0x001;
pub const MAX_LANE_COUNT: u32 = 0x002;
pub const MAX_LANE_COUNT_MASK: u8 = genmask_t!(u8, 4, 0);
pub const TPS3_SUPPORTED: u8 = 1 << 6;
pub const ENHANCED_FRAME_CAP: u8 = 1 << 7;
pub const MAX_DOWNSPREAD: u32 = 0x003;
pub const MAX_DOWNSPREAD_0_5: u8 = 1 << 0;
pub const TPS4_SUPPORTED: u8 = 1 << 7;
pub const TRAINING_AUX_RD_INTERVAL: u32 = 0x00e;
pub const TRAINING_AUX_RD_MASK: u8 = genmask_t!(u8, 6, 0);
pub const EXTENDED_RECEIVER_CAP: u8 = 1 << 7;

/// Number of receiver capability bytes read during detection.
pub const RECEIVER_CAP_SIZE: usize = 15;

pub const LINK_BW_SET: u32 = 0x100;
pub const LANE_COUNT_SET: u32 = 0x101;
pub const LANE_COUNT_ENHANCED_FRAME_EN: u8 = 1 << 7;
pub const LANE_COUNT_POST_LT_ADJ_REQ_GRANTED: u8 = 1 << 5;
pub const TRAINING_PATTERN_SET: u32 = 0x102;
pub const LINK_SCRAMBLING_DISABLE: u8 = 1 << 5;
pub const TRAINING_LANE0_SET: u32 = 0x103;
pub const TRAINING_LANE_VS_MASK: u8 = genmask_t!(u8, 1, 0);
pub const TRAINING_LANE_MAX_VS_REACHED: u8 = 1 << 2;
pub const TRAINING_LANE_PE_MASK: u8 = genmask_t!(u8, 4, 3);
pub const TRAINING_LANE_PE_SHIFT: u8 = 3;
pub const TRAINING_LANE_MAX_PE_REACHED: u8 = 1 << 5;
pub const DOWNSPREAD_CTRL: u32 = 0x107;
pub const SPREAD_AMP_0_5: u8 = 1 << 4;
pub const MAIN_LINK_CHANNEL_CODING_SET: u32 = 0x108;
pub const CHANNEL_CODING_8B10B: u8 = 1;

pub const LANE0_1_STATUS: u32 = 0x202;
pub const LANE_CR_DONE: u8 = 1 << 0;
pub const LANE_CHANNEL_EQ_DONE: u8 = 1 << 1;
pub const LANE_SYMBOL_LOCKED: u8 = 1 << 2;
pub const LANE_ALIGN_STATUS_UPDATED: u32 = 0x204;
pub const INTERLANE_ALIGN_DONE: u8 = 1 << 0;
pub const ADJUST_REQUEST_LANE0_1: u32 = 0x206;

/// Number of link status bytes (0x202 to 0x207).
pub const LINK_STATUS_SIZE: usize = 6;

pub const SET_POWER: u32 = 0x600;
pub const SET_POWER_D0: u8 = 0x1;
pub const SET_POWER_D3: u8 = 0x2;

pub const DPCD_REV_11: u8 = 0x11;
pub const DPCD_REV_12: u8 = 0x12;
pub const DPCD_REV_14: u8 = 0x14;

lazy_static! {
    static ref NAMES: Value = serde_json::from_str(
        DATA_DIR
            .get_file("dpcd.json")
            .unwrap()
            .contents_utf8()
            .unwrap()
    )
    .unwrap();
}

/// Returns name of the DPCD register at `address` if it is known.
///
/// # Examples
/// ```
/// use dptools::dpcd;
///
/// assert_eq!(dpcd::register_name(0x202), Some("LANE0_1_STATUS"));
/// ```
pub fn register_name(address: u32) -> Option<&'static str> {
    NAMES
        .as_array()?
        .iter()
        .find(|r| r["address"].as_u64() == Some(address as u64))
        .and_then(|r| r["name"].as_str())
}

/// Training pattern driven on the main link.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
pub enum TrainingPattern {
    Disabled,
    Tps1,
    Tps2,
    Tps3,
    Tps4,
}

impl TrainingPattern {
    /// Returns the value for the DPCD `TRAINING_PATTERN_SET` register.
    pub fn dpcd_value(&self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Tps1 => 1,
            Self::Tps2 => 2,
            Self::Tps3 => 3,
            Self::Tps4 => 7,
        }
    }

    /// Returns the value for the TX core training pattern register.
    pub fn core_value(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Tps1 => 1,
            Self::Tps2 => 2,
            Self::Tps3 => 3,
            Self::Tps4 => 4,
        }
    }

    /// Returns `true` if the scrambler must be disabled while this pattern is sent.
    ///
    /// TPS4 is defined as scrambled, the other patterns are not.
    pub fn disables_scrambler(&self) -> bool {
        matches!(self, Self::Tps1 | Self::Tps2 | Self::Tps3)
    }
}

impl Display for TrainingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "off",
            Self::Tps1 => "TPS1",
            Self::Tps2 => "TPS2",
            Self::Tps3 => "TPS3",
            Self::Tps4 => "TPS4",
        };
        write!(f, "{s}")
    }
}

/// Receiver capability field (DPCD 0x000 - 0x00e).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReceiverCaps([u8; RECEIVER_CAP_SIZE]);

impl ReceiverCaps {
    pub fn new(data: [u8; RECEIVER_CAP_SIZE]) -> Self {
        Self(data)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// DPCD revision (0x11, 0x12, 0x14, ...).
    pub fn revision(&self) -> u8 {
        self.0[DPCD_REV as usize]
    }

    /// Maximum link rate supported by the sink or `None` if the code is not known.
    pub fn max_link_rate(&self) -> Option<LinkRate> {
        LinkRate::from_bw_code(self.0[MAX_LINK_RATE as usize])
    }

    pub fn max_lane_count(&self) -> u8 {
        self.0[MAX_LANE_COUNT as usize] & MAX_LANE_COUNT_MASK
    }

    pub fn enhanced_frame(&self) -> bool {
        self.0[MAX_LANE_COUNT as usize] & ENHANCED_FRAME_CAP != 0
    }

    pub fn tps3(&self) -> bool {
        self.0[MAX_LANE_COUNT as usize] & TPS3_SUPPORTED != 0
    }

    pub fn tps4(&self) -> bool {
        self.0[MAX_DOWNSPREAD as usize] & TPS4_SUPPORTED != 0
    }

    pub fn downspread(&self) -> bool {
        self.0[MAX_DOWNSPREAD as usize] & MAX_DOWNSPREAD_0_5 != 0
    }

    /// Raw `TRAINING_AUX_RD_INTERVAL` value.
    pub fn aux_rd_interval(&self) -> u8 {
        self.0[TRAINING_AUX_RD_INTERVAL as usize] & TRAINING_AUX_RD_MASK
    }

    /// Delay between clock recovery status reads.
    pub fn cr_delay(&self) -> Duration {
        match self.aux_rd_interval() {
            0 => Duration::from_micros(100),
            n => Duration::from_millis(n as u64 * 4),
        }
    }

    /// Delay between channel equalization status reads.
    pub fn eq_delay(&self) -> Duration {
        match self.aux_rd_interval() {
            0 => Duration::from_micros(400),
            n => Duration::from_millis(n as u64 * 4),
        }
    }

    /// Training pattern to use for channel equalization.
    pub fn eq_pattern(&self) -> TrainingPattern {
        let rev = self.revision();
        if rev >= DPCD_REV_14 && self.tps4() {
            TrainingPattern::Tps4
        } else if rev >= DPCD_REV_12 && self.tps3() {
            TrainingPattern::Tps3
        } else {
            TrainingPattern::Tps2
        }
    }
}

/// Link status (DPCD 0x202 - 0x207).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LinkStatus([u8; LINK_STATUS_SIZE]);

impl LinkStatus {
    pub fn new(data: [u8; LINK_STATUS_SIZE]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the 4 status bits of `lane`.
    pub fn lane_status(&self, lane: usize) -> u8 {
        (self.0[lane / 2] >> (4 * (lane % 2))) & 0xf
    }

    /// Returns `true` if clock recovery is done on the first `lanes` lanes.
    pub fn clock_recovery_ok(&self, lanes: u8) -> bool {
        (0..lanes as usize).all(|lane| self.lane_status(lane) & LANE_CR_DONE != 0)
    }

    /// Returns `true` if channel equalization, symbol lock and interlane alignment are done on the
    /// first `lanes` lanes.
    pub fn channel_eq_ok(&self, lanes: u8) -> bool {
        let done = LANE_CR_DONE | LANE_CHANNEL_EQ_DONE | LANE_SYMBOL_LOCKED;

        self.interlane_aligned()
            && (0..lanes as usize).all(|lane| self.lane_status(lane) & done == done)
    }

    pub fn interlane_aligned(&self) -> bool {
        self.0[(LANE_ALIGN_STATUS_UPDATED - LANE0_1_STATUS) as usize] & INTERLANE_ALIGN_DONE != 0
    }

    /// Requested voltage swing level of `lane`.
    pub fn adjust_voltage_swing(&self, lane: usize) -> u8 {
        let byte = self.0[(ADJUST_REQUEST_LANE0_1 - LANE0_1_STATUS) as usize + lane / 2];
        (byte >> (4 * (lane % 2))) & 0x3
    }

    /// Requested pre-emphasis level of `lane`.
    pub fn adjust_pre_emphasis(&self, lane: usize) -> u8 {
        let byte = self.0[(ADJUST_REQUEST_LANE0_1 - LANE0_1_STATUS) as usize + lane / 2];
        (byte >> (4 * (lane % 2) + 2)) & 0x3
    }
}

impl Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_status_lanes() {
        // Lanes 0-2 fully trained, lane 3 only CR done.
        let status = LinkStatus::new([0x77, 0x17, 0x01, 0x00, 0x00, 0x00]);

        assert!(status.clock_recovery_ok(4));
        assert!(status.channel_eq_ok(2));
        assert!(!status.channel_eq_ok(4));

        let status = LinkStatus::new([0x77, 0x77, 0x00, 0x00, 0x00, 0x00]);
        assert!(!status.channel_eq_ok(4));
    }

    #[test]
    fn adjust_requests() {
        // Lane 0: vs 2 pe 1, lane 1: vs 1 pe 3, lane 2: vs 3, lane 3: pe 2.
        let status = LinkStatus::new([0, 0, 0, 0, 0xd6, 0x83]);

        assert_eq!(status.adjust_voltage_swing(0), 2);
        assert_eq!(status.adjust_pre_emphasis(0), 1);
        assert_eq!(status.adjust_voltage_swing(1), 1);
        assert_eq!(status.adjust_pre_emphasis(1), 3);
        assert_eq!(status.adjust_voltage_swing(2), 3);
        assert_eq!(status.adjust_pre_emphasis(2), 0);
        assert_eq!(status.adjust_voltage_swing(3), 0);
        assert_eq!(status.adjust_pre_emphasis(3), 2);
    }

    #[test]
    fn equalization_pattern() {
        let mut caps = [0u8; RECEIVER_CAP_SIZE];
        caps[0] = DPCD_REV_14;
        caps[2] = 0x4 | TPS3_SUPPORTED;
        caps[3] = TPS4_SUPPORTED;
        assert_eq!(ReceiverCaps::new(caps).eq_pattern(), TrainingPattern::Tps4);

        caps[0] = DPCD_REV_12;
        assert_eq!(ReceiverCaps::new(caps).eq_pattern(), TrainingPattern::Tps3);

        caps[0] = DPCD_REV_11;
        assert_eq!(ReceiverCaps::new(caps).eq_pattern(), TrainingPattern::Tps2);
    }

    #[test]
    fn delays() {
        let mut caps = [0u8; RECEIVER_CAP_SIZE];
        assert_eq!(ReceiverCaps::new(caps).cr_delay(), Duration::from_micros(100));
        assert_eq!(ReceiverCaps::new(caps).eq_delay(), Duration::from_micros(400));
        caps[TRAINING_AUX_RD_INTERVAL as usize] = EXTENDED_RECEIVER_CAP | 2;
        assert_eq!(ReceiverCaps::new(caps).eq_delay(), Duration::from_millis(8));
    }

    #[test]
    fn names() {
        assert_eq!(register_name(0x600), Some("SET_POWER"));
        assert_eq!(register_name(0xfffff), None);
    }
}
