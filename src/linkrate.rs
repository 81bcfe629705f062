// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Link rate and PLL selection table.
//!
//! Maps each DisplayPort line rate to the transceiver PLLs, channels and reference clocks used to
//! generate it. The table is fixed at build time and looked up by the line rate and whether the TX
//! side is clocked from the per-channel CPLL or from the quad shared QPLL1.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// DisplayPort main link rate per lane.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LinkRate {
    /// Reduced bit rate, 1.62 Gb/s.
    Rbr,
    /// High bit rate, 2.7 Gb/s.
    Hbr,
    /// High bit rate 2, 5.4 Gb/s.
    Hbr2,
    /// High bit rate 3, 8.1 Gb/s.
    Hbr3,
}

impl LinkRate {
    /// All rates from the lowest to the highest.
    pub const ALL: [LinkRate; 4] = [Self::Rbr, Self::Hbr, Self::Hbr2, Self::Hbr3];

    /// Returns the line rate code in Mb/s (1620, 2700, 5400 or 8100).
    pub fn code(&self) -> u32 {
        match self {
            Self::Rbr => 1620,
            Self::Hbr => 2700,
            Self::Hbr2 => 5400,
            Self::Hbr3 => 8100,
        }
    }

    /// Converts line rate code in Mb/s into [`LinkRate`].
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Returns the line rate in Hz.
    pub fn hz(&self) -> u64 {
        self.code() as u64 * 1_000_000
    }

    /// Returns the link symbol clock in kHz as used by the DRM helpers (162000 etc).
    pub fn khz(&self) -> u32 {
        self.code() * 100
    }

    /// Converts link rate in kHz into [`LinkRate`].
    pub fn from_khz(khz: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.khz() == khz)
    }

    /// Returns the DPCD `LINK_BW_SET` code of the rate.
    pub fn bw_code(&self) -> u8 {
        match self {
            Self::Rbr => 0x06,
            Self::Hbr => 0x0a,
            Self::Hbr2 => 0x14,
            Self::Hbr3 => 0x1e,
        }
    }

    /// Converts DPCD `LINK_BW_SET` code into [`LinkRate`].
    ///
    /// # Examples
    /// ```
    /// use dptools::linkrate::LinkRate;
    ///
    /// assert_eq!(LinkRate::from_bw_code(0x1e), Some(LinkRate::Hbr3));
    /// assert_eq!(LinkRate::from_bw_code(0x0b), None);
    /// ```
    pub fn from_bw_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.bw_code() == code)
    }

    /// Returns the next lower rate or `None` if this is already the lowest.
    pub fn lower(&self) -> Option<Self> {
        match self {
            Self::Rbr => None,
            Self::Hbr => Some(Self::Rbr),
            Self::Hbr2 => Some(Self::Hbr),
            Self::Hbr3 => Some(Self::Hbr2),
        }
    }
}

impl Display for LinkRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rbr => "1.62 Gb/s",
            Self::Hbr => "2.7 Gb/s",
            Self::Hbr2 => "5.4 Gb/s",
            Self::Hbr3 => "8.1 Gb/s",
        };
        write!(f, "{s}")
    }
}

/// Transceiver PLL.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PllType {
    /// Channel PLL, one per channel.
    Cpll,
    /// Quad PLL 0, shared by the quad.
    Qpll0,
    /// Quad PLL 1, shared by the quad.
    Qpll1,
}

impl Display for PllType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cpll => "CPLL",
            Self::Qpll0 => "QPLL0",
            Self::Qpll1 => "QPLL1",
        };
        write!(f, "{s}")
    }
}

/// Transceiver channel or common block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    Ch1,
    Ch2,
    Ch3,
    Ch4,
    /// All four channels.
    Cha,
    Cmn0,
    Cmn1,
    /// Both common blocks.
    Cmna,
}

impl ChannelId {
    /// Returns the individual channels or common blocks this identifier covers.
    pub fn expand(&self) -> &'static [ChannelId] {
        match self {
            Self::Ch1 => &[Self::Ch1],
            Self::Ch2 => &[Self::Ch2],
            Self::Ch3 => &[Self::Ch3],
            Self::Ch4 => &[Self::Ch4],
            Self::Cha => &[Self::Ch1, Self::Ch2, Self::Ch3, Self::Ch4],
            Self::Cmn0 => &[Self::Cmn0],
            Self::Cmn1 => &[Self::Cmn1],
            Self::Cmna => &[Self::Cmn0, Self::Cmn1],
        }
    }

    /// Returns 1-based channel number for `Ch1`..`Ch4`.
    pub fn number(&self) -> Option<u32> {
        match self {
            Self::Ch1 => Some(1),
            Self::Ch2 => Some(2),
            Self::Ch3 => Some(3),
            Self::Ch4 => Some(4),
            _ => None,
        }
    }

    /// Returns `true` if this is a common (quad PLL) block.
    pub fn is_common(&self) -> bool {
        matches!(self, Self::Cmn0 | Self::Cmn1 | Self::Cmna)
    }

    /// All four channels in order.
    pub const CHANNELS: [ChannelId; 4] = [Self::Ch1, Self::Ch2, Self::Ch3, Self::Ch4];
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ch1 => "CH1",
            Self::Ch2 => "CH2",
            Self::Ch3 => "CH3",
            Self::Ch4 => "CH4",
            Self::Cha => "CHA",
            Self::Cmn0 => "CMN0",
            Self::Cmn1 => "CMN1",
            Self::Cmna => "CMNA",
        };
        write!(f, "{s}")
    }
}

/// Reference clock source of a PLL.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RefClkSrc {
    /// On-board 270 MHz oscillator.
    Onboard,
    /// Clock forwarded by the DP159 retimer.
    Dp159Forwarded,
}

impl RefClkSrc {
    /// Returns the selector value programmed into the reference clock select register.
    pub fn selector(&self) -> u32 {
        match self {
            Self::Onboard => 1,
            Self::Dp159Forwarded => 3,
        }
    }
}

/// One row of the link rate table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkRateEntry {
    pub index: u8,
    pub tx_pll: PllType,
    pub rx_pll: PllType,
    pub tx_channel: ChannelId,
    pub rx_channel: ChannelId,
    pub rate: LinkRate,
    pub line_rate_hz: u64,
    pub qpll_refclk: RefClkSrc,
    pub cpll_refclk: RefClkSrc,
    pub qpll_refclk_hz: u64,
    pub cpll_refclk_hz: u64,
}

impl LinkRateEntry {
    /// Returns `true` if the TX side of this entry runs from the CPLL.
    pub fn is_tx_cpll(&self) -> bool {
        self.tx_pll == PllType::Cpll
    }
}

/// Frequency of the on-board reference clock.
pub const ONBOARD_REFCLK_HZ: u64 = 270_000_000;

const fn entry(index: u8, rate: LinkRate, tx_cpll: bool) -> LinkRateEntry {
    let line_rate_hz = match rate {
        LinkRate::Rbr => 1_620_000_000,
        LinkRate::Hbr => 2_700_000_000,
        LinkRate::Hbr2 => 5_400_000_000,
        LinkRate::Hbr3 => 8_100_000_000,
    };

    LinkRateEntry {
        index,
        tx_pll: if tx_cpll { PllType::Cpll } else { PllType::Qpll1 },
        rx_pll: PllType::Cpll,
        tx_channel: if tx_cpll {
            ChannelId::Cha
        } else {
            ChannelId::Cmn1
        },
        rx_channel: ChannelId::Cha,
        rate,
        line_rate_hz,
        qpll_refclk: RefClkSrc::Onboard,
        cpll_refclk: RefClkSrc::Onboard,
        qpll_refclk_hz: ONBOARD_REFCLK_HZ,
        cpll_refclk_hz: ONBOARD_REFCLK_HZ,
    }
}

/// The link rate table.
pub static LINK_RATE_TABLE: [LinkRateEntry; 8] = [
    entry(0, LinkRate::Rbr, true),
    entry(1, LinkRate::Hbr, true),
    entry(2, LinkRate::Hbr2, true),
    entry(3, LinkRate::Hbr3, true),
    entry(4, LinkRate::Rbr, false),
    entry(5, LinkRate::Hbr, false),
    entry(6, LinkRate::Hbr2, false),
    entry(7, LinkRate::Hbr3, false),
];

/// Looks up the table entry for line rate `code` (in Mb/s).
///
/// `tx_cpll` selects between the entries that clock TX from the CPLL and those that use QPLL1.
///
/// # Examples
/// ```
/// use dptools::linkrate::{self, PllType};
///
/// let entry = linkrate::lookup(8100, true).unwrap();
/// assert_eq!(entry.line_rate_hz, 8_100_000_000);
/// assert_eq!(entry.tx_pll, PllType::Cpll);
///
/// assert!(linkrate::lookup(3240, true).is_none());
/// ```
pub fn lookup(code: u32, tx_cpll: bool) -> Option<&'static LinkRateEntry> {
    LINK_RATE_TABLE
        .iter()
        .find(|e| e.rate.code() == code && e.is_tx_cpll() == tx_cpll)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_rate_has_exactly_one_entry() {
        for (code, hz) in [
            (1620, 1_620_000_000u64),
            (2700, 2_700_000_000),
            (5400, 5_400_000_000),
            (8100, 8_100_000_000),
        ] {
            for tx_cpll in [true, false] {
                let matches: Vec<_> = LINK_RATE_TABLE
                    .iter()
                    .filter(|e| e.rate.code() == code && e.is_tx_cpll() == tx_cpll)
                    .collect();
                assert_eq!(matches.len(), 1);

                let entry = lookup(code, tx_cpll).unwrap();
                assert_eq!(entry.line_rate_hz, hz);
                assert_eq!(entry.line_rate_hz, entry.rate.hz());
            }
        }
    }

    #[test]
    fn qpll_entries() {
        let entry = lookup(5400, false).unwrap();
        assert_eq!(entry.tx_pll, PllType::Qpll1);
        assert_eq!(entry.tx_channel, ChannelId::Cmn1);
        assert_eq!(entry.rx_pll, PllType::Cpll);
        assert_eq!(entry.qpll_refclk_hz, 270_000_000);
    }

    #[test]
    fn rate_conversions() {
        assert_eq!(LinkRate::from_khz(540000), Some(LinkRate::Hbr2));
        assert_eq!(LinkRate::Hbr2.bw_code(), 0x14);
        assert_eq!(LinkRate::Hbr3.lower(), Some(LinkRate::Hbr2));
        assert_eq!(LinkRate::Rbr.lower(), None);
        assert_eq!(LinkRate::from_code(2700), Some(LinkRate::Hbr));
        assert_eq!(ChannelId::Cha.expand().len(), 4);
    }
}
