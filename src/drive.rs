// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Voltage swing and pre-emphasis levels of the main link.
//!
//! During link training the sink requests drive levels per lane. The source always drives the
//! highest requested level on every lane, clamped so that the combined level stays inside what
//! the DisplayPort standard allows. The levels are then translated into transceiver specific
//! register codes through a [`DriveTable`] picked by the transceiver generation.

use std::fmt::{self, Display};
use std::io::{Error, ErrorKind, Result};

use serde::Serialize;

use crate::dpcd::{self, LinkStatus};
use crate::phy::TransceiverType;

/// Voltage swing level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize)]
pub enum VsLevel {
    #[default]
    V0,
    V1,
    V2,
    V3,
}

/// Pre-emphasis level.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize)]
pub enum PeLevel {
    #[default]
    P0,
    P1,
    P2,
    P3,
}

/// Highest combined level allowed, `vs + pe <= MAX_LEVEL`.
pub const MAX_LEVEL: u8 = 3;

impl VsLevel {
    pub const ALL: [VsLevel; 4] = [Self::V0, Self::V1, Self::V2, Self::V3];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl From<u8> for VsLevel {
    /// Levels above 3 saturate.
    fn from(level: u8) -> Self {
        Self::ALL[(level as usize).min(3)]
    }
}

impl PeLevel {
    pub const ALL: [PeLevel; 4] = [Self::P0, Self::P1, Self::P2, Self::P3];

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl From<u8> for PeLevel {
    fn from(level: u8) -> Self {
        Self::ALL[(level as usize).min(3)]
    }
}

/// Link wide drive settings.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct DriveSettings {
    pub vs: VsLevel,
    pub pe: PeLevel,
}

impl DriveSettings {
    pub fn new(vs: VsLevel, pe: PeLevel) -> Self {
        Self { vs, pe }
    }

    /// Returns settings where pre-emphasis is reduced so that `pe <= 3 - vs`.
    ///
    /// Clamping never touches the voltage swing and is idempotent.
    ///
    /// # Examples
    /// ```
    /// use dptools::drive::{DriveSettings, PeLevel, VsLevel};
    ///
    /// let s = DriveSettings::new(VsLevel::V2, PeLevel::P3).clamp();
    /// assert_eq!(s, DriveSettings::new(VsLevel::V2, PeLevel::P1));
    /// assert_eq!(s.clamp(), s);
    /// ```
    pub fn clamp(self) -> Self {
        let max_pe = MAX_LEVEL - self.vs as u8;
        if self.pe as u8 > max_pe {
            Self {
                vs: self.vs,
                pe: PeLevel::from(max_pe),
            }
        } else {
            self
        }
    }

    /// Returns `true` if the voltage swing is at the maximum level.
    pub fn max_swing(&self) -> bool {
        self.vs == VsLevel::V3
    }

    /// Returns the value of DPCD `TRAINING_LANEx_SET` for these settings.
    pub fn lane_set(&self) -> u8 {
        let mut data = (self.pe as u8) << dpcd::TRAINING_LANE_PE_SHIFT | self.vs as u8;
        if self.vs == VsLevel::V3 {
            data |= dpcd::TRAINING_LANE_MAX_VS_REACHED;
        }
        if self.pe == PeLevel::P3 {
            data |= dpcd::TRAINING_LANE_MAX_PE_REACHED;
        }
        data
    }

    /// Returns the levels to program into the TX core PHY lane registers.
    pub fn tx_core_levels(&self) -> TxCoreLevels {
        let mut voltage = TX_CORE_VOLTAGE[self.vs.index()];
        // No redriver in the path.
        if self.pe != PeLevel::P0 {
            voltage += TX_CORE_VOLTAGE_OFFSET;
        }
        TxCoreLevels {
            voltage,
            postcursor: TX_CORE_POSTCURSOR[self.pe.index()],
        }
    }
}

impl Display for DriveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}P{}", self.vs as u8, self.pe as u8)
    }
}

/// Computes new drive settings from the per lane adjustment requests.
///
/// The highest requested voltage swing and pre-emphasis across `requests` win and the result is
/// clamped. If there are no requests `current` is returned unchanged.
pub fn adjust<I>(current: DriveSettings, requests: I) -> DriveSettings
where
    I: IntoIterator<Item = DriveSettings>,
{
    let mut requests = requests.into_iter().peekable();
    if requests.peek().is_none() {
        return current;
    }

    let mut settings = DriveSettings::default();
    for request in requests {
        settings.vs = settings.vs.max(request.vs);
        settings.pe = settings.pe.max(request.pe);
    }

    settings.clamp()
}

/// Returns the adjustment requests of the first `lanes` lanes.
pub fn requests(status: &LinkStatus, lanes: u8) -> impl Iterator<Item = DriveSettings> + '_ {
    (0..lanes as usize).map(|lane| {
        DriveSettings::new(
            VsLevel::from(status.adjust_voltage_swing(lane)),
            PeLevel::from(status.adjust_pre_emphasis(lane)),
        )
    })
}

const TX_CORE_VOLTAGE: [u32; 4] = [0x02, 0x05, 0x08, 0x0f];
const TX_CORE_POSTCURSOR: [u32; 4] = [0x00, 0x0e, 0x14, 0x1b];
const TX_CORE_VOLTAGE_OFFSET: u32 = 0x4;

/// Values for the DP TX core PHY lane registers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxCoreLevels {
    pub voltage: u32,
    pub postcursor: u32,
}

/// Transceiver specific translation of drive levels to register codes.
pub trait DriveTable: Send + Sync {
    /// Name of the transceiver generation.
    fn name(&self) -> &'static str;

    /// Differential swing (`TXDIFFCTRL`) code.
    fn diff_swing(&self, settings: DriveSettings) -> u8;

    /// Pre-emphasis code written to the pre-cursor field.
    fn pre_emphasis(&self, pe: PeLevel) -> u8;
}

/// Static lookup table of one transceiver generation.
#[derive(Debug)]
pub struct GenerationTable {
    name: &'static str,
    diff_swing: [[u8; 4]; 4],
    pre_emphasis: [u8; 4],
}

impl DriveTable for GenerationTable {
    fn name(&self) -> &'static str {
        self.name
    }

    fn diff_swing(&self, settings: DriveSettings) -> u8 {
        self.diff_swing[settings.vs.index()][settings.pe.index()]
    }

    fn pre_emphasis(&self, pe: PeLevel) -> u8 {
        self.pre_emphasis[pe.index()]
    }
}

pub static GTHE3: GenerationTable = GenerationTable {
    name: "GTHE3",
    diff_swing: [
        [0x03, 0x06, 0x09, 0x0f],
        [0x06, 0x09, 0x0f, 0x0f],
        [0x09, 0x0f, 0x0f, 0x0f],
        [0x0f, 0x0f, 0x0f, 0x0f],
    ],
    pre_emphasis: [0x00, 0x0e, 0x14, 0x14],
};

// Combinations above the allowed level repeat the last allowed one of the row.
pub static GTHE4: GenerationTable = GenerationTable {
    name: "GTHE4",
    diff_swing: [
        [0x01, 0x02, 0x05, 0x0b],
        [0x02, 0x05, 0x07, 0x07],
        [0x04, 0x07, 0x07, 0x07],
        [0x08, 0x08, 0x08, 0x08],
    ],
    pre_emphasis: [0x03, 0x0d, 0x16, 0x1d],
};

/// Returns the drive table for transceiver `kind`.
pub fn table_for(kind: TransceiverType) -> Result<&'static dyn DriveTable> {
    match kind {
        TransceiverType::Gthe3 => Ok(&GTHE3),
        TransceiverType::Gthe4 | TransceiverType::Gtye4 => Ok(&GTHE4),
        _ => Err(Error::new(
            ErrorKind::InvalidInput,
            format!("no drive table for transceiver {}", kind),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adjust_never_exceeds_limit() {
        for vs in VsLevel::ALL {
            for pe in PeLevel::ALL {
                let request = DriveSettings::new(vs, pe);
                let s = adjust(DriveSettings::default(), [request]);

                assert!((s.pe as u8) <= 4 - (s.vs as u8));
                assert!((s.pe as u8) <= MAX_LEVEL - (s.vs as u8));
                assert_eq!(s.vs, vs);
                assert_eq!(s.clamp(), s);
            }
        }
    }

    #[test]
    fn adjust_takes_maximum() {
        let requests = [
            DriveSettings::new(VsLevel::V1, PeLevel::P0),
            DriveSettings::new(VsLevel::V0, PeLevel::P1),
            DriveSettings::new(VsLevel::V2, PeLevel::P0),
            DriveSettings::new(VsLevel::V0, PeLevel::P0),
        ];
        let current = DriveSettings::new(VsLevel::V3, PeLevel::P0);

        assert_eq!(
            adjust(current, requests),
            DriveSettings::new(VsLevel::V2, PeLevel::P1)
        );
        assert_eq!(adjust(current, Vec::new()), current);
    }

    #[test]
    fn requests_from_status() {
        let status = LinkStatus::new([0, 0, 0, 0, 0x16, 0x00]);
        let s = adjust(DriveSettings::default(), requests(&status, 4));
        assert_eq!(s, DriveSettings::new(VsLevel::V2, PeLevel::P1));

        // Only lane 0 is active.
        let s = adjust(DriveSettings::default(), requests(&status, 1));
        assert_eq!(s, DriveSettings::new(VsLevel::V2, PeLevel::P1));
    }

    #[test]
    fn lane_set() {
        assert_eq!(DriveSettings::default().lane_set(), 0x00);
        assert_eq!(
            DriveSettings::new(VsLevel::V3, PeLevel::P0).lane_set(),
            0x03 | dpcd::TRAINING_LANE_MAX_VS_REACHED
        );
        assert_eq!(
            DriveSettings::new(VsLevel::V0, PeLevel::P3).lane_set(),
            0x18 | dpcd::TRAINING_LANE_MAX_PE_REACHED
        );
    }

    #[test]
    fn tx_core_levels() {
        let l = DriveSettings::new(VsLevel::V1, PeLevel::P0).tx_core_levels();
        assert_eq!(l, TxCoreLevels { voltage: 0x05, postcursor: 0x00 });

        let l = DriveSettings::new(VsLevel::V1, PeLevel::P2).tx_core_levels();
        assert_eq!(l, TxCoreLevels { voltage: 0x09, postcursor: 0x14 });
    }

    #[test]
    fn generation_tables() {
        let t = table_for(TransceiverType::Gtye4).unwrap();
        assert_eq!(t.name(), "GTHE4");
        assert_eq!(t.diff_swing(DriveSettings::new(VsLevel::V0, PeLevel::P3)), 0x0b);
        assert_eq!(t.diff_swing(DriveSettings::new(VsLevel::V2, PeLevel::P1)), 0x07);
        assert_eq!(t.pre_emphasis(PeLevel::P2), 0x16);

        let t = table_for(TransceiverType::Gthe3).unwrap();
        assert_eq!(t.diff_swing(DriveSettings::new(VsLevel::V1, PeLevel::P1)), 0x09);
        assert_eq!(t.pre_emphasis(PeLevel::P3), 0x14);

        assert_eq!(
            table_for(TransceiverType::Gtxe2).err().unwrap().kind(),
            ErrorKind::InvalidInput
        );
    }
}
