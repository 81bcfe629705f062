// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Pipeline configuration.
//!
//! The configuration describes how the FPGA design was synthesized: transceiver generation, number
//! of lanes and the limits of the DP TX and RX subsystems. Keys follow the device tree property
//! names of the IP blocks. A default configuration for the reference design is built in.
//!
//! # Examples
//! ```
//! # use std::io;
//! # fn main() -> io::Result<()> {
//! let config = dptools::config::default()?;
//! assert_eq!(config.tx.max_lanes, 4);
//! # Ok(())
//! # }
//! ```

use std::fmt::{self, Display};
use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::linkrate::LinkRate;
use crate::phy::TransceiverType;
use crate::DATA_DIR;

/// Pixel encoding of the main stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ColorFormat {
    #[default]
    #[serde(rename = "rgb")]
    Rgb,
    #[serde(rename = "ycbcr444")]
    YCbCr444,
    #[serde(rename = "ycbcr422")]
    YCbCr422,
}

impl ColorFormat {
    /// Component format bits of the MSA `MISC0` byte.
    pub fn misc0(&self) -> u32 {
        match self {
            Self::Rgb => 0,
            Self::YCbCr422 => 5 << 1,
            Self::YCbCr444 => 6 << 1,
        }
    }

    /// Bits per pixel for `bpc` bits per component.
    pub fn bpp(&self, bpc: u8) -> u32 {
        match self {
            Self::YCbCr422 => 2 * bpc as u32,
            _ => 3 * bpc as u32,
        }
    }
}

impl Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rgb => "RGB",
            Self::YCbCr444 => "YCbCr 4:4:4",
            Self::YCbCr422 => "YCbCr 4:2:2",
        };
        write!(f, "{s}")
    }
}

fn yes() -> bool {
    true
}

fn default_lanes() -> u8 {
    4
}

fn default_link_rate() -> u32 {
    810000
}

fn default_clock_hz() -> u64 {
    100_000_000
}

fn default_aux_timeout_ms() -> u64 {
    50
}

fn default_power_on_delay_ms() -> u64 {
    4
}

/// Video PHY configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PhyConfig {
    pub transceiver_type: TransceiverType,
    /// Number of lanes wired to the controllers.
    #[serde(default = "default_lanes")]
    pub lanes: u8,
    /// Clock TX from the channel PLL instead of QPLL1.
    #[serde(default = "yes")]
    pub tx_cpll: bool,
}

/// DP TX subsystem configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TxConfig {
    #[serde(default = "default_lanes")]
    pub max_lanes: u8,
    /// Maximum link rate in kHz.
    #[serde(default = "default_link_rate")]
    pub max_link_rate: u32,
    pub max_bpc: u8,
    pub bpc: u8,
    #[serde(default)]
    pub color_format: ColorFormat,
    /// Synchronous clock mode.
    #[serde(default = "yes")]
    pub sync: bool,
    #[serde(default = "default_clock_hz")]
    pub aux_clock_hz: u64,
    #[serde(default = "default_aux_timeout_ms")]
    pub aux_timeout_ms: u64,
    #[serde(default = "default_power_on_delay_ms")]
    pub power_on_delay_ms: u64,
}

impl TxConfig {
    /// Maximum link rate as [`LinkRate`].
    pub fn max_rate(&self) -> LinkRate {
        LinkRate::from_khz(self.max_link_rate).unwrap_or(LinkRate::Rbr)
    }

    pub fn bpp(&self) -> u32 {
        self.color_format.bpp(self.bpc)
    }
}

/// DP RX subsystem configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RxConfig {
    #[serde(default = "default_lanes")]
    pub max_lanes: u8,
    /// Maximum link rate in kHz.
    #[serde(default = "default_link_rate")]
    pub max_link_rate: u32,
    #[serde(default = "default_clock_hz")]
    pub axi_clock_hz: u64,
}

impl RxConfig {
    pub fn max_rate(&self) -> LinkRate {
        LinkRate::from_khz(self.max_link_rate).unwrap_or(LinkRate::Rbr)
    }
}

/// Configuration of the whole pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub phy: PhyConfig,
    pub tx: TxConfig,
    pub rx: RxConfig,
}

fn invalid(msg: String) -> Error {
    Error::new(ErrorKind::InvalidInput, msg)
}

fn check_lanes(what: &str, lanes: u8) -> Result<()> {
    if !matches!(lanes, 1 | 2 | 4) {
        return Err(invalid(format!("{}: invalid max-lanes {}", what, lanes)));
    }
    Ok(())
}

fn check_link_rate(what: &str, khz: u32) -> Result<()> {
    if LinkRate::from_khz(khz).is_none() {
        return Err(invalid(format!("{}: invalid max-link-rate {}", what, khz)));
    }
    Ok(())
}

impl PhyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lanes == 0 || self.lanes > 4 {
            return Err(invalid(format!("phy: invalid lanes {}", self.lanes)));
        }
        crate::drive::table_for(self.transceiver_type).map(|_| ())
    }
}

impl TxConfig {
    pub fn validate(&self) -> Result<()> {
        check_lanes("tx", self.max_lanes)?;
        check_link_rate("tx", self.max_link_rate)?;

        if !matches!(self.max_bpc, 8 | 10 | 12 | 16) {
            return Err(invalid(format!("tx: invalid max-bpc {}", self.max_bpc)));
        }
        if !matches!(self.bpc, 6 | 8 | 10 | 12 | 16) || self.bpc > self.max_bpc {
            return Err(invalid(format!("tx: invalid bpc {}", self.bpc)));
        }
        if self.aux_clock_hz < 1_000_000 {
            return Err(invalid(format!(
                "tx: invalid aux-clock-hz {}",
                self.aux_clock_hz
            )));
        }
        if self.aux_timeout_ms == 0 {
            return Err(invalid(String::from("tx: aux-timeout-ms must not be 0")));
        }
        Ok(())
    }
}

impl RxConfig {
    pub fn validate(&self) -> Result<()> {
        check_lanes("rx", self.max_lanes)?;
        check_link_rate("rx", self.max_link_rate)?;

        if self.axi_clock_hz < 1_000_000 {
            return Err(invalid(format!(
                "rx: invalid axi-clock-hz {}",
                self.axi_clock_hz
            )));
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Checks all values are in range.
    pub fn validate(&self) -> Result<()> {
        self.phy.validate()?;
        self.tx.validate()?;
        self.rx.validate()
    }

    /// Parses and validates configuration from JSON string.
    pub fn parse(s: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        config.validate()?;
        Ok(config)
    }
}

/// Reads configuration from `path`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let data = fs::read_to_string(path)?;
    PipelineConfig::parse(&data)
}

/// Returns the built-in configuration of the reference design.
pub fn default() -> Result<PipelineConfig> {
    let data = DATA_DIR
        .get_file("pipeline.json")
        .and_then(|f| f.contents_utf8())
        .ok_or(Error::from(ErrorKind::NotFound))?;
    PipelineConfig::parse(data)
}
