// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

use lazy_static::lazy_static;

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::io::{self, Error, ErrorKind};
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::uio::{self, Uio};

lazy_static! {
    static ref UIO_RE: Regex = Regex::new(r"^uio(\d+)$").unwrap();
    static ref PHY_RE: Regex = Regex::new(r"(vid_phy|vphy)").unwrap();
    static ref TX_RE: Regex = Regex::new(r"dp_?tx").unwrap();
    static ref RX_RE: Regex = Regex::new(r"dp_?rx").unwrap();
}

/// Describes type of the pipeline block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Kind {
    /// Video PHY controller wrapping the GT transceivers.
    Phy,
    /// DisplayPort TX subsystem.
    DpTx,
    /// DisplayPort RX subsystem.
    DpRx,
    /// Device is not known.
    Unknown,
}

impl From<&str> for Kind {
    /// Classifies the block by its UIO name (`vid_phy_controller`, `v_dp_txss1`, `v_dp_rxss1`).
    fn from(s: &str) -> Self {
        if PHY_RE.is_match(s) {
            Self::Phy
        } else if TX_RE.is_match(s) {
            Self::DpTx
        } else if RX_RE.is_match(s) {
            Self::DpRx
        } else {
            Self::Unknown
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Phy => "vphy",
            Self::DpTx => "dp-tx",
            Self::DpRx => "dp-rx",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Represents one IP block of the DisplayPort pipeline exposed through UIO.
#[derive(Clone, Debug)]
pub struct Device {
    kernel_name: String,
    index: u32,
    name: String,
    kind: Kind,
    version: Option<String>,
    map_size: Option<usize>,
    devnode: Option<PathBuf>,
    syspath: PathBuf,
}

impl Device {
    /// Returns kernel name of the device (`uioN`).
    pub fn kernel_name(&self) -> String {
        self.kernel_name.clone()
    }

    /// Returns UIO index of the device.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns UIO name of the device.
    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// Returns type of the block.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns driver version string if available.
    pub fn version(&self) -> Option<String> {
        self.version.clone()
    }

    /// Returns size of the register map.
    pub fn map_size(&self) -> Option<usize> {
        self.map_size
    }

    /// Returns the device node (`/dev/uioN`).
    pub fn devnode(&self) -> Option<&Path> {
        self.devnode.as_deref()
    }

    /// Returns full `sysfs` path of the device.
    pub fn sysfs_path(&self) -> PathBuf {
        self.syspath.clone()
    }

    /// Maps the register file of the device.
    pub fn open(&self) -> io::Result<Uio> {
        let devnode = self.devnode().ok_or(Error::from(ErrorKind::NotFound))?;
        let size = match self.map_size {
            Some(size) => size,
            None => uio::map_size(&self.syspath, 0)?,
        };
        Uio::open(devnode, size)
    }

    pub(crate) fn parse(udev: udev::Device) -> Option<Self> {
        let kernel_name = String::from(udev.sysname().to_str()?);
        let caps = UIO_RE.captures(&kernel_name)?;
        let index = caps[1].parse().ok()?;

        let name = udev
            .attribute_value("name")
            .and_then(|n| n.to_str())
            .map(String::from)
            .unwrap_or_default();
        let kind = Kind::from(name.as_str());

        let version = udev
            .attribute_value("version")
            .and_then(|n| n.to_str())
            .map(String::from);
        let map_size = udev
            .attribute_value("maps/map0/size")
            .and_then(|n| n.to_str())
            .and_then(|n| crate::util::parse_number::<usize>(n.trim()));

        Some(Self {
            kernel_name,
            index,
            name,
            kind,
            version,
            map_size,
            devnode: udev.devnode().map(Path::to_path_buf),
            syspath: udev.syspath().to_path_buf(),
        })
    }
}

impl Eq for Device {}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Ord for Device {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for Device {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns all DisplayPort pipeline devices in the system.
///
/// If `kind` is given only devices of that type are returned. Devices are sorted PHY first, then
/// TX and RX.
///
/// # Examples
/// ```no_run
/// # use std::io;
/// use dptools::Kind;
///
/// # fn main() -> io::Result<()> {
/// for device in dptools::find_devices(Some(Kind::Phy))? {
///     println!("{} {}", device.kernel_name(), device.name());
/// }
/// # Ok(())
/// # }
/// ```
pub fn find_devices(kind: Option<Kind>) -> io::Result<Vec<Device>> {
    let mut enumerator = udev::Enumerator::new()?;

    enumerator.match_subsystem("uio")?;

    let mut devices = Vec::new();

    for udev in enumerator.scan_devices()? {
        if let Some(device) = Device::parse(udev) {
            if device.kind() == Kind::Unknown {
                continue;
            }
            if let Some(kind) = kind {
                if device.kind() != kind {
                    continue;
                }
            }
            devices.push(device);
        }
    }

    devices.sort();

    Ok(devices)
}

/// Find the first pipeline device of given type.
///
/// # Examples
/// ```no_run
/// # use std::io;
/// use dptools::Kind;
///
/// # fn main() -> io::Result<()> {
/// let device = dptools::find_device(Kind::DpRx)?;
/// assert!(device.is_some());
/// # Ok(())
/// # }
/// ```
pub fn find_device(kind: Kind) -> io::Result<Option<Device>> {
    Ok(find_devices(Some(kind))?.into_iter().next())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_from_uio_name() {
        assert_eq!(Kind::from("vid_phy_controller"), Kind::Phy);
        assert_eq!(Kind::from("v_dp_txss1"), Kind::DpTx);
        assert_eq!(Kind::from("v_dp_rxss1"), Kind::DpRx);
        assert_eq!(Kind::from("dp_tx"), Kind::DpTx);
        assert_eq!(Kind::from("gpio"), Kind::Unknown);
        assert_eq!(Kind::DpRx.to_string(), "dp-rx");
    }
}
