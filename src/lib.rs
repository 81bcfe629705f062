// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! This crate drives the [Xilinx DisplayPort video pipeline] from userspace. The pipeline consists
//! of a Video PHY controller wrapping the GT transceivers, a DisplayPort TX subsystem and a
//! DisplayPort RX subsystem. The IP blocks are accessed through the Linux UIO interface so the
//! library expects the blocks are bound to `uio_pdrv_genirq` or a similar driver.
//!
//! Most of the protocol code works on top of the [`regs::Registers`] trait, which makes it
//! possible to run it against the simulated hardware in [`sim`] as well.
//!
//! [Xilinx DisplayPort video pipeline]: https://docs.amd.com/r/en-US/pg299-v-dp-txss1

use include_dir::{Dir, include_dir};

mod device;

pub use device::*;

pub mod aux;
pub mod config;
pub mod dpcd;
pub mod drive;
pub mod linkrate;
pub mod monitor;
pub mod phy;
pub mod registry;
pub mod regs;
pub mod rx;
pub mod sim;
pub mod training;
pub mod tx;
pub mod uio;
pub mod util;
pub mod vphy;

pub(crate) static DATA_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/src/data");
