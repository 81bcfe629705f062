// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Userspace I/O (UIO) register access.
//!
//! The pipeline IP blocks are exposed by the kernel `uio_pdrv_genirq` driver. The first memory
//! map of the device is the register file and the device node itself delivers interrupts: a read
//! of 4 bytes blocks until the next interrupt and returns the total interrupt count, writing
//! `1u32` re-enables the interrupt.

use std::{
    ffi::c_void,
    fs::{File, OpenOptions},
    io::{self, Error, ErrorKind, Read, Result, Write},
    num::NonZeroUsize,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    time::Duration,
};

use log::{debug, warn};
use nix::sys::{
    mman::{self, MapFlags, ProtFlags},
    select, time,
};

use crate::regs::Registers;

/// Mapped UIO device.
///
/// # Examples
/// ```no_run
/// # use std::io;
/// use dptools::{find_device, regs::Registers, Kind};
///
/// # fn main() -> io::Result<()> {
/// if let Some(device) = find_device(Kind::DpTx)? {
///     let mut uio = device.open()?;
///     println!("DP TX core version {:#x}", uio.read(0xf8));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Uio {
    file: File,
    path: PathBuf,
    base: NonNull<c_void>,
    size: usize,
}

// The mapping is owned by this object and only accessed through `&mut self`.
unsafe impl Send for Uio {}

impl Uio {
    /// Opens UIO device node and maps `size` bytes of its first memory region.
    pub fn open<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let length = NonZeroUsize::new(size).ok_or(Error::from(ErrorKind::InvalidInput))?;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let base = unsafe {
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )?
        };
        let base = NonNull::new(base).ok_or(Error::from(ErrorKind::AddrNotAvailable))?;

        debug!("mapped {} bytes of {}", size, path.display());

        Ok(Self {
            file,
            path,
            base,
            size,
        })
    }

    /// Returns path to the device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns size of the mapped register file.
    pub fn size(&self) -> usize {
        self.size
    }

    fn register(&self, offset: u32) -> Option<*mut u32> {
        let offset = offset as usize;
        if offset % 4 != 0 || offset + 4 > self.size {
            warn!(
                "{}: register offset {:#x} outside of the mapping",
                self.path.display(),
                offset
            );
            return None;
        }
        Some(unsafe { self.base.as_ptr().add(offset) as *mut u32 })
    }

    /// Re-enables the interrupt after it has been serviced.
    pub fn enable_interrupt(&mut self) -> Result<()> {
        self.file.write_all(&1u32.to_ne_bytes())
    }

    /// Waits for the next interrupt.
    ///
    /// * `duration` - Timeout how long to wait. Passing [None][`Option::None`] blocks forever.
    ///
    /// Returns total interrupt count reported by the kernel or `None` if the timeout expired.
    pub fn wait_interrupt(&mut self, duration: Option<Duration>) -> Result<Option<u32>> {
        let mut readfds = select::FdSet::new();
        readfds.insert(self.file.as_raw_fd());

        let mut tv: Option<time::TimeVal> = duration.map(|duration| {
            time::TimeVal::new(
                duration.as_secs().try_into().unwrap_or(i64::MAX as _),
                duration.subsec_micros().into(),
            )
        });
        let nfds = select::select(None, Some(&mut readfds), None, None, &mut tv)?;
        if nfds == 0 {
            return Ok(None);
        }

        let mut count = [0u8; 4];
        self.file.read_exact(&mut count)?;

        Ok(Some(u32::from_ne_bytes(count)))
    }
}

impl AsRawFd for Uio {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.file.as_raw_fd()
    }
}

impl Registers for Uio {
    fn read(&mut self, offset: u32) -> u32 {
        match self.register(offset) {
            Some(reg) => unsafe { ptr::read_volatile(reg) },
            None => u32::MAX,
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        if let Some(reg) = self.register(offset) {
            unsafe { ptr::write_volatile(reg, value) }
        }
    }
}

impl Drop for Uio {
    fn drop(&mut self) {
        if let Err(err) = unsafe { mman::munmap(self.base.as_ptr(), self.size) } {
            warn!("{}: failed to unmap registers: {}", self.path.display(), err);
        }
    }
}

/// Reads the size of memory map `index` of UIO device from sysfs.
pub fn map_size<P: AsRef<Path>>(syspath: P, index: usize) -> io::Result<usize> {
    let path = syspath
        .as_ref()
        .join(format!("maps/map{}/size", index));
    let size = std::fs::read_to_string(path)?;

    crate::util::parse_number::<usize>(size.trim()).ok_or(Error::from(ErrorKind::InvalidData))
}
