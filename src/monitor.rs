// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Monitor pipeline devices appearing and disappearing.
//!
//! The UIO devices come and go when the FPGA is reprogrammed or the overlay carrying the pipeline
//! is (un)loaded.

use nix::sys::{select, time};
use std::io::Result;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crate::{Device, Kind};

/// Possible events the monitor can emit.
pub enum Event {
    /// Device has been added.
    Add(Device),
    /// Device has been removed.
    Remove(Device),
    /// Device has changes.
    Change(Device),
}

impl Event {
    /// Returns the device the event is about.
    pub fn device(&self) -> &Device {
        match self {
            Self::Add(device) | Self::Remove(device) | Self::Change(device) => device,
        }
    }
}

/// Monitors the `uio` subsystem for changes
pub struct Monitor {
    /// Internal reference to the udev monitor socket
    socket: udev::MonitorSocket,
    kind: Option<Kind>,
}

impl Monitor {
    fn new(socket: udev::MonitorSocket, kind: Option<Kind>) -> Self {
        Self { socket, kind }
    }

    /// Poll for a new event.
    ///
    /// * `duration` - Timeout how long to wait until the function returns. Passing
    ///                [None][`Option::None`] blocks forever.
    ///
    /// Returns `true` if there was an event, `false` otherwise.
    pub fn poll(&mut self, duration: Option<Duration>) -> Result<bool> {
        let mut readfds = select::FdSet::new();
        readfds.insert(self.socket.as_raw_fd());

        let mut tv: Option<time::TimeVal> = duration.map(|duration| {
            time::TimeVal::new(
                duration.as_secs().try_into().unwrap_or(i64::MAX as _),
                duration.subsec_micros().into(),
            )
        });
        let nfds = select::select(None, Some(&mut readfds), None, None, &mut tv)?;

        Ok(nfds > 0)
    }

    /// Returns mutable iterator over the events currently available.
    pub fn iter_mut(&mut self) -> &mut Self {
        self
    }
}

impl AsRawFd for Monitor {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Iterator for Monitor {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let e = self.socket.iter().next()?;

            let Some(device) = Device::parse(e.device()) else {
                continue;
            };
            if self.kind.is_some_and(|kind| kind != device.kind()) {
                continue;
            }

            match e.event_type() {
                udev::EventType::Add => return Some(Event::Add(device)),
                udev::EventType::Change => return Some(Event::Change(device)),
                udev::EventType::Remove => return Some(Event::Remove(device)),
                _ => continue,
            }
        }
    }
}

/// Builds a new `Monitor`.
///
/// # Examples
/// ```no_run
/// # use std::io;
/// use std::time::Duration;
/// use dptools::{monitor, Kind};
///
/// # fn main() -> io::Result<()> {
/// // Build up a monitor that only reports the DP RX subsystem.
/// let mut monitor = monitor::Builder::new()?.kind(Kind::DpRx).build()?;
///
/// if monitor.poll(Some(Duration::from_millis(500)))? {
///     for event in monitor.iter_mut() {
///         println!("{}", event.device().kernel_name());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Builder {
    builder: udev::MonitorBuilder,
    kind: Option<Kind>,
}

impl Builder {
    /// Creates a new Builder.
    ///
    /// By default all pipeline devices are getting notifications. This can be tuned by calling
    /// [kind][`Builder::kind`].
    pub fn new() -> Result<Self> {
        let builder = udev::MonitorBuilder::new()?.match_subsystem("uio")?;
        Ok(Self {
            builder,
            kind: None,
        })
    }

    /// Add filter for specific device type only.
    ///
    /// * `kind` - specifies which kind of device is going to get notifications
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Builds and returms the monitor.
    ///
    /// Consumes the `Builder`.
    pub fn build(self) -> Result<Monitor> {
        let socket = self.builder.listen()?;
        Ok(Monitor::new(socket, self.kind))
    }
}
