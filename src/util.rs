// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Miscellaneous utility functions.

use std::{io, str::FromStr, thread, time::Duration};

use lazy_static::lazy_static;
use nix::sys::time::TimeVal;
use nix::time::{clock_gettime, ClockId};
use num_traits::Num;
use regex::Regex;

use crate::linkrate::LinkRate;

/// Similar to kernel's `GENMASK()` macro.
///
/// # Examples
/// ```
/// use dptools::genmask_t;
///
/// const VERSION_MAJOR_MASK: u32 = genmask_t!(u32, 31, 24);
/// const LANE_SET_PE_MASK: u8 = genmask_t!(u8, 4, 3);
///
/// assert_eq!(VERSION_MAJOR_MASK, 0xff000000);
/// assert_eq!(LANE_SET_PE_MASK, 0x18);
/// ```
#[macro_export]
macro_rules! genmask_t {
    ($t:ty, $high:expr, $low:expr) => {{
        <$t>::MAX - (1 << $low) + 1 & (<$t>::MAX >> (<$t>::BITS - 1 - $high))
    }};
}

/// Same as [`genmask_t`] for `u32` registers.
///
/// # Examples
/// ```
/// use dptools::genmask;
///
/// assert_eq!(genmask!(15, 11), 0xf800);
/// ```
#[macro_export]
macro_rules! genmask {
    ($high:expr, $low:expr) => {{
        $crate::genmask_t!(u32, $high, $low)
    }};
}

/// Parse hexadecimal from string.
///
/// Assumes the string is hexadecimal and converts it to a number if possible, or `None` if no such
/// conversion is possible.
///
/// # Examples
/// ```
/// use dptools::util;
///
/// if let Some(number) = util::parse_hex::<u32>("0x202") {
///     assert_eq!(number, 0x202);
/// }
/// ```
pub fn parse_hex<T: Num + FromStr>(s: &str) -> Option<T> {
    let val = match s.strip_prefix("0x") {
        Some(s) => s,
        None => s,
    };

    <T>::from_str_radix(val, 16).ok()
}

/// Parse any number hexadecimal or not.
///
/// Parses numeric string into binary regardless whether it is in hexadecimal format or not. If
/// conversion is not possible returns `None`.
///
/// # Examples
/// ```
/// use dptools::util;
///
/// assert_eq!(util::parse_number::<u32>("8100"), Some(8100));
/// assert_eq!(util::parse_number::<u32>("0x1e"), Some(0x1e));
/// ```
pub fn parse_number<T: Num + FromStr>(s: &str) -> Option<T> {
    // Try to match decimal digits first and if that matches use standard
    // functions to parse it.
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^\d+$").unwrap();
    }
    if RE.is_match(s) {
        return s.parse::<T>().ok();
    }
    parse_hex(s)
}

/// Parses a DPCD address for the command line tools.
///
/// DPCD addresses are 20-bit. Returns [`Err`] if the string is not a number or is out of range.
pub fn parse_dpcd_address(s: &str) -> Result<u32, String> {
    match parse_number::<u32>(s) {
        Some(address) if address <= 0xfffff => Ok(address),
        _ => Err(String::from("Invalid DPCD address")),
    }
}

/// Parses a link rate for the command line tools.
///
/// Accepts the rate names (`rbr`, `hbr`, `hbr2`, `hbr3`) and the line rate in Mb/s.
///
/// # Examples
/// ```
/// use dptools::linkrate::LinkRate;
/// use dptools::util;
///
/// assert_eq!(util::parse_link_rate("HBR2"), Ok(LinkRate::Hbr2));
/// assert_eq!(util::parse_link_rate("1620"), Ok(LinkRate::Rbr));
/// ```
pub fn parse_link_rate(s: &str) -> Result<LinkRate, String> {
    let rate = match s.to_lowercase().as_str() {
        "rbr" => Some(LinkRate::Rbr),
        "hbr" => Some(LinkRate::Hbr),
        "hbr2" => Some(LinkRate::Hbr2),
        "hbr3" => Some(LinkRate::Hbr3),
        s => parse_number::<u32>(s).and_then(LinkRate::from_code),
    };
    rate.ok_or_else(|| String::from("Invalid link rate"))
}

/// Returns timestamp of now since system boot.
pub fn system_current_timestamp() -> io::Result<TimeVal> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC)?;

    Ok(TimeVal::new(now.tv_sec(), now.tv_nsec() / 1000))
}

/// Rounds `value` up to the next multiple of `multiple`.
///
/// # Examples
/// ```
/// use dptools::util;
///
/// assert_eq!(util::roundup(58, 5), 60);
/// assert_eq!(util::roundup(60, 5), 60);
/// ```
pub fn roundup(value: u32, multiple: u32) -> u32 {
    if multiple == 0 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

/// Polls `cond` up to `tries` times, sleeping `interval` between the checks.
///
/// Returns `true` as soon as `cond` returns `true` and `false` if it never did.
pub fn wait_for<F>(tries: usize, interval: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    for i in 0..tries {
        if cond() {
            return true;
        }
        if i + 1 < tries {
            thread::sleep(interval);
        }
    }
    false
}

/// Single bit `BIT` of a 32-bit register value.
///
/// # Examples
/// ```
/// use dptools::util;
/// type Hpd = util::RegBit<0>;
///
/// let reg = Hpd::set_bit(0, true);
/// assert_eq!(reg, 1);
/// assert!(Hpd::get_bit(reg));
/// ```
pub struct RegBit<const BIT: u32>;

impl<const BIT: u32> RegBit<BIT> {
    const MASK: u32 = 1u32 << BIT;

    pub fn get_bit(raw: u32) -> bool {
        raw & Self::MASK != 0
    }

    pub fn set_bit(raw: u32, value: bool) -> u32 {
        (!Self::MASK & raw) | if value { Self::MASK } else { 0 }
    }
}

/// Field spanning bits `HIGH:LOW` of a 32-bit register value.
///
/// Values wider than the field are truncated on write.
///
/// # Examples
/// ```
/// use dptools::util;
/// type Bpc = util::RegField<7, 5>;
///
/// let misc0 = Bpc::set_field(0x21, 2);
/// assert_eq!(misc0, 0x41);
/// assert_eq!(Bpc::get_field(misc0), 2);
/// ```
pub struct RegField<const HIGH: u32, const LOW: u32>;

impl<const HIGH: u32, const LOW: u32> RegField<HIGH, LOW> {
    const MASK: u32 = genmask_t!(u32, HIGH, LOW);
    const SHIFT: u32 = LOW;

    pub fn get_field(raw: u32) -> u32 {
        (raw & Self::MASK) >> Self::SHIFT
    }

    pub fn set_field(raw: u32, value: u32) -> u32 {
        (!Self::MASK & raw) | (Self::MASK & (value << Self::SHIFT))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genmask() {
        assert_eq!(genmask!(3, 0), 0xf);
        assert_eq!(genmask!(10, 6), 0x7c0);
        assert_eq!(genmask!(31, 31), 0x80000000);
        assert_eq!(genmask_t!(u8, 7, 6), 0xc0);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number::<u16>("1620"), Some(1620));
        assert_eq!(parse_number::<u8>("0x14"), Some(0x14));
        assert_eq!(parse_number::<u8>("zz"), None);
        assert_eq!(parse_dpcd_address("0x202"), Ok(0x202));
        assert!(parse_dpcd_address("0x100000").is_err());
        assert_eq!(parse_link_rate("8100"), Ok(LinkRate::Hbr3));
        assert!(parse_link_rate("hbr4").is_err());
        assert!(parse_link_rate("2000").is_err());
    }

    #[test]
    fn polling() {
        let mut count = 0;
        assert!(wait_for(5, Duration::from_micros(10), || {
            count += 1;
            count == 3
        }));
        assert_eq!(count, 3);

        count = 0;
        assert!(!wait_for(4, Duration::from_micros(10), || {
            count += 1;
            false
        }));
        assert_eq!(count, 4);
    }

    #[test]
    fn fields() {
        type Precursor = RegField<15, 11>;
        let reg = Precursor::set_field(0xffff_ffff, 0);
        assert_eq!(reg, 0xffff_07ff);
        assert_eq!(Precursor::get_field(0x7000), 0xe);
        assert!(!RegBit::<6>::get_bit(0x3f));
    }
}
