// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! Video PHY controller register implementation of [`Transceiver`].
//!
//! The controller exposes the GT reset and status signals, the reference clock and PLL selection,
//! the TX driver settings and a DRP (dynamic reconfiguration port) bridge per channel and for the
//! common block. PLL dividers are computed here from the recorded reference clock and line rate
//! and written through DRP.

use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::time::Duration;

use log::{debug, trace};

use crate::genmask;
use crate::linkrate::{ChannelId, PllType, RefClkSrc};
use crate::phy::{Direction, Transceiver};
use crate::regs::Registers;
use crate::util;

const VERSION: u32 = 0x000;
const REF_CLK_SEL: u32 = 0x010;
const REF_CLK_SEL_QPLL0_SHIFT: u32 = 0;
const REF_CLK_SEL_QPLL1_SHIFT: u32 = 4;
const REF_CLK_SEL_CPLL_SHIFT: u32 = 8;
const REF_CLK_SEL_RX_DATA_SHIFT: u32 = 24;
const REF_CLK_SEL_RX_OUT_SHIFT: u32 = 26;
const REF_CLK_SEL_TX_DATA_SHIFT: u32 = 28;
const REF_CLK_SEL_TX_OUT_SHIFT: u32 = 30;
const PLL_RESET: u32 = 0x014;
const PLL_RESET_QPLL0: u32 = 1 << 4;
const PLL_RESET_QPLL1: u32 = 1 << 5;
const PLL_LOCK_STATUS: u32 = 0x018;
const PLL_LOCK_QPLL0: u32 = 1 << 16;
const PLL_LOCK_QPLL1: u32 = 1 << 17;
const TX_INIT: u32 = 0x01c;
const TX_INIT_STATUS: u32 = 0x020;
const RX_INIT: u32 = 0x024;
const RX_INIT_STATUS: u32 = 0x028;
const INIT_GT_RESET: u32 = 1 << 0;
const INIT_PLL_GT_RESET: u32 = 1 << 1;
const INIT_STATUS_RESET_DONE: u32 = 1 << 0;
const INIT_STATUS_PMA_RESET_DONE: u32 = 1 << 1;

const DRP_CONTROL_CH1: u32 = 0x040;
const DRP_STATUS_CH1: u32 = 0x050;
const DRP_CONTROL_COMMON: u32 = 0x060;
const DRP_STATUS_COMMON: u32 = 0x064;
const DRP_CONTROL_ADDR_MASK: u32 = genmask!(11, 0);
const DRP_CONTROL_EN: u32 = 1 << 12;
const DRP_CONTROL_WE: u32 = 1 << 13;
const DRP_CONTROL_DI_SHIFT: u32 = 16;
const DRP_STATUS_DO_MASK: u32 = genmask!(15, 0);
const DRP_STATUS_RDY: u32 = 1 << 16;
const DRP_STATUS_BUSY: u32 = 1 << 17;

const TX_DRIVER_CH12: u32 = 0x07c;
const TX_DRIVER_CH34: u32 = 0x080;
const TX_DRIVER_DIFFCTRL_MASK: u32 = genmask!(3, 0);
const TX_DRIVER_PRECURSOR_MASK: u32 = genmask!(15, 11);
const TX_DRIVER_PRECURSOR_SHIFT: u32 = 11;

const INTR_EN: u32 = 0x110;
const INTR_DIS: u32 = 0x114;
const INTR_STS: u32 = 0x11c;

const BUFGGT_TX_CTRL: u32 = 0x140;
const BUFGGT_RX_CTRL: u32 = 0x144;
const BUFGGT_RESET: u32 = 1 << 0;

mod drp_addr {
    pub const CPLL_FBDIV: u16 = 0x28;
    pub const CPLL_REFCLK_DIV: u16 = 0x2a;
    pub const RXOUT_DIV: u16 = 0x63;
    pub const RXCLK25: u16 = 0x6d;
    pub const TXCLK25: u16 = 0x7a;
    pub const TXOUT_DIV: u16 = 0x7c;
    pub const QPLL0_FBDIV: u16 = 0x14;
    pub const QPLL0_REFCLK_DIV: u16 = 0x18;
    pub const QPLL1_FBDIV: u16 = 0x94;
    pub const QPLL1_REFCLK_DIV: u16 = 0x98;
}

const WAIT_TRIES: usize = 100;
const WAIT_INTERVAL: Duration = Duration::from_millis(1);
const DRP_TRIES: usize = 100;
const DRP_INTERVAL: Duration = Duration::from_micros(10);

const CPLL_VCO_HZ: (u64, u64) = (2_000_000_000, 6_250_000_000);
const QPLL_VCO_HZ: (u64, u64) = (8_000_000_000, 13_000_000_000);
const OUT_DIVIDERS: [u64; 5] = [1, 2, 4, 8, 16];

/// CPLL divider settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CpllDividers {
    pub n1: u64,
    pub n2: u64,
    pub m: u64,
    pub d: u64,
}

/// Finds CPLL dividers generating `line_rate` from `refclk`.
///
/// `line_rate = refclk * N1 * N2 / M * 2 / D` where the VCO (`refclk * N1 * N2 / M`) must stay
/// between 2 and 6.25 GHz.
pub fn cpll_dividers(refclk: u64, line_rate: u64) -> Option<CpllDividers> {
    for m in [1, 2] {
        for n2 in 1..=5 {
            for n1 in [4, 5] {
                if (refclk * n1 * n2) % m != 0 {
                    continue;
                }
                let vco = refclk * n1 * n2 / m;
                if vco < CPLL_VCO_HZ.0 || vco > CPLL_VCO_HZ.1 {
                    continue;
                }
                for d in OUT_DIVIDERS {
                    if vco * 2 == line_rate * d {
                        return Some(CpllDividers { n1, n2, m, d });
                    }
                }
            }
        }
    }
    None
}

/// QPLL divider settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QpllDividers {
    pub n: u64,
    pub m: u64,
    pub d: u64,
}

/// Finds QPLL dividers generating `line_rate` from `refclk`.
///
/// `line_rate = refclk * N / M / D` with the VCO between 8 and 13 GHz.
pub fn qpll_dividers(refclk: u64, line_rate: u64) -> Option<QpllDividers> {
    for m in 1..=4 {
        for n in 16..=160 {
            if (refclk * n) % m != 0 {
                continue;
            }
            let vco = refclk * n / m;
            if vco < QPLL_VCO_HZ.0 || vco > QPLL_VCO_HZ.1 {
                continue;
            }
            for d in OUT_DIVIDERS {
                if vco == line_rate * d {
                    return Some(QpllDividers { n, m, d });
                }
            }
        }
    }
    None
}

fn encode_n2(n2: u64) -> u16 {
    match n2 {
        1 => 16,
        n => (n - 2) as u16,
    }
}

fn encode_m(m: u64) -> u16 {
    match m {
        1 => 16,
        m => (m - 2) as u16,
    }
}

fn encode_out_div(d: u64) -> u16 {
    d.trailing_zeros() as u16
}

fn members(ch: ChannelId) -> &'static [ChannelId] {
    match ch {
        ChannelId::Cha | ChannelId::Cmn0 | ChannelId::Cmn1 | ChannelId::Cmna => {
            &ChannelId::CHANNELS
        }
        _ => ch.expand(),
    }
}

fn channel_shift(ch: ChannelId) -> u32 {
    8 * (ch.number().unwrap_or(1) - 1)
}

fn sysclksel(pll: PllType) -> u32 {
    match pll {
        PllType::Cpll => 0,
        PllType::Qpll0 => 3,
        PllType::Qpll1 => 2,
    }
}

/// Video PHY controller.
pub struct Vphy<R: Registers> {
    regs: R,
    refclk_hz: HashMap<RefClkSrc, u64>,
    line_rate_hz: HashMap<ChannelId, u64>,
    qpll_src: RefClkSrc,
    cpll_src: RefClkSrc,
    tx_pll: PllType,
    rx_pll: PllType,
}

impl<R: Registers> Vphy<R> {
    pub fn new(regs: R) -> Self {
        Self {
            regs,
            refclk_hz: HashMap::new(),
            line_rate_hz: HashMap::new(),
            qpll_src: RefClkSrc::Onboard,
            cpll_src: RefClkSrc::Onboard,
            tx_pll: PllType::Cpll,
            rx_pll: PllType::Cpll,
        }
    }

    /// Returns the controller version register.
    pub fn version(&mut self) -> u32 {
        self.regs.read(VERSION)
    }

    pub fn registers(&mut self) -> &mut R {
        &mut self.regs
    }

    fn pll(&self, dir: Direction) -> PllType {
        match dir {
            Direction::Tx => self.tx_pll,
            Direction::Rx => self.rx_pll,
        }
    }

    fn drp_regs(ch: ChannelId) -> Result<(u32, u32)> {
        match (ch, ch.number()) {
            (_, Some(n)) => Ok((DRP_CONTROL_CH1 + 4 * (n - 1), DRP_STATUS_CH1 + 4 * (n - 1))),
            (ChannelId::Cmn0 | ChannelId::Cmn1, None) => {
                Ok((DRP_CONTROL_COMMON, DRP_STATUS_COMMON))
            }
            _ => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("no DRP port for {}", ch),
            )),
        }
    }

    fn drp_access(&mut self, ch: ChannelId, control: u32) -> Result<u32> {
        let (ctrl, status) = Self::drp_regs(ch)?;

        if self.regs.read(status) & DRP_STATUS_BUSY != 0 {
            return Err(Error::from(ErrorKind::ResourceBusy));
        }

        self.regs.write(ctrl, control);

        let regs = &mut self.regs;
        let mut value = 0;
        if !util::wait_for(DRP_TRIES, DRP_INTERVAL, || {
            value = regs.read(status);
            value & DRP_STATUS_RDY != 0
        }) {
            return Err(Error::new(ErrorKind::TimedOut, "DRP access timed out"));
        }

        Ok(value)
    }

    fn drp_update(&mut self, ch: ChannelId, addr: u16, mask: u16, value: u16) -> Result<()>
    where
        R: Send,
    {
        let old = self.drp_read(ch, addr)?;
        self.drp_write(ch, addr, (old & !mask) | (value & mask))
    }

    fn wait_status(&mut self, reg: u32, mask: u32, what: &str) -> Result<()> {
        let regs = &mut self.regs;
        if util::wait_for(WAIT_TRIES, WAIT_INTERVAL, || regs.read(reg) & mask == mask) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::TimedOut,
                format!("timed out waiting for {}", what),
            ))
        }
    }

    fn lock_mask(ch: ChannelId) -> u32 {
        match ch {
            ChannelId::Cmn0 => PLL_LOCK_QPLL0,
            ChannelId::Cmn1 => PLL_LOCK_QPLL1,
            ChannelId::Cmna => PLL_LOCK_QPLL0 | PLL_LOCK_QPLL1,
            _ => members(ch)
                .iter()
                .filter_map(|c| c.number())
                .fold(0, |mask, n| mask | 1 << (n - 1)),
        }
    }

    fn init_mask(ch: ChannelId, bits: u32) -> u32 {
        members(ch)
            .iter()
            .fold(0, |mask, c| mask | bits << channel_shift(*c))
    }

    fn program_cpll(&mut self, ch: ChannelId, refclk: u64, rate: u64, dir: Direction) -> Result<()>
    where
        R: Send,
    {
        let div = cpll_dividers(refclk, rate).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("no CPLL settings for {} Hz", rate),
            )
        })?;

        trace!("CPLL dividers {:?}", div);

        let fbdiv = encode_n2(div.n2) << 8 | if div.n1 == 5 { 1 << 7 } else { 0 };
        for c in members(ch) {
            self.drp_update(*c, drp_addr::CPLL_FBDIV, 0xff80, fbdiv)?;
            self.drp_update(*c, drp_addr::CPLL_REFCLK_DIV, 0xf800, encode_m(div.m) << 11)?;
        }

        self.program_out_div(ch, refclk, div.d, dir)
    }

    fn program_qpll(
        &mut self,
        ch: ChannelId,
        pll: PllType,
        refclk: u64,
        rate: u64,
        dir: Direction,
    ) -> Result<()>
    where
        R: Send,
    {
        let div = qpll_dividers(refclk, rate).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("no QPLL settings for {} Hz", rate),
            )
        })?;

        trace!("{} dividers {:?}", pll, div);

        let (common, fbdiv, refclk_div) = match pll {
            PllType::Qpll0 => (
                ChannelId::Cmn0,
                drp_addr::QPLL0_FBDIV,
                drp_addr::QPLL0_REFCLK_DIV,
            ),
            _ => (
                ChannelId::Cmn1,
                drp_addr::QPLL1_FBDIV,
                drp_addr::QPLL1_REFCLK_DIV,
            ),
        };
        self.drp_update(common, fbdiv, 0x00ff, (div.n - 2) as u16)?;
        self.drp_update(common, refclk_div, 0x0f80, encode_m(div.m) << 7)?;

        self.program_out_div(ch, refclk, div.d, dir)
    }

    fn program_out_div(&mut self, ch: ChannelId, refclk: u64, d: u64, dir: Direction) -> Result<()>
    where
        R: Send,
    {
        let clk25 = (refclk.div_ceil(25_000_000) - 1) as u16;

        for c in members(ch) {
            match dir {
                Direction::Tx => {
                    self.drp_update(*c, drp_addr::TXOUT_DIV, 0x0700, encode_out_div(d) << 8)?;
                    self.drp_update(*c, drp_addr::TXCLK25, 0xf800, clk25 << 11)?;
                }
                Direction::Rx => {
                    self.drp_update(*c, drp_addr::RXOUT_DIV, 0x0007, encode_out_div(d))?;
                    self.drp_update(*c, drp_addr::RXCLK25, 0x00f8, clk25 << 3)?;
                }
            }
        }

        Ok(())
    }

    fn tx_driver(ch: ChannelId) -> Option<(u32, u32)> {
        let n = ch.number()?;
        let reg = if n <= 2 { TX_DRIVER_CH12 } else { TX_DRIVER_CH34 };
        Some((reg, 16 * ((n - 1) % 2)))
    }
}

impl<R: Registers + Send> Transceiver for Vphy<R> {
    fn cfg_quad_ref_clk(&mut self, src: RefClkSrc, hz: u64) {
        self.refclk_hz.insert(src, hz);
    }

    fn cfg_line_rate(&mut self, ch: ChannelId, hz: u64) -> Result<()> {
        for c in ch.expand() {
            self.line_rate_hz.insert(*c, hz);
        }
        Ok(())
    }

    fn pll_initialize(
        &mut self,
        ch: ChannelId,
        qpll_src: RefClkSrc,
        cpll_src: RefClkSrc,
        tx_pll: PllType,
        rx_pll: PllType,
    ) -> Result<()> {
        debug!(
            "{}: TX {} RX {}, QPLL refclk {:?}, CPLL refclk {:?}",
            ch, tx_pll, rx_pll, qpll_src, cpll_src
        );

        let sel = qpll_src.selector() << REF_CLK_SEL_QPLL0_SHIFT
            | qpll_src.selector() << REF_CLK_SEL_QPLL1_SHIFT
            | cpll_src.selector() << REF_CLK_SEL_CPLL_SHIFT
            | sysclksel(rx_pll) << REF_CLK_SEL_RX_DATA_SHIFT
            | sysclksel(rx_pll) << REF_CLK_SEL_RX_OUT_SHIFT
            | sysclksel(tx_pll) << REF_CLK_SEL_TX_DATA_SHIFT
            | sysclksel(tx_pll) << REF_CLK_SEL_TX_OUT_SHIFT;
        self.regs.write(REF_CLK_SEL, sel);

        self.qpll_src = qpll_src;
        self.cpll_src = cpll_src;
        self.tx_pll = tx_pll;
        self.rx_pll = rx_pll;

        Ok(())
    }

    fn clk_initialize(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        let pll = self.pll(dir);
        let src = if pll == PllType::Cpll {
            self.cpll_src
        } else {
            self.qpll_src
        };
        let refclk = *self
            .refclk_hz
            .get(&src)
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "reference clock not set"))?;
        let rate = *self
            .line_rate_hz
            .get(&ch.expand()[0])
            .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "line rate not set"))?;

        match pll {
            PllType::Cpll => self.program_cpll(ch, refclk, rate, dir),
            PllType::Qpll0 | PllType::Qpll1 => self.program_qpll(ch, pll, refclk, rate, dir),
        }
    }

    fn reset_gt_pll(&mut self, ch: ChannelId, dir: Direction, hold: bool) {
        let init = match dir {
            Direction::Tx => TX_INIT,
            Direction::Rx => RX_INIT,
        };
        let gt_mask = Self::init_mask(ch, INIT_GT_RESET | INIT_PLL_GT_RESET);
        let pll_mask = match self.pll(dir) {
            PllType::Cpll => Self::lock_mask(ch),
            PllType::Qpll0 => PLL_RESET_QPLL0,
            PllType::Qpll1 => PLL_RESET_QPLL1,
        };

        if hold {
            self.regs.set(PLL_RESET, pll_mask);
            self.regs.set(init, gt_mask);
        } else {
            self.regs.clear(PLL_RESET, pll_mask);
            self.regs.clear(init, gt_mask);
        }
    }

    fn bufg_gt_reset(&mut self, dir: Direction, hold: bool) {
        let reg = match dir {
            Direction::Tx => BUFGGT_TX_CTRL,
            Direction::Rx => BUFGGT_RX_CTRL,
        };
        if hold {
            self.regs.set(reg, BUFGGT_RESET);
        } else {
            self.regs.clear(reg, BUFGGT_RESET);
        }
    }

    fn wait_for_pma_reset_done(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        let reg = match dir {
            Direction::Tx => TX_INIT_STATUS,
            Direction::Rx => RX_INIT_STATUS,
        };
        let mask = Self::init_mask(ch, INIT_STATUS_PMA_RESET_DONE);
        self.wait_status(reg, mask, "PMA reset done")
    }

    fn wait_for_pll_lock(&mut self, ch: ChannelId) -> Result<()> {
        let mask = Self::lock_mask(ch);
        self.wait_status(PLL_LOCK_STATUS, mask, "PLL lock")
    }

    fn wait_for_reset_done(&mut self, ch: ChannelId, dir: Direction) -> Result<()> {
        let reg = match dir {
            Direction::Tx => TX_INIT_STATUS,
            Direction::Rx => RX_INIT_STATUS,
        };
        let mask = Self::init_mask(ch, INIT_STATUS_RESET_DONE);
        self.wait_status(reg, mask, "reset done")
    }

    fn pll_locked(&mut self, ch: ChannelId) -> bool {
        let mask = Self::lock_mask(ch);
        self.regs.read(PLL_LOCK_STATUS) & mask == mask
    }

    fn drp_read(&mut self, ch: ChannelId, addr: u16) -> Result<u16> {
        let control = (addr as u32 & DRP_CONTROL_ADDR_MASK) | DRP_CONTROL_EN;
        let status = self.drp_access(ch, control)?;
        Ok((status & DRP_STATUS_DO_MASK) as u16)
    }

    fn drp_write(&mut self, ch: ChannelId, addr: u16, value: u16) -> Result<()> {
        let control = (addr as u32 & DRP_CONTROL_ADDR_MASK)
            | DRP_CONTROL_EN
            | DRP_CONTROL_WE
            | (value as u32) << DRP_CONTROL_DI_SHIFT;
        self.drp_access(ch, control).map(|_| ())
    }

    fn set_tx_pre_emphasis(&mut self, ch: ChannelId, code: u8) {
        if let Some((reg, half)) = Self::tx_driver(ch) {
            self.regs.update(
                reg,
                TX_DRIVER_PRECURSOR_MASK << half,
                (code as u32) << TX_DRIVER_PRECURSOR_SHIFT << half,
            );
        }
    }

    fn set_tx_diff_swing(&mut self, ch: ChannelId, code: u8) {
        if let Some((reg, half)) = Self::tx_driver(ch) {
            self.regs
                .update(reg, TX_DRIVER_DIFFCTRL_MASK << half, (code as u32) << half);
        }
    }

    fn intr_enable(&mut self, mask: u32) {
        self.regs.write(INTR_EN, mask);
    }

    fn intr_disable(&mut self, mask: u32) {
        self.regs.write(INTR_DIS, mask);
    }

    fn intr_status(&mut self) -> u32 {
        self.regs.read(INTR_STS)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regs::MemRegisters;

    const REFCLK: u64 = 270_000_000;

    fn ready() -> Vphy<MemRegisters> {
        let mut regs = MemRegisters::new();
        for n in 0..4 {
            regs.preset(DRP_STATUS_CH1 + 4 * n, DRP_STATUS_RDY);
        }
        regs.preset(DRP_STATUS_COMMON, DRP_STATUS_RDY);
        Vphy::new(regs)
    }

    #[test]
    fn cpll_settings() {
        for rate in [1_620_000_000, 2_700_000_000, 5_400_000_000, 8_100_000_000] {
            let d = cpll_dividers(REFCLK, rate).unwrap();
            let vco = REFCLK * d.n1 * d.n2 / d.m;
            assert!((2_000_000_000..=6_250_000_000).contains(&vco));
            assert_eq!(vco * 2 / d.d, rate);
        }
        assert_eq!(
            cpll_dividers(REFCLK, 8_100_000_000),
            Some(CpllDividers {
                n1: 5,
                n2: 3,
                m: 1,
                d: 1
            })
        );
    }

    #[test]
    fn qpll_settings() {
        for rate in [1_620_000_000, 2_700_000_000, 5_400_000_000, 8_100_000_000] {
            let d = qpll_dividers(REFCLK, rate).unwrap();
            let vco = REFCLK * d.n / d.m;
            assert!((8_000_000_000..=13_000_000_000).contains(&vco));
            assert_eq!(vco / d.d, rate);
        }
        assert!(qpll_dividers(REFCLK, 1_000_000).is_none());
    }

    #[test]
    fn tx_driver_fields() {
        let mut vphy = ready();

        vphy.set_tx_diff_swing(ChannelId::Ch2, 0x5);
        vphy.set_tx_pre_emphasis(ChannelId::Ch2, 0x16);
        vphy.set_tx_diff_swing(ChannelId::Ch3, 0xb);

        assert_eq!(vphy.registers().peek(TX_DRIVER_CH12), (0x16 << 11 | 0x5) << 16);
        assert_eq!(vphy.registers().peek(TX_DRIVER_CH34), 0xb);
    }

    #[test]
    fn drp_busy() {
        let mut vphy = ready();
        vphy.registers()
            .preset(DRP_STATUS_CH1, DRP_STATUS_RDY | DRP_STATUS_BUSY);
        vphy.registers().clear_writes();

        let err = vphy.drp_write(ChannelId::Ch1, 0x7a, 0x3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceBusy);
        assert!(vphy.registers().writes().is_empty());

        assert_eq!(
            vphy.drp_read(ChannelId::Cha, 0x7a).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn drp_write_encoding() {
        let mut vphy = ready();
        vphy.drp_write(ChannelId::Ch3, 0x85, 0xabcd).unwrap();
        assert_eq!(
            vphy.registers().writes_to(DRP_CONTROL_CH1 + 8),
            vec![0xabcd_0000 | DRP_CONTROL_WE | DRP_CONTROL_EN | 0x85]
        );
    }

    #[test]
    fn clk_initialize_cpll() {
        let mut vphy = ready();
        vphy.cfg_quad_ref_clk(RefClkSrc::Onboard, REFCLK);
        vphy.cfg_line_rate(ChannelId::Cha, 8_100_000_000).unwrap();
        vphy.pll_initialize(
            ChannelId::Cha,
            RefClkSrc::Onboard,
            RefClkSrc::Onboard,
            PllType::Cpll,
            PllType::Cpll,
        )
        .unwrap();
        vphy.clk_initialize(ChannelId::Cha, Direction::Tx).unwrap();

        // N2 = 3, N1 = 5, M = 1, D = 1
        let writes = vphy.registers().writes_to(DRP_CONTROL_CH1 + 4);
        let fbdiv = (0x0180u32 << DRP_CONTROL_DI_SHIFT)
            | DRP_CONTROL_WE
            | DRP_CONTROL_EN
            | drp_addr::CPLL_FBDIV as u32;
        assert!(writes.contains(&fbdiv));
        let refclk_div = (0x8000u32 << DRP_CONTROL_DI_SHIFT)
            | DRP_CONTROL_WE
            | DRP_CONTROL_EN
            | drp_addr::CPLL_REFCLK_DIV as u32;
        assert!(writes.contains(&refclk_div));
    }

    #[test]
    fn clk_initialize_requires_line_rate() {
        let mut vphy = ready();
        vphy.cfg_quad_ref_clk(RefClkSrc::Onboard, REFCLK);
        assert_eq!(
            vphy.clk_initialize(ChannelId::Cha, Direction::Rx)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn resets_and_waits() {
        let mut vphy = ready();

        vphy.reset_gt_pll(ChannelId::Cha, Direction::Tx, true);
        assert_eq!(vphy.registers().peek(TX_INIT), 0x0303_0303);
        assert_eq!(vphy.registers().peek(PLL_RESET), 0xf);
        vphy.reset_gt_pll(ChannelId::Cha, Direction::Tx, false);
        assert_eq!(vphy.registers().peek(TX_INIT), 0);
        assert_eq!(vphy.registers().peek(PLL_RESET), 0);

        vphy.registers().preset(TX_INIT_STATUS, 0x0303_0303);
        vphy.registers().preset(PLL_LOCK_STATUS, 0xf);
        vphy.wait_for_pma_reset_done(ChannelId::Cha, Direction::Tx)
            .unwrap();
        vphy.wait_for_reset_done(ChannelId::Cha, Direction::Tx)
            .unwrap();
        vphy.wait_for_pll_lock(ChannelId::Cha).unwrap();
        assert!(!vphy.pll_locked(ChannelId::Cmn1));
        assert_eq!(
            vphy.wait_for_pll_lock(ChannelId::Cmn1).unwrap_err().kind(),
            ErrorKind::TimedOut
        );
    }
}
