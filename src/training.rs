// Xilinx DisplayPort pipeline tools
//
// Copyright (C) 2026, The dptools Authors

//! DisplayPort link training.
//!
//! Training runs in two phases. During clock recovery the source sends TPS1 and raises the voltage
//! swing as requested by the sink until every active lane reports CR done. Channel equalization
//! then sends the best pattern the sink supports (TPS2, TPS3 or TPS4) and follows the sink's drive
//! requests until the lanes are equalized, symbol locked and aligned.
//!
//! [`train_loop()`] repeats the training at lower link rates until it succeeds or there is no
//! lower rate left. Every status read is recorded as a [`TrainingStep`] so that the whole run can
//! be dumped afterwards.

use std::fmt::{self, Display};
use std::io::{Error, ErrorKind, Result};
use std::thread;

use log::{debug, info, warn};
use serde::Serialize;

use crate::aux::AuxChannel;
use crate::dpcd::{self, LinkStatus, TrainingPattern};
use crate::drive::{self, DriveSettings, PeLevel, VsLevel};
use crate::linkrate::LinkRate;
use crate::phy;
use crate::regs::Registers;
use crate::tx::{reg, DpTx, LinkMode};

/// Status reads with unchanged voltage swing before clock recovery gives up.
pub const MAX_CR_TRIES: usize = 5;
/// Status reads before channel equalization gives up.
pub const MAX_EQ_TRIES: usize = 8;

/// Where the training state machine is.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub enum TrainingState {
    #[default]
    Idle,
    ClockRecovery,
    ChannelEqualization,
    Trained,
    Failed,
}

impl Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ClockRecovery => "clock recovery",
            Self::ChannelEqualization => "channel equalization",
            Self::Trained => "trained",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One link status read during training.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TrainingStep {
    /// Training attempt, starting from 1. Each link rate is one attempt.
    pub attempt: usize,
    pub phase: TrainingState,
    pub link_rate: LinkRate,
    pub lanes: u8,
    /// Status read within the phase, starting from 1.
    pub iteration: usize,
    pub vs: VsLevel,
    pub pe: PeLevel,
    /// Raw link status bytes.
    pub lane_status: String,
}

/// Outcome of [`train_loop()`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TrainingReport {
    pub steps: Vec<TrainingStep>,
    pub state: TrainingState,
    /// Rate the link was trained at.
    pub rate: Option<LinkRate>,
    pub lanes: u8,
    /// Drive settings in use when training ended.
    pub settings: DriveSettings,
}

impl TrainingReport {
    /// Number of attempts made.
    pub fn attempts(&self) -> usize {
        self.steps.last().map_or(0, |s| s.attempt)
    }

    /// Returns the steps of `phase` in attempt `attempt`.
    pub fn phase_steps(
        &self,
        attempt: usize,
        phase: TrainingState,
    ) -> impl Iterator<Item = &TrainingStep> {
        self.steps
            .iter()
            .filter(move |s| s.attempt == attempt && s.phase == phase)
    }
}

fn clock_feedback(rate: LinkRate) -> u32 {
    match rate {
        LinkRate::Rbr => 0x1,
        LinkRate::Hbr => 0x3,
        LinkRate::Hbr2 | LinkRate::Hbr3 => 0x5,
    }
}

/// Trains the link once with a fixed rate and lane count.
pub struct LinkTrainer<'a, R: Registers> {
    tx: &'a mut DpTx<R>,
    link: LinkMode,
    attempt: usize,
    state: TrainingState,
    settings: DriveSettings,
    steps: Vec<TrainingStep>,
}

impl<'a, R: Registers> LinkTrainer<'a, R> {
    pub fn new(tx: &'a mut DpTx<R>, link: LinkMode, attempt: usize) -> Self {
        Self {
            tx,
            link,
            attempt,
            state: TrainingState::Idle,
            settings: DriveSettings::default(),
            steps: Vec::new(),
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn settings(&self) -> DriveSettings {
        self.settings
    }

    fn record(&mut self, iteration: usize, status: &LinkStatus) {
        debug!(
            "{} #{} at {} x{}, {}: {}",
            self.state, iteration, self.link.rate, self.link.lanes, self.settings, status
        );
        self.steps.push(TrainingStep {
            attempt: self.attempt,
            phase: self.state,
            link_rate: self.link.rate,
            lanes: self.link.lanes,
            iteration,
            vs: self.settings.vs,
            pe: self.settings.pe,
            lane_status: status.to_string(),
        });
    }

    /// Programs link rate and lane count to both ends and waits for the PHY.
    pub fn setup_link(&mut self) -> Result<()> {
        let LinkMode { rate, lanes, .. } = self.link;

        {
            let mut phy = phy::lock(self.tx.phy())?;
            if phy.tx_rate() != Some(rate) {
                phy.configure_tx(rate.code())?;
            }
        }

        self.tx.registers().write(reg::LANE_CNT_SET, lanes as u32);

        let mut lane_count = lanes;
        if self.tx.dpcd_readb(dpcd::MAX_LANE_COUNT)? & dpcd::ENHANCED_FRAME_CAP != 0 {
            self.tx.registers().write(reg::ENHANCED_FRAME_EN, 1);
            lane_count |= dpcd::LANE_COUNT_ENHANCED_FRAME_EN;
        }

        if self.tx.caps().downspread() {
            self.tx.registers().write(reg::DOWNSPREAD_CTL, 1);
            self.tx
                .dpcd_writeb(dpcd::DOWNSPREAD_CTRL, dpcd::SPREAD_AMP_0_5)?;
        } else {
            self.tx.registers().write(reg::DOWNSPREAD_CTL, 0);
            self.tx.dpcd_writeb(dpcd::DOWNSPREAD_CTRL, 0)?;
        }

        self.tx.dpcd_writeb(dpcd::LANE_COUNT_SET, lane_count)?;
        self.tx.dpcd_writeb(
            dpcd::MAIN_LINK_CHANNEL_CODING_SET,
            dpcd::CHANNEL_CODING_8B10B,
        )?;
        self.tx.dpcd_writeb(dpcd::LINK_BW_SET, rate.bw_code())?;

        self.tx
            .registers()
            .write(reg::LINK_BW_SET, rate.bw_code() as u32);
        self.tx
            .registers()
            .write(reg::PHY_CLOCK_FEEDBACK_SETTING, clock_feedback(rate));

        self.tx.phy_ready()
    }

    fn set_pattern(&mut self, pattern: TrainingPattern) -> Result<()> {
        let scrambler_off = pattern.disables_scrambler();

        self.tx
            .registers()
            .write(reg::TRAINING_PATTERN_SET, pattern.core_value());
        self.tx
            .registers()
            .write(reg::SCRAMBLING_DISABLE, scrambler_off as u32);

        let mut value = pattern.dpcd_value();
        if scrambler_off {
            value |= dpcd::LINK_SCRAMBLING_DISABLE;
        }

        let lane_set = self.settings.lane_set();
        let mut data = vec![value];
        data.extend(std::iter::repeat(lane_set).take(4));
        self.tx.dpcd_write(dpcd::TRAINING_PATTERN_SET, &data)
    }

    /// Applies `settings` to the core, the sink and the PHY.
    pub fn drive(&mut self, settings: DriveSettings) -> Result<()> {
        let settings = settings.clamp();

        self.tx.set_core_drive(settings);
        self.tx
            .dpcd_write(dpcd::TRAINING_LANE0_SET, &[settings.lane_set(); 4])?;
        phy::lock(self.tx.phy())?.adjust_drive(settings);

        self.settings = settings;
        Ok(())
    }

    /// Follows the adjustment requests of the sink in `status`.
    pub fn adjust(&mut self, status: &LinkStatus) -> Result<()> {
        let settings = drive::adjust(self.settings, drive::requests(status, self.link.lanes));
        self.drive(settings)
    }

    /// Runs clock recovery. Returns `true` if every lane recovered the clock.
    pub fn clock_recovery(&mut self) -> Result<bool> {
        self.state = TrainingState::ClockRecovery;
        self.settings = DriveSettings::default();

        self.tx.set_core_drive(self.settings);
        phy::lock(self.tx.phy())?.adjust_drive(self.settings);
        self.set_pattern(TrainingPattern::Tps1)?;

        let delay = self.tx.caps().cr_delay();
        let mut prev_vs = self.settings.vs;
        let mut same = 0;
        let mut iteration = 0;

        loop {
            thread::sleep(delay);

            iteration += 1;
            let status = self.tx.read_link_status()?;
            self.record(iteration, &status);

            if status.clock_recovery_ok(self.link.lanes) {
                debug!("clock recovery done after {} reads", iteration);
                return Ok(true);
            }

            if self.settings.vs == prev_vs {
                same += 1;
            } else {
                same = 0;
                prev_vs = self.settings.vs;
            }

            if same >= MAX_CR_TRIES {
                info!("clock recovery failed, swing stuck at {:?}", prev_vs);
                return Ok(false);
            }
            if self.settings.max_swing() {
                info!("clock recovery failed at maximum swing");
                return Ok(false);
            }

            self.adjust(&status)?;
        }
    }

    /// Runs channel equalization. Returns `true` if the lanes are equalized and aligned.
    pub fn channel_equalization(&mut self) -> Result<bool> {
        self.state = TrainingState::ChannelEqualization;

        let caps = *self.tx.caps();
        let pattern = caps.eq_pattern();
        debug!("channel equalization with {}", pattern);
        self.set_pattern(pattern)?;

        let delay = caps.eq_delay();
        for iteration in 1..=MAX_EQ_TRIES {
            thread::sleep(delay);

            let status = self.tx.read_link_status()?;
            self.record(iteration, &status);

            if status.channel_eq_ok(self.link.lanes) {
                debug!("channel equalization done after {} reads", iteration);
                return Ok(true);
            }

            // Requests may have changed since the status bits were sampled.
            let status = self.tx.read_link_status()?;
            self.adjust(&status)?;
        }

        info!("channel equalization failed");
        Ok(false)
    }

    /// Leaves training mode.
    pub fn complete(&mut self) -> Result<()> {
        if self.tx.caps().revision() >= dpcd::DPCD_REV_14 {
            match self.tx.dpcd_readb(dpcd::LANE_COUNT_SET) {
                Ok(value) => self.tx.dpcd_writeb(
                    dpcd::LANE_COUNT_SET,
                    value | dpcd::LANE_COUNT_POST_LT_ADJ_REQ_GRANTED,
                )?,
                Err(err) => info!("failed to read LANE_COUNT_SET: {}", err),
            }
        }

        self.tx.registers().write(reg::SCRAMBLING_DISABLE, 0);

        let status = self.tx.read_link_status()?;
        if !status.channel_eq_ok(self.link.lanes) {
            warn!("link degraded right after training: {}", status);
        }

        self.tx.registers().write(reg::TRAINING_PATTERN_SET, 0);
        self.tx
            .dpcd_writeb(dpcd::TRAINING_PATTERN_SET, TrainingPattern::Disabled.dpcd_value())?;
        self.tx.registers().write(reg::SCRAMBLING_DISABLE, 0);

        Ok(())
    }

    /// Trains the link once. Returns `true` if the link trained.
    pub fn attempt(&mut self) -> Result<bool> {
        self.setup_link()?;

        if !self.clock_recovery()? {
            self.state = TrainingState::Failed;
            return Ok(false);
        }
        if !self.channel_equalization()? {
            self.state = TrainingState::Failed;
            return Ok(false);
        }

        self.complete()?;
        self.state = TrainingState::Trained;

        info!(
            "link trained at {} x{}, {}",
            self.link.rate, self.link.lanes, self.settings
        );

        Ok(true)
    }

    /// Returns the recorded steps.
    pub fn into_steps(self) -> Vec<TrainingStep> {
        self.steps
    }
}

/// Trains the link for the configured mode, falling back to lower link rates.
///
/// Stops with [`ErrorKind::NotConnected`] if the sink goes away and with
/// [`ErrorKind::ConnectionAborted`] once training failed at the lowest rate. The report is stored
/// in the transmitter in any case.
pub fn train_loop<R: Registers>(tx: &mut DpTx<R>) -> Result<TrainingReport> {
    let mut link = tx
        .link_mode()
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "no video mode configured"))?;
    let mut report = TrainingReport::default();
    let mut attempt = 0;

    let result = loop {
        if !tx.is_connected() {
            break Err(Error::new(ErrorKind::NotConnected, "sink disconnected"));
        }
        if !tx.is_enabled() {
            break Err(Error::new(ErrorKind::Interrupted, "transmitter disabled"));
        }

        attempt += 1;
        let mut trainer = LinkTrainer::new(tx, link, attempt);
        let outcome = trainer.attempt();
        let settings = trainer.settings();
        report.steps.extend(trainer.into_steps());
        report.settings = settings;

        match outcome {
            Ok(true) => {
                report.rate = Some(link.rate);
                report.lanes = link.lanes;
                break Ok(());
            }
            Ok(false) => (),
            Err(err) if err.kind() == ErrorKind::NotConnected => break Err(err),
            Err(err) => warn!("training at {} failed: {}", link.rate, err),
        }

        match tx.mode_configure(link.pclock, Some(link.rate)) {
            Ok(lower) => {
                info!("retrying at {} x{}", lower.rate, lower.lanes);
                link = lower;
            }
            Err(_) => {
                break Err(Error::new(
                    ErrorKind::ConnectionAborted,
                    "link training failed",
                ))
            }
        }
    };

    report.state = if result.is_ok() {
        TrainingState::Trained
    } else {
        TrainingState::Failed
    };
    tx.set_report(report.clone());

    result.map(|_| report)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config;
    use crate::phy::VideoPhy;
    use crate::sim::{Lock, SimGt, SimSink, SimTxCore};
    use crate::tx::VideoMode;

    fn tx(sink: SimSink) -> DpTx<SimTxCore> {
        let mut config = config::default().unwrap();
        config.tx.power_on_delay_ms = 0;
        let phy = VideoPhy::new(Box::new(SimGt::new()), config.phy)
            .unwrap()
            .into_handle();
        let mut tx = DpTx::new(SimTxCore::new(sink), config.tx, phy).unwrap();
        assert!(tx.detect().unwrap());
        tx
    }

    #[test]
    fn trains_in_one_iteration() {
        let mut tx = tx(SimSink::new(dpcd::DPCD_REV_14, LinkRate::Hbr3, 4));
        tx.set_stream(&VideoMode::UHD_60).unwrap();

        let report = tx.enable().unwrap();
        assert_eq!(report.state, TrainingState::Trained);
        assert_eq!(report.rate, Some(LinkRate::Hbr3));
        assert_eq!(report.lanes, 4);
        assert_eq!(report.attempts(), 1);
        assert_eq!(report.phase_steps(1, TrainingState::ClockRecovery).count(), 1);
        assert_eq!(
            report
                .phase_steps(1, TrainingState::ChannelEqualization)
                .count(),
            1
        );

        let core = tx.registers().core();
        assert_eq!(core.peek(reg::LINK_BW_SET), 0x1e);
        assert_eq!(core.peek(reg::LANE_CNT_SET), 4);
        assert_eq!(core.peek(reg::ENHANCED_FRAME_EN), 1);
        assert_eq!(core.peek(reg::TRAINING_PATTERN_SET), 0);
        assert_eq!(core.peek(reg::SCRAMBLING_DISABLE), 0);
        assert_eq!(core.peek(reg::PHY_CLOCK_FEEDBACK_SETTING), 0x5);
        assert_eq!(core.peek(reg::ENABLE_MAIN_STREAM), 1);
        // TPS4 is scrambled.
        assert!(core.writes_to(reg::TRAINING_PATTERN_SET).contains(&4));
        assert_eq!(core.writes_to(reg::SCRAMBLING_DISABLE), vec![1, 0, 0, 0]);

        let sink = tx.registers().sink();
        assert_eq!(sink.dpcd(dpcd::LANE_COUNT_SET), 0x84 | 0x20);
        assert_eq!(sink.dpcd(dpcd::TRAINING_PATTERN_SET), 0);
        assert_eq!(sink.dpcd(dpcd::SET_POWER), dpcd::SET_POWER_D0);
        assert_eq!(tx.last_report(), Some(&report));
    }

    #[test]
    fn clock_recovery_gives_up_on_same_swing() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4)
            .cr(Lock::Never)
            .requesting(DriveSettings::default());
        let mut tx = tx(sink);
        tx.mode_configure(594_000, None).unwrap();
        let link = tx.link_mode().unwrap();
        tx.registers().sink_mut().reset_counters();

        let mut trainer = LinkTrainer::new(&mut tx, link, 1);
        trainer.setup_link().unwrap();
        assert!(!trainer.clock_recovery().unwrap());
        assert_eq!(trainer.into_steps().len(), MAX_CR_TRIES);
        assert_eq!(tx.registers().sink().status_reads(), MAX_CR_TRIES);
    }

    #[test]
    fn clock_recovery_stops_at_max_swing() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4)
            .cr(Lock::Never)
            .climbing();
        let mut tx = tx(sink);
        tx.mode_configure(594_000, None).unwrap();
        let link = tx.link_mode().unwrap();

        let mut trainer = LinkTrainer::new(&mut tx, link, 1);
        trainer.setup_link().unwrap();
        assert!(!trainer.clock_recovery().unwrap());
        assert_eq!(trainer.settings().vs, VsLevel::V3);

        let steps = trainer.into_steps();
        let swings: Vec<_> = steps.iter().map(|s| s.vs).collect();
        assert_eq!(
            swings,
            vec![VsLevel::V0, VsLevel::V1, VsLevel::V2, VsLevel::V3]
        );
    }

    #[test]
    fn clock_recovery_follows_requests() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4)
            .cr(Lock::AtSwing(VsLevel::V2))
            .climbing();
        let mut tx = tx(sink);
        tx.mode_configure(594_000, None).unwrap();
        let link = tx.link_mode().unwrap();

        let mut trainer = LinkTrainer::new(&mut tx, link, 1);
        trainer.setup_link().unwrap();
        assert!(trainer.clock_recovery().unwrap());
        assert_eq!(trainer.settings().vs, VsLevel::V2);

        let sink = tx.registers().sink();
        assert_eq!(
            sink.dpcd(dpcd::TRAINING_LANE0_SET),
            DriveSettings::new(VsLevel::V2, PeLevel::P0).lane_set()
        );
        assert_eq!(
            phy::lock(tx.phy()).unwrap().drive_settings().vs,
            VsLevel::V2
        );
    }

    #[test]
    fn channel_equalization_is_bounded() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4).eq(Lock::Never);
        let mut tx = tx(sink);
        tx.mode_configure(594_000, None).unwrap();
        let link = tx.link_mode().unwrap();

        let mut trainer = LinkTrainer::new(&mut tx, link, 1);
        trainer.setup_link().unwrap();
        assert!(trainer.clock_recovery().unwrap());
        assert!(!trainer.channel_equalization().unwrap());

        let steps = trainer.into_steps();
        assert_eq!(
            steps
                .iter()
                .filter(|s| s.phase == TrainingState::ChannelEqualization)
                .count(),
            MAX_EQ_TRIES
        );

        // TPS3 with scrambling disabled.
        let sink = tx.registers().sink();
        assert_eq!(sink.dpcd(dpcd::TRAINING_PATTERN_SET), 0x23);
        assert_eq!(tx.registers().core().peek(reg::SCRAMBLING_DISABLE), 1);
    }

    #[test]
    fn downshifts_to_lowest_rate() {
        let sink = SimSink::new(dpcd::DPCD_REV_14, LinkRate::Hbr3, 4)
            .cr(Lock::Never)
            .requesting(DriveSettings::default());
        let mut tx = tx(sink);
        tx.set_stream(&VideoMode::FHD_60).unwrap();
        tx.registers().sink_mut().reset_counters();

        let err = tx.enable().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionAborted);

        let report = tx.last_report().unwrap();
        assert_eq!(report.state, TrainingState::Failed);
        assert_eq!(report.attempts(), 4);
        assert_eq!(report.rate, None);

        let sink = tx.registers().sink();
        assert_eq!(sink.bw_writes(), &[0x1e, 0x14, 0x0a, 0x06]);
        assert_eq!(sink.status_reads(), 4 * MAX_CR_TRIES);
        assert_eq!(
            phy::lock(tx.phy()).unwrap().tx_rate(),
            Some(LinkRate::Rbr)
        );
    }

    #[test]
    fn downshifts_on_equalization_failure() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr3, 4).eq(Lock::Never);
        let mut tx = tx(sink);
        tx.set_stream(&VideoMode::FHD_60).unwrap();
        tx.registers().sink_mut().reset_counters();

        let err = tx.enable().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionAborted);

        let report = tx.last_report().unwrap();
        assert_eq!(report.attempts(), 4);
        for attempt in 1..=4 {
            assert_eq!(
                report.phase_steps(attempt, TrainingState::ClockRecovery).count(),
                1
            );
            assert_eq!(
                report
                    .phase_steps(attempt, TrainingState::ChannelEqualization)
                    .count(),
                MAX_EQ_TRIES
            );
        }
        assert_eq!(
            tx.registers().sink().bw_writes(),
            &[0x1e, 0x14, 0x0a, 0x06]
        );
    }

    #[test]
    fn trains_at_lower_rate() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr3, 4)
            .cr(Lock::AtRate(LinkRate::Hbr))
            .requesting(DriveSettings::default());
        let mut tx = tx(sink);
        tx.set_stream(&VideoMode::FHD_60).unwrap();

        let report = tx.enable().unwrap();
        assert_eq!(report.attempts(), 3);
        assert_eq!(report.rate, Some(LinkRate::Hbr));
        assert_eq!(report.lanes, 2);
        assert_eq!(tx.link_mode().unwrap().rate, LinkRate::Hbr);
    }

    #[test]
    fn stops_when_unplugged() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4);
        let mut tx = tx(sink);
        tx.set_stream(&VideoMode::FHD_60).unwrap();
        tx.connected_flag()
            .store(false, std::sync::atomic::Ordering::Release);

        assert_eq!(tx.enable().unwrap_err().kind(), ErrorKind::NotConnected);
        assert!(tx.last_report().is_none());
    }

    #[test]
    fn phy_not_ready() {
        let sink = SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4);
        let mut tx = tx(sink);
        tx.registers().set_phy_ready(false);
        tx.mode_configure(148_500, None).unwrap();
        let link = tx.link_mode().unwrap();

        let mut trainer = LinkTrainer::new(&mut tx, link, 1);
        assert_eq!(
            trainer.setup_link().unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(tx.registers().phy_status_reads(), 100);
    }

    #[test]
    fn requires_mode() {
        let mut tx = tx(SimSink::new(dpcd::DPCD_REV_12, LinkRate::Hbr2, 4));
        assert_eq!(tx.enable().unwrap_err().kind(), ErrorKind::InvalidInput);
    }
}
