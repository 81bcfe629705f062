// Train the DisplayPort TX link
//
// Copyright (C) 2026, The dptools Authors

use std::io::{self, Error, ErrorKind, IsTerminal};
use std::path::PathBuf;
use std::process;

use ansi_term::Colour::{Green, Red, Yellow};
use ansi_term::Style;
use clap::{Parser, ValueEnum};
use csv::Writer;
use nix::unistd::Uid;

use dptools::{
    self,
    config::{self, PipelineConfig},
    dpcd,
    drive::{DriveSettings, VsLevel},
    linkrate::LinkRate,
    phy::VideoPhy,
    regs::Registers,
    sim::{Lock, SimGt, SimSink, SimTxCore},
    training::{TrainingReport, TrainingState},
    tx::{DpTx, VideoMode},
    util,
    vphy::Vphy,
    Kind,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// 1920x1080 at 60 Hz
    Fhd,
    /// 3840x2160 at 60 Hz
    Uhd,
}

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Train the DisplayPort TX link", long_about = None)]
struct Args {
    /// Pipeline configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run against simulated hardware
    #[arg(long)]
    simulate: bool,
    /// Maximum link rate (rbr, hbr, hbr2, hbr3 or rate in Mb/s)
    #[arg(value_parser = util::parse_link_rate, short, long)]
    rate: Option<LinkRate>,
    /// Maximum number of lanes
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=4))]
    lanes: Option<u8>,
    /// Video mode to train for
    #[arg(short, long, value_enum, default_value_t = Mode::Fhd)]
    mode: Mode,
    /// Output suitable for scripting
    #[arg(short = 'S', long)]
    script: bool,
}

fn color_state(state: TrainingState) -> String {
    let s = state.to_string();

    if !io::stdout().is_terminal() {
        return s;
    }

    match state {
        TrainingState::Trained => Green.bold().paint(s).to_string(),
        TrainingState::Failed => Red.bold().paint(s).to_string(),
        _ => Yellow.paint(s).to_string(),
    }
}

fn color_done(done: bool) -> String {
    let s = if done { "✔" } else { "✘" };

    if io::stdout().is_terminal() {
        if done {
            return Green.paint(s).to_string();
        }
        return Red.paint(s).to_string();
    }

    String::from(s)
}

fn bold(s: String) -> String {
    if io::stdout().is_terminal() {
        return Style::new().bold().paint(s).to_string();
    }
    s
}

fn dump_script(report: &TrainingReport) -> io::Result<()> {
    let mut writer = Writer::from_writer(io::stdout());

    for step in &report.steps {
        writer.serialize(step)?;
    }
    writer.flush()?;

    Ok(())
}

fn dump_report(report: &TrainingReport) {
    for attempt in 1..=report.attempts() {
        let Some(first) = report.steps.iter().find(|s| s.attempt == attempt) else {
            continue;
        };
        println!(
            "Attempt {}: {} x{}",
            bold(attempt.to_string()),
            first.link_rate,
            first.lanes
        );

        for phase in [
            TrainingState::ClockRecovery,
            TrainingState::ChannelEqualization,
        ] {
            let steps: Vec<_> = report.phase_steps(attempt, phase).collect();
            let Some(last) = steps.last() else {
                continue;
            };
            let done = match phase {
                TrainingState::ClockRecovery => {
                    report.steps.iter().any(|s| {
                        s.attempt == attempt && s.phase == TrainingState::ChannelEqualization
                    })
                }
                _ => report.rate.is_some() && attempt == report.attempts(),
            };

            println!("  {} {}", phase, color_done(done));
            for step in &steps {
                println!(
                    "    {:>2}: {} status {}",
                    step.iteration,
                    DriveSettings::new(step.vs, step.pe),
                    step.lane_status
                );
            }
            if !done {
                println!(
                    "    gave up after {} reads at {}",
                    steps.len(),
                    DriveSettings::new(last.vs, last.pe)
                );
            }
        }
    }

    print!("Result: {}", color_state(report.state));
    if let Some(rate) = report.rate {
        print!(" at {} x{}", rate, report.lanes);
    }
    println!();
}

fn open_device(kind: Kind) -> io::Result<dptools::uio::Uio> {
    match dptools::find_device(kind)? {
        Some(device) => device.open(),
        None => Err(Error::new(
            ErrorKind::NotFound,
            format!("no {} device found", kind),
        )),
    }
}

fn open_tx(args: &Args, config: PipelineConfig) -> io::Result<DpTx<Box<dyn Registers>>> {
    let (mut phy, regs): (VideoPhy, Box<dyn Registers>) = if args.simulate {
        let sink = SimSink::new(dpcd::DPCD_REV_14, LinkRate::Hbr3, 4)
            .cr(Lock::AtSwing(VsLevel::V1))
            .climbing();
        (
            VideoPhy::new(Box::new(SimGt::new()), config.phy)?,
            Box::new(SimTxCore::new(sink)),
        )
    } else {
        let gt = Vphy::new(open_device(Kind::Phy)?);
        (
            VideoPhy::new(Box::new(gt), config.phy)?,
            Box::new(open_device(Kind::DpTx)?),
        )
    };

    phy.init()?;

    DpTx::new(regs, config.tx, phy.into_handle())
}

fn train(args: &Args) -> io::Result<()> {
    let config = match &args.config {
        Some(path) => config::load(path)?,
        None => config::default()?,
    };

    let mut tx = open_tx(args, config)?;

    if !tx.detect()? {
        return Err(Error::new(ErrorKind::NotConnected, "no sink connected"));
    }
    tx.limit_link(args.rate, args.lanes)?;

    let mode = match args.mode {
        Mode::Fhd => VideoMode::FHD_60,
        Mode::Uhd => VideoMode::UHD_60,
    };
    tx.set_stream(&mode)?;

    let result = tx.enable();

    if let Some(report) = tx.last_report() {
        if args.script {
            dump_script(report)?;
        } else {
            dump_report(report);
        }
    }

    tx.shutdown();

    result.map(|_| ())
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if !args.simulate && !Uid::current().is_root() {
        eprintln!("Error: register access requires root permissions");
        process::exit(1);
    }

    if let Err(err) = train(&args) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
