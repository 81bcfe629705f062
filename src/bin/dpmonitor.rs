// Monitor the DisplayPort RX subsystem
//
// Copyright (C) 2026, The dptools Authors

use std::io::{self, Error, ErrorKind, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use ansi_term::{
    Colour::{Green, Red, White, Yellow},
    Style,
};
use clap::Parser;
use log::warn;
use nix::unistd::Uid;

use dptools::{
    self,
    config::{self, PipelineConfig},
    monitor::{Builder, Event},
    phy::VideoPhy,
    regs::{MemRegisters, Registers},
    rx::{reg, Dispatch, DpRx, RxEvent},
    sim::SimGt,
    uio::Uio,
    util,
    vphy::Vphy,
    Kind,
};

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Monitor the DisplayPort RX subsystem", long_about = None)]
struct Args {
    /// Pipeline configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Replay a hotplug and video sequence against simulated hardware
    #[arg(long)]
    simulate: bool,
}

fn timestamp() -> String {
    match util::system_current_timestamp() {
        Ok(ts) => format!("{:6}.{:06}", ts.tv_sec(), ts.tv_usec()),
        Err(_) => String::from("     ?.??????"),
    }
}

fn color_event(event: RxEvent) -> String {
    let color = match event {
        RxEvent::Unplug | RxEvent::TrainingLost => Red,
        RxEvent::TrainingDone | RxEvent::ValidVideo => Green,
        RxEvent::NoVideo => Yellow,
        _ => White,
    };
    let event = format!("{:<18}", event.to_string());

    if io::stdout().is_terminal() {
        color.paint(event).to_string()
    } else {
        event
    }
}

fn bold(s: String) -> String {
    if io::stdout().is_terminal() {
        return Style::new().bold().paint(s).to_string();
    }
    s
}

fn dump_dispatch<R: Registers>(rx: &DpRx<R>, dispatch: &Dispatch) {
    print!("[{}] [{}] ", timestamp(), color_event(dispatch.event));

    if dispatch.handled {
        print!("{} → {}", dispatch.from, bold(dispatch.to.to_string()));
    } else {
        print!("ignored while {}", dispatch.from);
    }

    if dispatch.event == RxEvent::ValidVideo {
        if let Some(props) = rx.properties().filter(|_| rx.valid_stream()) {
            print!(
                ": {}x{}{} at {} Hz, {} {} bpc, {} MHz",
                props.width,
                props.height,
                if props.interlaced { "i" } else { "p" },
                props.frame_rate,
                props.color_format,
                props.bpc,
                props.clock_mhz
            );
        }
    }
    if dispatch.event == RxEvent::PowerState {
        print!(
            ": cable {}",
            if rx.cable_connected() { "powered" } else { "down" }
        );
    }

    println!();
}

fn dump_device_event(event: &Event) {
    let (action, color) = match event {
        Event::Add(_) => ("add", Green),
        Event::Remove(_) => ("remove", Red),
        Event::Change(_) => ("change", White),
    };
    let action = format!("{action:<18}");
    let action = if io::stdout().is_terminal() {
        color.paint(action).to_string()
    } else {
        action
    };
    let device = event.device();

    println!(
        "[{}] [{}] {} {} {}",
        timestamp(),
        action,
        bold(device.kernel_name()),
        device.kind(),
        device.name()
    );
}

fn load_config(args: &Args) -> io::Result<PipelineConfig> {
    match &args.config {
        Some(path) => config::load(path),
        None => config::default(),
    }
}

fn open_device(kind: Kind) -> io::Result<Uio> {
    match dptools::find_device(kind)? {
        Some(device) => device.open(),
        None => Err(Error::new(
            ErrorKind::NotFound,
            format!("no {} device found", kind),
        )),
    }
}

fn raise(rx: &mut DpRx<MemRegisters>, cause: u32) -> io::Result<()> {
    rx.registers().write(reg::INTR_CAUSE, cause);
    if let Some(dispatch) = rx.handle_interrupt()? {
        dump_dispatch(rx, &dispatch);
    }
    Ok(())
}

fn simulate(config: PipelineConfig) -> io::Result<()> {
    let phy = VideoPhy::new(Box::new(SimGt::new()), config.phy)?.into_handle();
    let mut rx = DpRx::new(MemRegisters::new(), config.rx, phy)?;

    rx.core_init()?;

    // 3840x2160 at 60 Hz over four HBR3 lanes.
    let regs = rx.registers();
    regs.write(reg::DPCD_LINK_BW_SET, 0x1e);
    regs.write(reg::DPCD_LANE_COUNT_SET, 4);
    regs.write(reg::DPCD_SET_POWER_STATE, reg::CABLE_POWER_UP);
    regs.write(reg::MSA_MVID, 594);
    regs.write(reg::MSA_NVID, 810);
    regs.write(reg::MSA_HRES, 3840);
    regs.write(reg::MSA_VHEIGHT, 2160);
    regs.write(reg::MSA_HTOTAL, 4400);
    regs.write(reg::MSA_VTOTAL, 2250);
    regs.write(reg::MSA_MISC0, 1 << 5);

    for cause in [
        reg::INTR_POWER_STATE,
        reg::INTR_TP1,
        reg::INTR_TRAINING_DONE,
        reg::INTR_VIDEO,
        reg::INTR_NO_VIDEO,
        reg::INTR_VIDEO,
        reg::INTR_TRAINING_LOST,
        reg::INTR_VIDEO,
        reg::INTR_UNPLUG,
    ] {
        // The dispatcher masks and unmasks causes as it goes, replay each one regardless.
        rx.registers().write(reg::INTR_MASK, 0);
        raise(&mut rx, cause)?;
    }

    if rx.unexpected_events() > 0 {
        println!("{} unexpected events", rx.unexpected_events());
    }

    Ok(())
}

fn monitor(config: PipelineConfig) -> io::Result<()> {
    let gt = Vphy::new(open_device(Kind::Phy)?);
    let phy = VideoPhy::new(Box::new(gt), config.phy)?.into_handle();
    let mut rx = DpRx::new(open_device(Kind::DpRx)?, config.rx, phy)?;
    let mut devices = Builder::new()?.build()?;

    rx.core_init()?;
    rx.registers().enable_interrupt()?;

    loop {
        if rx
            .registers()
            .wait_interrupt(Some(Duration::from_millis(500)))?
            .is_some()
        {
            match rx.handle_interrupt() {
                Ok(Some(dispatch)) => dump_dispatch(&rx, &dispatch),
                Ok(None) => (),
                Err(err) => warn!("RX interrupt handling failed: {}", err),
            }
            rx.registers().enable_interrupt()?;
        }

        if devices.poll(Some(Duration::ZERO))? {
            for event in devices.iter_mut() {
                dump_device_event(&event);
                if let Event::Remove(device) = &event {
                    if device.kind() == Kind::DpRx {
                        return Err(Error::new(ErrorKind::NotConnected, "DP RX removed"));
                    }
                }
            }
        }
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if !args.simulate && !Uid::current().is_root() {
        eprintln!("Error: register access requires root permissions");
        process::exit(1);
    }

    let result = load_config(&args).and_then(|config| {
        if args.simulate {
            simulate(config)
        } else {
            monitor(config)
        }
    });

    if let Err(err) = result {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
