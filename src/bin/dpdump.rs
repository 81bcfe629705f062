// Dump DisplayPort sink DPCD registers
//
// Copyright (C) 2026, The dptools Authors

use std::io::{self, Error, ErrorKind, IsTerminal};
use std::path::PathBuf;
use std::process;

use ansi_term::Colour::{Cyan, Yellow};
use clap::Parser;
use nix::unistd::Uid;

use dptools::{
    self,
    aux::AuxChannel,
    config::{self, PipelineConfig},
    dpcd,
    linkrate::LinkRate,
    phy::VideoPhy,
    regs::Registers,
    sim::{SimGt, SimSink, SimTxCore},
    tx::DpTx,
    util,
    vphy::Vphy,
    Kind,
};

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Dump DisplayPort sink DPCD registers", long_about = None)]
struct Args {
    /// Pipeline configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run against simulated hardware
    #[arg(long)]
    simulate: bool,
    /// DPCD address to start from
    #[arg(value_parser = util::parse_dpcd_address, short, long, default_value = "0")]
    address: u32,
    /// Number of bytes to read
    #[arg(short = 'n', long, default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..=256))]
    count: u32,
    /// Verbose output, one register per line with its name
    #[arg(short, long)]
    verbose: bool,
}

fn color_name(name: &str) -> String {
    if io::stdout().is_terminal() {
        Yellow.bold().paint(name).to_string()
    } else {
        String::from(name)
    }
}

fn color_value(value: u8) -> String {
    let value = format!("0x{:02x}", value);

    if io::stdout().is_terminal() {
        Cyan.paint(value).to_string()
    } else {
        value
    }
}

fn dump_bytes(bytes: &[u8], address: u32) {
    let mut address = address;

    for chunk in bytes.chunks(8) {
        print!("0x{:05x} ", address);
        for byte in chunk {
            print!(" {}", color_value(*byte));
        }
        println!();
        address += chunk.len() as u32;
    }
}

fn dump_registers(bytes: &[u8], address: u32) {
    for (i, byte) in bytes.iter().enumerate() {
        let address = address + i as u32;
        print!("0x{:05x} {}", address, color_value(*byte));
        if let Some(name) = dpcd::register_name(address) {
            print!(" {}", color_name(name));
        }
        println!();
    }
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
    let (phy, regs): (VideoPhy, Box<dyn Registers>) = if args.simulate {
        let sink = SimSink::new(dpcd::DPCD_REV_14, LinkRate::Hbr3, 4);
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

    DpTx::new(regs, config.tx, phy.into_handle())
}

fn dump(args: &Args) -> io::Result<()> {
    if args.address + args.count > 0x100000 {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "range crosses the end of DPCD",
        ));
    }

    let config = match &args.config {
        Some(path) => config::load(path)?,
        None => config::default()?,
    };

    let mut tx = open_tx(args, config)?;

    if !tx.detect()? {
        return Err(Error::new(ErrorKind::NotConnected, "no sink connected"));
    }

    let mut bytes = vec![0; args.count as usize];
    tx.dpcd_read(args.address, &mut bytes)?;

    if args.verbose {
        dump_registers(&bytes, args.address);
    } else {
        dump_bytes(&bytes, args.address);
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if !args.simulate && !Uid::current().is_root() {
        eprintln!("Error: register access requires root permissions");
        process::exit(1);
    }

    dump(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        if e.kind() == ErrorKind::NotConnected {
            eprintln!("Check that the sink is connected and powered on");
        }
        process::exit(1);
    });
}
