// List DisplayPort pipeline devices
//
// Copyright (C) 2026, The dptools Authors

use std::io::{self, IsTerminal};

use ansi_term::Colour::Cyan;
use ansi_term::Style;
use clap::Parser;

use dptools::{self, Device};

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "List DisplayPort pipeline devices", long_about = None)]
struct Args {
    /// Output suitable for scripting
    #[arg(short = 'S', long)]
    script: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn color_kind(device: &Device) -> String {
    let kind = device.kind().to_string();

    if io::stdout().is_terminal() {
        return Cyan.paint(kind).to_string();
    }

    kind
}

fn color_name(device: &Device) -> String {
    let name = device.kernel_name();

    if io::stdout().is_terminal() {
        return Style::new().bold().paint(name).to_string();
    }

    name
}

fn print_device(args: &Args, device: &Device) {
    if args.script {
        println!(
            "{},{},{},{},{}",
            device.kernel_name(),
            device.kind(),
            device.name(),
            device.version().unwrap_or_default(),
            device.map_size().map(|s| format!("{:#x}", s)).unwrap_or_default(),
        );
        return;
    }

    println!("{}: {} {}", color_name(device), color_kind(device), device.name());

    if args.verbose {
        if let Some(devnode) = device.devnode() {
            println!("  Device node: {}", devnode.display());
        }
        println!("  Sysfs path: {}", device.sysfs_path().display());
        if let Some(version) = device.version() {
            println!("  Version: {}", version);
        }
        if let Some(size) = device.map_size() {
            println!("  Register map: {:#x} bytes", size);
        }
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let devices = dptools::find_devices(None)?;

    if !args.script && devices.is_empty() {
        println!("No DisplayPort pipeline devices found");
        return Ok(());
    }

    if args.script {
        println!("device,type,name,version,map_size");
    }

    for (i, device) in devices.iter().enumerate() {
        print_device(&args, device);

        if !args.script && args.verbose && i < devices.len() - 1 {
            println!();
        }
    }

    Ok(())
}
