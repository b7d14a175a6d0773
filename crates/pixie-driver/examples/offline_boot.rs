//! Walk the full boot sequence without hardware
//!
//! Offline modules skip the FPGA and processor downloads but still load
//! the parameter file, so only that file has to exist.
//!
//! ```text
//! cargo run --example offline_boot -- configuration/default.set
//! ```

use anyhow::Context;
use pixie_driver::mock::MockPlx;
use pixie_driver::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let parameters = std::env::args()
        .nth(1)
        .context("usage: offline_boot <parameter file>")?;

    let plx = MockPlx::new();
    let config = SystemConfig::default().with_offline(true).with_offline_variant(4);
    let mut system = System::init(&plx, &[2, 3, 4, 5], config)?;

    let files = BootFiles {
        dsp_parameters: parameters.into(),
        ..BootFiles::default()
    };
    let all = system.module_count();
    system
        .boot_module(all, &files, BootPattern::FULL)
        .context("offline boot")?;

    for module in system.modules() {
        println!("module {} ({}): {:?}", module.number(), module.info(), module.boot_state());
    }
    println!("bridge calls made: {}", plx.call_count());
    system.exit()?;
    Ok(())
}
