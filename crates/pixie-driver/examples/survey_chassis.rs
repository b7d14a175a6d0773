//! List every Pixie-16 bridge in the chassis and the slot it reports
//!
//! Bridges are opened one at a time and closed again; no module is left
//! open afterwards.

use pixie_driver::backends::SysfsPlx;
use pixie_driver::{survey, CalibratedDelay, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let delay = CalibratedDelay::calibrate()?;
    let bridges = survey(&SysfsPlx::new(), &delay)?;

    println!("Found {} bridge(s):\n", bridges.len());
    for bridge in &bridges {
        println!("  #{:<2} {}  slot {}", bridge.index, bridge.location, bridge.slot);
    }
    Ok(())
}
