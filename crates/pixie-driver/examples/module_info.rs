//! Open the modules in the given slots and print their identity
//!
//! ```text
//! cargo run --example module_info -- 2 3 5
//! PIXIE_OFFLINE=1 cargo run --example module_info -- 2 3
//! ```

use pixie_driver::{PixieError, Result, System, SystemConfig};
use tracing_subscriber::EnvFilter;

fn parse_slots() -> Result<Vec<u8>> {
    let slots = std::env::args()
        .skip(1)
        .map(|arg| {
            arg.parse::<u8>()
                .map_err(|e| PixieError::invalid_argument(format!("bad slot {arg:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    if slots.is_empty() {
        return Ok(vec![2]);
    }
    Ok(slots)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let slots = parse_slots()?;
    let config = SystemConfig::from_env();
    let system = System::init_sysfs(&slots, config)?;

    println!(
        "{} module(s){}:\n",
        system.module_count(),
        if system.is_offline() { " (offline)" } else { "" }
    );
    for module in system.modules() {
        println!("  module {}  slot {:<2}  {}", module.number(), module.slot(), module.info());
        if !module.is_offline() {
            println!("    CSR {:#06x}", module.read_csr()?);
        }
    }

    let state = system.module(0)?.boot_state();
    println!("\nmodule 0 boot state: {state:?}");
    system.exit()
}
