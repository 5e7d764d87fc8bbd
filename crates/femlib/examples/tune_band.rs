//! Basic cartridge tuning example.
//!
//! Demonstrates connecting through an Ethernet/CAN gateway, powering a
//! band 6 cartridge, tuning it to a CO(2-1) line frequency, and reading
//! back the tuning state.
//!
//! # Requirements
//!
//! - A gateway reachable on the local network (adjust the address below)
//! - A band 6 cartridge installed and cold
//!
//! # Usage
//!
//! ```sh
//! cargo run -p femlib --example tune_band
//! ```

use femlib::cartridge::{bands, CartridgeBuilder};
use femlib::transport::GatewayTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Adjust these for your installation.
    let gateway = "192.168.1.100:2000";
    let node_id = 0x13;

    println!("Connecting to gateway at {gateway}...");
    let transport = GatewayTransport::connect_tcp(gateway, node_id).await?;

    let mut cartridge = CartridgeBuilder::new(bands::band6())
        .build(Box::new(transport))
        .await?;

    println!("Powering band {}...", cartridge.model().band);
    cartridge.power(true).await?;

    // CO(2-1) redshifted to z ~ 0: LO at 230.538 GHz minus a 6 GHz IF.
    let lo_ghz = 224.538;
    println!("Tuning to {lo_ghz} GHz...");
    cartridge.tune(lo_ghz, 0.0, false).await?;

    let state = cartridge.state();
    println!("Locked: {}", state.is_locked());
    println!("YTO coarse: {}", state.yto_coarse);
    println!("Correction voltage: {:.2} V", state.pll_correction_voltage);
    for (i, (commanded, readback)) in state
        .sis_v_commanded
        .iter()
        .zip(state.sis_v_readback.iter())
        .enumerate()
    {
        println!("Mixer {i}: commanded {commanded:.3} mV, readback {readback:.3} mV");
    }

    cartridge.close().await?;
    Ok(())
}
