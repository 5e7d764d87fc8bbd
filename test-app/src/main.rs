// femlib test application -- CLI tool for exercising the protocol engine,
// the transports, and the cartridge tuning procedures against real
// hardware or the simulated cartridge.
//
// Usage:
//   femlib-test-app --gateway 192.168.1.100:2000 info
//   femlib-test-app --gateway 192.168.1.100:2000 --band 6 status
//   femlib-test-app --direct 192.168.1.50:2000 --band 6 power on
//   femlib-test-app --gateway 192.168.1.100:2000 --band 6 tune --lo 230.538
//   femlib-test-app --mock --band 6 tune --lo 230.538
//   femlib-test-app --gateway 192.168.1.100:2000 relay --listen 0.0.0.0:2000
//   femlib-test-app --mock bus-test --roundtrips 1000 --allow-writes
//   femlib-test-app list

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use femlib::cartridge::{bands, CartridgeBuilder, CartridgeController, CartridgeModel};
use femlib::proto::{points, Engine};
use femlib::transport::{connect, RelayServer, TransportConfig};
use femlib::{RetryPolicy, Transport};
use femlib_test_harness::{MockCartridge, SharedMockCartridge};


// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// femlib test application -- exercises the bus from the command line.
#[derive(Parser)]
#[command(name = "femlib-test-app", version, about)]
struct Cli {
    /// Ethernet/CAN gateway address (TCP, 36-byte envelopes).
    #[arg(long, conflicts_with_all = ["gateway_udp", "direct", "mock"])]
    gateway: Option<String>,

    /// Ethernet/CAN gateway address (UDP, 36-byte envelopes).
    #[arg(long = "gateway-udp", conflicts_with_all = ["direct", "mock"])]
    gateway_udp: Option<String>,

    /// Direct bus adapter address (UDP, 16-byte envelopes).
    #[arg(long, conflicts_with = "mock")]
    direct: Option<String>,

    /// Use the simulated cartridge instead of hardware.
    #[arg(long)]
    mock: bool,

    /// Bus node id of the controller to talk to.
    #[arg(long, default_value_t = 0x13)]
    node_id: u8,

    /// Cartridge band (3, 6, or 7).
    #[arg(long, default_value_t = 6)]
    band: u8,

    /// Reply timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print identity, temperatures, and supply readings.
    Info,

    /// Print the cartridge tuning state.
    Status,

    /// Enable or disable the cartridge's power distribution module.
    Power {
        /// "on" or "off".
        state: String,
    },

    /// Lock, trim, and bias the cartridge at an LO frequency.
    Tune {
        /// LO frequency in GHz.
        #[arg(long)]
        lo: f64,

        /// Target PLL correction voltage in volts.
        #[arg(long, default_value_t = 0.0)]
        fm_target: f32,

        /// Stop after the PLL is locked and trimmed.
        #[arg(long)]
        lock_only: bool,
    },

    /// Ramp everything to a safe idle.
    Zero,

    /// Run the demagnetize and deflux sequence.
    Deflux,

    /// Share one gateway connection among several clients.
    Relay {
        /// Address to accept relay clients on.
        #[arg(long, default_value = "0.0.0.0:2000")]
        listen: String,
    },

    /// Protocol soak test: latency, throughput, write verification.
    BusTest(bus_test::BusTestOptions),

    /// List the bands this build carries tables for.
    List,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::List => {
            for band in femlib::supported_bands() {
                let (lo, hi) = band.lo_range_ghz();
                println!(
                    "band {}: {:.1}-{:.1} GHz, multiplier {}, magnets: {}",
                    band.band,
                    lo,
                    hi,
                    band.total_multiplier(),
                    if band.has_magnets { "yes" } else { "no" }
                );
            }
            return Ok(());
        }
        Command::Relay { listen } => {
            let Some(upstream) = &cli.gateway else {
                bail!("relay requires --gateway <upstream address>");
            };
            let relay = RelayServer::bind(listen, upstream).await?;
            println!(
                "Relaying {} -> {} (gateway replies on {})",
                relay.local_addr(),
                upstream,
                relay.reply_addr()
            );
            relay.run().await?;
            return Ok(());
        }
        _ => {}
    }

    let transport = open_transport(&cli).await?;
    let timeout = Duration::from_millis(cli.timeout_ms);

    match cli.command {
        Command::Info => {
            let mut engine = Engine::with_policy(transport, timeout, RetryPolicy::default());
            info(&mut engine, cli.band).await
        }
        Command::BusTest(ref opts) => {
            let mut engine = Engine::with_policy(transport, timeout, RetryPolicy::default());
            bus_test::run(&mut engine, cli.band, opts).await
        }
        Command::Status => {
            let cartridge = build_cartridge(&cli, transport, timeout).await?;
            print_state(&cartridge);
            Ok(())
        }
        Command::Power { ref state } => {
            let mut cartridge = build_cartridge(&cli, transport, timeout).await?;
            let enable = match state.as_str() {
                "on" => true,
                "off" => false,
                other => bail!("expected \"on\" or \"off\", got {other:?}"),
            };
            cartridge.power(enable).await?;
            println!("band {} power {}", cli.band, state);
            Ok(())
        }
        Command::Tune {
            lo,
            fm_target,
            lock_only,
        } => {
            let mut cartridge = build_cartridge(&cli, transport, timeout).await?;
            cartridge.tune(lo, fm_target, lock_only).await?;
            print_state(&cartridge);
            Ok(())
        }
        Command::Zero => {
            let mut cartridge = build_cartridge(&cli, transport, timeout).await?;
            cartridge.zero().await?;
            println!("band {} zeroed", cli.band);
            Ok(())
        }
        Command::Deflux => {
            let mut cartridge = build_cartridge(&cli, transport, timeout).await?;
            cartridge.demagnetize_and_deflux().await?;
            println!("band {} defluxed", cli.band);
            Ok(())
        }
        Command::List | Command::Relay { .. } => unreachable!("handled above"),
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

async fn open_transport(cli: &Cli) -> Result<Box<dyn Transport>> {
    if cli.mock {
        let mut mock = MockCartridge::new(cli.band);
        // Enough simulated physics for tune and deflux to run end-to-end:
        // a PLL that locks anywhere, PA drive that pulls mixer current,
        // mixer heaters that warm and cool, and the PD module enabled.
        mock.set_lock(0, femlib::YTO_COARSE_MAX);
        mock.set_pa_response(50.0);
        mock.set_heater_profile(13.0, true);
        mock.set_register(points::pd_module_enable(cli.band)?, &[1, 0]);
        return Ok(Box::new(SharedMockCartridge::new(mock)));
    }

    let config = if let Some(addr) = &cli.gateway {
        TransportConfig::Gateway {
            addr: addr.clone(),
            node_id: cli.node_id,
        }
    } else if let Some(addr) = &cli.gateway_udp {
        TransportConfig::GatewayUdp {
            addr: addr.clone(),
            node_id: cli.node_id,
        }
    } else if let Some(addr) = &cli.direct {
        TransportConfig::Direct {
            addr: addr.clone(),
            node_id: cli.node_id,
        }
    } else {
        bail!("one of --gateway, --gateway-udp, --direct, or --mock is required");
    };
    Ok(connect(&config).await?)
}

fn model_for(band: u8) -> Result<CartridgeModel> {
    match band {
        3 => Ok(bands::band3()),
        6 => Ok(bands::band6()),
        7 => Ok(bands::band7()),
        other => bail!("no band tables for band {other}; try `list`"),
    }
}

async fn build_cartridge(
    cli: &Cli,
    transport: Box<dyn Transport>,
    timeout: Duration,
) -> Result<CartridgeController> {
    let cartridge = CartridgeBuilder::new(model_for(cli.band)?)
        .timeout(timeout)
        .build(transport)
        .await?;
    Ok(cartridge)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

async fn info(engine: &mut Engine, band: u8) -> Result<()> {
    let serial = engine.serial_number().await?;
    let (major, minor, patch) = engine.firmware_revision().await?;
    println!("serial:   {serial:02X?}");
    println!("firmware: {major}.{minor}.{patch}");

    for sensor in 0..=6u8 {
        match engine.cartridge_temperature(band, sensor).await {
            Ok(kelvin) => println!("temp {sensor}:   {kelvin:.2} K"),
            Err(e) => println!("temp {sensor}:   unavailable ({e})"),
        }
    }
    println!("PA 3V:    {:.2} V", engine.pa_supply_3v(band).await?);
    println!("PA 5V:    {:.2} V", engine.pa_supply_5v(band).await?);
    Ok(())
}

fn print_state(cartridge: &CartridgeController) {
    let state = cartridge.state();
    println!("band {}:", cartridge.model().band);
    println!("  LO:         {:.6} GHz", state.lo_ghz);
    println!("  locked:     {}", state.is_locked());
    println!("  YTO coarse: {}", state.yto_coarse);
    println!("  lock V:     {:.2}", state.pll_lock_voltage);
    println!("  corr V:     {:.2}", state.pll_correction_voltage);
    println!("  hot:        {}", state.hot);
    for i in 0..4 {
        println!(
            "  mixer {i}:    {:.3} mV commanded, {:.3} mV readback",
            state.sis_v_commanded[i], state.sis_v_readback[i]
        );
    }
}
