//! ESS control service entry point
//!
//! Startup sequence: open and reset the MK2/MK3 adapter, optionally switch
//! it to high speed, start the frame reader, select the VE.Bus device,
//! locate the ESS assistant, then run the meter poller and the regulation
//! loop until a shutdown signal or a fatal error ends the session.

use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use essrv::config::Args;
use essrv::control::controller;
use essrv::control::types::SharedMeasurement;
use essrv::error::{EssrvError, Result};
use essrv::meter::reader::MeterReader;
use essrv::meter::shelly::{Gen1Meter, Gen2Meter, PowerMeter};
use essrv::protocol::adapter::Mk2Adapter;
use essrv::protocol::client::Mk2Client;
use essrv::protocol::ess::EssAdapter;
use essrv::transport::serial::MkPort;
use essrv::wait_for_shutdown;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run_service(args).await {
        Ok(()) => info!("essrv finished"),
        Err(e) if e.is_cancellation() => info!("essrv finished"),
        Err(e) => {
            error!("essrv failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_service(args: Args) -> Result<()> {
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            info!("received shutdown signal");
            cancel.cancel();
        });
    }

    let mut port = MkPort::open(&args.serial_device)?;
    port.reset_adapter().await?;

    // The high-speed switch is undocumented MK3 behavior; --baud-low keeps
    // the line at 2400 for adapters that do not support it.
    if !args.baud_low {
        port.upgrade_high_speed().await?;
    }

    let client = Mk2Client::start(port.into_stream(), &cancel).await?;
    let adapter = Mk2Adapter::new(client);
    adapter.set_address(&cancel, args.ve_address).await?;

    let ess = EssAdapter::locate(adapter, &cancel).await?;

    let shared = SharedMeasurement::new();
    let meter_task = match args.meter_gen {
        1 => spawn_meter(Gen1Meter::new(&args.meter_host), shared.clone(), &cancel),
        _ => spawn_meter(Gen2Meter::new(&args.meter_host), shared.clone(), &cancel),
    };

    let control_result = controller::run(args.control_settings(), &ess, &shared, &cancel).await;
    cancel.cancel();

    let meter_result = meter_task
        .await
        .unwrap_or_else(|e| Err(EssrvError::io(format!("meter task panicked: {e}"))));

    // The controller error wins; a meter failure (retries exhausted) ends
    // the session through cancellation and surfaces here.
    control_result?;
    meter_result
}

/// Run the meter poller in the background. A fatal meter error cancels the
/// whole session so the controller falls back to setpoint 0 and exits.
fn spawn_meter<M: PowerMeter + 'static>(
    meter: M,
    shared: SharedMeasurement,
    cancel: &CancellationToken,
) -> JoinHandle<Result<()>> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let reader = MeterReader::new(meter, shared);
        let result = reader.run(&cancel).await;
        if let Err(ref e) = result {
            error!("meter reader failed: {e}");
            cancel.cancel();
        }
        result
    })
}
