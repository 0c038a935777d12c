//! microbit-link demonstration
//!
//! Runs the BLE service against a simulated micro:bit, or against a real board
//! over btleplug when `MICROBIT_ADDRESS` is set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use microbit_link::ble::{GattStack, SimulatedMicrobit};
use microbit_link::microbit::events::{camera, EventCategory, MicrobitEvent};
use microbit_link::microbit::requirements::DeviceRequirement;
use microbit_link::microbit::uuids::ES_MICROBIT_EVENT;
use microbit_link::{
    init_logging, ConnectedDevice, HostMessage, LinkConfig, MemoryDeviceStore, MicrobitLink,
    PairedDeviceStore,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

const SIMULATED_ADDRESS: &str = "E4:D1:2A:33:10:9C";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config_path = std::env::var("MICROBIT_LINK_CONFIG").ok().map(PathBuf::from);
    let config = LinkConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(config.log_level.as_deref());

    info!("🚀 Starting microbit-link demonstration...");

    match std::env::var("MICROBIT_ADDRESS") {
        Ok(address) => run_hardware(address, config).await,
        Err(_) => run_simulated(config).await,
    }
}

async fn run_simulated(mut config: LinkConfig) -> anyhow::Result<()> {
    info!("🧪 No MICROBIT_ADDRESS set, using a simulated micro:bit");
    config.just_paired_delay_ms = 0;

    let board = SimulatedMicrobit::new(SIMULATED_ADDRESS);
    board.push_requirement(DeviceRequirement::IncomingCall.record());
    board.push_requirement(DeviceRequirement::IncomingSms.record());

    let store = Arc::new(MemoryDeviceStore::new(Some(ConnectedDevice::new(
        "BBC micro:bit [zuvip]",
        "zuvip",
        SIMULATED_ADDRESS,
        0,
    ))));
    let stack: Arc<dyn GattStack> = Arc::new(board.clone());
    let (link, mut messages) = MicrobitLink::start(stack, store.clone(), config)?;

    link.connect(true)?;
    if !wait_for(&mut messages, |m| matches!(m, HostMessage::GattConnected { .. })).await {
        anyhow::bail!("simulated board never connected");
    }

    let shutter = MicrobitEvent::new(EventCategory::Camera, camera::TAKE_PHOTO);
    if board.notify(&ES_MICROBIT_EVENT, shutter.to_value().to_le_bytes().to_vec()) {
        wait_for(&mut messages, |m| matches!(m, HostMessage::ForwardEvent { .. })).await;
    } else {
        warn!("⚠️ Board event notifications are not enabled");
    }

    link.disconnect()?;
    wait_for(&mut messages, |m| matches!(m, HostMessage::GattDisconnected { .. })).await;

    if let Some(device) = store.load()? {
        info!("📟 Stored device: {:?}", device);
    }

    tokio::task::spawn_blocking(move || link.shutdown()).await?;
    info!("🎉 Demonstration completed");
    Ok(())
}

#[cfg(feature = "ble")]
async fn run_hardware(address: String, config: LinkConfig) -> anyhow::Result<()> {
    use microbit_link::ble::BtleplugStack;

    let stack = BtleplugStack::new(tokio::runtime::Handle::current()).await?;
    let stack: Arc<dyn GattStack> = Arc::new(stack);
    let (link, mut messages) = MicrobitLink::open(stack, config)?;

    if link.paired_device()?.is_none() {
        link.pair(&ConnectedDevice::new("BBC micro:bit", "", address.clone(), 0))?;
    }
    link.connect(false)?;

    info!("🔄 Listening for board events on {} (press Ctrl+C to stop)...", address);
    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => info!("📨 {:?}", message),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tokio::task::spawn_blocking(move || link.shutdown()).await?;
    Ok(())
}

#[cfg(not(feature = "ble"))]
async fn run_hardware(address: String, _config: LinkConfig) -> anyhow::Result<()> {
    anyhow::bail!("cannot reach {}: built without the \"ble\" feature", address)
}

/// Print host messages until one matches or nothing arrives for a while
async fn wait_for(
    messages: &mut UnboundedReceiver<HostMessage>,
    done: impl Fn(&HostMessage) -> bool,
) -> bool {
    loop {
        match tokio::time::timeout(Duration::from_secs(30), messages.recv()).await {
            Ok(Some(message)) => {
                info!("📨 {:?}", message);
                if done(&message) {
                    return true;
                }
            }
            Ok(None) => return false,
            Err(_) => {
                error!("❌ Timed out waiting for the service");
                return false;
            }
        }
    }
}
