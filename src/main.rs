use srv6_pot::port::{RingPort, RX_RING_SIZE, TX_RING_SIZE};
use srv6_pot::settings;
use srv6_pot::{Result, Runtime};
use tracing::{info, Level};
use tracing_subscriber::fmt;

fn main() -> Result<()> {
    let settings = settings::load()?;

    let level = match settings.log_level.as_str() {
        "debug" => Level::DEBUG,
        "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = fmt::Subscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut runtime = Runtime::build(settings)?;

    // Reference driver: an in-memory ring pair stands in for the NIC
    // queue. A real deployment implements PacketRx/PacketTx over its
    // port and hands the halves to the runtime instead.
    let (_ingest, rx) = RingPort::with_capacity(RX_RING_SIZE);
    let (tx, _drain) = RingPort::with_capacity(TX_RING_SIZE);
    runtime.add_worker(rx, tx)?;

    info!("worker attached to ring port");
    runtime.execute()
}
