//! List the cameras reachable on the configured transport

use std::path::PathBuf;

use color_eyre::Result;

use gigecast::transport::open_transport;
use gigecast::utils::list_devices;
use gigecast::Config;

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("gigecast=info,list_cameras=info")
        .with_target(false)
        .init();

    let config_path = std::env::var_os("GIGECAST_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let mut transport = open_transport(&config.transport)?;
    let devices = list_devices(transport.as_mut())?;

    println!("Found {} camera(s):", devices.len());
    for (i, device) in devices.iter().enumerate() {
        println!("  [{}] {}", i, device);
        println!("      id: {}", device.transport_id);
    }
    Ok(())
}
