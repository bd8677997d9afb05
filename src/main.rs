//! gigecast: stream a GigE Vision camera to a live video track

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gigecast::capture::DeviceSession;
use gigecast::display::PreviewSink;
use gigecast::pipeline::{FramePipeline, RateGovernor};
use gigecast::sinks::{publisher_channel, run_publisher, SnapshotSink, StatsTrack};
use gigecast::transport::open_transport;
use gigecast::{CameraError, Config};

fn init_tracing() {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gigecast=debug")))
        .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn pin_to_core(core: usize) {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!("Could not query CPU cores, acquisition thread left unpinned");
        return;
    };
    match cores.into_iter().find(|c| c.id == core) {
        Some(id) if core_affinity::set_for_current(id) => info!("Acquisition pinned to core {}", core),
        _ => warn!("Could not pin acquisition to core {}", core),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    info!("gigecast launching...");

    let config_path = std::env::var_os("GIGECAST_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    gigecast::CONFIG.store(Arc::new(config.clone()));

    let transport = open_transport(&config.transport)?;
    let mut session = DeviceSession::open(
        transport,
        &config.capture.selector(),
        config.capture.session_options(),
    )?;

    let capture = &config.capture;
    if let Err(e) = session.configure(
        capture.width,
        capture.height,
        capture.pixel_format.clone(),
        capture.frame_rate,
    ) {
        if let CameraError::UnsupportedFormat(format) = &e {
            let offered: Vec<String> = session
                .advertised_formats()?
                .iter()
                .map(|f| f.to_string())
                .collect();
            error!("{} is not offered, the camera has: {}", format, offered.join(", "));
        }
        return Err(e.into());
    }
    session.start_acquisition()?;

    let governor = config.pipeline.target_fps.and_then(RateGovernor::from_fps);
    let mut pipeline = FramePipeline::new(capture.grab_timeout());
    if let Some(governor) = governor {
        pipeline = pipeline.with_governor(governor);
    }
    let stop = pipeline.stop_handle();

    let (snapshots, snapshot_trigger) = SnapshotSink::spawn(&config.snapshot.output_dir)?;
    pipeline.register(snapshots);

    let publisher = if config.publisher.enabled {
        let (sink, feed) = publisher_channel(config.publisher.queue_depth);
        pipeline.register(sink);
        let track = StatsTrack::new(config.publisher.track_name.clone());
        Some(tokio::spawn(run_publisher(feed, track, governor)))
    } else {
        None
    };

    let preview = if config.display.enabled {
        let (sink, reader) = PreviewSink::new(config.display.ring_size);
        pipeline.register(sink);
        Some(reader)
    } else {
        None
    };

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                stop.stop();
            }
        });
    }
    if config.snapshot.on_start {
        snapshot_trigger.request();
    }

    let pin_core = config.pipeline.pin_core;
    let acquisition = tokio::task::spawn_blocking(move || {
        if let Some(core) = pin_core {
            pin_to_core(core);
        }
        let result = pipeline.run(&mut session);
        (session, result)
    });

    match preview {
        #[cfg(feature = "viewer")]
        Some(reader) => {
            let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
            let mut viewer = gigecast::display::Sdl2Display::new(
                &sdl_context,
                config.display.width,
                config.display.height,
            )?;
            viewer.run(&sdl_context, reader, stop.clone(), snapshot_trigger.clone())?;
        }
        #[cfg(not(feature = "viewer"))]
        Some(_) => warn!("Preview enabled but built without the `viewer` feature"),
        None => {}
    }

    let (mut session, result) = acquisition
        .await
        .map_err(|e| eyre!("acquisition task failed: {}", e))?;
    match result {
        Ok(delivered) => info!("Delivered {} frames", delivered),
        Err(e) => error!("Acquisition ended with an error: {}", e),
    }

    session.stop_acquisition()?;
    let stats = session.stats();
    session.disconnect()?;

    if let Some(publisher) = publisher {
        let published = publisher.await?;
        info!("Published {} frames", published);
    }

    info!(
        delivered = stats.frames_delivered,
        dropped = stats.frames_dropped,
        timeouts = stats.timeouts,
        "Final FPS {:.1}",
        stats.fps
    );
    info!("gigecast shutting down");
    Ok(())
}
