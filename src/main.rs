use std::sync::Arc;

use futures::future::join_all;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use mountctl::{
    CalibrationBridge, Config, Console, Heartbeat, Observatory, StellariumBridge, TracingSink,
    VERSION,
};

#[tokio::main]
async fn main() {
    let level = std::env::var("MOUNTCTL_LOG")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(%path, error = %e, "could not load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    info!(version = VERSION, "mountctl starting");

    let sink = Arc::new(TracingSink);
    let observatory = Observatory::new(&config, sink.clone(), sink);

    if let Err(e) = observatory.open_mount().await {
        warn!(error = %e, "continuing without mount");
    }
    if let Err(e) = observatory.open_focuser().await {
        warn!(error = %e, "continuing without focuser");
    }

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            ctrl_c.cancel();
        }
    });

    let heartbeat = Heartbeat::new(observatory.clone(), config.heartbeat.clone());
    let stellarium = StellariumBridge::new(observatory.clone(), config.stellarium.clone());
    let calibration = CalibrationBridge::new(observatory.clone(), config.calibration.clone());
    let console = Console::new(observatory.clone());

    let workers = vec![
        tokio::spawn(heartbeat.run(shutdown.clone())),
        tokio::spawn(stellarium.run(shutdown.clone())),
        tokio::spawn(calibration.run(shutdown.clone())),
        tokio::spawn(console.run(BufReader::new(tokio::io::stdin()), shutdown.clone())),
    ];

    for result in join_all(workers).await {
        if let Err(e) = result {
            error!(error = %e, "worker panicked");
        }
    }

    observatory.shutdown().await;
    info!("mountctl stopped");

    // a pending stdin read would otherwise hold the runtime open
    std::process::exit(0);
}
