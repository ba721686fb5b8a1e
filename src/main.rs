use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{routing::get, Extension, Router};
use clap::Parser;
use env_logger::TimestampPrecision;
use signcam::{
    endpoints::{healthcheck, index, prediction, prediction_events, video_stream, AppState},
    meter::spawn_meter_logger,
    nn::{asl_alphabet_labels, Prediction, SignClassifier, DEFAULT_CONFIDENCE_THRESHOLD},
    pipeline::Pipeline,
    sensors::{spawn_capture, CaptureConfig},
    utils::ensure_model_file,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the browser view on
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Requested capture width
    #[clap(long, default_value_t = 813)]
    width: u32,

    /// Requested capture height
    #[clap(long, default_value_t = 396)]
    height: u32,

    /// Requested capture frame rate
    #[clap(long, default_value_t = 30)]
    fps: u32,

    /// Path of the ONNX classifier artifact
    #[clap(long, default_value = "models/asl_alphabet.onnx")]
    model: PathBuf,

    /// URL to fetch the model artifact from if it is not present locally
    #[clap(long)]
    model_url: Option<String>,

    /// Seconds between classification cycles
    #[clap(long, default_value_t = 5)]
    interval: u64,

    /// Minimum score required to report a label
    #[clap(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    min_confidence: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    let (latest_tx, latest_rx) = watch::channel(None);
    let (viewers_tx, _) = broadcast::channel(8);
    let (prediction_tx, _) = watch::channel(Prediction::default());
    let prediction_tx = Arc::new(prediction_tx);

    if let Some(url) = &args.model_url {
        if let Err(err) = ensure_model_file(&args.model, url).await {
            log::error!("{err:#}");
        }
    }

    match SignClassifier::load(&args.model, asl_alphabet_labels(), args.min_confidence) {
        Ok(classifier) => {
            log::info!("model ready: {}", args.model.display());
            let pipeline = Pipeline::new(
                classifier,
                latest_rx,
                Arc::clone(&prediction_tx),
                Duration::from_secs(args.interval),
                cancel.child_token(),
            );
            tokio::spawn(pipeline.run());
        }
        Err(err) => {
            log::error!("failed to load model, serving the viewfinder only: {err:#}");
        }
    }

    spawn_capture(
        CaptureConfig {
            device: args.device,
            resolution: (args.width, args.height),
            fps: args.fps,
        },
        latest_tx,
        viewers_tx.clone(),
        cancel.child_token(),
    );

    spawn_meter_logger();

    let state = Arc::new(AppState {
        frames: viewers_tx,
        prediction: prediction_tx,
    });
    let app = Router::new()
        .route("/", get(index))
        .route("/stream", get(video_stream))
        .route("/prediction", get(prediction))
        .route("/prediction_events", get(prediction_events))
        .route("/healthcheck", get(healthcheck))
        .layer(Extension(state));

    let addr: SocketAddr = args.address.parse()?;
    log::info!("serving on http://{addr}");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            log::info!("shutdown requested, cancelling scheduled work");
            cancel.cancel();
        }
    };

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
