//! HTTP endpoints of the browser view.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse,
    },
    Extension, Json,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;

use crate::{as_jpeg_stream_item, nn::Prediction};

/// State shared with the HTTP handlers.
pub struct AppState {
    pub frames: broadcast::Sender<Bytes>,
    pub prediction: Arc<watch::Sender<Prediction>>,
}

const INDEX_HTML: &str = r#"
<body>
<div class="container">
    <div class="row">
        <div class="col-lg-8 offset-lg-2">
            <h3 class="mt-5">Sign Alphabet Live Classification</h3>
            <p id="best-prediction">Label: Undeterminable  Confidence: 0.00</p>
            <img src="./stream" width="100%">
        </div>
    </div>
</div>
<script>
    const line = document.getElementById("best-prediction");
    new EventSource("./prediction_events").onmessage = (event) => {
        line.textContent = event.data;
    };
</script>
</body>
"#;

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Live viewfinder as an MJPEG multipart stream.
pub async fn video_stream(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let mut frames = state.frames.subscribe();
    let stream = async_stream::stream! {
        loop {
            match frames.recv().await {
                Ok(jpeg) => yield Ok::<_, Infallible>(as_jpeg_stream_item(&jpeg)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("viewer lagging, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        StreamBody::new(stream),
    )
}

/// Current best prediction.
pub async fn prediction(Extension(state): Extension<Arc<AppState>>) -> Json<Prediction> {
    Json(state.prediction.borrow().clone())
}

/// Publish-on-change stream of the formatted prediction line.
///
/// The current value is sent immediately so a fresh page renders without
/// waiting for the next cycle.
pub async fn prediction_events(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.prediction.subscribe())
        .map(|prediction| Ok(Event::default().data(prediction.to_string())));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
