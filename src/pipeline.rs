//! Fixed-interval classification cycles over the latest captured frame.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use bytes::Bytes;
use image::RgbImage;
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    meter::METER,
    nn::{InferModel, Prediction},
};

/// Capture-to-prediction loop with at most one cycle in flight.
pub struct Pipeline<M> {
    model: M,
    frames: watch::Receiver<Option<Bytes>>,
    prediction_tx: Arc<watch::Sender<Prediction>>,
    cycle_interval: Duration,
    cancel: CancellationToken,
}

impl<M: InferModel> Pipeline<M> {
    pub fn new(
        model: M,
        frames: watch::Receiver<Option<Bytes>>,
        prediction_tx: Arc<watch::Sender<Prediction>>,
        cycle_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            model,
            frames,
            prediction_tx,
            cycle_interval,
            cancel,
        }
    }

    /// Run cycles until cancelled.
    ///
    /// A single repeating timer drives the cycles; ticks that land while a
    /// cycle is still running are skipped, not queued. A failed cycle is
    /// logged and the next one is attempted on the following tick.
    pub async fn run(mut self) {
        let mut ticker = interval(self.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("classification loop stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.run_cycle() {
                log::warn!("classification cycle failed: {err:#}");
            }
        }
    }

    /// One cycle: latest frame, decode, classify, publish on change.
    fn run_cycle(&mut self) -> Result<()> {
        let frame = self.frames.borrow().clone();
        let jpeg = match frame {
            Some(jpeg) => jpeg,
            None => {
                log::debug!("no frame captured yet");
                return Ok(());
            }
        };

        let image: RgbImage =
            turbojpeg::decompress_image(&jpeg).context("failed to decode captured frame")?;
        let prediction = self.model.run(&image.into())?;
        METER.tick_classified();

        self.prediction_tx.send_if_modified(|current| {
            if *current == prediction {
                false
            } else {
                log::debug!("{prediction}");
                *current = prediction;
                true
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::anyhow;
    use image::{codecs::jpeg::JpegEncoder, ColorType, DynamicImage, Rgb, RgbImage};

    use super::*;

    struct FixedModel {
        prediction: Prediction,
    }

    impl InferModel for FixedModel {
        fn run(&self, _frame: &DynamicImage) -> Result<Prediction> {
            Ok(self.prediction.clone())
        }
    }

    struct FailingModel;

    impl InferModel for FailingModel {
        fn run(&self, _frame: &DynamicImage) -> Result<Prediction> {
            Err(anyhow!("inference exploded"))
        }
    }

    fn test_jpeg() -> Bytes {
        let frame = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new(&mut buf)
            .encode(&frame, 64, 64, ColorType::Rgb8)
            .unwrap();
        Bytes::from(buf.into_inner())
    }

    fn prediction_channel() -> Arc<watch::Sender<Prediction>> {
        let (tx, _rx) = watch::channel(Prediction::default());
        Arc::new(tx)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_predictions_on_change() {
        let (_frame_tx, frame_rx) = watch::channel(Some(test_jpeg()));
        let prediction_tx = prediction_channel();
        let cancel = CancellationToken::new();
        let expected = Prediction {
            label: "B".to_owned(),
            confidence: 0.9,
        };

        let pipeline = Pipeline::new(
            FixedModel {
                prediction: expected.clone(),
            },
            frame_rx,
            Arc::clone(&prediction_tx),
            Duration::from_secs(5),
            cancel.clone(),
        );

        let mut prediction_rx = prediction_tx.subscribe();
        let task = tokio::spawn(pipeline.run());

        tokio::time::timeout(Duration::from_secs(30), prediction_rx.changed())
            .await
            .expect("prediction should be published")
            .unwrap();
        assert_eq!(*prediction_rx.borrow(), expected);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_cycles_keep_the_loop_and_the_last_prediction() {
        let (_frame_tx, frame_rx) = watch::channel(Some(test_jpeg()));
        let prediction_tx = prediction_channel();
        let cancel = CancellationToken::new();

        let pipeline = Pipeline::new(
            FailingModel,
            frame_rx,
            Arc::clone(&prediction_tx),
            Duration::from_secs(5),
            cancel.clone(),
        );
        let task = tokio::spawn(pipeline.run());

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(*prediction_tx.borrow(), Prediction::default());
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_without_a_frame_publish_nothing() {
        let (frame_tx, frame_rx) = watch::channel(None);
        let prediction_tx = prediction_channel();
        let cancel = CancellationToken::new();
        let expected = Prediction {
            label: "space".to_owned(),
            confidence: 0.8,
        };

        let pipeline = Pipeline::new(
            FixedModel {
                prediction: expected.clone(),
            },
            frame_rx,
            Arc::clone(&prediction_tx),
            Duration::from_secs(5),
            cancel.clone(),
        );

        let mut prediction_rx = prediction_tx.subscribe();
        let task = tokio::spawn(pipeline.run());

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(*prediction_rx.borrow_and_update(), Prediction::default());

        frame_tx.send_replace(Some(test_jpeg()));
        tokio::time::timeout(Duration::from_secs(30), prediction_rx.changed())
            .await
            .expect("prediction should follow the first frame")
            .unwrap();
        assert_eq!(*prediction_rx.borrow(), expected);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_scheduled_cycles() {
        let (_frame_tx, frame_rx) = watch::channel(Some(test_jpeg()));
        let prediction_tx = prediction_channel();
        let cancel = CancellationToken::new();

        let pipeline = Pipeline::new(
            FixedModel {
                prediction: Prediction::default(),
            },
            frame_rx,
            prediction_tx,
            Duration::from_secs(5),
            cancel.clone(),
        );
        let task = tokio::spawn(pipeline.run());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should end on cancellation")
            .unwrap();
    }
}
