use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Throughput counters for the capture and classification loops.
#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    classified_cycles: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            classified_cycles: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_classified(&self) {
        self.classified_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_classified(&self) -> u64 {
        self.classified_cycles.swap(0, Ordering::Relaxed)
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(10));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captured = METER.get_reset_captured();
            let classified = METER.get_reset_classified();
            let elapsed = start.elapsed().as_secs_f32();

            if captured > 0 {
                log::info!("Captured frames per second: {:.2}", captured as f32 / elapsed);
            }
            if classified > 0 {
                log::info!("Classification cycles completed: {classified}");
            }
        }
    })
}
