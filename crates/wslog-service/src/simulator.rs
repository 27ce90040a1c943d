//! Simulated console for running without hardware.
//!
//! Plays the part of the station's firmware against a [`MockStation`]:
//! a sensor broadcast every 48 seconds updates the live entry, and every
//! `read_period` minutes the entry is logged and a new one started.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wslog_core::{MockStation, Result, Sample, WindDirection};

/// Seconds between sensor broadcasts.
const SENSOR_INTERVAL: f64 = 48.0;
/// Seconds between station clock ticks.
const MINUTE: f64 = 60.0;
/// Rain gauge resolution in mm.
const RAIN_STEP: f64 = 0.3;

fn tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Slowly varying weather.
#[derive(Debug, Clone)]
struct Weather {
    rng: StdRng,
    temp_out: f64,
    hum_out: f64,
    pressure: f64,
    wind: f64,
    dir: u8,
    rain_ticks: u32,
}

impl Weather {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            temp_out: 12.0,
            hum_out: 70.0,
            pressure: 1003.0,
            wind: 2.0,
            dir: 8,
            rain_ticks: 0,
        }
    }

    fn step(&mut self) {
        self.temp_out = (self.temp_out + self.rng.random_range(-0.2_f64..0.2)).clamp(-20.0, 40.0);
        self.hum_out = (self.hum_out + self.rng.random_range(-1.0_f64..1.0)).clamp(20.0, 99.0);
        self.pressure = (self.pressure + self.rng.random_range(-0.1_f64..0.1)).clamp(960.0, 1050.0);
        self.wind = (self.wind + self.rng.random_range(-0.3_f64..0.3)).clamp(0.0, 20.0);
        if self.rng.random_bool(0.1) {
            self.dir = (self.dir + 1) % 16;
        }
        if self.hum_out > 90.0 && self.rng.random_bool(0.3) {
            self.rain_ticks += 1;
        }
    }

    fn sample(&self, delay: u8) -> Sample {
        Sample {
            delay: Some(delay),
            hum_in: Some(45),
            temp_in: Some(20.5),
            hum_out: Some(self.hum_out.round() as u8),
            temp_out: Some(tenths(self.temp_out)),
            abs_pressure: Some(tenths(self.pressure)),
            wind_ave: Some(tenths(self.wind)),
            wind_gust: Some(tenths(self.wind * 1.6)),
            wind_dir: WindDirection::new(self.dir),
            rain: Some(tenths(f64::from(self.rain_ticks) * RAIN_STEP)),
            ..Default::default()
        }
    }
}

/// Fill the console's log with `history` entries `read_period` minutes
/// apart, ending with a freshly started entry.
pub async fn prefill(mock: &MockStation, read_period: u8, history: usize) -> Result<()> {
    mock.set_read_period(read_period).await;
    let mut weather = Weather::new(0);
    for _ in 0..history {
        weather.step();
        mock.log_sample(&weather.sample(read_period)).await?;
    }
    mock.set_live(&weather.sample(0)).await
}

/// Run the console until `cancel` fires.
pub fn spawn(mock: Arc<MockStation>, read_period: u8, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now();
        let mut weather = Weather::new(1);
        let mut next_sensor = 10.0_f64;
        let mut next_minute = 30.0_f64;
        let mut minutes = 0u8;

        loop {
            let next = next_sensor.min(next_minute);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(start + Duration::from_secs_f64(next)) => {}
            }

            let result = if next_minute <= next_sensor {
                next_minute += MINUTE;
                minutes += 1;
                if minutes >= read_period {
                    minutes = 0;
                    debug!("simulator: logging entry");
                    mock.log_sample(&weather.sample(read_period)).await.map(|_| ())
                } else {
                    mock.set_live(&weather.sample(minutes)).await
                }
            } else {
                next_sensor += SENSOR_INTERVAL;
                weather.step();
                mock.set_live(&weather.sample(minutes)).await
            };
            if let Err(e) = result {
                warn!("simulator: {}", e);
            }
        }
    })
}
