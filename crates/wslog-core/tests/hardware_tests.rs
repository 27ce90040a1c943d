//! Hardware tests for wslog-core.
//!
//! These need a weather station plugged in over USB and should be run with:
//! ```
//! cargo test --package wslog-core --features usb --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set `WSLOG_STATION_TYPE` to `1080` or `3080` (default `1080`).

#![cfg(feature = "usb")]

use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wslog_core::{
    Acquisition, AcquisitionConfig, Station, StationStatus, StationType, SystemClock, UsbTransport,
};

fn station_type() -> StationType {
    env::var("WSLOG_STATION_TYPE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(StationType::Wh1080)
}

#[tokio::test]
#[ignore = "requires USB weather station"]
async fn test_read_fixed_block() {
    let transport = UsbTransport::open().expect("no weather station found");
    let mut station = Station::new(transport, station_type());

    let fixed = station.fixed_block(true).await.unwrap();
    println!("magic ok: {}", fixed.magic_ok());
    println!("read period: {:?}", fixed.read_period());
    println!("data count: {}", fixed.data_count());
    assert!(fixed.magic_ok());
}

#[tokio::test]
#[ignore = "requires USB weather station"]
async fn test_catch_up_last_hour() {
    let transport = UsbTransport::open().expect("no weather station found");
    let mut acq = Acquisition::new(
        transport,
        station_type(),
        AcquisitionConfig::default(),
        StationStatus::default(),
        Arc::new(SystemClock),
    );

    let since = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
    let since = time::PrimitiveDateTime::new(since.date(), since.time());
    let events = acq
        .synchronise(Some(since), &CancellationToken::new())
        .await
        .unwrap();
    println!("{} entries in the last hour", events.len());
    for event in events {
        println!("{}", serde_json::to_string(&event).unwrap());
    }
}
