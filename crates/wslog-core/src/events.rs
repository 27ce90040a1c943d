//! Acquisition events.
//!
//! The acquisition loop reports everything it observes as an
//! [`AcquisitionEvent`]. The collector appends logged readings to the raw
//! store and forwards events to dispatch targets.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use wslog_types::{Reading, Status};

use crate::clock::DriftMeasurement;

/// Which device clock a drift measurement refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Logging clock.
    Station,
    /// Sensor broadcast clock.
    Sensor,
}

/// Events emitted by the acquisition loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AcquisitionEvent {
    /// A sensor broadcast changed the live reading.
    Live { reading: Reading, ptr: u16 },
    /// The station completed a log entry.
    Logged { reading: Reading, ptr: u16 },
    /// The data pointer moved.
    NewPointer { old: u16, new: u16 },
    /// A clock drift measurement completed.
    DriftMeasured {
        clock: ClockKind,
        measurement: DriftMeasurement,
    },
    /// Status bits changed.
    StatusChanged { old: Status, new: Status },
    /// The station stopped advancing its pointer.
    NotLogging,
    /// The station resumed logging.
    LoggingResumed,
}

/// Sender half of the event channel.
pub type EventSender = mpsc::Sender<AcquisitionEvent>;

/// Receiver half of the event channel.
pub type EventReceiver = mpsc::Receiver<AcquisitionEvent>;

/// Create an event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use wslog_types::Sample;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = AcquisitionEvent::Logged {
            reading: Sample {
                delay: Some(5),
                temp_out: Some(12.5),
                ..Default::default()
            }
            .at(datetime!(2024-03-01 10:05:00)),
            ptr: 0x0120,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "logged");
        assert_eq!(json["ptr"], 0x0120);
        assert_eq!(json["reading"]["temp_out"], 12.5);

        let event = AcquisitionEvent::DriftMeasured {
            clock: ClockKind::Sensor,
            measurement: DriftMeasurement {
                measured: 1.5,
                average: 0.25,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"drift_measured\""));
        assert!(json.contains("\"clock\":\"sensor\""));
    }
}
