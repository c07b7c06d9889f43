//! Standard sample sources
//!
//! The tracker ships four samplers: battery, environmental, location and
//! network quality. Each publishes on its own channel. A producer message is a
//! one-byte message kind followed by the sample body, and only sample kinds are
//! stored; status and request messages on the same channel are ignored.
//!
//! All sample bodies are little-endian and have a fixed size.

use crate::error::Result;
use crate::registry::{ChannelId, ProducerMessage, TypeRegistry};

/// Battery monitor channel
pub const POWER_CHANNEL: ChannelId = ChannelId("power");
/// Environmental sensor channel
pub const ENVIRONMENTAL_CHANNEL: ChannelId = ChannelId("environmental");
/// Location service channel
pub const LOCATION_CHANNEL: ChannelId = ChannelId("location");
/// Network quality channel
pub const NETWORK_CHANNEL: ChannelId = ChannelId("network");

/// Message kinds published by the standard producers
pub mod kind {
    /// Battery percentage sample response
    pub const BATTERY_PERCENTAGE_SAMPLE: u8 = 0x01;
    /// Battery percentage sample request
    pub const BATTERY_PERCENTAGE_REQUEST: u8 = 0x02;
    /// Environmental sensor sample response
    pub const SENSOR_SAMPLE: u8 = 0x11;
    /// Environmental sensor sample request
    pub const SENSOR_REQUEST: u8 = 0x12;
    /// GNSS fix
    pub const GNSS_DATA: u8 = 0x21;
    /// Location request derived from cellular or Wi-Fi data
    pub const CLOUD_REQUEST: u8 = 0x22;
    /// Location search started
    pub const SEARCH_STARTED: u8 = 0x23;
    /// Network quality sample response
    pub const QUALITY_SAMPLE: u8 = 0x31;
    /// Network connected notification
    pub const CONNECTED: u8 = 0x32;
}

fn read_f64(bytes: &[u8], at: usize) -> Option<f64> {
    let raw: [u8; 8] = bytes.get(at..at + 8)?.try_into().ok()?;
    Some(f64::from_le_bytes(raw))
}

fn read_i64(bytes: &[u8], at: usize) -> Option<i64> {
    let raw: [u8; 8] = bytes.get(at..at + 8)?.try_into().ok()?;
    Some(i64::from_le_bytes(raw))
}

fn read_i32(bytes: &[u8], at: usize) -> Option<i32> {
    let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(i32::from_le_bytes(raw))
}

fn message(kind: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(kind);
    out.extend_from_slice(&body);
    out
}

/// Split a message into its kind and body, requiring an exact body size
fn sample_body(msg: &[u8], accepted: &[u8], size: usize) -> Option<Vec<u8>> {
    let (&kind, body) = msg.split_first()?;
    if !accepted.contains(&kind) || body.len() != size {
        return None;
    }
    Some(body.to_vec())
}

/// Battery state of charge in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    pub percentage: f64,
}

impl BatterySample {
    pub const SIZE: usize = 8;

    /// Encode as a stored record
    pub fn to_record(&self) -> Vec<u8> {
        self.percentage.to_le_bytes().to_vec()
    }

    /// Decode a stored record
    pub fn from_record(record: &[u8]) -> Option<Self> {
        if record.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            percentage: read_f64(record, 0)?,
        })
    }

    /// Producer message carrying this sample
    pub fn to_message(&self) -> ProducerMessage {
        ProducerMessage::new(
            POWER_CHANNEL,
            message(kind::BATTERY_PERCENTAGE_SAMPLE, self.to_record()),
        )
    }
}

/// Temperature, pressure and humidity reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentalSample {
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
}

impl EnvironmentalSample {
    pub const SIZE: usize = 24;

    /// Encode as a stored record
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.temperature.to_le_bytes());
        out.extend_from_slice(&self.pressure.to_le_bytes());
        out.extend_from_slice(&self.humidity.to_le_bytes());
        out
    }

    /// Decode a stored record
    pub fn from_record(record: &[u8]) -> Option<Self> {
        if record.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            temperature: read_f64(record, 0)?,
            pressure: read_f64(record, 8)?,
            humidity: read_f64(record, 16)?,
        })
    }

    /// Producer message carrying this sample
    pub fn to_message(&self) -> ProducerMessage {
        ProducerMessage::new(
            ENVIRONMENTAL_CHANNEL,
            message(kind::SENSOR_SAMPLE, self.to_record()),
        )
    }
}

/// Position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl LocationSample {
    pub const SIZE: usize = 32;

    /// Encode as a stored record
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.latitude.to_le_bytes());
        out.extend_from_slice(&self.longitude.to_le_bytes());
        out.extend_from_slice(&self.accuracy.to_le_bytes());
        out.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        out
    }

    /// Decode a stored record
    pub fn from_record(record: &[u8]) -> Option<Self> {
        if record.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            latitude: read_f64(record, 0)?,
            longitude: read_f64(record, 8)?,
            accuracy: read_f64(record, 16)?,
            timestamp_ms: read_i64(record, 24)?,
        })
    }

    /// Producer message carrying this sample as a GNSS fix
    pub fn to_message(&self) -> ProducerMessage {
        ProducerMessage::new(LOCATION_CHANNEL, message(kind::GNSS_DATA, self.to_record()))
    }
}

/// Cellular link quality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkQualitySample {
    /// Reference signal received power in dBm
    pub rsrp: i32,
    /// Signal to noise ratio in dB
    pub snr: i32,
}

impl NetworkQualitySample {
    pub const SIZE: usize = 8;

    /// Encode as a stored record
    pub fn to_record(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.rsrp.to_le_bytes());
        out.extend_from_slice(&self.snr.to_le_bytes());
        out
    }

    /// Decode a stored record
    pub fn from_record(record: &[u8]) -> Option<Self> {
        if record.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            rsrp: read_i32(record, 0)?,
            snr: read_i32(record, 4)?,
        })
    }

    /// Producer message carrying this sample
    pub fn to_message(&self) -> ProducerMessage {
        ProducerMessage::new(NETWORK_CHANNEL, message(kind::QUALITY_SAMPLE, self.to_record()))
    }
}

fn extract_battery(msg: &[u8]) -> Option<Vec<u8>> {
    sample_body(msg, &[kind::BATTERY_PERCENTAGE_SAMPLE], BatterySample::SIZE)
}

fn extract_environmental(msg: &[u8]) -> Option<Vec<u8>> {
    sample_body(msg, &[kind::SENSOR_SAMPLE], EnvironmentalSample::SIZE)
}

fn extract_location(msg: &[u8]) -> Option<Vec<u8>> {
    sample_body(
        msg,
        &[kind::GNSS_DATA, kind::CLOUD_REQUEST],
        LocationSample::SIZE,
    )
}

fn extract_network(msg: &[u8]) -> Option<Vec<u8>> {
    sample_body(msg, &[kind::QUALITY_SAMPLE], NetworkQualitySample::SIZE)
}

/// Registry with the four standard types, in the order battery, environmental,
/// location, network
pub fn standard_registry(max_types: usize) -> Result<TypeRegistry> {
    TypeRegistry::builder(max_types)
        .register("battery", BatterySample::SIZE, POWER_CHANNEL, extract_battery)
        .register(
            "environmental",
            EnvironmentalSample::SIZE,
            ENVIRONMENTAL_CHANNEL,
            extract_environmental,
        )
        .register(
            "location",
            LocationSample::SIZE,
            LOCATION_CHANNEL,
            extract_location,
        )
        .register(
            "network",
            NetworkQualitySample::SIZE,
            NETWORK_CHANNEL,
            extract_network,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    #[test]
    fn test_standard_registry_layout() {
        let registry = standard_registry(8).unwrap();
        let layout: Vec<_> = registry
            .iter()
            .map(|t| (t.name.as_str(), t.record_size))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("battery", 8),
                ("environmental", 24),
                ("location", 32),
                ("network", 8)
            ]
        );
        assert!(standard_registry(3).is_err());
    }

    #[test]
    fn test_battery_extraction_filters_kind() {
        let registry = standard_registry(4).unwrap();
        let battery = registry.get(TypeId(0)).unwrap();

        let sample = BatterySample { percentage: 87.5 };
        let record = battery.extract(&sample.to_message().payload).unwrap();
        assert_eq!(BatterySample::from_record(&record), Some(sample));

        let request = [kind::BATTERY_PERCENTAGE_REQUEST];
        assert_eq!(battery.extract(&request), None);
    }

    #[test]
    fn test_location_accepts_gnss_and_cloud_request() {
        let registry = standard_registry(4).unwrap();
        let location = registry.by_name("location").unwrap();

        let fix = LocationSample {
            latitude: 63.43,
            longitude: 10.39,
            accuracy: 4.5,
            timestamp_ms: 1_700_000_000_000,
        };
        let mut cloud = vec![kind::CLOUD_REQUEST];
        cloud.extend_from_slice(&fix.to_record());

        assert!(location.extract(&fix.to_message().payload).is_some());
        assert!(location.extract(&cloud).is_some());
        assert_eq!(location.extract(&[kind::SEARCH_STARTED]), None);
    }

    #[test]
    fn test_sample_records_decode() {
        let env = EnvironmentalSample {
            temperature: 21.5,
            pressure: 101.3,
            humidity: 40.0,
        };
        assert_eq!(EnvironmentalSample::from_record(&env.to_record()), Some(env));

        let net = NetworkQualitySample { rsrp: -95, snr: 7 };
        assert_eq!(NetworkQualitySample::from_record(&net.to_record()), Some(net));
        assert_eq!(NetworkQualitySample::from_record(&[0; 4]), None);
    }
}
