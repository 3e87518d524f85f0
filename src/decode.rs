use mac_address::MacAddress;
use serde_derive::Deserialize;
use thiserror::Error;

/// Shortest advertisement the relay is expected to forward. Anything below
/// this is a partial capture and is rejected before structure scanning.
pub const MIN_ADVERTISEMENT_BYTES: usize = 13;
/// Same minimum, in hex characters as they appear on the wire.
pub const MIN_ADVERTISEMENT_HEX: usize = MIN_ADVERTISEMENT_BYTES * 2;

// Top-level AD structure types we accept in a forwarded advertisement.
const AD_FLAGS: u8 = 0x01;
const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_NAME_SHORTENED: u8 = 0x08;
const AD_NAME_COMPLETE: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0a;
const AD_SERVICE_DATA_16: u8 = 0x16;
const AD_MANUFACTURER_DATA: u8 = 0xff;

/// 16-bit service UUID of the Xiaomi sensor broadcast.
const XIAOMI_SERVICE_UUID: u16 = 0xfe95;

// Sub-type catalog of the Xiaomi service frame. Values are little-endian.
const OBJ_TEMPERATURE: u8 = 0x04; // i16, tenths of a degree Celsius
const OBJ_HUMIDITY: u8 = 0x06; // u8, percent
const OBJ_BATTERY_PERCENT: u8 = 0x0a; // u8, percent
const OBJ_BATTERY_MILLIVOLTS: u8 = 0x0c; // u16, millivolts

/// Which vendor advertisement format a device broadcasts.
///
/// Adding a vendor means a new variant here and a decode function for it
/// in this module.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecoderVariant {
    #[default]
    Xiaomi,
}

/// Measurements carried by a single advertisement. Fields the frame did not
/// include stay unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub mac: MacAddress,
    pub rssi: i16,
    /// Frame counter from the vendor structure, used upstream to drop
    /// relay rebroadcasts of the same advertisement.
    pub frame_counter: Option<u8>,
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<u8>,
    /// Battery level in percent
    pub battery_percent: Option<u8>,
    /// Battery voltage in Volts
    pub battery_voltage: Option<f64>,
}

impl Measurement {
    fn empty(mac: MacAddress, rssi: i16) -> Self {
        Measurement {
            mac,
            rssi,
            frame_counter: None,
            temperature: None,
            humidity: None,
            battery_percent: None,
            battery_voltage: None,
        }
    }
}

/// Errors for advertisements that do not parse. All are recoverable; the
/// dispatcher counts them and moves on to the next detection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("advertisement is {0} bytes, below the {MIN_ADVERTISEMENT_BYTES}-byte minimum")]
    Truncated(usize),
    #[error("AD structure at offset {0} overruns the advertisement")]
    Overrun(usize),
    #[error("unrecognized AD structure type {0:#04x}")]
    UnknownAdType(u8),
    #[error("vendor frame shorter than its fixed header")]
    VendorFrameTruncated,
    #[error("vendor value width does not match sub-type {0:#04x}")]
    VendorValueWidth(u8),
    #[error("vendor frame address {0} does not match sender")]
    AddressMismatch(MacAddress),
}

/// Parse a hex string into bytes. Returns `None` for odd lengths or
/// non-hex characters.
pub fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Decode one advertisement payload from `sender` into a [`Measurement`].
///
/// Pure function: identical inputs always produce identical output. A
/// structurally valid advertisement that carries no recognized vendor
/// sub-type decodes to an empty measurement, which is not an error.
pub fn decode(
    variant: DecoderVariant,
    data: &[u8],
    sender: MacAddress,
    rssi: i16,
) -> Result<Measurement, DecodeError> {
    match variant {
        DecoderVariant::Xiaomi => decode_xiaomi(data, sender, rssi),
    }
}

fn decode_xiaomi(data: &[u8], sender: MacAddress, rssi: i16) -> Result<Measurement, DecodeError> {
    if data.len() < MIN_ADVERTISEMENT_BYTES {
        return Err(DecodeError::Truncated(data.len()));
    }

    let mut measurement = Measurement::empty(sender, rssi);
    let mut offset = 0;
    while offset < data.len() {
        let length = data[offset] as usize;
        let end = offset + 1 + length;
        // A zero length leaves no room for the type byte.
        if length == 0 || end > data.len() {
            return Err(DecodeError::Overrun(offset));
        }
        let ad_type = data[offset + 1];
        let payload = &data[offset + 2..end];
        match ad_type {
            AD_SERVICE_DATA_16 => decode_service_data(payload, sender, &mut measurement)?,
            AD_FLAGS | AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE | AD_NAME_SHORTENED
            | AD_NAME_COMPLETE | AD_TX_POWER | AD_MANUFACTURER_DATA => {}
            other => return Err(DecodeError::UnknownAdType(other)),
        }
        offset = end;
    }

    Ok(measurement)
}

/// Decode a service-data structure body (16-bit UUID followed by the
/// service payload). Service data for anything but the Xiaomi UUID is
/// ignored.
///
/// Xiaomi frame layout after the UUID: frame counter (u8), device address
/// in reversed byte order, sub-type byte, little-endian value.
fn decode_service_data(
    payload: &[u8],
    sender: MacAddress,
    out: &mut Measurement,
) -> Result<(), DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::VendorFrameTruncated);
    }
    let uuid = u16::from_le_bytes([payload[0], payload[1]]);
    if uuid != XIAOMI_SERVICE_UUID {
        return Ok(());
    }

    let body = &payload[2..];
    // frame counter + 6 address bytes + sub-type
    if body.len() < 8 {
        return Err(DecodeError::VendorFrameTruncated);
    }

    let frame_counter = body[0];
    let mut embedded = [0u8; 6];
    for (i, b) in body[1..7].iter().rev().enumerate() {
        embedded[i] = *b;
    }
    if embedded != sender.bytes() {
        return Err(DecodeError::AddressMismatch(MacAddress::new(embedded)));
    }

    let sub_type = body[7];
    let value = &body[8..];
    match sub_type {
        OBJ_TEMPERATURE => {
            if value.len() != 2 {
                return Err(DecodeError::VendorValueWidth(sub_type));
            }
            let tenths = i16::from_le_bytes([value[0], value[1]]);
            out.temperature = Some(f64::from(tenths) / 10.0);
        }
        OBJ_HUMIDITY => {
            if value.len() != 1 {
                return Err(DecodeError::VendorValueWidth(sub_type));
            }
            out.humidity = Some(value[0]);
        }
        OBJ_BATTERY_PERCENT => {
            if value.len() != 1 {
                return Err(DecodeError::VendorValueWidth(sub_type));
            }
            out.battery_percent = Some(value[0]);
        }
        OBJ_BATTERY_MILLIVOLTS => {
            if value.len() != 2 {
                return Err(DecodeError::VendorValueWidth(sub_type));
            }
            let millivolts = u16::from_le_bytes([value[0], value[1]]);
            out.battery_voltage = Some(f64::from(millivolts) / 1000.0);
        }
        // Sub-types we do not track (illuminance, moisture, ...) are not
        // errors; the frame simply contributes nothing.
        _ => {}
    }
    out.frame_counter = Some(frame_counter);

    Ok(())
}
