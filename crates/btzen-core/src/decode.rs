//! Decoders converting raw sensor payloads into values
//!
//! A decoder is any pure function from bytes to a value. Closures and
//! function items implement [`Decoder`] directly; [`ReadingDecoder`] picks the
//! conversion for a catalogued [`SensorKind`](crate::SensorKind).

use crate::sensor::SensorKind;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("No decoder for sensor kind {0}")]
    UnknownKind(String),
}

/// Conversion of a raw payload into a typed value
pub trait Decoder: Send + Sync + 'static {
    type Value: Send + 'static;

    fn decode(&self, data: &[u8]) -> Result<Self::Value, DecodeError>;
}

impl<F, V> Decoder for F
where
    F: Fn(&[u8]) -> Result<V, DecodeError> + Send + Sync + 'static,
    V: Send + 'static,
{
    type Value = V;

    fn decode(&self, data: &[u8]) -> Result<V, DecodeError> {
        self(data)
    }
}

/// Decoded sensor value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Reading {
    /// Battery charge in percent
    Percent(u8),
    /// Ambient temperature in degrees Celsius
    Temperature(f32),
    /// Relative humidity in percent
    Humidity(f32),
    /// Pressure in hPa
    Pressure(f32),
    /// Illuminance in lux
    Light(f32),
    /// Acceleration in g along x, y, z
    Acceleration([f32; 3]),
    /// Button state bit mask
    Button(u8),
}

fn expect_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::Length {
            expected,
            actual: data.len(),
        })
    }
}

fn u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Payload as is
pub fn raw(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    Ok(data.to_vec())
}

/// Single byte percentage, e.g. battery level
pub fn percent(data: &[u8]) -> Result<u8, DecodeError> {
    expect_len(data, 1)?;
    Ok(data[0])
}

/// Ambient temperature from a TMP007 sample (object and ambient words)
pub fn temperature(data: &[u8]) -> Result<f32, DecodeError> {
    expect_len(data, 4)?;
    Ok((u16_le(data, 2) >> 2) as f32 * 0.03125)
}

/// Relative humidity from an HDC1000 sample (temperature and humidity words)
pub fn humidity(data: &[u8]) -> Result<f32, DecodeError> {
    expect_len(data, 4)?;
    Ok(u16_le(data, 2) as f32 / 65536.0 * 100.0)
}

/// Pressure from a BMP280 sample (24-bit temperature, 24-bit pressure)
pub fn pressure(data: &[u8]) -> Result<f32, DecodeError> {
    expect_len(data, 6)?;
    let raw = u32::from_le_bytes([data[3], data[4], data[5], 0]);
    Ok(raw as f32 / 100.0)
}

/// Illuminance from an OPT3001 sample (4-bit exponent, 12-bit mantissa)
pub fn light(data: &[u8]) -> Result<f32, DecodeError> {
    expect_len(data, 2)?;
    let raw = u16_le(data, 0);
    let mantissa = (raw & 0x0fff) as f32;
    let exponent = (raw >> 12) as i32;
    Ok(mantissa * 0.01 * 2f32.powi(exponent))
}

/// Acceleration from an MPU9250 movement sample at 8G range
pub fn accelerometer(data: &[u8]) -> Result<[f32; 3], DecodeError> {
    expect_len(data, 18)?;
    let axis = |offset: usize| i16::from_le_bytes([data[offset], data[offset + 1]]) as f32 / 4096.0;
    Ok([axis(6), axis(8), axis(10)])
}

/// Button state bit mask
pub fn button(data: &[u8]) -> Result<u8, DecodeError> {
    expect_len(data, 1)?;
    Ok(data[0])
}

/// Decoder producing a [`Reading`] for a catalogued sensor kind
#[derive(Debug, Clone, Copy)]
pub struct ReadingDecoder {
    kind: &'static SensorKind,
}

impl ReadingDecoder {
    pub fn new(kind: &'static SensorKind) -> Self {
        Self { kind }
    }
}

impl Decoder for ReadingDecoder {
    type Value = Reading;

    fn decode(&self, data: &[u8]) -> Result<Reading, DecodeError> {
        match self.kind.name {
            "battery" => percent(data).map(Reading::Percent),
            "temperature" => temperature(data).map(Reading::Temperature),
            "humidity" => humidity(data).map(Reading::Humidity),
            "pressure" => pressure(data).map(Reading::Pressure),
            "light" => light(data).map(Reading::Light),
            "accelerometer" => accelerometer(data).map(Reading::Acceleration),
            "button" => button(data).map(Reading::Button),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}
