//! Control transfer plumbing and raw control values.
//!
//! Every VideoControl/VideoStreaming request is a class-specific control
//! transfer with `wValue = selector << 8` and
//! `wIndex = (entity << 8) | interface`; the direction comes from the
//! request code. The typed wrappers in [`camera`](crate::camera) and
//! [`processing_unit`](crate::processing_unit) are thin marshallers over
//! this scheme, with selector and payload size fixed per control.

use std::{fmt, time::Duration};

use bitflags::bitflags;

/// Class-specific request codes (UVC A.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub(crate) enum Request {
    Undefined = 0x00,
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetRes = 0x84,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl Request {
    /// The transfer direction is encoded in the request code.
    pub(crate) fn is_read(self) -> bool {
        self as u8 & 0x80 != 0
    }
}

/// VideoControl interface control selectors (A.9.1).
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub(crate) enum VcControlId {
    Undefined = 0x00,
    VideoPowerMode = 0x01,
    RequestErrorCode = 0x02,
}

primitive_enum! {
    /// Error codes reported by the `REQUEST_ERROR_CODE` control (4.2.1.2).
    pub enum RequestErrorCode: u8 {
        NoError = 0x00,
        NotReady = 0x01,
        WrongState = 0x02,
        Power = 0x03,
        OutOfRange = 0x04,
        InvalidUnit = 0x05,
        InvalidControl = 0x06,
        InvalidRequest = 0x07,
        InvalidValueWithinRange = 0x08,
        Unknown = 0xff,
    }
}

bitflags! {
    /// What a control supports, as reported by `GET_INFO` (4.1.2).
    pub struct ControlCapabilities: u8 {
        const GET = 1 << 0;
        const SET = 1 << 1;
        const DISABLED = 1 << 2;
        const AUTOUPDATE = 1 << 3;
        const ASYNCHRONOUS = 1 << 4;
    }
}

/// Default deadline for plain control transfers.
pub(crate) const CONTROL_TIMEOUT: Duration = Duration::from_millis(100);
/// Probe/commit may take much longer on devices that re-tune their encoder.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Raw value of an entity control, little-endian on the wire.
pub trait ControlValue {
    type Buf: Default + AsMut<[u8]>;

    fn decode(buf: &[u8]) -> Self;
    fn encode(&self, buf: &mut [u8]);
}

impl ControlValue for bool {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => false,
            1 => true,
            n => {
                log::warn!("invalid bool value (should be 0 or 1 only): {}", n);
                true
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

impl ControlValue for u8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0]
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }
}

impl ControlValue for i8 {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        buf[0] as i8
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}

impl ControlValue for u16 {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for i16 {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for u32 {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self::from_le_bytes(bytes)
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.to_le_bytes())
    }
}

impl ControlValue for ControlCapabilities {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

#[derive(Clone, Copy, Debug)]
pub enum PowerLineFrequency {
    Disabled = 0,
    Freq50Hz = 1,
    Freq60Hz = 2,
    Auto = 3,
}

impl ControlValue for PowerLineFrequency {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0 => Self::Disabled,
            1 => Self::Freq50Hz,
            2 => Self::Freq60Hz,
            3 => Self::Auto,
            n => {
                log::warn!("invalid power line frequency value {}", n);
                Self::Disabled
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = (*self) as u8;
    }
}

#[derive(Debug)]
pub struct WhiteBalanceComponents {
    blue: u16,
    red: u16,
}

impl WhiteBalanceComponents {
    pub fn new(blue: u16, red: u16) -> Self {
        Self { blue, red }
    }
}

impl ControlValue for WhiteBalanceComponents {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut blue = [0; 2];
        let mut red = [0; 2];
        blue.copy_from_slice(&buf[0..2]);
        red.copy_from_slice(&buf[2..4]);
        Self {
            blue: u16::from_le_bytes(blue),
            red: u16::from_le_bytes(red),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.blue.to_le_bytes());
        buf[2..4].copy_from_slice(&self.red.to_le_bytes());
    }
}

bitflags! {
    pub struct AutoExposureMode: u8 {
        const MANUAL = 1 << 0;
        const AUTO = 1 << 1;
        const SHUTTER_PRIORITY = 1 << 2;
        const APERTURE_PRIORITY = 1 << 3;
    }
}

impl ControlValue for AutoExposureMode {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        Self::from_bits_truncate(buf[0])
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bits();
    }
}

#[derive(Clone, Copy)]
pub struct ExposureTimeAbs(u32);

impl ExposureTimeAbs {
    /// Rounds and clamps a duration to fit the available range.
    pub fn from_duration(dur: Duration) -> Self {
        // Exposure time is in units of 0.0001 seconds, or 100µs.
        let units = dur.as_micros() / 100;
        let clamped = units.clamp(1, u32::MAX.into());
        Self(clamped as u32)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.0) * 100)
    }
}

impl fmt::Debug for ExposureTimeAbs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_duration().fmt(f)
    }
}

impl ControlValue for ExposureTimeAbs {
    type Buf = [u8; 4];

    fn decode(buf: &[u8]) -> Self {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(buf);
        Self(u32::from_le_bytes(bytes))
    }

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.0.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FocusRel {
    focus_rel: i8,
    speed: u8,
}

impl FocusRel {
    pub fn new(focus_rel: i8, speed: u8) -> Self {
        Self { focus_rel, speed }
    }
}

impl ControlValue for FocusRel {
    type Buf = [u8; 2];

    fn decode(buf: &[u8]) -> Self {
        Self {
            focus_rel: buf[0] as i8,
            speed: buf[1],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.focus_rel as u8;
        buf[1] = self.speed;
    }
}

#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum FocusSimple {
    FullRange = 0x00,
    Macro = 0x01,
    People = 0x02,
    Scene = 0x03,
}

impl ControlValue for FocusSimple {
    type Buf = [u8; 1];

    fn decode(buf: &[u8]) -> Self {
        match buf[0] {
            0x00 => Self::FullRange,
            0x01 => Self::Macro,
            0x02 => Self::People,
            0x03 => Self::Scene,
            n => {
                log::warn!("invalid simple focus value {}", n);
                Self::FullRange
            }
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = *self as u8;
    }
}
