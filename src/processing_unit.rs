//! Processing unit controls (UVC 4.2.2.3).

use crate::{
    control::{ControlCapabilities, ControlValue, Request},
    desc::ProcessingUnitDesc,
    DeviceHandle, Result,
};

/// Grants access to the controls of a processing unit.
pub struct ProcessingUnit<'a> {
    device: &'a DeviceHandle,
    desc: &'a ProcessingUnitDesc,
}

impl<'a> ProcessingUnit<'a> {
    pub(crate) fn new(device: &'a DeviceHandle, desc: &'a ProcessingUnitDesc) -> Self {
        Self { device, desc }
    }

    pub fn descriptor(&self) -> &ProcessingUnitDesc {
        self.desc
    }

    pub fn read_control<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetCur)
    }

    pub fn read_control_min<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetMin)
    }

    pub fn read_control_max<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetMax)
    }

    pub fn read_control_res<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetRes)
    }

    pub fn read_control_default<C: ProcessingUnitControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetDef)
    }

    /// Queries which operations the control supports (`GET_INFO`).
    pub fn control_capabilities<C: ProcessingUnitControl>(&self) -> Result<ControlCapabilities> {
        let mut buf = [0; 1];
        self.device.read_vc_entity(
            self.desc.id().as_raw(),
            Request::GetInfo,
            C::ID as u8,
            &mut buf,
        )?;
        Ok(ControlCapabilities::decode(&buf))
    }

    pub fn set_control<C: ProcessingUnitControl>(&mut self, value: C::Value) -> Result<()> {
        let mut buf = <<C::Value as ControlValue>::Buf>::default();
        value.encode(buf.as_mut());
        self.device
            .write_vc_entity(self.desc.id().as_raw(), C::ID as u8, buf.as_mut())
    }

    fn read_raw<C: ProcessingUnitControl>(&self, request: Request) -> Result<C::Value> {
        let mut buf = <<C::Value as ControlValue>::Buf>::default();
        self.device.read_vc_entity(
            self.desc.id().as_raw(),
            request,
            C::ID as u8,
            buf.as_mut(),
        )?;
        Ok(<C::Value>::decode(buf.as_mut()))
    }
}

/// Processing unit control selectors (A.9.5).
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ControlId {
    #[allow(dead_code)]
    Undefined = 0x00,
    BacklightCompensation = 0x01,
    Brightness = 0x02,
    Contrast = 0x03,
    Gain = 0x04,
    PowerLineFrequency = 0x05,
    Hue = 0x06,
    Saturation = 0x07,
    Sharpness = 0x08,
    Gamma = 0x09,
    WhiteBalanceTemperature = 0x0A,
    WhiteBalanceTemperatureAuto = 0x0B,
    WhiteBalanceComponent = 0x0C,
    WhiteBalanceComponentAuto = 0x0D,
    DigitalMultiplier = 0x0E,
    DigitalMultiplierLimit = 0x0F,
    HueAuto = 0x10,
    AnalogVideoStandard = 0x11,
    AnalogVideoLockStatus = 0x12,
    ContrastAuto = 0x13,
}

pub trait ProcessingUnitControl {
    type Value: ControlValue;
    const ID: ControlId;
}

pub struct BacklightCompensation;
impl ProcessingUnitControl for BacklightCompensation {
    type Value = u16;
    const ID: ControlId = ControlId::BacklightCompensation;
}

pub struct Brightness;
impl ProcessingUnitControl for Brightness {
    type Value = i16;
    const ID: ControlId = ControlId::Brightness;
}

pub struct Contrast;
impl ProcessingUnitControl for Contrast {
    type Value = u16;
    const ID: ControlId = ControlId::Contrast;
}

pub struct Gain;
impl ProcessingUnitControl for Gain {
    type Value = u16;
    const ID: ControlId = ControlId::Gain;
}

pub struct PowerLineFrequency;
impl ProcessingUnitControl for PowerLineFrequency {
    type Value = crate::control::PowerLineFrequency;
    const ID: ControlId = ControlId::PowerLineFrequency;
}

pub struct Hue;
impl ProcessingUnitControl for Hue {
    type Value = i16;
    const ID: ControlId = ControlId::Hue;
}

pub struct HueAuto;
impl ProcessingUnitControl for HueAuto {
    type Value = u8;
    const ID: ControlId = ControlId::HueAuto;
}

pub struct Saturation;
impl ProcessingUnitControl for Saturation {
    type Value = u16;
    const ID: ControlId = ControlId::Saturation;
}

pub struct Sharpness;
impl ProcessingUnitControl for Sharpness {
    type Value = u16;
    const ID: ControlId = ControlId::Sharpness;
}

pub struct Gamma;
impl ProcessingUnitControl for Gamma {
    type Value = u16;
    const ID: ControlId = ControlId::Gamma;
}

pub struct WhiteBalanceTemperature;
impl ProcessingUnitControl for WhiteBalanceTemperature {
    type Value = u16;
    const ID: ControlId = ControlId::WhiteBalanceTemperature;
}

pub struct WhiteBalanceTemperatureAuto;
impl ProcessingUnitControl for WhiteBalanceTemperatureAuto {
    type Value = u8;
    const ID: ControlId = ControlId::WhiteBalanceTemperatureAuto;
}

pub struct WhiteBalanceComponent;
impl ProcessingUnitControl for WhiteBalanceComponent {
    type Value = crate::control::WhiteBalanceComponents;
    const ID: ControlId = ControlId::WhiteBalanceComponent;
}

pub struct WhiteBalanceComponentAuto;
impl ProcessingUnitControl for WhiteBalanceComponentAuto {
    type Value = u8;
    const ID: ControlId = ControlId::WhiteBalanceComponentAuto;
}
