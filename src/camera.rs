//! Camera terminal controls (UVC 4.2.2.1).

use crate::{
    control::{ControlCapabilities, ControlValue, Request},
    desc::{CameraTerminalDesc, TermId},
    DeviceHandle, Result,
};

/// Grants access to the controls of a camera input terminal.
pub struct CameraTerminal<'a> {
    device: &'a DeviceHandle,
    id: TermId,
    desc: &'a CameraTerminalDesc,
}

impl<'a> CameraTerminal<'a> {
    pub(crate) fn new(device: &'a DeviceHandle, id: TermId, desc: &'a CameraTerminalDesc) -> Self {
        Self { device, id, desc }
    }

    pub fn descriptor(&self) -> &CameraTerminalDesc {
        self.desc
    }

    pub fn read_control<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetCur)
    }

    pub fn read_control_min<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetMin)
    }

    pub fn read_control_max<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetMax)
    }

    pub fn read_control_res<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetRes)
    }

    pub fn read_control_default<C: CameraControl>(&self) -> Result<C::Value> {
        self.read_raw::<C>(Request::GetDef)
    }

    /// Queries which operations the control supports (`GET_INFO`).
    pub fn control_capabilities<C: CameraControl>(&self) -> Result<ControlCapabilities> {
        let mut buf = [0; 1];
        self.device
            .read_vc_entity(self.id.as_raw(), Request::GetInfo, C::ID as u8, &mut buf)?;
        Ok(ControlCapabilities::decode(&buf))
    }

    pub fn set_control<C: CameraControl>(&mut self, value: C::Value) -> Result<()> {
        let mut buf = <<C::Value as ControlValue>::Buf>::default();
        value.encode(buf.as_mut());
        self.device
            .write_vc_entity(self.id.as_raw(), C::ID as u8, buf.as_mut())
    }

    fn read_raw<C: CameraControl>(&self, request: Request) -> Result<C::Value> {
        let mut buf = <<C::Value as ControlValue>::Buf>::default();
        self.device
            .read_vc_entity(self.id.as_raw(), request, C::ID as u8, buf.as_mut())?;
        Ok(<C::Value>::decode(buf.as_mut()))
    }
}

/// Camera terminal control selectors (A.9.4).
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum ControlId {
    Undefined = 0x00,
    ScanningMode = 0x01,
    AutoExposureMode = 0x02,
    AutoExposurePriority = 0x03,
    ExposureTimeAbs = 0x04,
    ExposureTimeRel = 0x05,
    FocusAbs = 0x06,
    FocusRel = 0x07,
    FocusAuto = 0x08,
    IrisAbs = 0x09,
    IrisRel = 0x0A,
    ZoomAbs = 0x0B,
    ZoomRel = 0x0C,
    PanTiltAbs = 0x0D,
    PanTiltRel = 0x0E,
    RollAbs = 0x0F,
    RollRel = 0x10,
    Privacy = 0x11,
    FocusSimple = 0x12,
    Window = 0x13,
    RegionOfInterest = 0x14,
}

pub trait CameraControl {
    type Value: ControlValue;
    const ID: ControlId;
}

pub struct ScanningMode;
impl CameraControl for ScanningMode {
    type Value = bool;
    const ID: ControlId = ControlId::ScanningMode;
}

pub struct AutoExposureMode;
impl CameraControl for AutoExposureMode {
    type Value = crate::control::AutoExposureMode;
    const ID: ControlId = ControlId::AutoExposureMode;
}

pub struct AutoExposurePriority;
impl CameraControl for AutoExposurePriority {
    type Value = u8;
    const ID: ControlId = ControlId::AutoExposurePriority;
}

pub struct ExposureTimeAbs;
impl CameraControl for ExposureTimeAbs {
    type Value = crate::control::ExposureTimeAbs;
    const ID: ControlId = ControlId::ExposureTimeAbs;
}

pub struct ExposureTimeRel;
impl CameraControl for ExposureTimeRel {
    type Value = i8;
    const ID: ControlId = ControlId::ExposureTimeRel;
}

pub struct FocusAbs;
impl CameraControl for FocusAbs {
    type Value = u16;
    const ID: ControlId = ControlId::FocusAbs;
}

pub struct FocusRel;
impl CameraControl for FocusRel {
    type Value = crate::control::FocusRel;
    const ID: ControlId = ControlId::FocusRel;
}

pub struct FocusSimple;
impl CameraControl for FocusSimple {
    type Value = crate::control::FocusSimple;
    const ID: ControlId = ControlId::FocusSimple;
}

pub struct FocusAuto;
impl CameraControl for FocusAuto {
    type Value = bool;
    const ID: ControlId = ControlId::FocusAuto;
}

pub struct IrisAbs;
impl CameraControl for IrisAbs {
    type Value = u16;
    const ID: ControlId = ControlId::IrisAbs;
}

pub struct IrisRel;
impl CameraControl for IrisRel {
    type Value = u8;
    const ID: ControlId = ControlId::IrisRel;
}

pub struct ZoomAbs;
impl CameraControl for ZoomAbs {
    type Value = u16;
    const ID: ControlId = ControlId::ZoomAbs;
}

pub struct Privacy;
impl CameraControl for Privacy {
    type Value = bool;
    const ID: ControlId = ControlId::Privacy;
}
