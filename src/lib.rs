//! Host-side driver for USB Video Class (UVC) devices.
//!
//! The library discovers cameras on the USB bus, parses their class-specific
//! configuration descriptors into a navigable [`desc::DeviceInfo`] tree,
//! negotiates a stream format through the Probe/Commit handshake, and pumps
//! the device's payload stream into complete video frames handed to a user
//! callback on a dedicated delivery thread.
//!
//! ```no_run
//! let ctx = uvc_host::UvcContext::new()?;
//! let dev = ctx.find_device(None, None)?;
//! let mut handle = dev.open()?;
//!
//! let ctrl = handle.stream_ctrl_for(uvc_host::FourCc(*b"MJPG"), 640, 480, 30)?;
//! handle.start_streaming(&ctrl, |frame| {
//!     println!("frame {}: {} bytes", frame.sequence(), frame.data().len());
//! })?;
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! handle.stop_streaming();
//! # Ok::<(), uvc_host::Error>(())
//! ```
//!
//! The USB stack is a capability: anything implementing the traits in
//! [`transport`] can back a [`UvcContext`]. [`UvcContext::new`] uses the
//! bundled `rusb` transport.

#[macro_use]
mod util;
pub mod camera;
pub mod control;
pub mod desc;
mod error;
pub mod negotiate;
pub mod processing_unit;
pub mod status;
pub mod stream;
pub mod transport;

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use camera::CameraTerminal;
use control::{Request, RequestErrorCode, VcControlId, CONTROL_TIMEOUT};
use desc::{DeviceInfo, FormatDesc, TermId, UnitId};
use error::{err, Action, ResultExt};
use processing_unit::ProcessingUnit;
use transport::{
    libusb::LibusbTransport, DeviceIds, StreamDriver, TransportDevice, TransportHandle,
    UsbTransport,
};

pub use desc::FourCc;
pub use error::{Error, ErrorKind};
pub use negotiate::StreamCtrl;
pub use stream::{Frame, SourceClock};
pub use util::BcdVersion;

pub type Result<T> = std::result::Result<T, Error>;

/// Control transfers are retried this many times in total on transient
/// transport errors. Timeouts are never retried.
const MAX_CONTROL_ATTEMPTS: u32 = 3;

const ISIGHT_VENDOR_ID: u16 = 0x05ac;
const ISIGHT_PRODUCT_ID: u16 = 0x8501;

struct ContextInner {
    transport: Box<dyn UsbTransport>,
    open_devices: Mutex<Vec<Weak<OpenDeviceEntry>>>,
}

struct OpenDeviceEntry {
    ids: DeviceIds,
}

/// Process-wide owner of the USB transport and of the open device handles.
pub struct UvcContext {
    inner: Arc<ContextInner>,
}

impl UvcContext {
    /// Creates a context backed by the bundled `rusb` transport.
    pub fn new() -> Result<Self> {
        Ok(Self::with_transport(LibusbTransport::new()?))
    }

    /// Creates a context on top of a custom USB transport.
    pub fn with_transport(transport: impl UsbTransport + 'static) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                transport: Box::new(transport),
                open_devices: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Enumerates the attached UVC devices.
    ///
    /// Every USB device whose active configuration declares a VideoControl
    /// interface is returned with its descriptor tree already parsed.
    /// Devices whose descriptors cannot be read are skipped.
    pub fn devices(&self) -> Result<Vec<UvcDevice>> {
        let mut found = Vec::new();
        for dev in self.inner.transport.devices()? {
            let ids = match dev.ids() {
                Ok(ids) => ids,
                Err(e) => {
                    log::debug!("skipping device: {}", e);
                    continue;
                }
            };
            let config = match dev.active_config() {
                Ok(config) => config,
                Err(e) => {
                    log::debug!(
                        "{:04x}:{:04x}: cannot read configuration descriptor: {}",
                        ids.vendor_id,
                        ids.product_id,
                        e
                    );
                    continue;
                }
            };
            match desc::parse::parse_device_info(&config) {
                Some(info) => found.push(UvcDevice {
                    ctx: self.inner.clone(),
                    dev,
                    ids,
                    info,
                }),
                None => log::trace!(
                    "{:04x}:{:04x} has no VideoControl interface",
                    ids.vendor_id,
                    ids.product_id
                ),
            }
        }
        Ok(found)
    }

    /// Returns the first attached UVC device matching the given filter.
    pub fn find_device(
        &self,
        vendor_id: Option<u16>,
        product_id: Option<u16>,
    ) -> Result<UvcDevice> {
        self.devices()?
            .into_iter()
            .find(|dev| {
                vendor_id.map_or(true, |vid| dev.ids.vendor_id == vid)
                    && product_id.map_or(true, |pid| dev.ids.product_id == pid)
            })
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound, "no matching UVC device attached")
                    .during(Action::EnumeratingDevices)
            })
    }

    /// Identities of the device handles currently open in this context.
    pub fn open_devices(&self) -> Vec<DeviceIds> {
        let mut list = self.inner.open_devices.lock().unwrap();
        list.retain(|weak| weak.upgrade().is_some());
        list.iter()
            .filter_map(|weak| weak.upgrade().map(|entry| entry.ids))
            .collect()
    }
}

/// A discovered, not yet opened UVC device.
pub struct UvcDevice {
    ctx: Arc<ContextInner>,
    dev: Box<dyn TransportDevice>,
    ids: DeviceIds,
    info: DeviceInfo,
}

impl UvcDevice {
    pub fn vendor_id(&self) -> u16 {
        self.ids.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.ids.product_id
    }

    /// The parsed descriptor tree; available without opening the device.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Opens the device for exclusive use and claims its VideoControl
    /// interface.
    pub fn open(self) -> Result<DeviceHandle> {
        let usb = self.dev.open()?;
        usb.claim_interface(self.info.control_interface().interface_number())
            .during(Action::OpeningDevice)?;

        let is_isight =
            self.ids.vendor_id == ISIGHT_VENDOR_ID && self.ids.product_id == ISIGHT_PRODUCT_ID;
        if is_isight {
            log::debug!("applying iSight payload quirk");
        }

        let entry = Arc::new(OpenDeviceEntry { ids: self.ids });
        self.ctx
            .open_devices
            .lock()
            .unwrap()
            .push(Arc::downgrade(&entry));

        Ok(DeviceHandle {
            ctx: self.ctx,
            usb,
            info: self.info,
            ids: self.ids,
            entry,
            is_isight,
            streaming: None,
            status: None,
            timeout: CONTROL_TIMEOUT,
        })
    }
}

impl std::fmt::Debug for UvcDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UvcDevice")
            .field("vendor_id", &self.ids.vendor_id)
            .field("product_id", &self.ids.product_id)
            .finish()
    }
}

/// An opened UVC device.
///
/// Exclusively owns the transport-level handle, the parsed descriptor tree,
/// an optional status interrupt listener, and (while streaming) the
/// streaming engine state. Dropping the handle stops streaming and releases
/// the device.
pub struct DeviceHandle {
    ctx: Arc<ContextInner>,
    pub(crate) usb: Arc<dyn TransportHandle>,
    pub(crate) info: DeviceInfo,
    ids: DeviceIds,
    entry: Arc<OpenDeviceEntry>,
    pub(crate) is_isight: bool,
    pub(crate) streaming: Option<stream::StreamState>,
    pub(crate) status: Option<Box<dyn StreamDriver>>,
    timeout: Duration,
}

impl DeviceHandle {
    pub fn vendor_id(&self) -> u16 {
        self.ids.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.ids.product_id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The format list of the first streaming interface.
    pub fn format_descs(&self) -> &[FormatDesc] {
        self.info
            .streaming_interfaces()
            .first()
            .map(|intf| intf.formats())
            .unwrap_or(&[])
    }

    /// Adjusts the deadline used for plain control transfers.
    pub fn set_control_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Grants access to the first camera input terminal.
    pub fn camera_terminal(&self) -> Result<CameraTerminal<'_>> {
        match self.info.control_interface().camera_terminal() {
            // unwrap: `is_camera` implies the camera descriptor is present
            Some(term) => Ok(CameraTerminal::new(self, term.id(), term.camera().unwrap())),
            None => err(
                ErrorKind::NotFound,
                "device has no camera input terminal",
                Action::ReadingControl,
            ),
        }
    }

    pub fn camera_terminal_by_id(&self, id: TermId) -> Result<CameraTerminal<'_>> {
        self.info
            .control_interface()
            .input_terminals()
            .iter()
            .find(|t| t.id() == id)
            .and_then(|t| Some(CameraTerminal::new(self, t.id(), t.camera()?)))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("no camera terminal with ID {}", id.as_raw()),
                )
                .during(Action::ReadingControl)
            })
    }

    /// Grants access to the first processing unit.
    pub fn processing_unit(&self) -> Result<ProcessingUnit<'_>> {
        match self.info.control_interface().processing_units().first() {
            Some(unit) => Ok(ProcessingUnit::new(self, unit)),
            None => err(
                ErrorKind::NotFound,
                "device has no processing unit",
                Action::ReadingControl,
            ),
        }
    }

    pub fn processing_unit_by_id(&self, id: UnitId) -> Result<ProcessingUnit<'_>> {
        self.info
            .control_interface()
            .processing_units()
            .iter()
            .find(|u| u.id() == id)
            .map(|u| ProcessingUnit::new(self, u))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::NotFound,
                    format!("no processing unit with ID {}", id.as_raw()),
                )
                .during(Action::ReadingControl)
            })
    }

    /// Reads the device power mode (`VC_VIDEO_POWER_MODE_CONTROL`).
    pub fn video_power_mode(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_vc_entity(0, Request::GetCur, VcControlId::VideoPowerMode as u8, &mut buf)?;
        Ok(buf[0])
    }

    pub fn set_video_power_mode(&mut self, mode: u8) -> Result<()> {
        self.write_vc_entity(0, VcControlId::VideoPowerMode as u8, &[mode])
    }

    /// Reads why the previous control request failed
    /// (`VC_REQUEST_ERROR_CODE_CONTROL`).
    pub fn last_request_error(&self) -> Result<RequestErrorCode> {
        let mut buf = [0u8; 1];
        self.read_vc_entity(
            0,
            Request::GetCur,
            VcControlId::RequestErrorCode as u8,
            &mut buf,
        )?;
        Ok(RequestErrorCode::from_raw(buf[0]).unwrap_or(RequestErrorCode::Unknown))
    }

    fn retrying<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < MAX_CONTROL_ATTEMPTS => {
                    attempt += 1;
                    log::warn!("transient USB error, retrying request: {}", e);
                }
                other => return other,
            }
        }
    }

    /// Performs a class-specific read on an entity's control.
    pub(crate) fn read_entity(
        &self,
        interface: u8,
        entity: u8,
        request: Request,
        selector: u8,
        buf: &mut [u8],
        timeout: Duration,
        action: Action,
    ) -> Result<usize> {
        const GET_ENTITY_REQ: u8 = 0b10100001;
        debug_assert!(request.is_read());

        let value = u16::from(selector) << 8;
        let index = u16::from(entity) << 8 | u16::from(interface);
        self.retrying(|| {
            self.usb
                .read_control(GET_ENTITY_REQ, request as u8, value, index, buf, timeout)
        })
        .map_err(|e| e.during(action))
    }

    /// Performs a `SET_CUR` on an entity's control.
    pub(crate) fn write_entity(
        &self,
        interface: u8,
        entity: u8,
        selector: u8,
        data: &[u8],
        timeout: Duration,
        action: Action,
    ) -> Result<()> {
        const SET_ENTITY_REQ: u8 = 0b00100001;

        let value = u16::from(selector) << 8;
        let index = u16::from(entity) << 8 | u16::from(interface);
        let written = self
            .retrying(|| {
                self.usb.write_control(
                    SET_ENTITY_REQ,
                    Request::SetCur as u8,
                    value,
                    index,
                    data,
                    timeout,
                )
            })
            .map_err(|e| e.during(action))?;
        if written != data.len() {
            return err(
                ErrorKind::Io,
                format!("control write only wrote {}/{} bytes", written, data.len()),
                action,
            );
        }
        Ok(())
    }

    pub(crate) fn read_vc_entity(
        &self,
        entity: u8,
        request: Request,
        selector: u8,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.read_entity(
            self.info.control_interface().interface_number(),
            entity,
            request,
            selector,
            buf,
            self.timeout,
            Action::ReadingControl,
        )
    }

    pub(crate) fn write_vc_entity(&self, entity: u8, selector: u8, data: &[u8]) -> Result<()> {
        self.write_entity(
            self.info.control_interface().interface_number(),
            entity,
            selector,
            data,
            self.timeout,
            Action::WritingControl,
        )
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop_streaming();
        if let Some(mut status) = self.status.take() {
            status.stop();
        }
        let _ = self
            .usb
            .release_interface(self.info.control_interface().interface_number());

        let mut list = self.ctx.open_devices.lock().unwrap();
        list.retain(|weak| {
            weak.upgrade()
                .map_or(false, |entry| !Arc::ptr_eq(&entry, &self.entry))
        });
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("vendor_id", &self.ids.vendor_id)
            .field("product_id", &self.ids.product_id)
            .field("streaming", &self.streaming.is_some())
            .finish()
    }
}
