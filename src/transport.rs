//! The USB transport capability consumed by the driver core.
//!
//! The core never talks to an USB stack directly. Everything it needs from
//! the host controller side (enumeration, configuration descriptor bytes,
//! control transfers, and the pumped stream transfers) is expressed by the
//! object-safe traits in this module. The bundled [`libusb::LibusbTransport`]
//! implements them on top of `rusb`; the test suite drives the core through a
//! scripted implementation instead.

pub mod libusb;

use std::{sync::Arc, time::Duration};

use crate::Result;

/// Vendor/product identity of an enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIds {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Entry point of a transport: lists the devices currently attached.
pub trait UsbTransport: Send + Sync {
    fn devices(&self) -> Result<Vec<Box<dyn TransportDevice>>>;
}

/// A discovered, not yet opened device.
pub trait TransportDevice: Send {
    fn ids(&self) -> Result<DeviceIds>;

    /// Returns the full configuration descriptor blob of the active
    /// configuration, starting at the configuration descriptor itself.
    fn active_config(&self) -> Result<Vec<u8>>;

    /// Opens the device for exclusive use.
    ///
    /// Fails with [`ErrorKind::Access`](crate::ErrorKind::Access) when the
    /// device is claimed elsewhere or permission is denied.
    fn open(&self) -> Result<Arc<dyn TransportHandle>>;
}

/// An opened device.
///
/// Control transfers and interface management may be called from any thread;
/// the transport serializes them. Stream transfer completions are delivered
/// on a transport-owned event thread and must be treated as concurrent with
/// all other work on the handle.
pub trait TransportHandle: Send + Sync {
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    fn claim_interface(&self, interface: u8) -> Result<()>;

    fn release_interface(&self, interface: u8) -> Result<()>;

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<()>;

    /// Starts pumping transfers on an endpoint.
    ///
    /// The transport keeps `spec.pool_size` transfers in flight and invokes
    /// [`TransferSink::transfer_done`] on its event thread for every
    /// completion. A completed transfer is resubmitted unless the sink asks
    /// to stop or the completion status is [`TransferStatus::Cancelled`] or
    /// [`TransferStatus::NoDevice`].
    fn begin_stream(
        &self,
        spec: StreamSpec,
        sink: Box<dyn TransferSink>,
    ) -> Result<Box<dyn StreamDriver>>;
}

/// Shape of the transfers submitted by [`TransportHandle::begin_stream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamSpec {
    /// Endpoint address, including the direction bit.
    pub endpoint: u8,
    pub kind: TransferKind,
    /// Number of concurrently submitted transfers.
    pub pool_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Bulk {
        buf_len: usize,
    },
    Isochronous {
        packet_len: usize,
        packets_per_transfer: usize,
    },
    Interrupt {
        buf_len: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    /// Transfer-level error; the transfer will be resubmitted.
    Error,
    TimedOut,
    /// The transfer was cancelled; the stream is winding down.
    Cancelled,
    Stall,
    /// The device is gone.
    NoDevice,
    Overflow,
}

impl TransferStatus {
    /// Whether the transport stops resubmitting after this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Cancelled | TransferStatus::NoDevice)
    }
}

/// A single payload fragment of a completed transfer.
pub struct Packet<'a> {
    pub status: TransferStatus,
    pub data: &'a [u8],
}

/// A completed transfer as seen by the sink.
pub struct CompletedTransfer<'a> {
    pub status: TransferStatus,
    /// One entry per isochronous packet; a single entry for bulk and
    /// interrupt transfers.
    pub packets: &'a [Packet<'a>],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAction {
    Continue,
    /// Stop resubmitting; the stream winds down.
    Stop,
}

/// Receives transfer completions on the transport event thread.
pub trait TransferSink: Send {
    fn transfer_done(&mut self, transfer: &CompletedTransfer<'_>) -> SinkAction;
}

/// Handle on a running transfer pump.
pub trait StreamDriver: Send {
    /// Cancels all in-flight transfers and blocks until the sink has seen
    /// its final completion.
    fn stop(&mut self);
}
