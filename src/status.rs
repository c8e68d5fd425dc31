//! Status interrupt endpoint handling (UVC 2.4.2.2).
//!
//! A UVC function may expose an interrupt endpoint on its VideoControl
//! interface through which it reports asynchronous events: control value
//! changes, autoupdate completions, and streaming errors such as button
//! triggers. [`DeviceHandle::set_status_callback`] listens on it.

use crate::{
    error::{err, Action, ErrorKind},
    transport::{
        CompletedTransfer, SinkAction, StreamSpec, TransferKind, TransferSink, TransferStatus,
    },
    DeviceHandle, Result,
};

const STATUS_TYPE_CONTROL: u8 = 1;
const STATUS_TYPE_STREAMING: u8 = 2;

/// Largest status packet we expect; control packets carry at most a few
/// value bytes.
const STATUS_BUF_LEN: usize = 32;

primitive_enum! {
    /// What changed about a control (2.4.2.2).
    pub enum StatusAttribute: u8 {
        ValueChange = 0x00,
        InfoChange = 0x01,
        FailureChange = 0x02,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Control,
    Streaming,
}

/// A decoded status interrupt packet.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub class: StatusClass,
    /// ID of the terminal, unit, or interface that raised the event.
    pub originator: u8,
    pub event: u8,
    /// Control selector; only present for control events.
    pub selector: Option<u8>,
    /// Only present for control events.
    pub attribute: Option<StatusAttribute>,
    pub value: Vec<u8>,
}

pub(crate) fn parse_status_packet(data: &[u8]) -> Option<StatusEvent> {
    match data.first()? & 0x0f {
        STATUS_TYPE_CONTROL => {
            if data.len() < 5 {
                log::warn!("short control status packet: {:02x?}", data);
                return None;
            }
            Some(StatusEvent {
                class: StatusClass::Control,
                originator: data[1],
                event: data[2],
                selector: Some(data[3]),
                attribute: Some(StatusAttribute::from_raw(data[4]).unwrap_or_else(|| {
                    log::warn!("unknown status attribute {}", data[4]);
                    StatusAttribute::ValueChange
                })),
                value: data[5..].to_vec(),
            })
        }
        STATUS_TYPE_STREAMING => {
            if data.len() < 3 {
                log::warn!("short streaming status packet: {:02x?}", data);
                return None;
            }
            Some(StatusEvent {
                class: StatusClass::Streaming,
                originator: data[1],
                event: data[2],
                selector: None,
                attribute: None,
                value: data[3..].to_vec(),
            })
        }
        ty => {
            log::warn!("unknown status packet type {}", ty);
            None
        }
    }
}

struct StatusSink {
    cb: Box<dyn FnMut(StatusEvent) + Send>,
}

impl TransferSink for StatusSink {
    fn transfer_done(&mut self, transfer: &CompletedTransfer<'_>) -> SinkAction {
        match transfer.status {
            TransferStatus::Completed => {
                for packet in transfer.packets {
                    if packet.status == TransferStatus::Completed && !packet.data.is_empty() {
                        if let Some(event) = parse_status_packet(packet.data) {
                            (self.cb)(event);
                        }
                    }
                }
                SinkAction::Continue
            }
            TransferStatus::TimedOut => SinkAction::Continue,
            TransferStatus::Cancelled | TransferStatus::NoDevice => SinkAction::Stop,
            status => {
                log::warn!("status transfer failed with {:?}, resubmitting", status);
                SinkAction::Continue
            }
        }
    }
}

impl DeviceHandle {
    /// Starts listening on the VideoControl interrupt endpoint and invokes
    /// `cb` (on the transport event thread) for every status packet.
    ///
    /// Replaces a previously registered callback. The listener runs until
    /// the handle is dropped.
    pub fn set_status_callback(
        &mut self,
        cb: impl FnMut(StatusEvent) + Send + 'static,
    ) -> Result<()> {
        let endpoint = match self.info.control_interface().status_endpoint() {
            Some(ep) => ep,
            None => {
                return err(
                    ErrorKind::NotFound,
                    "device has no status interrupt endpoint",
                    Action::ReadingStatus,
                )
            }
        };

        if let Some(mut old) = self.status.take() {
            old.stop();
        }

        let spec = StreamSpec {
            endpoint,
            kind: TransferKind::Interrupt {
                buf_len: STATUS_BUF_LEN,
            },
            pool_size: 1,
        };
        let driver = self.usb.begin_stream(spec, Box::new(StatusSink { cb: Box::new(cb) }))?;
        self.status = Some(driver);
        Ok(())
    }
}
