//! `rusb`-backed transport.
//!
//! Streaming is pumped by a backend-owned thread that rotates a pool of
//! buffers over synchronous bulk/interrupt reads. Isochronous endpoints need
//! asynchronous transfer submission, which `rusb`'s safe API does not offer;
//! a transport built on a different USB stack can provide it through the
//! same traits.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use rusb::UsbContext;

use crate::{
    error::{err, Action, ErrorKind, ResultExt},
    Result,
};

use super::{
    CompletedTransfer, DeviceIds, Packet, SinkAction, StreamDriver, StreamSpec, TransferKind,
    TransferSink, TransferStatus, TransportDevice, TransportHandle, UsbTransport,
};

const GET_DESCRIPTOR: u8 = 0x06;
const DESC_TYPE_CONFIGURATION: u16 = 0x02;
const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a single pump iteration may block; bounds the latency of
/// [`StreamDriver::stop`].
const PUMP_TIMEOUT: Duration = Duration::from_millis(100);

pub struct LibusbTransport {
    ctx: rusb::Context,
}

impl LibusbTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ctx: rusb::Context::new().during(Action::EnumeratingDevices)?,
        })
    }
}

impl UsbTransport for LibusbTransport {
    fn devices(&self) -> Result<Vec<Box<dyn TransportDevice>>> {
        let list = self.ctx.devices().during(Action::EnumeratingDevices)?;
        Ok(list
            .iter()
            .map(|dev| Box::new(LibusbDevice { dev }) as Box<dyn TransportDevice>)
            .collect())
    }
}

struct LibusbDevice {
    dev: rusb::Device<rusb::Context>,
}

impl TransportDevice for LibusbDevice {
    fn ids(&self) -> Result<DeviceIds> {
        let desc = self
            .dev
            .device_descriptor()
            .during(Action::EnumeratingDevices)?;
        Ok(DeviceIds {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
        })
    }

    fn active_config(&self) -> Result<Vec<u8>> {
        // `rusb` only exposes the pre-parsed view, so fetch the raw blob
        // with a standard GET_DESCRIPTOR request: header first to learn
        // `wTotalLength`, then the whole thing.
        let handle = self.dev.open().during(Action::ReadingConfigDescriptor)?;
        let mut header = [0u8; 9];
        handle
            .read_control(
                0x80,
                GET_DESCRIPTOR,
                DESC_TYPE_CONFIGURATION << 8,
                0,
                &mut header,
                DESCRIPTOR_TIMEOUT,
            )
            .during(Action::ReadingConfigDescriptor)?;
        let total = usize::from(u16::from_le_bytes([header[2], header[3]]));
        if total < header.len() {
            return err(
                ErrorKind::InvalidDevice,
                format!("configuration descriptor claims wTotalLength of {}", total),
                Action::ReadingConfigDescriptor,
            );
        }

        let mut buf = vec![0u8; total];
        let n = handle
            .read_control(
                0x80,
                GET_DESCRIPTOR,
                DESC_TYPE_CONFIGURATION << 8,
                0,
                &mut buf,
                DESCRIPTOR_TIMEOUT,
            )
            .during(Action::ReadingConfigDescriptor)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn open(&self) -> Result<Arc<dyn TransportHandle>> {
        let mut handle = self.dev.open().during(Action::OpeningDevice)?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            log::warn!("set_auto_detach_kernel_driver failed: {}", e);
        }

        match handle.active_configuration() {
            Ok(1) => {}
            Ok(_) => {
                if let Err(e) = handle.set_active_configuration(1) {
                    log::warn!("could not select configuration 1: {}", e);
                }
            }
            Err(e) => log::warn!("could not query active configuration: {}", e),
        }

        Ok(Arc::new(LibusbHandle {
            usb: Arc::new(Mutex::new(handle)),
        }))
    }
}

struct LibusbHandle {
    // `rusb` wants `&mut` for interface management; the mutex also keeps
    // the pump thread and control transfers from interleaving mid-call.
    usb: Arc<Mutex<rusb::DeviceHandle<rusb::Context>>>,
}

impl TransportHandle for LibusbHandle {
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let usb = self.usb.lock().unwrap();
        Ok(usb.read_control(request_type, request, value, index, buf, timeout)?)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let usb = self.usb.lock().unwrap();
        Ok(usb.write_control(request_type, request, value, index, data, timeout)?)
    }

    fn claim_interface(&self, interface: u8) -> Result<()> {
        let mut usb = self.usb.lock().unwrap();
        Ok(usb.claim_interface(interface)?)
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        let mut usb = self.usb.lock().unwrap();
        Ok(usb.release_interface(interface)?)
    }

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<()> {
        let mut usb = self.usb.lock().unwrap();
        Ok(usb.set_alternate_setting(interface, alt_setting)?)
    }

    fn begin_stream(
        &self,
        spec: StreamSpec,
        sink: Box<dyn TransferSink>,
    ) -> Result<Box<dyn StreamDriver>> {
        let buf_len = match spec.kind {
            TransferKind::Bulk { buf_len } | TransferKind::Interrupt { buf_len } => buf_len,
            TransferKind::Isochronous { .. } => {
                return err(
                    ErrorKind::Other,
                    "isochronous streaming needs a transport with asynchronous \
                     transfer submission, which the rusb backend does not provide",
                    Action::StartingStream,
                );
            }
        };
        if buf_len == 0 {
            return err(
                ErrorKind::InvalidParam,
                "zero-length transfer buffer",
                Action::StartingStream,
            );
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name("uvc-transfer-pump".into())
            .spawn({
                let usb = self.usb.clone();
                let stop = stop.clone();
                move || pump_loop(usb, spec, buf_len, sink, stop)
            })
            .map_err(|e| crate::Error::from(e).during(Action::StartingStream))?;

        Ok(Box::new(LibusbDriver {
            stop,
            thread: Some(thread),
        }))
    }
}

struct LibusbDriver {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamDriver for LibusbDriver {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LibusbDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_loop(
    usb: Arc<Mutex<rusb::DeviceHandle<rusb::Context>>>,
    spec: StreamSpec,
    buf_len: usize,
    mut sink: Box<dyn TransferSink>,
    stop: Arc<AtomicBool>,
) {
    let pool = spec.pool_size.max(1);
    let mut bufs: Vec<Vec<u8>> = (0..pool).map(|_| vec![0u8; buf_len]).collect();
    let mut next = 0;

    loop {
        if stop.load(Ordering::SeqCst) {
            finish(&mut sink, TransferStatus::Cancelled);
            return;
        }

        let buf = &mut bufs[next];
        next = (next + 1) % pool;

        let res = {
            let usb = usb.lock().unwrap();
            match spec.kind {
                TransferKind::Bulk { .. } => usb.read_bulk(spec.endpoint, buf, PUMP_TIMEOUT),
                TransferKind::Interrupt { .. } => {
                    usb.read_interrupt(spec.endpoint, buf, PUMP_TIMEOUT)
                }
                TransferKind::Isochronous { .. } => unreachable!(),
            }
        };

        let (status, len) = match res {
            Ok(n) => (TransferStatus::Completed, n),
            Err(rusb::Error::Timeout) => (TransferStatus::TimedOut, 0),
            Err(rusb::Error::NoDevice) => {
                log::info!("device disappeared, stopping transfer pump");
                finish(&mut sink, TransferStatus::NoDevice);
                return;
            }
            Err(rusb::Error::Pipe) => (TransferStatus::Stall, 0),
            Err(rusb::Error::Overflow) => (TransferStatus::Overflow, 0),
            Err(e) => {
                log::warn!("stream transfer failed: {}", e);
                (TransferStatus::Error, 0)
            }
        };

        let packets = [Packet {
            status,
            data: &buf[..len],
        }];
        let action = sink.transfer_done(&CompletedTransfer {
            status,
            packets: &packets,
        });
        if action == SinkAction::Stop {
            return;
        }
    }
}

fn finish(sink: &mut Box<dyn TransferSink>, status: TransferStatus) {
    sink.transfer_done(&CompletedTransfer {
        status,
        packets: &[],
    });
}
