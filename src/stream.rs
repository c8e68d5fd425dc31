//! The streaming engine: transfer pump, payload reassembly, and frame
//! delivery.
//!
//! Video arrives as a sequence of payload fragments, each led by a small
//! header (2.4.3.3). The frame ID bit of the header toggles between
//! consecutive frames; reassembly appends fragment payloads to a scratch
//! buffer (`outbuf`) until a toggle or an explicit EOF marks the frame
//! complete, at which point the scratch buffer is swapped with the hold
//! buffer under the hold mutex and the delivery thread is woken.
//!
//! Three threads touch this state: the transport event thread runs the
//! reassembler, the delivery thread runs the user callback, and the
//! caller's thread starts and stops the stream. Only the `hold` fields are
//! shared; everything else belongs to exactly one thread. The delivery
//! thread takes a frame by swapping buffers, so the engine can never write
//! into bytes the callback is still reading, and at most one frame is
//! user-visible at a time. Frames that complete while the callback is busy
//! replace each other in the hold buffer; their sequence numbers are
//! observed as gaps.

use std::{
    mem,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::SystemTime,
};

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};

use crate::{
    desc::{EndpointTransferType, FourCc, StreamingInterfaceDesc},
    error::{err, Action, ErrorKind, ResultExt},
    negotiate::StreamCtrl,
    transport::{
        CompletedTransfer, SinkAction, StreamDriver, StreamSpec, TransferKind, TransferSink,
        TransferStatus,
    },
    DeviceHandle, Result,
};

/// Number of transfers kept in flight.
const TRANSFER_POOL: usize = 5;
/// Upper bound on isochronous packets batched into one transfer.
const MAX_PACKETS_PER_TRANSFER: u32 = 32;

bitflags! {
    /// Payload header flags (2.4.3.3).
    pub(crate) struct PayloadFlags: u8 {
        const FID = 0x01;
        const EOF = 0x02;
        const PTS = 0x04;
        const SCR = 0x08;
        const RES = 0x10;
        const STI = 0x20;
        const ERR = 0x40;
        const EOH = 0x80;
    }
}

/// Source clock reference from a payload header: a 32-bit source time stamp
/// plus the 1 kHz SOF counter it was latched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceClock {
    pub source_time: u32,
    pub sof_counter: u16,
}

/// A complete video frame, borrowed from the engine for the duration of the
/// callback.
///
/// The buffer is reused once the callback returns; copy the data out if it
/// must outlive the call.
pub struct Frame<'a> {
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) format: FourCc,
    pub(crate) data: &'a [u8],
    pub(crate) sequence: u32,
    pub(crate) pts: Option<u32>,
    pub(crate) scr: Option<SourceClock>,
    pub(crate) captured_at: SystemTime,
}

impl<'a> Frame<'a> {
    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn format(&self) -> FourCc {
        self.format
    }

    /// The frame's payload bytes; for compressed formats this may be
    /// shorter than the negotiated maximum.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Strictly increasing while streaming; dropped frames leave gaps.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Presentation time stamp from the last payload header of this frame.
    pub fn pts(&self) -> Option<u32> {
        self.pts
    }

    /// Source clock reference from the last payload header of this frame.
    pub fn scr(&self) -> Option<SourceClock> {
        self.scr
    }

    /// Host time at which the frame completed.
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }
}

struct HoldState {
    stop: bool,
    holdbuf: Vec<u8>,
    hold_bytes: usize,
    hold_pts: Option<u32>,
    hold_scr: Option<SourceClock>,
    hold_captured_at: SystemTime,
    hold_seq: u32,
    last_polled_seq: u32,
}

pub(crate) struct StreamShared {
    hold: Mutex<HoldState>,
    frame_ready: Condvar,
}

/// Reassembles payload fragments into frames. Owned by the transport event
/// thread; only [`finish_frame`](Self::finish_frame) touches shared state.
pub(crate) struct FrameAssembler {
    shared: Arc<StreamShared>,
    outbuf: Vec<u8>,
    got_bytes: usize,
    fid: Option<bool>,
    pts: Option<u32>,
    scr: Option<SourceClock>,
    seq: u32,
    frame_error: bool,
    is_isight: bool,
}

/// Old iSights prefix header-bearing payloads with this marker at offset 2
/// or 3; everything else is raw image data.
const ISIGHT_TAG: [u8; 12] = [
    0x11, 0x22, 0x33, 0x44, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xfa, 0xce,
];

fn isight_has_header(data: &[u8]) -> bool {
    (data.len() >= 14 && data[2..14] == ISIGHT_TAG)
        || (data.len() >= 15 && data[3..15] == ISIGHT_TAG)
}

impl FrameAssembler {
    pub(crate) fn new(shared: Arc<StreamShared>, max_frame_size: usize, is_isight: bool) -> Self {
        Self {
            shared,
            outbuf: vec![0; max_frame_size],
            got_bytes: 0,
            fid: None,
            pts: None,
            scr: None,
            seq: 0,
            frame_error: false,
            is_isight,
        }
    }

    /// Processes one payload fragment.
    pub(crate) fn push_fragment(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        if self.is_isight && !isight_has_header(data) {
            // Only the first fragment of an iSight frame carries a header;
            // the rest is raw image data.
            self.append(data);
            return;
        }

        let header_len = usize::from(data[0]);
        if data.len() < 2 || header_len < 2 || header_len > data.len() {
            log::debug!(
                "bogus payload header (bHeaderLength={}, fragment has {} bytes), dropping fragment",
                header_len,
                data.len()
            );
            self.frame_error = true;
            return;
        }

        let flags = PayloadFlags::from_bits_truncate(data[1]);
        if flags.contains(PayloadFlags::ERR) {
            log::debug!("payload error bit set, dropping fragment");
            self.frame_error = true;
            return;
        }

        let fid = flags.contains(PayloadFlags::FID);
        if self.fid.map_or(false, |prev| prev != fid) {
            // The toggle means the previous frame is complete.
            self.finish_frame();
        }
        self.fid = Some(fid);

        let mut off = 2;
        if flags.contains(PayloadFlags::PTS) && header_len >= off + 4 {
            self.pts = Some(LE::read_u32(&data[off..off + 4]));
            off += 4;
        }
        if flags.contains(PayloadFlags::SCR) && header_len >= off + 6 {
            self.scr = Some(SourceClock {
                source_time: LE::read_u32(&data[off..off + 4]),
                sof_counter: LE::read_u16(&data[off + 4..off + 6]),
            });
        }

        if !self.is_isight {
            self.append(&data[header_len..]);
        }

        if flags.contains(PayloadFlags::EOF) && self.got_bytes > 0 {
            self.finish_frame();
        }
    }

    fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let space = self.outbuf.len() - self.got_bytes;
        let take = data.len().min(space);
        if take < data.len() {
            log::warn!(
                "frame exceeds the negotiated maximum of {} bytes, truncating",
                self.outbuf.len()
            );
            self.frame_error = true;
        }
        self.outbuf[self.got_bytes..self.got_bytes + take].copy_from_slice(&data[..take]);
        self.got_bytes += take;
    }

    /// Marks the frame under assembly as damaged; it is discarded at the
    /// next FID toggle.
    pub(crate) fn poison(&mut self) {
        self.frame_error = true;
    }

    /// Completes the frame under assembly: publish it through the hold
    /// buffer, or discard it if it was damaged.
    fn finish_frame(&mut self) {
        if self.frame_error {
            // The dropped frame keeps its sequence number; the callback
            // observes a gap.
            self.seq += 1;
            log::debug!("dropping damaged frame {}", self.seq);
        } else if self.got_bytes > 0 {
            self.seq += 1;
            let mut hold = self.shared.hold.lock().unwrap();
            mem::swap(&mut self.outbuf, &mut hold.holdbuf);
            hold.hold_bytes = self.got_bytes;
            hold.hold_pts = self.pts;
            hold.hold_scr = self.scr;
            hold.hold_seq = self.seq;
            hold.hold_captured_at = SystemTime::now();
            drop(hold);
            self.shared.frame_ready.notify_one();
        }

        self.got_bytes = 0;
        self.pts = None;
        self.scr = None;
        self.frame_error = false;
    }

    /// Wakes the delivery thread for shutdown after the transport reported
    /// a terminal status.
    fn signal_stop(&self) {
        let mut hold = self.shared.hold.lock().unwrap();
        hold.stop = true;
        drop(hold);
        self.shared.frame_ready.notify_all();
    }
}

/// Couples the reassembler to the transport's transfer completions.
pub(crate) struct EngineSink {
    assembler: FrameAssembler,
}

impl TransferSink for EngineSink {
    fn transfer_done(&mut self, transfer: &CompletedTransfer<'_>) -> SinkAction {
        match transfer.status {
            TransferStatus::Completed => {
                for packet in transfer.packets {
                    match packet.status {
                        TransferStatus::Completed => self.assembler.push_fragment(packet.data),
                        TransferStatus::TimedOut => {}
                        other => {
                            log::debug!("isochronous packet failed: {:?}", other);
                            self.assembler.poison();
                        }
                    }
                }
                SinkAction::Continue
            }
            // An empty service interval, not an error.
            TransferStatus::TimedOut => SinkAction::Continue,
            TransferStatus::Cancelled | TransferStatus::NoDevice => {
                log::debug!("stream transfer reported {:?}, winding down", transfer.status);
                self.assembler.signal_stop();
                SinkAction::Stop
            }
            status => {
                log::warn!("stream transfer failed with {:?}, resubmitting", status);
                SinkAction::Continue
            }
        }
    }
}

pub(crate) struct StreamState {
    driver: Box<dyn StreamDriver>,
    shared: Arc<StreamShared>,
    delivery: Option<thread::JoinHandle<()>>,
    interface_number: u8,
    reset_alt_setting: bool,
}

struct FrameShape {
    width: u16,
    height: u16,
    format: FourCc,
    buf_size: usize,
}

#[derive(Debug)]
struct EndpointChoice {
    kind: TransferKind,
    set_alt: Option<u8>,
}

/// Picks the alternate setting to stream on.
///
/// Isochronous endpoints: the smallest alternate setting whose
/// per-microframe bandwidth covers the negotiated payload size. Bulk
/// endpoints move whole payloads regardless of packet size, so the setting
/// they appear in is used as-is.
fn select_alt_setting(intf: &StreamingInterfaceDesc, ctrl: &StreamCtrl) -> Result<EndpointChoice> {
    let ep_addr = intf.endpoint_address();
    let mut best_iso: Option<(u8, u32)> = None;
    let mut saw_iso = false;

    for alt in intf.alt_settings() {
        for ep in &alt.endpoints {
            if ep.address != ep_addr {
                continue;
            }
            match ep.transfer_type() {
                EndpointTransferType::Bulk => {
                    return Ok(EndpointChoice {
                        kind: TransferKind::Bulk {
                            buf_len: ctrl.max_payload_transfer_size as usize,
                        },
                        set_alt: if alt.alt != 0 { Some(alt.alt) } else { None },
                    });
                }
                EndpointTransferType::Isochronous => {
                    saw_iso = true;
                    let bw = ep.bytes_per_microframe();
                    if bw >= ctrl.max_payload_transfer_size
                        && best_iso.map_or(true, |(_, best)| bw < best)
                    {
                        best_iso = Some((alt.alt, bw));
                    }
                }
                _ => {}
            }
        }
    }

    match best_iso {
        Some((alt, bw)) => {
            let packets = (ctrl.max_video_frame_size / bw.max(1) + 1).min(MAX_PACKETS_PER_TRANSFER);
            Ok(EndpointChoice {
                kind: TransferKind::Isochronous {
                    packet_len: bw as usize,
                    packets_per_transfer: packets.max(1) as usize,
                },
                set_alt: Some(alt),
            })
        }
        None if saw_iso => err(
            ErrorKind::InvalidMode,
            format!(
                "no alternate setting provides {} bytes per microframe",
                ctrl.max_payload_transfer_size
            ),
            Action::StartingStream,
        ),
        None => err(
            ErrorKind::InvalidDevice,
            format!(
                "streaming endpoint {:#04x} not found in any alternate setting",
                ep_addr
            ),
            Action::StartingStream,
        ),
    }
}

fn delivery_loop(
    shared: Arc<StreamShared>,
    shape: FrameShape,
    mut cb: Box<dyn FnMut(&Frame<'_>) + Send>,
) {
    let mut cbbuf = vec![0u8; shape.buf_size];
    let mut last_seq = 0u32;

    loop {
        let (bytes, pts, scr, seq, captured_at) = {
            let mut hold = shared.hold.lock().unwrap();
            while !hold.stop && hold.hold_seq == last_seq {
                hold = shared.frame_ready.wait(hold).unwrap();
            }
            if hold.hold_seq == last_seq {
                // Stopping, and nothing left to deliver.
                return;
            }

            // Take the frame by swapping buffers; the engine continues into
            // the buffer we hand back and can never touch this one.
            mem::swap(&mut hold.holdbuf, &mut cbbuf);
            hold.last_polled_seq = hold.hold_seq;
            last_seq = hold.hold_seq;
            (
                hold.hold_bytes,
                hold.hold_pts,
                hold.hold_scr,
                hold.hold_seq,
                hold.hold_captured_at,
            )
        };

        let frame = Frame {
            width: shape.width,
            height: shape.height,
            format: shape.format,
            data: &cbbuf[..bytes],
            sequence: seq,
            pts,
            scr,
            captured_at,
        };
        cb(&frame);
    }
}

impl DeviceHandle {
    /// Commits the negotiated parameters and starts streaming.
    ///
    /// `cb` runs on a dedicated delivery thread, one frame at a time, in
    /// capture order. A slow callback does not stall the transfer pump;
    /// frames it misses are dropped.
    pub fn start_streaming(
        &mut self,
        ctrl: &StreamCtrl,
        cb: impl FnMut(&Frame<'_>) + Send + 'static,
    ) -> Result<()> {
        if self.streaming.is_some() {
            return err(
                ErrorKind::Busy,
                "the handle is already streaming",
                Action::StartingStream,
            );
        }

        let intf = match self
            .info
            .streaming_interfaces()
            .iter()
            .find(|i| i.interface_number() == ctrl.interface_number)
        {
            Some(intf) => intf,
            None => {
                return err(
                    ErrorKind::InvalidParam,
                    "stream control block does not belong to this device",
                    Action::StartingStream,
                )
            }
        };
        let frame_desc = intf
            .find_format(ctrl.format_index)
            .and_then(|format| Some((format, format.find_frame(ctrl.frame_index)?)));
        let (format, frame) = match frame_desc {
            Some(pair) => pair,
            None => {
                return err(
                    ErrorKind::InvalidParam,
                    format!(
                        "device has no format {} with frame {}",
                        ctrl.format_index, ctrl.frame_index
                    ),
                    Action::StartingStream,
                )
            }
        };

        let max_frame_size = ctrl.max_video_frame_size as usize;
        if max_frame_size == 0 {
            return err(
                ErrorKind::InvalidDevice,
                "device negotiated a zero dwMaxVideoFrameSize",
                Action::StartingStream,
            );
        }
        if ctrl.max_payload_transfer_size == 0 {
            return err(
                ErrorKind::InvalidDevice,
                "device negotiated a zero dwMaxPayloadTransferSize",
                Action::StartingStream,
            );
        }

        let shape = FrameShape {
            width: frame.width(),
            height: frame.height(),
            format: format.fourcc(),
            buf_size: max_frame_size,
        };

        // Make the parameters binding before touching the endpoint.
        self.commit_stream_ctrl(ctrl)?;

        let choice = select_alt_setting(intf, ctrl)?;
        let interface_number = intf.interface_number();
        let endpoint = intf.endpoint_address();

        self.usb
            .claim_interface(interface_number)
            .during(Action::StartingStream)?;
        if let Some(alt) = choice.set_alt {
            if let Err(e) = self.usb.set_alt_setting(interface_number, alt) {
                let _ = self.usb.release_interface(interface_number);
                return Err(e);
            }
        }

        let shared = Arc::new(StreamShared {
            hold: Mutex::new(HoldState {
                stop: false,
                holdbuf: vec![0; max_frame_size],
                hold_bytes: 0,
                hold_pts: None,
                hold_scr: None,
                hold_captured_at: SystemTime::now(),
                hold_seq: 0,
                last_polled_seq: 0,
            }),
            frame_ready: Condvar::new(),
        });

        let sink = EngineSink {
            assembler: FrameAssembler::new(shared.clone(), max_frame_size, self.is_isight),
        };
        let spec = StreamSpec {
            endpoint,
            kind: choice.kind,
            pool_size: TRANSFER_POOL,
        };
        let driver = match self.usb.begin_stream(spec, Box::new(sink)) {
            Ok(driver) => driver,
            Err(e) => {
                let _ = self.usb.release_interface(interface_number);
                return Err(e);
            }
        };

        let delivery = thread::Builder::new()
            .name("uvc-frame-delivery".into())
            .spawn({
                let shared = shared.clone();
                let cb = Box::new(cb);
                move || delivery_loop(shared, shape, cb)
            });
        let delivery = match delivery {
            Ok(handle) => handle,
            Err(e) => {
                let mut driver = driver;
                driver.stop();
                let _ = self.usb.release_interface(interface_number);
                return Err(crate::Error::from(e).during(Action::StartingStream));
            }
        };

        self.streaming = Some(StreamState {
            driver,
            shared,
            delivery: Some(delivery),
            interface_number,
            reset_alt_setting: choice.set_alt.is_some(),
        });
        Ok(())
    }

    /// Stops streaming: cancels and drains the in-flight transfers, joins
    /// the delivery thread, and releases the streaming interface.
    ///
    /// Calling this without an active stream is a no-op.
    pub fn stop_streaming(&mut self) {
        let mut state = match self.streaming.take() {
            Some(state) => state,
            None => return,
        };

        {
            let mut hold = state.shared.hold.lock().unwrap();
            hold.stop = true;
        }
        state.driver.stop();
        state.shared.frame_ready.notify_all();
        if let Some(thread) = state.delivery.take() {
            let _ = thread.join();
        }

        if state.reset_alt_setting {
            if let Err(e) = self.usb.set_alt_setting(state.interface_number, 0) {
                log::warn!("could not reset alternate setting: {}", e);
            }
        }
        if let Err(e) = self.usb.release_interface(state.interface_number) {
            log::warn!("could not release streaming interface: {}", e);
        }
    }

    /// Whether the handle currently holds streaming state.
    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }
}
