//! Scripted in-memory transport for driving the driver core in tests.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use uvc_host::transport::{
    CompletedTransfer, DeviceIds, Packet, SinkAction, StreamDriver, StreamSpec, TransferKind,
    TransferSink, TransferStatus, TransportDevice, TransportHandle, UsbTransport,
};
use uvc_host::{Result, UvcContext};

pub const FIXTURE: &[u8] = include_bytes!("../data/descriptor_logitech_c920.bin");

/// One item of a canned transfer transcript.
pub enum Step {
    /// A completed transfer carrying one payload fragment.
    Fragment(Vec<u8>),
    /// A transfer completing with the given status and no data.
    Transfer(TransferStatus),
    Delay(Duration),
}

pub struct Script {
    pub steps: Vec<Step>,
}

/// Probe/commit bookkeeping plus a log of interface management calls.
pub struct ControlState {
    /// Current probe block; `GET_CUR(PROBE)` answers with this.
    pub probe: Mutex<Vec<u8>>,
    /// Every `SET_CUR(COMMIT)` payload, in order.
    pub commits: Mutex<Vec<Vec<u8>>>,
    /// Currently claimed interfaces.
    pub claimed: Mutex<Vec<u8>>,
    /// Every `set_alt_setting` call, in order.
    pub alt_log: Mutex<Vec<(u8, u8)>>,
    /// Fields the device forces into every probe answer.
    forced_video_frame_size: u32,
    forced_payload_size: u32,
}

impl ControlState {
    pub fn new(video_frame_size: u32, payload_size: u32) -> Arc<Self> {
        let state = ControlState {
            probe: Mutex::new(vec![0; 34]),
            commits: Mutex::new(Vec::new()),
            claimed: Mutex::new(Vec::new()),
            alt_log: Mutex::new(Vec::new()),
            forced_video_frame_size: video_frame_size,
            forced_payload_size: payload_size,
        };
        state.patch_probe();
        Arc::new(state)
    }

    /// Overwrites the derived transfer size fields, like a device adjusting
    /// a proposal.
    fn patch_probe(&self) {
        let mut probe = self.probe.lock().unwrap();
        if probe.len() >= 26 {
            probe[18..22].copy_from_slice(&self.forced_video_frame_size.to_le_bytes());
            probe[22..26].copy_from_slice(&self.forced_payload_size.to_le_bytes());
        }
    }
}

pub struct MockTransport {
    ids: DeviceIds,
    config: Vec<u8>,
    control: Arc<ControlState>,
    stream_script: Arc<Script>,
    status_script: Arc<Script>,
}

/// A context with a single scripted device attached.
pub fn mock_context(config: &[u8], state: Arc<ControlState>, steps: Vec<Step>) -> UvcContext {
    mock_context_with_status(config, state, steps, Vec::new())
}

pub fn mock_context_with_status(
    config: &[u8],
    state: Arc<ControlState>,
    steps: Vec<Step>,
    status_steps: Vec<Step>,
) -> UvcContext {
    UvcContext::with_transport(MockTransport {
        ids: DeviceIds {
            vendor_id: 0x046d,
            product_id: 0x082d,
        },
        config: config.to_vec(),
        control: state,
        stream_script: Arc::new(Script { steps }),
        status_script: Arc::new(Script {
            steps: status_steps,
        }),
    })
}

impl UsbTransport for MockTransport {
    fn devices(&self) -> Result<Vec<Box<dyn TransportDevice>>> {
        Ok(vec![Box::new(MockDevice {
            ids: self.ids,
            config: self.config.clone(),
            control: self.control.clone(),
            stream_script: self.stream_script.clone(),
            status_script: self.status_script.clone(),
        })])
    }
}

struct MockDevice {
    ids: DeviceIds,
    config: Vec<u8>,
    control: Arc<ControlState>,
    stream_script: Arc<Script>,
    status_script: Arc<Script>,
}

impl TransportDevice for MockDevice {
    fn ids(&self) -> Result<DeviceIds> {
        Ok(self.ids)
    }

    fn active_config(&self) -> Result<Vec<u8>> {
        Ok(self.config.clone())
    }

    fn open(&self) -> Result<Arc<dyn TransportHandle>> {
        Ok(Arc::new(MockHandle {
            control: self.control.clone(),
            stream_script: self.stream_script.clone(),
            status_script: self.status_script.clone(),
        }))
    }
}

struct MockHandle {
    control: Arc<ControlState>,
    stream_script: Arc<Script>,
    status_script: Arc<Script>,
}

const SELECTOR_PROBE: u8 = 0x01;
const SELECTOR_COMMIT: u8 = 0x02;
const SET_CUR: u8 = 0x01;
const GET_CUR: u8 = 0x81;

impl TransportHandle for MockHandle {
    fn read_control(
        &self,
        _request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let selector = (value >> 8) as u8;
        match (request, selector) {
            (GET_CUR, SELECTOR_PROBE) => {
                let probe = self.control.probe.lock().unwrap();
                let n = probe.len().min(buf.len());
                buf[..n].copy_from_slice(&probe[..n]);
                Ok(n)
            }
            _ => {
                // Any other control reads back zeroes.
                for b in buf.iter_mut() {
                    *b = 0;
                }
                Ok(buf.len())
            }
        }
    }

    fn write_control(
        &self,
        _request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let selector = (value >> 8) as u8;
        match (request, selector) {
            (SET_CUR, SELECTOR_PROBE) => {
                *self.control.probe.lock().unwrap() = data.to_vec();
                self.control.patch_probe();
            }
            (SET_CUR, SELECTOR_COMMIT) => {
                self.control.commits.lock().unwrap().push(data.to_vec());
            }
            _ => {}
        }
        Ok(data.len())
    }

    fn claim_interface(&self, interface: u8) -> Result<()> {
        self.control.claimed.lock().unwrap().push(interface);
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        let mut claimed = self.control.claimed.lock().unwrap();
        if let Some(pos) = claimed.iter().position(|&i| i == interface) {
            claimed.remove(pos);
        }
        Ok(())
    }

    fn set_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<()> {
        self.control
            .alt_log
            .lock()
            .unwrap()
            .push((interface, alt_setting));
        Ok(())
    }

    fn begin_stream(
        &self,
        spec: StreamSpec,
        mut sink: Box<dyn TransferSink>,
    ) -> Result<Box<dyn StreamDriver>> {
        let script = match spec.kind {
            TransferKind::Interrupt { .. } => self.status_script.clone(),
            _ => self.stream_script.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name("mock-usb-events".into())
            .spawn({
                let stop = stop.clone();
                move || {
                    for step in &script.steps {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        match step {
                            Step::Fragment(data) => {
                                let packets = [Packet {
                                    status: TransferStatus::Completed,
                                    data,
                                }];
                                let done = sink.transfer_done(&CompletedTransfer {
                                    status: TransferStatus::Completed,
                                    packets: &packets,
                                });
                                if done == SinkAction::Stop {
                                    return;
                                }
                            }
                            Step::Transfer(status) => {
                                let done = sink.transfer_done(&CompletedTransfer {
                                    status: *status,
                                    packets: &[],
                                });
                                if done == SinkAction::Stop || status.is_terminal() {
                                    return;
                                }
                            }
                            Step::Delay(duration) => thread::sleep(*duration),
                        }
                    }
                    // Script exhausted: idle until the stream is stopped.
                    while !stop.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(1));
                    }
                    sink.transfer_done(&CompletedTransfer {
                        status: TransferStatus::Cancelled,
                        packets: &[],
                    });
                }
            })
            .unwrap();

        Ok(Box::new(MockDriver {
            stop,
            thread: Some(thread),
        }))
    }
}

struct MockDriver {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StreamDriver for MockDriver {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls `cond` until it holds or the deadline passes.
pub fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// A payload fragment with a minimal 2-byte header.
pub fn fragment(fid: bool, eof: bool, payload: &[u8]) -> Vec<u8> {
    let mut flags = 0u8;
    if fid {
        flags |= 0x01;
    }
    if eof {
        flags |= 0x02;
    }
    let mut data = vec![2, flags];
    data.extend_from_slice(payload);
    data
}

/// `frames` frames of `frags_per_frame` fragments each, alternating FID,
/// with `payload` bytes of data per fragment. Frames are spaced 2 ms apart
/// so a prompt consumer sees every one of them; the final fragment carries
/// EOF so the last frame completes without a trailing toggle.
pub fn frame_transcript(frames: u32, frags_per_frame: u32, payload: usize) -> Vec<Step> {
    let mut steps = Vec::new();
    for frame in 0..frames {
        let fid = frame % 2 == 1;
        for frag in 0..frags_per_frame {
            let last = frame == frames - 1 && frag == frags_per_frame - 1;
            let body = vec![frame as u8; payload];
            steps.push(Step::Fragment(fragment(fid, last, &body)));
        }
        steps.push(Step::Delay(Duration::from_millis(2)));
    }
    steps
}
