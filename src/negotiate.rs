//! Stream parameter negotiation: the Probe/Commit handshake (UVC 4.3.1.1).
//!
//! Probe and Commit share one wire block whose length depends on the
//! device's `bcdUVC`: 26 bytes for 1.0, 34 for 1.1, 48 for 1.5. The host
//! proposes a format/frame/interval triple through the Probe control, the
//! device answers with the derived transfer sizes, and Commit makes the
//! result binding for the streaming endpoint.

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};

use crate::{
    control::{Request, PROBE_TIMEOUT},
    desc::FourCc,
    error::{err, Action, ErrorKind},
    util::BcdVersion,
    DeviceHandle, Result,
};

/// VideoStreaming interface control selectors (A.9.7).
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub(crate) enum VsControlId {
    Undefined = 0x00,
    Probe = 0x01,
    Commit = 0x02,
    StillProbe = 0x03,
    StillCommit = 0x04,
    StillImageTrigger = 0x05,
    StreamErrorCode = 0x06,
    GenerateKeyFrame = 0x07,
    UpdateFrameSegment = 0x08,
    SynchDelay = 0x09,
}

bitflags! {
    /// Which fields of a probe proposal the device must keep fixed.
    #[derive(Default)]
    pub struct ProbeHint: u16 {
        const FIX_FRAME_INTERVAL = 1 << 0;
        const FIX_KEY_FRAME_RATE = 1 << 1;
        const FIX_P_FRAME_RATE = 1 << 2;
        const FIX_COMP_QUALITY = 1 << 3;
        const FIX_COMP_WINDOW_SIZE = 1 << 4;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct FramingInfo: u8 {
        const FID_REQUIRED = 1 << 0;
        const EOF_SUPPORTED = 1 << 1;
    }
}

/// The Probe/Commit parameter block.
///
/// Produced by [`DeviceHandle::stream_ctrl_for`]; the caller may adjust the
/// public fields before handing the block to
/// [`DeviceHandle::start_streaming`](crate::DeviceHandle::start_streaming),
/// which commits it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCtrl {
    pub hint: ProbeHint,
    /// 1-based format index on the streaming interface.
    pub format_index: u8,
    /// 1-based frame index within the format.
    pub frame_index: u8,
    /// Frame interval in 100 ns units.
    pub frame_interval: u32,
    pub key_frame_rate: u16,
    pub p_frame_rate: u16,
    pub comp_quality: u16,
    pub comp_window_size: u16,
    /// Internal device latency in ms.
    pub delay: u16,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
    pub clock_frequency: u32,
    pub framing_info: FramingInfo,
    pub preferred_version: u8,
    pub min_version: u8,
    pub max_version: u8,
    pub(crate) interface_number: u8,
}

impl StreamCtrl {
    /// The streaming interface this block was negotiated on.
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    /// On-the-wire block size for a given `bcdUVC`.
    pub(crate) fn wire_len(version: BcdVersion) -> usize {
        if version.0 >= 0x0150 {
            48
        } else if version.0 >= 0x0110 {
            34
        } else {
            26
        }
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        LE::write_u16(&mut buf[0..2], self.hint.bits());
        buf[2] = self.format_index;
        buf[3] = self.frame_index;
        LE::write_u32(&mut buf[4..8], self.frame_interval);
        LE::write_u16(&mut buf[8..10], self.key_frame_rate);
        LE::write_u16(&mut buf[10..12], self.p_frame_rate);
        LE::write_u16(&mut buf[12..14], self.comp_quality);
        LE::write_u16(&mut buf[14..16], self.comp_window_size);
        LE::write_u16(&mut buf[16..18], self.delay);
        LE::write_u32(&mut buf[18..22], self.max_video_frame_size);
        LE::write_u32(&mut buf[22..26], self.max_payload_transfer_size);
        if buf.len() >= 34 {
            LE::write_u32(&mut buf[26..30], self.clock_frequency);
            buf[30] = self.framing_info.bits();
            buf[31] = self.preferred_version;
            buf[32] = self.min_version;
            buf[33] = self.max_version;
        }
        // Bytes 34..48 (the UVC 1.5 usage and codec fields) are not modeled
        // and stay zero.
    }

    pub(crate) fn decode(buf: &[u8], interface_number: u8) -> Self {
        let mut ctrl = StreamCtrl {
            interface_number,
            ..Default::default()
        };
        ctrl.hint = ProbeHint::from_bits_truncate(LE::read_u16(&buf[0..2]));
        ctrl.format_index = buf[2];
        ctrl.frame_index = buf[3];
        ctrl.frame_interval = LE::read_u32(&buf[4..8]);
        ctrl.key_frame_rate = LE::read_u16(&buf[8..10]);
        ctrl.p_frame_rate = LE::read_u16(&buf[10..12]);
        ctrl.comp_quality = LE::read_u16(&buf[12..14]);
        ctrl.comp_window_size = LE::read_u16(&buf[14..16]);
        ctrl.delay = LE::read_u16(&buf[16..18]);
        ctrl.max_video_frame_size = LE::read_u32(&buf[18..22]);
        ctrl.max_payload_transfer_size = LE::read_u32(&buf[22..26]);
        if buf.len() >= 34 {
            ctrl.clock_frequency = LE::read_u32(&buf[26..30]);
            ctrl.framing_info = FramingInfo::from_bits_truncate(buf[30]);
            ctrl.preferred_version = buf[31];
            ctrl.min_version = buf[32];
            ctrl.max_version = buf[33];
        }
        ctrl
    }
}

impl DeviceHandle {
    /// Negotiates stream parameters for a format, image size, and frame
    /// rate.
    ///
    /// The triple is resolved against the descriptor tree (frame rates
    /// must match a discrete interval exactly, or are clamped and snapped
    /// into a continuous range), then the probe phase runs: the device's
    /// current proposal is fetched, the chosen fields are overlaid and sent
    /// back, and the device's answer (which may adjust the transfer sizes)
    /// is returned. Nothing is committed yet.
    pub fn stream_ctrl_for(
        &self,
        fourcc: FourCc,
        width: u16,
        height: u16,
        fps: u32,
    ) -> Result<StreamCtrl> {
        for intf in self.info.streaming_interfaces() {
            for format in intf.formats() {
                if format.fourcc() != fourcc {
                    continue;
                }
                for frame in format.frames() {
                    if frame.width() != width || frame.height() != height {
                        continue;
                    }
                    if let Some(interval) = frame.interval_for_fps(fps) {
                        return self.probe_stream_ctrl(
                            intf.interface_number(),
                            format.format_index(),
                            frame.frame_index(),
                            interval,
                        );
                    }
                }
            }
        }
        err(
            ErrorKind::NotFound,
            format!(
                "device offers no {} stream at {}x{} with {} fps",
                fourcc, width, height, fps
            ),
            Action::NegotiatingStream,
        )
    }

    /// Runs the probe phase for an explicitly chosen format, frame, and
    /// interval.
    pub fn probe_stream_ctrl(
        &self,
        interface_number: u8,
        format_index: u8,
        frame_index: u8,
        frame_interval: u32,
    ) -> Result<StreamCtrl> {
        let len = StreamCtrl::wire_len(self.info.uvc_version());
        let mut storage = [0u8; 48];
        let buf = &mut storage[..len];

        // Fetch the device's current proposal first; it seeds the fields we
        // don't choose ourselves.
        let n = self.read_entity(
            interface_number,
            0,
            Request::GetCur,
            VsControlId::Probe as u8,
            buf,
            PROBE_TIMEOUT,
            Action::NegotiatingStream,
        )?;
        if n < 26 {
            return err(
                ErrorKind::InvalidDevice,
                format!("device answered a probe with only {} bytes", n),
                Action::NegotiatingStream,
            );
        }

        let mut ctrl = StreamCtrl::decode(&buf[..n], interface_number);
        ctrl.hint = ProbeHint::FIX_FRAME_INTERVAL;
        ctrl.format_index = format_index;
        ctrl.frame_index = frame_index;
        ctrl.frame_interval = frame_interval;
        log::debug!("negotiating parameters: {:?}", ctrl);

        ctrl.encode(buf);
        self.write_entity(
            interface_number,
            0,
            VsControlId::Probe as u8,
            buf,
            PROBE_TIMEOUT,
            Action::NegotiatingStream,
        )?;

        // Read back what the device agreed to.
        let n = self.read_entity(
            interface_number,
            0,
            Request::GetCur,
            VsControlId::Probe as u8,
            buf,
            PROBE_TIMEOUT,
            Action::NegotiatingStream,
        )?;
        if n < 26 {
            return err(
                ErrorKind::InvalidDevice,
                format!("device answered a probe with only {} bytes", n),
                Action::NegotiatingStream,
            );
        }

        let ctrl = StreamCtrl::decode(&buf[..n], interface_number);
        log::debug!("final parameters: {:?}", ctrl);
        Ok(ctrl)
    }

    pub(crate) fn commit_stream_ctrl(&self, ctrl: &StreamCtrl) -> Result<()> {
        let len = StreamCtrl::wire_len(self.info.uvc_version());
        let mut buf = [0u8; 48];
        ctrl.encode(&mut buf[..len]);
        self.write_entity(
            ctrl.interface_number,
            0,
            VsControlId::Commit as u8,
            &buf[..len],
            PROBE_TIMEOUT,
            Action::NegotiatingStream,
        )
    }

    /// Reads the streaming error code of a VideoStreaming interface
    /// (`VS_STREAM_ERROR_CODE_CONTROL`).
    pub fn stream_error_code(&self, interface_number: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_entity(
            interface_number,
            0,
            Request::GetCur,
            VsControlId::StreamErrorCode as u8,
            &mut buf,
            crate::control::CONTROL_TIMEOUT,
            Action::ReadingControl,
        )?;
        Ok(buf[0])
    }
}
