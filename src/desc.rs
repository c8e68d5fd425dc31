//! The parsed UVC descriptor tree.
//!
//! A UVC function is described entirely by class-specific interface
//! descriptors inside the configuration descriptor:
//! - The *VideoControl* interface declares the device's internal topology:
//!   input terminals (eg. the camera sensor), processing units, and
//!   extension units.
//! - Each *VideoStreaming* interface declares the formats it can transport,
//!   and each format the frame sizes and rates it supports.
//!
//! [`parse::parse_device_info`] builds this tree from the raw configuration
//! blob. The tree is immutable afterwards; all queries here are pure and may
//! be called while streaming.

pub(crate) mod parse;

use std::{fmt, num::NonZeroU8};

use bitflags::bitflags;
use uuid::Uuid;

use crate::util::BcdVersion;

/// Four-character code identifying an image encoding, eg. `YUY2` or `MJPG`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Identifies a terminal declared by the VideoControl interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermId(NonZeroU8);

impl TermId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u8 {
        self.0.into()
    }
}

/// Identifies a unit declared by the VideoControl interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitId(NonZeroU8);

impl UnitId {
    pub(crate) fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u8 {
        self.0.into()
    }
}

/// Everything the configuration descriptor tells us about a UVC function.
#[derive(Debug)]
pub struct DeviceInfo {
    pub(crate) control: ControlInterface,
    pub(crate) streaming: Vec<StreamingInterfaceDesc>,
}

impl DeviceInfo {
    pub fn control_interface(&self) -> &ControlInterface {
        &self.control
    }

    pub fn streaming_interfaces(&self) -> &[StreamingInterfaceDesc] {
        &self.streaming
    }

    pub fn uvc_version(&self) -> BcdVersion {
        self.control.uvc_version
    }

    /// Looks up a format by its (1-based) index across all streaming
    /// interfaces, returning the interface it belongs to as well.
    pub fn find_format(&self, format_index: u8) -> Option<(&StreamingInterfaceDesc, &FormatDesc)> {
        self.streaming
            .iter()
            .find_map(|intf| intf.find_format(format_index).map(|fmt| (intf, fmt)))
    }

    /// Returns the streaming interface a format descriptor belongs to.
    pub fn interface_for_format(&self, format: &FormatDesc) -> Option<&StreamingInterfaceDesc> {
        self.streaming
            .iter()
            .find(|intf| intf.formats.iter().any(|f| std::ptr::eq(f, format)))
    }
}

/// The VideoControl interface and the device topology it declares.
#[derive(Debug)]
pub struct ControlInterface {
    pub(crate) interface_number: u8,
    pub(crate) uvc_version: BcdVersion,
    pub(crate) total_length: u16,
    pub(crate) clock_frequency: u32,
    pub(crate) streaming_interface_numbers: Vec<u8>,
    /// Interrupt endpoint carrying status packets. Optional.
    pub(crate) status_endpoint: Option<u8>,
    pub(crate) input_terminals: Vec<InputTerminalDesc>,
    pub(crate) processing_units: Vec<ProcessingUnitDesc>,
    pub(crate) extension_units: Vec<ExtensionUnitDesc>,
}

impl ControlInterface {
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    pub fn uvc_version(&self) -> BcdVersion {
        self.uvc_version
    }

    pub fn clock_frequency(&self) -> u32 {
        self.clock_frequency
    }

    pub fn status_endpoint(&self) -> Option<u8> {
        self.status_endpoint
    }

    /// `wTotalLength` of the class-specific VideoControl descriptors.
    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    /// Interface numbers of the VideoStreaming interfaces in this function.
    pub fn streaming_interface_numbers(&self) -> &[u8] {
        &self.streaming_interface_numbers
    }

    pub fn input_terminals(&self) -> &[InputTerminalDesc] {
        &self.input_terminals
    }

    pub fn processing_units(&self) -> &[ProcessingUnitDesc] {
        &self.processing_units
    }

    pub fn extension_units(&self) -> &[ExtensionUnitDesc] {
        &self.extension_units
    }

    /// Returns the first input terminal that is a camera.
    pub fn camera_terminal(&self) -> Option<&InputTerminalDesc> {
        self.input_terminals.iter().find(|t| t.is_camera())
    }
}

primitive_enum! {
    pub enum InputTerminalType: u16 {
        UsbVendorSpecific = 0x0100,
        UsbStreaming = 0x0101,

        InVendorSpecific = 0x0200,
        InCamera = 0x0201,
        InMediaTransport = 0x0202,

        ExtVendorSpecific = 0x0400,
        ExtCompositeConnector = 0x0401,
        ExtSVideoConnector = 0x0402,
        ExtComponentConnector = 0x0403,
    }
}

#[derive(Debug)]
pub struct InputTerminalDesc {
    pub(crate) id: TermId,
    pub(crate) terminal_type: u16,
    pub(crate) assoc: Option<TermId>,
    pub(crate) string_index: u8,
    pub(crate) camera: Option<CameraTerminalDesc>,
}

impl InputTerminalDesc {
    pub fn id(&self) -> TermId {
        self.id
    }

    pub fn terminal_type_raw(&self) -> u16 {
        self.terminal_type
    }

    pub fn terminal_type(&self) -> Option<InputTerminalType> {
        InputTerminalType::from_raw(self.terminal_type)
    }

    pub fn is_camera(&self) -> bool {
        self.camera.is_some()
    }

    pub fn camera(&self) -> Option<&CameraTerminalDesc> {
        self.camera.as_ref()
    }

    /// The associated output terminal, if the device declares one.
    pub fn associated_terminal(&self) -> Option<TermId> {
        self.assoc
    }

    pub fn string_index(&self) -> u8 {
        self.string_index
    }
}

/// Camera-specific properties of an input terminal of type `0x0201`.
#[derive(Debug)]
pub struct CameraTerminalDesc {
    pub(crate) objective_focal_length_min: u16,
    pub(crate) objective_focal_length_max: u16,
    pub(crate) ocular_focal_length: u16,
    pub(crate) controls: CameraControls,
}

impl CameraTerminalDesc {
    pub fn objective_focal_length(&self) -> (u16, u16) {
        (
            self.objective_focal_length_min,
            self.objective_focal_length_max,
        )
    }

    pub fn ocular_focal_length(&self) -> u16 {
        self.ocular_focal_length
    }

    pub fn controls(&self) -> CameraControls {
        self.controls
    }
}

bitflags! {
    pub struct CameraControls: u32 {
        const SCANNING_MODE = 1 << 0;
        const AUTO_EXPOSURE_MODE = 1 << 1;
        const AUTO_EXPOSURE_PRIORITY = 1 << 2;
        const EXPOSURE_TIME_ABS = 1 << 3;
        const EXPOSURE_TIME_REL = 1 << 4;
        const FOCUS_ABS = 1 << 5;
        const FOCUS_REL = 1 << 6;
        const IRIS_ABS = 1 << 7;
        const IRIS_REL = 1 << 8;
        const ZOOM_ABS = 1 << 9;
        const ZOOM_REL = 1 << 10;
        const PAN_TILT_ABS = 1 << 11;
        const PAN_TILT_REL = 1 << 12;
        const ROLL_ABS = 1 << 13;
        const ROLL_REL = 1 << 14;

        const FOCUS_AUTO = 1 << 17;
        const PRIVACY = 1 << 18;
        const FOCUS_SIMPLE = 1 << 19;
        const WINDOW = 1 << 20;
        const REGION_OF_INTEREST = 1 << 21;
    }
}

#[derive(Debug)]
pub struct ProcessingUnitDesc {
    pub(crate) id: UnitId,
    pub(crate) source_id: u8,
    pub(crate) max_multiplier: u16,
    pub(crate) controls: ProcessingUnitControls,
    pub(crate) string_index: u8,
    pub(crate) video_standards: VideoStandards,
}

impl ProcessingUnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn source_id(&self) -> u8 {
        self.source_id
    }

    pub fn max_multiplier(&self) -> u16 {
        self.max_multiplier
    }

    pub fn controls(&self) -> ProcessingUnitControls {
        self.controls
    }

    pub fn video_standards(&self) -> VideoStandards {
        self.video_standards
    }

    pub fn string_index(&self) -> u8 {
        self.string_index
    }
}

bitflags! {
    pub struct ProcessingUnitControls: u32 {
        const BRIGHTNESS                     = 1 << 0;
        const CONTRAST                       = 1 << 1;
        const HUE                            = 1 << 2;
        const SATURATION                     = 1 << 3;
        const SHARPNESS                      = 1 << 4;
        const GAMMA                          = 1 << 5;
        const WHITE_BALANCE_TEMPERATURE      = 1 << 6;
        const WHITE_BALANCE_COMPONENT        = 1 << 7;
        const BACKLIGHT_COMPENSATION         = 1 << 8;
        const GAIN                           = 1 << 9;
        const POWER_LINE_FREQUENCY           = 1 << 10;
        const HUE_AUTO                       = 1 << 11;
        const WHITE_BALANCE_TEMPERATURE_AUTO = 1 << 12;
        const WHITE_BALANCE_COMPONENT_AUTO   = 1 << 13;
        const DIGITAL_MULTIPLIER             = 1 << 14;
        const DIGITAL_MULTIPLIER_LIMIT       = 1 << 15;
        const ANALOG_VIDEO_STANDARD          = 1 << 16;
        const ANALOG_VIDEO_LOCK_STATUS       = 1 << 17;
        const CONTRAST_AUTO                  = 1 << 18;
    }
}

bitflags! {
    pub struct VideoStandards: u8 {
        const NONE         = 1 << 0;
        const NTSC_525_60  = 1 << 1;
        const PAL_625_50   = 1 << 2;
        const SECAM_625_50 = 1 << 3;
        const NTSC_625_50  = 1 << 4;
        const PAL_525_60   = 1 << 5;
    }
}

#[derive(Debug)]
pub struct ExtensionUnitDesc {
    pub(crate) id: UnitId,
    pub(crate) extension_code: Uuid,
    pub(crate) num_controls: u8,
    pub(crate) sources: Vec<u8>,
    pub(crate) controls_bitmap: Vec<u8>,
}

impl ExtensionUnitDesc {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn extension_code(&self) -> Uuid {
        self.extension_code
    }

    pub fn num_controls(&self) -> u8 {
        self.num_controls
    }

    pub fn controls_bitmap(&self) -> &[u8] {
        &self.controls_bitmap
    }

    /// IDs of the entities this unit takes its inputs from.
    pub fn sources(&self) -> &[u8] {
        &self.sources
    }
}

/// A VideoStreaming interface and the formats it offers.
#[derive(Debug)]
pub struct StreamingInterfaceDesc {
    pub(crate) interface_number: u8,
    pub(crate) total_length: u16,
    pub(crate) endpoint_address: u8,
    pub(crate) terminal_link: Option<TermId>,
    pub(crate) info: StreamingInterfaceInfo,
    pub(crate) still_capture_method: u8,
    pub(crate) trigger_support: u8,
    pub(crate) trigger_usage: u8,
    pub(crate) format_controls: Vec<u64>,
    pub(crate) formats: Vec<FormatDesc>,
    pub(crate) alt_settings: Vec<AltSetting>,
}

impl StreamingInterfaceDesc {
    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    /// Address of the USB endpoint that carries this interface's video data.
    pub fn endpoint_address(&self) -> u8 {
        self.endpoint_address
    }

    /// The output terminal this interface is wired to.
    pub fn terminal_link(&self) -> Option<TermId> {
        self.terminal_link
    }

    pub fn formats(&self) -> &[FormatDesc] {
        &self.formats
    }

    pub fn find_format(&self, format_index: u8) -> Option<&FormatDesc> {
        self.formats.iter().find(|f| f.format_index == format_index)
    }

    /// `wTotalLength` of the class-specific VideoStreaming descriptors.
    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    pub fn info(&self) -> StreamingInterfaceInfo {
        self.info
    }

    /// Still-capture method advertised by the input header (0 = none).
    pub fn still_capture_method(&self) -> u8 {
        self.still_capture_method
    }

    pub fn trigger_support(&self) -> u8 {
        self.trigger_support
    }

    pub fn trigger_usage(&self) -> u8 {
        self.trigger_usage
    }

    /// Per-format control bitmaps from the input header.
    pub fn format_controls(&self) -> &[u64] {
        &self.format_controls
    }

    pub(crate) fn alt_settings(&self) -> &[AltSetting] {
        &self.alt_settings
    }
}

bitflags! {
    pub struct StreamingInterfaceInfo: u8 {
        const DYNAMIC_FORMAT_CHANGE_SUPPORTED = 1 << 0;
    }
}

/// An alternate setting of a streaming interface with its endpoints.
#[derive(Debug)]
pub(crate) struct AltSetting {
    pub(crate) alt: u8,
    pub(crate) endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EndpointInfo {
    pub(crate) address: u8,
    pub(crate) attributes: u8,
    pub(crate) max_packet_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointTransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointInfo {
    pub(crate) fn transfer_type(&self) -> EndpointTransferType {
        match self.attributes & 0x03 {
            0 => EndpointTransferType::Control,
            1 => EndpointTransferType::Isochronous,
            2 => EndpointTransferType::Bulk,
            _ => EndpointTransferType::Interrupt,
        }
    }

    /// Bytes this endpoint can move per microframe: the base packet size
    /// times the additional-transaction count in bits 12..11.
    pub(crate) fn bytes_per_microframe(&self) -> u32 {
        let base = u32::from(self.max_packet_size & 0x07ff);
        let extra = u32::from((self.max_packet_size >> 11) & 0x03);
        base * (extra + 1)
    }
}

/// A video format offered by a streaming interface.
#[derive(Debug)]
pub struct FormatDesc {
    pub(crate) format_index: u8,
    /// `bNumFrameDescriptors` as declared on the wire; `frames` may hold
    /// fewer if the configuration was truncated.
    pub(crate) num_frame_descriptors: u8,
    pub(crate) default_frame_index: u8,
    pub(crate) fourcc: FourCc,
    pub(crate) aspect_ratio: (u8, u8),
    pub(crate) interlace_flags: u8,
    pub(crate) copy_protect: u8,
    pub(crate) kind: FormatKind,
    pub(crate) frames: Vec<FrameDesc>,
}

impl FormatDesc {
    /// 1-based index of this format within its streaming interface.
    pub fn format_index(&self) -> u8 {
        self.format_index
    }

    /// Number of frame descriptors the device declared for this format.
    pub fn num_frame_descriptors(&self) -> u8 {
        self.num_frame_descriptors
    }

    pub fn fourcc(&self) -> FourCc {
        self.fourcc
    }

    pub fn kind(&self) -> &FormatKind {
        &self.kind
    }

    pub fn frames(&self) -> &[FrameDesc] {
        &self.frames
    }

    pub fn find_frame(&self, frame_index: u8) -> Option<&FrameDesc> {
        self.frames.iter().find(|f| f.frame_index == frame_index)
    }

    /// 1-based index of the frame the device suggests as a default.
    pub fn default_frame_index(&self) -> u8 {
        self.default_frame_index
    }

    pub fn aspect_ratio(&self) -> (u8, u8) {
        self.aspect_ratio
    }

    pub fn interlace_flags(&self) -> u8 {
        self.interlace_flags
    }

    pub fn copy_protect(&self) -> u8 {
        self.copy_protect
    }

    /// The frame descriptor the device suggests as a default.
    pub fn default_frame(&self) -> Option<&FrameDesc> {
        self.find_frame(self.default_frame_index)
    }
}

/// Payload-type-specific properties of a format.
#[derive(Debug)]
#[non_exhaustive]
pub enum FormatKind {
    Uncompressed {
        guid: Uuid,
        bits_per_pixel: u8,
    },
    Mjpeg {
        flags: MjpegFlags,
    },
    FrameBased {
        guid: Uuid,
        bits_per_pixel: u8,
        variable_size: bool,
    },
}

bitflags! {
    pub struct MjpegFlags: u8 {
        const FIXED_SIZE_SAMPLES = 1 << 0;
    }
}

bitflags! {
    pub struct FrameCapabilities: u8 {
        const STILL_IMAGE_SUPPORTED = 1 << 0;
        const FIXED_FRAME_RATE = 1 << 1;
    }
}

/// One image size a format can be streamed at, with its frame rates.
///
/// All intervals are in 100 ns units, as on the wire.
#[derive(Debug)]
pub struct FrameDesc {
    pub(crate) frame_index: u8,
    pub(crate) capabilities: FrameCapabilities,
    pub(crate) width: u16,
    pub(crate) height: u16,
    pub(crate) min_bit_rate: u32,
    pub(crate) max_bit_rate: u32,
    /// Maximum bytes of a single video frame. Zero for frame-based formats,
    /// which derive it during negotiation instead.
    pub(crate) max_frame_buffer_size: u32,
    pub(crate) bytes_per_line: u32,
    pub(crate) default_interval: u32,
    pub(crate) intervals: FrameIntervals,
}

impl FrameDesc {
    /// 1-based index of this frame within its format.
    pub fn frame_index(&self) -> u8 {
        self.frame_index
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn capabilities(&self) -> FrameCapabilities {
        self.capabilities
    }

    pub fn min_bit_rate(&self) -> u32 {
        self.min_bit_rate
    }

    pub fn max_bit_rate(&self) -> u32 {
        self.max_bit_rate
    }

    pub fn max_frame_buffer_size(&self) -> u32 {
        self.max_frame_buffer_size
    }

    /// Line stride for frame-based formats; zero otherwise.
    pub fn bytes_per_line(&self) -> u32 {
        self.bytes_per_line
    }

    /// Default frame interval in 100 ns units.
    pub fn default_interval(&self) -> u32 {
        self.default_interval
    }

    pub fn default_fps(&self) -> u32 {
        if self.default_interval == 0 {
            0
        } else {
            10_000_000 / self.default_interval
        }
    }

    pub fn intervals(&self) -> &FrameIntervals {
        &self.intervals
    }

    /// Resolves a frame rate to an interval the device supports.
    ///
    /// Discrete rates must match exactly; a continuous range clamps the
    /// target into `[min, max]` and snaps it to the step size.
    pub fn interval_for_fps(&self, fps: u32) -> Option<u32> {
        if fps == 0 {
            return None;
        }
        let target = 10_000_000 / fps;
        match &self.intervals {
            FrameIntervals::Discrete(list) => list
                .iter()
                .copied()
                .find(|&i| i != 0 && 10_000_000 / i == fps),
            FrameIntervals::Continuous { min, max, step } => {
                let clamped = target.max(*min).min(*max);
                if *step > 0 {
                    Some(min + (clamped - min) / step * step)
                } else {
                    Some(clamped)
                }
            }
        }
    }
}

/// The frame rates supported by a [`FrameDesc`], in 100 ns interval units.
#[derive(Debug)]
pub enum FrameIntervals {
    Continuous { min: u32, max: u32, step: u32 },
    Discrete(Vec<u32>),
}
