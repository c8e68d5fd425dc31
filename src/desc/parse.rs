//! Configuration descriptor parsing.
//!
//! The configuration blob is a flat sequence of variable-length descriptors.
//! A single forward pass tracks which video interface (if any) the walk is
//! currently inside and dispatches the class-specific descriptors to it.
//!
//! The parser never fails: malformed and unknown descriptors are logged and
//! skipped so that the rest of the configuration remains usable, and a
//! `bLength` that overruns the remaining buffer terminates the walk (some
//! devices ship truncated configurations).

use std::io;

use byteorder::{ReadBytesExt, LE};
use zerocopy::FromBytes;

use crate::util::{io_err, split_descriptors, uuid_from_usb, BcdVersion, BytesExt};

use super::*;

const DESC_TYPE_INTERFACE: u8 = 0x04;
const DESC_TYPE_ENDPOINT: u8 = 0x05;
const DESC_TYPE_CS_INTERFACE: u8 = 0x24;

const VIDEO_INTERFACE_CLASS: u8 = 0x0e;
const SUBCLASS_VIDEOCONTROL: u8 = 0x01;
const SUBCLASS_VIDEOSTREAMING: u8 = 0x02;

/// VideoControl descriptor subtypes (A.5).
const VC_HEADER: u8 = 0x01;
const VC_INPUT_TERMINAL: u8 = 0x02;
const VC_OUTPUT_TERMINAL: u8 = 0x03;
const VC_SELECTOR_UNIT: u8 = 0x04;
const VC_PROCESSING_UNIT: u8 = 0x05;
const VC_EXTENSION_UNIT: u8 = 0x06;

/// VideoStreaming descriptor subtypes (A.6).
const VS_INPUT_HEADER: u8 = 0x01;
const VS_OUTPUT_HEADER: u8 = 0x02;
const VS_STILL_IMAGE_FRAME: u8 = 0x03;
const VS_FORMAT_UNCOMPRESSED: u8 = 0x04;
const VS_FRAME_UNCOMPRESSED: u8 = 0x05;
const VS_FORMAT_MJPEG: u8 = 0x06;
const VS_FRAME_MJPEG: u8 = 0x07;
const VS_FORMAT_MPEG2TS: u8 = 0x0a;
const VS_FORMAT_DV: u8 = 0x0c;
const VS_COLORFORMAT: u8 = 0x0d;
const VS_FORMAT_FRAME_BASED: u8 = 0x10;
const VS_FRAME_FRAME_BASED: u8 = 0x11;
const VS_FORMAT_STREAM_BASED: u8 = 0x12;

const TERMINAL_TYPE_CAMERA: u16 = 0x0201;

#[derive(FromBytes)]
#[repr(C)]
#[allow(non_snake_case)]
struct StdInterfaceDesc {
    bLength: u8,
    bDescriptorType: u8,
    bInterfaceNumber: u8,
    bAlternateSetting: u8,
    bNumEndpoints: u8,
    bInterfaceClass: u8,
    bInterfaceSubClass: u8,
    bInterfaceProtocol: u8,
    iInterface: u8,
}

#[derive(FromBytes)]
#[repr(C, packed)]
#[allow(non_snake_case)]
struct StdEndpointDesc {
    bLength: u8,
    bDescriptorType: u8,
    bEndpointAddress: u8,
    bmAttributes: u8,
    wMaxPacketSize: u16,
    bInterval: u8,
}

#[derive(Clone, Copy)]
enum Section {
    Other,
    Control,
    Streaming { index: usize },
}

/// Walks a configuration descriptor blob and builds the device model.
///
/// Returns `None` when the configuration declares no usable VideoControl
/// interface, ie. the device is not a UVC function.
pub(crate) fn parse_device_info(config: &[u8]) -> Option<DeviceInfo> {
    let mut control: Option<ControlParser> = None;
    let mut streams: Vec<StreamingParser> = Vec::new();
    let mut section = Section::Other;

    for (ty, data) in split_descriptors(config) {
        match ty {
            DESC_TYPE_INTERFACE => {
                let desc = match StdInterfaceDesc::read_from_prefix(data) {
                    Some(desc) => desc,
                    None => {
                        log::warn!("short interface descriptor: {:02x?}", data);
                        section = Section::Other;
                        continue;
                    }
                };
                if desc.bInterfaceClass != VIDEO_INTERFACE_CLASS {
                    section = Section::Other;
                    continue;
                }
                match desc.bInterfaceSubClass {
                    SUBCLASS_VIDEOCONTROL => match &control {
                        None => {
                            control = Some(ControlParser::new(desc.bInterfaceNumber));
                            section = Section::Control;
                        }
                        Some(c) if c.interface_number == desc.bInterfaceNumber => {
                            section = Section::Control;
                        }
                        Some(_) => {
                            log::warn!(
                                "device lists more than one VideoControl interface, using the first"
                            );
                            section = Section::Other;
                        }
                    },
                    SUBCLASS_VIDEOSTREAMING => {
                        let index = match streams
                            .iter()
                            .position(|s| s.interface_number == desc.bInterfaceNumber)
                        {
                            Some(index) => index,
                            None => {
                                streams.push(StreamingParser::new(desc.bInterfaceNumber));
                                streams.len() - 1
                            }
                        };
                        streams[index].alt_settings.push(AltSetting {
                            alt: desc.bAlternateSetting,
                            endpoints: Vec::new(),
                        });
                        section = Section::Streaming { index };
                    }
                    other => {
                        log::debug!("ignoring video interface with subclass {}", other);
                        section = Section::Other;
                    }
                }
            }
            DESC_TYPE_ENDPOINT => {
                let desc = match StdEndpointDesc::read_from_prefix(data) {
                    Some(desc) => desc,
                    None => {
                        log::warn!("short endpoint descriptor: {:02x?}", data);
                        continue;
                    }
                };
                match section {
                    Section::Control => {
                        // Only an interrupt endpoint is valid here; it carries
                        // the device's status packets.
                        if desc.bmAttributes & 0x03 == 0x03 {
                            if let Some(control) = control.as_mut() {
                                control.status_endpoint = Some(desc.bEndpointAddress);
                            }
                        }
                    }
                    Section::Streaming { index } => {
                        let max_packet_size = desc.wMaxPacketSize;
                        if let Some(alt) = streams[index].alt_settings.last_mut() {
                            alt.endpoints.push(EndpointInfo {
                                address: desc.bEndpointAddress,
                                attributes: desc.bmAttributes,
                                max_packet_size: u16::from_le(max_packet_size),
                            });
                        }
                    }
                    Section::Other => {}
                }
            }
            DESC_TYPE_CS_INTERFACE => match section {
                Section::Control => {
                    if let Some(control) = control.as_mut() {
                        control.parse_descriptor(&data[2..]);
                    }
                }
                Section::Streaming { index } => streams[index].parse_descriptor(&data[2..]),
                Section::Other => {
                    log::debug!("class-specific interface descriptor outside a video interface")
                }
            },
            _ => log::trace!("skipping descriptor of type {}", ty),
        }
    }

    let control = control?.finish()?;
    let streaming = streams.into_iter().filter_map(|s| s.finish()).collect();
    Some(DeviceInfo { control, streaming })
}

/// Reparses a descriptor that turned out shorter than its subtype demands,
/// with zero bytes appended. Known firmware bugs (eg. Leap Motion ≤ 1.7.0)
/// ship processing unit descriptors one byte short.
fn with_short_descriptor_retry(
    raw: &[u8],
    mut parse: impl FnMut(&[u8]) -> io::Result<()>,
) -> io::Result<()> {
    match parse(raw) {
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            log::warn!("UVC descriptor too short, please report a bug to the device manufacturer");
            log::debug!("retrying with 100 extra zero bytes");
            log::debug!("descriptor data: {:02x?}", raw);

            let mut buf = vec![0; raw.len() + 100];
            buf[..raw.len()].copy_from_slice(raw);

            parse(&buf)
        }
        res => res,
    }
}

fn read_term_id(raw: &mut &[u8]) -> io::Result<TermId> {
    TermId::new(raw.read_u8()?)
        .ok_or_else(|| io_err("bTerminalID is 0, only non-zero numbers are allowed"))
}

fn read_unit_id(raw: &mut &[u8]) -> io::Result<UnitId> {
    UnitId::new(raw.read_u8()?)
        .ok_or_else(|| io_err("bUnitID is 0, only non-zero numbers are allowed"))
}

struct ControlParser {
    interface_number: u8,
    uvc_version: Option<BcdVersion>,
    total_length: u16,
    clock_frequency: u32,
    streaming_interface_numbers: Vec<u8>,
    status_endpoint: Option<u8>,
    input_terminals: Vec<InputTerminalDesc>,
    processing_units: Vec<ProcessingUnitDesc>,
    extension_units: Vec<ExtensionUnitDesc>,
}

impl ControlParser {
    fn new(interface_number: u8) -> Self {
        Self {
            interface_number,
            uvc_version: None,
            total_length: 0,
            clock_frequency: 0,
            streaming_interface_numbers: Vec::new(),
            status_endpoint: None,
            input_terminals: Vec::new(),
            processing_units: Vec::new(),
            extension_units: Vec::new(),
        }
    }

    fn parse_descriptor(&mut self, raw: &[u8]) {
        if let Err(e) = with_short_descriptor_retry(raw, |raw| self.parse_descriptor_impl(raw)) {
            log::warn!("skipping malformed VideoControl descriptor: {}", e);
        }
    }

    fn parse_descriptor_impl(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            VC_HEADER => {
                if self.uvc_version.is_some() {
                    return Err(io_err("duplicate VC_HEADER descriptor"));
                }

                // Parse everything before assigning, so a failed attempt
                // leaves no trace when the zero-extend retry reruns us.
                let uvc_version = BcdVersion(raw.read_u16::<LE>()?);
                let total_length = raw.read_u16::<LE>()?;
                let clock_frequency = raw.read_u32::<LE>()?;
                let count = raw.read_u8()?;
                let numbers = (0..count)
                    .map(|_| raw.read_u8())
                    .collect::<io::Result<Vec<_>>>()?;

                self.uvc_version = Some(uvc_version);
                self.total_length = total_length;
                self.clock_frequency = clock_frequency;
                self.streaming_interface_numbers = numbers;
                Ok(())
            }
            VC_INPUT_TERMINAL => {
                let id = read_term_id(&mut raw)?;
                let terminal_type = raw.read_u16::<LE>()?;
                let assoc = TermId::new(raw.read_u8()?);
                let string_index = raw.read_u8()?;
                let camera = if terminal_type == TERMINAL_TYPE_CAMERA {
                    Some(CameraTerminalDesc {
                        objective_focal_length_min: raw.read_u16::<LE>()?,
                        objective_focal_length_max: raw.read_u16::<LE>()?,
                        ocular_focal_length: raw.read_u16::<LE>()?,
                        controls: CameraControls::from_bits_truncate(
                            raw.read_length_prefixed_bitmask()? as u32,
                        ),
                    })
                } else {
                    None
                };

                self.input_terminals.push(InputTerminalDesc {
                    id,
                    terminal_type,
                    assoc,
                    string_index,
                    camera,
                });
                Ok(())
            }
            VC_PROCESSING_UNIT => {
                self.processing_units.push(ProcessingUnitDesc {
                    id: read_unit_id(&mut raw)?,
                    source_id: raw.read_u8()?,
                    max_multiplier: raw.read_u16::<LE>()?,
                    controls: ProcessingUnitControls::from_bits_truncate(
                        raw.read_length_prefixed_bitmask()? as u32,
                    ),
                    string_index: raw.read_u8()?,
                    video_standards: VideoStandards::from_bits_truncate(raw.read_u8()?),
                });
                Ok(())
            }
            VC_EXTENSION_UNIT => {
                self.extension_units.push(ExtensionUnitDesc {
                    id: read_unit_id(&mut raw)?,
                    extension_code: {
                        let guid = raw.read_guid_bytes()?;
                        uuid_from_usb(&guid)
                    },
                    num_controls: raw.read_u8()?,
                    sources: {
                        let count = raw.read_u8()?;
                        (0..count)
                            .map(|_| raw.read_u8())
                            .collect::<io::Result<Vec<_>>>()?
                    },
                    controls_bitmap: {
                        let size = raw.read_u8()?;
                        (0..size)
                            .map(|_| raw.read_u8())
                            .collect::<io::Result<Vec<_>>>()?
                    },
                });
                Ok(())
            }
            VC_OUTPUT_TERMINAL | VC_SELECTOR_UNIT => {
                log::trace!("not retaining VideoControl descriptor subtype {}", subtype);
                Ok(())
            }
            _ => Err(io_err(format!(
                "invalid/unknown descriptor subtype {}",
                subtype
            ))),
        }
    }

    fn finish(self) -> Option<ControlInterface> {
        let uvc_version = match self.uvc_version {
            Some(v) => v,
            None => {
                log::warn!("VideoControl interface without a VC_HEADER descriptor");
                return None;
            }
        };
        Some(ControlInterface {
            interface_number: self.interface_number,
            uvc_version,
            total_length: self.total_length,
            clock_frequency: self.clock_frequency,
            streaming_interface_numbers: self.streaming_interface_numbers,
            status_endpoint: self.status_endpoint,
            input_terminals: self.input_terminals,
            processing_units: self.processing_units,
            extension_units: self.extension_units,
        })
    }
}

struct StreamingParser {
    interface_number: u8,
    total_length: u16,
    endpoint_address: Option<u8>,
    terminal_link: Option<TermId>,
    info: StreamingInterfaceInfo,
    still_capture_method: u8,
    trigger_support: u8,
    trigger_usage: u8,
    format_controls: Vec<u64>,
    formats: Vec<FormatDesc>,
    alt_settings: Vec<AltSetting>,
}

impl StreamingParser {
    fn new(interface_number: u8) -> Self {
        Self {
            interface_number,
            total_length: 0,
            endpoint_address: None,
            terminal_link: None,
            info: StreamingInterfaceInfo::empty(),
            still_capture_method: 0,
            trigger_support: 0,
            trigger_usage: 0,
            format_controls: Vec::new(),
            formats: Vec::new(),
            alt_settings: Vec::new(),
        }
    }

    fn parse_descriptor(&mut self, raw: &[u8]) {
        if let Err(e) = with_short_descriptor_retry(raw, |raw| self.parse_descriptor_impl(raw)) {
            log::warn!("skipping malformed VideoStreaming descriptor: {}", e);
        }
    }

    fn parse_descriptor_impl(&mut self, mut raw: &[u8]) -> io::Result<()> {
        let subtype = raw.read_u8()?;
        match subtype {
            VS_INPUT_HEADER => {
                if self.endpoint_address.is_some() {
                    return Err(io_err("duplicate input header descriptor"));
                }

                // Parse everything before assigning, so a failed attempt
                // leaves no trace when the zero-extend retry reruns us.
                let num_formats = raw.read_u8()?;
                let total_length = raw.read_u16::<LE>()?;
                let endpoint_address = raw.read_u8()?;
                let info = StreamingInterfaceInfo::from_bits_truncate(raw.read_u8()?);
                let terminal_link = TermId::new(raw.read_u8()?);
                let still_capture_method = raw.read_u8()?;
                let trigger_support = raw.read_u8()?;
                let trigger_usage = raw.read_u8()?;
                let control_size = raw.read_u8()?;
                let format_controls = (0..num_formats)
                    .map(|_| raw.read_bitmask(control_size))
                    .collect::<io::Result<Vec<_>>>()?;

                self.total_length = total_length;
                self.endpoint_address = Some(endpoint_address);
                self.info = info;
                self.terminal_link = terminal_link;
                self.still_capture_method = still_capture_method;
                self.trigger_support = trigger_support;
                self.trigger_usage = trigger_usage;
                self.format_controls = format_controls;
                Ok(())
            }
            VS_FORMAT_UNCOMPRESSED | VS_FORMAT_FRAME_BASED => {
                let format_index = raw.read_u8()?;
                let num_frame_descriptors = raw.read_u8()?;
                let guid = raw.read_guid_bytes()?;
                let bits_per_pixel = raw.read_u8()?;
                let default_frame_index = raw.read_u8()?;
                let aspect_ratio = (raw.read_u8()?, raw.read_u8()?);
                let interlace_flags = raw.read_u8()?;
                let copy_protect = raw.read_u8()?;
                let kind = if subtype == VS_FORMAT_FRAME_BASED {
                    FormatKind::FrameBased {
                        guid: uuid_from_usb(&guid),
                        bits_per_pixel,
                        variable_size: raw.read_u8()? != 0,
                    }
                } else {
                    FormatKind::Uncompressed {
                        guid: uuid_from_usb(&guid),
                        bits_per_pixel,
                    }
                };

                self.formats.push(FormatDesc {
                    format_index,
                    num_frame_descriptors,
                    default_frame_index,
                    fourcc: FourCc([guid[0], guid[1], guid[2], guid[3]]),
                    aspect_ratio,
                    interlace_flags,
                    copy_protect,
                    kind,
                    frames: Vec::new(),
                });
                Ok(())
            }
            VS_FORMAT_MJPEG => {
                let format_index = raw.read_u8()?;
                let num_frame_descriptors = raw.read_u8()?;
                let flags = MjpegFlags::from_bits_truncate(raw.read_u8()?);
                let default_frame_index = raw.read_u8()?;
                let aspect_ratio = (raw.read_u8()?, raw.read_u8()?);
                let interlace_flags = raw.read_u8()?;
                let copy_protect = raw.read_u8()?;

                self.formats.push(FormatDesc {
                    format_index,
                    num_frame_descriptors,
                    default_frame_index,
                    fourcc: FourCc(*b"MJPG"),
                    aspect_ratio,
                    interlace_flags,
                    copy_protect,
                    kind: FormatKind::Mjpeg { flags },
                    frames: Vec::new(),
                });
                Ok(())
            }
            VS_FRAME_UNCOMPRESSED | VS_FRAME_MJPEG | VS_FRAME_FRAME_BASED => {
                let frame_index = raw.read_u8()?;
                let capabilities = FrameCapabilities::from_bits_truncate(raw.read_u8()?);
                let width = raw.read_u16::<LE>()?;
                let height = raw.read_u16::<LE>()?;
                let min_bit_rate = raw.read_u32::<LE>()?;
                let max_bit_rate = raw.read_u32::<LE>()?;

                // Frame-based frames have no buffer size field (negotiation
                // supplies it) and carry a line stride after the interval
                // type instead.
                let max_frame_buffer_size;
                let default_interval;
                let interval_type;
                let mut bytes_per_line = 0;
                if subtype == VS_FRAME_FRAME_BASED {
                    max_frame_buffer_size = 0;
                    default_interval = raw.read_u32::<LE>()?;
                    interval_type = raw.read_u8()?;
                    bytes_per_line = raw.read_u32::<LE>()?;
                } else {
                    max_frame_buffer_size = raw.read_u32::<LE>()?;
                    default_interval = raw.read_u32::<LE>()?;
                    interval_type = raw.read_u8()?;
                }

                let intervals = match interval_type {
                    0 => FrameIntervals::Continuous {
                        min: raw.read_u32::<LE>()?,
                        max: raw.read_u32::<LE>()?,
                        step: raw.read_u32::<LE>()?,
                    },
                    n => FrameIntervals::Discrete(
                        (0..n)
                            .map(|_| raw.read_u32::<LE>())
                            .collect::<io::Result<Vec<_>>>()?,
                    ),
                };

                let format = match self.formats.last_mut() {
                    Some(format) => format,
                    None => {
                        return Err(io_err(
                            "frame descriptor without a preceding format descriptor",
                        ))
                    }
                };
                format.frames.push(FrameDesc {
                    frame_index,
                    capabilities,
                    width,
                    height,
                    min_bit_rate,
                    max_bit_rate,
                    max_frame_buffer_size,
                    bytes_per_line,
                    default_interval,
                    intervals,
                });
                Ok(())
            }
            VS_OUTPUT_HEADER
            | VS_STILL_IMAGE_FRAME
            | VS_COLORFORMAT
            | VS_FORMAT_MPEG2TS
            | VS_FORMAT_DV
            | VS_FORMAT_STREAM_BASED => {
                log::debug!("not retaining VideoStreaming descriptor subtype {}", subtype);
                Ok(())
            }
            _ => Err(io_err(format!(
                "invalid/unknown descriptor subtype {}",
                subtype
            ))),
        }
    }

    fn finish(self) -> Option<StreamingInterfaceDesc> {
        let endpoint_address = match self.endpoint_address {
            Some(ep) => ep,
            None => {
                log::warn!(
                    "VideoStreaming interface {} has no input header, ignoring it",
                    self.interface_number
                );
                return None;
            }
        };
        Some(StreamingInterfaceDesc {
            interface_number: self.interface_number,
            total_length: self.total_length,
            endpoint_address,
            terminal_link: self.terminal_link,
            info: self.info,
            still_capture_method: self.still_capture_method,
            trigger_support: self.trigger_support,
            trigger_usage: self.trigger_usage,
            format_controls: self.format_controls,
            formats: self.formats,
            alt_settings: self.alt_settings,
        })
    }
}
