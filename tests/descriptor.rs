//! Enumeration and descriptor parsing against the C920 fixture.

mod common;

use common::{mock_context, ControlState, FIXTURE};
use uvc_host::desc::{CameraControls, FormatKind};
use uvc_host::FourCc;

fn context() -> uvc_host::UvcContext {
    mock_context(FIXTURE, ControlState::new(614_400, 3072), Vec::new())
}

#[test]
fn enumerates_the_fixture_device() {
    let ctx = context();
    let devices = ctx.devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].vendor_id(), 0x046d);
    assert_eq!(devices[0].product_id(), 0x082d);
}

#[test]
fn parses_the_control_interface() {
    let ctx = context();
    let dev = ctx.devices().unwrap().remove(0);
    let info = dev.device_info();

    assert_eq!(info.uvc_version().raw(), 0x0110);
    let control = info.control_interface();
    assert_eq!(control.interface_number(), 0);
    assert_eq!(control.clock_frequency(), 30_000_000);
    assert_eq!(control.status_endpoint(), Some(0x87));

    let terminals = control.input_terminals();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].id().as_raw(), 1);
    assert_eq!(terminals[0].terminal_type_raw(), 0x0201);
    let camera = terminals[0].camera().expect("camera terminal");
    assert_eq!(
        camera.controls(),
        CameraControls::AUTO_EXPOSURE_MODE
            | CameraControls::EXPOSURE_TIME_ABS
            | CameraControls::FOCUS_AUTO
    );

    assert_eq!(control.processing_units().len(), 1);
    let unit = &control.processing_units()[0];
    assert_eq!(unit.id().as_raw(), 3);
    assert_eq!(unit.source_id(), 1);
    assert_eq!(unit.max_multiplier(), 16384);

    assert_eq!(control.extension_units().len(), 1);
    let xu = &control.extension_units()[0];
    assert_eq!(xu.id().as_raw(), 6);
    assert_eq!(xu.num_controls(), 24);
    assert_eq!(xu.controls_bitmap(), &[0xff, 0xff, 0x00]);
}

#[test]
fn parses_the_streaming_interface() {
    let ctx = context();
    let dev = ctx.devices().unwrap().remove(0);
    let info = dev.device_info();

    let interfaces = info.streaming_interfaces();
    assert_eq!(interfaces.len(), 1);
    let intf = &interfaces[0];
    assert_eq!(intf.interface_number(), 1);
    assert_eq!(intf.endpoint_address(), 0x81);
    assert_eq!(intf.terminal_link().map(|t| t.as_raw()), Some(4));

    let formats = intf.formats();
    assert_eq!(formats.len(), 2);

    assert_eq!(formats[0].format_index(), 1);
    assert_eq!(formats[0].fourcc(), FourCc(*b"MJPG"));
    assert!(matches!(formats[0].kind(), FormatKind::Mjpeg { .. }));
    assert_eq!(formats[0].frames().len(), 3);

    assert_eq!(formats[1].format_index(), 2);
    assert_eq!(formats[1].fourcc(), FourCc(*b"YUY2"));
    match formats[1].kind() {
        FormatKind::Uncompressed { bits_per_pixel, .. } => assert_eq!(*bits_per_pixel, 16),
        other => panic!("unexpected format kind {:?}", other),
    }

    // The MJPEG 640x480 frame streams at 30 fps by default.
    let vga = formats[0]
        .frames()
        .iter()
        .find(|f| f.width() == 640 && f.height() == 480)
        .expect("640x480 frame");
    assert_eq!(vga.default_interval(), 333_333);
    assert_eq!(vga.default_fps(), 30);
    assert_eq!(vga.interval_for_fps(30), Some(333_333));
    assert_eq!(vga.interval_for_fps(15), Some(666_666));
    assert_eq!(vga.interval_for_fps(60), None);

    assert_eq!(formats[0].default_frame().unwrap().frame_index(), 1);
}

#[test]
fn format_and_frame_lookups() {
    let ctx = context();
    let dev = ctx.devices().unwrap().remove(0);
    let info = dev.device_info();

    let (intf, format) = info.find_format(2).expect("format 2");
    assert_eq!(intf.interface_number(), 1);
    assert_eq!(format.fourcc(), FourCc(*b"YUY2"));
    assert!(info.find_format(9).is_none());

    assert!(format.find_frame(1).is_some());
    assert!(format.find_frame(2).is_none());

    let same = info.interface_for_format(format).unwrap();
    assert_eq!(same.interface_number(), intf.interface_number());
}

#[test]
fn open_handles_are_tracked_by_the_context() {
    let state = ControlState::new(0, 0);
    let ctx = mock_context(FIXTURE, state.clone(), Vec::new());

    let dev = ctx.devices().unwrap().remove(0);
    assert!(ctx.open_devices().is_empty());
    let handle = dev.open().unwrap();
    assert_eq!(ctx.open_devices().len(), 1);
    // Opening claims the VideoControl interface.
    assert_eq!(state.claimed.lock().unwrap().as_slice(), &[0]);

    drop(handle);
    assert!(ctx.open_devices().is_empty());
    assert!(state.claimed.lock().unwrap().is_empty());
}
