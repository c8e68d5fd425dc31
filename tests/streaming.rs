//! Negotiation and streaming engine behavior on a scripted transport.

mod common;

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use common::{
    fragment, frame_transcript, mock_context, mock_context_with_status, wait_until, ControlState,
    Step, FIXTURE,
};
use uvc_host::{
    status::StatusClass,
    transport::TransferStatus,
    DeviceHandle, ErrorKind, FourCc, StreamCtrl, UvcContext,
};

fn open_with(steps: Vec<Step>) -> (UvcContext, Arc<ControlState>, DeviceHandle) {
    let state = ControlState::new(614_400, 3072);
    let ctx = mock_context(FIXTURE, state.clone(), steps);
    let handle = ctx.devices().unwrap().remove(0).open().unwrap();
    (ctx, state, handle)
}

fn negotiate(handle: &DeviceHandle) -> StreamCtrl {
    handle
        .stream_ctrl_for(FourCc(*b"MJPG"), 640, 480, 30)
        .unwrap()
}

#[test]
fn probe_and_commit() {
    let (_ctx, state, mut handle) = open_with(Vec::new());

    let ctrl = negotiate(&handle);
    assert_eq!(ctrl.format_index, 1);
    assert_eq!(ctrl.frame_index, 1);
    assert_eq!(ctrl.frame_interval, 333_333);
    // The device's adjustments come back through the probe.
    assert_eq!(ctrl.max_video_frame_size, 614_400);
    assert_eq!(ctrl.max_payload_transfer_size, 3072);
    assert_eq!(ctrl.interface_number(), 1);

    // Probing alone commits nothing.
    assert!(state.commits.lock().unwrap().is_empty());

    handle.start_streaming(&ctrl, |_| {}).unwrap();
    {
        let commits = state.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        let commit = &commits[0];
        assert_eq!(commit.len(), 34); // UVC 1.1 block
        assert_eq!(commit[2], 1); // bFormatIndex
        assert_eq!(commit[3], 1); // bFrameIndex
        assert_eq!(&commit[4..8], &333_333u32.to_le_bytes());
        assert_eq!(&commit[22..26], &3072u32.to_le_bytes());
    }
    // 3072 bytes per microframe needs the top alternate setting.
    assert_eq!(state.alt_log.lock().unwrap().as_slice(), &[(1, 3)]);
    assert_eq!(state.claimed.lock().unwrap().as_slice(), &[0, 1]);

    handle.stop_streaming();
    assert_eq!(state.alt_log.lock().unwrap().as_slice(), &[(1, 3), (1, 0)]);
    assert_eq!(state.claimed.lock().unwrap().as_slice(), &[0]);
}

#[test]
fn unsupported_modes_are_rejected() {
    let (_ctx, _state, handle) = open_with(Vec::new());

    let err = handle
        .stream_ctrl_for(FourCc(*b"MJPG"), 640, 480, 17)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = handle
        .stream_ctrl_for(FourCc(*b"NV12"), 640, 480, 30)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn starting_twice_is_busy() {
    let (_ctx, _state, mut handle) = open_with(Vec::new());
    let ctrl = negotiate(&handle);
    handle.start_streaming(&ctrl, |_| {}).unwrap();
    let err = handle.start_streaming(&ctrl, |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Busy);
    handle.stop_streaming();
}

#[test]
fn delivers_frames_in_capture_order() {
    // 60 fragments, 10 frames, alternating FID, 10 data bytes each.
    let (_ctx, _state, mut handle) = open_with(frame_transcript(10, 6, 10));
    let ctrl = negotiate(&handle);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .start_streaming(&ctrl, move |frame| {
            sink.lock().unwrap().push((
                frame.sequence(),
                frame.data().len(),
                frame.width(),
                frame.height(),
                frame.format(),
            ));
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 10));
    handle.stop_streaming();
    assert!(!handle.is_streaming());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 10);
    for (i, &(seq, len, width, height, fourcc)) in seen.iter().enumerate() {
        assert_eq!(seq, i as u32 + 1);
        assert_eq!(len, 60);
        assert_eq!((width, height), (640, 480));
        assert_eq!(fourcc, FourCc(*b"MJPG"));
    }
}

#[test]
fn slow_callbacks_coalesce_frames() {
    let (_ctx, _state, mut handle) = open_with(frame_transcript(10, 6, 10));
    let ctrl = negotiate(&handle);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .start_streaming(&ctrl, move |frame| {
            sink.lock().unwrap().push(frame.sequence());
            thread::sleep(Duration::from_millis(100));
        })
        .unwrap();

    // The callback outlives the burst; missed frames are dropped and the
    // most recent one is delivered on wakeup.
    assert!(wait_until(Duration::from_secs(5), || {
        seen.lock().unwrap().last() == Some(&10)
    }));
    handle.stop_streaming();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty() && seen.len() <= 10, "{:?}", *seen);
    assert_eq!(*seen.last().unwrap(), 10);
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", *seen);
}

#[test]
fn payload_errors_discard_only_their_frame() {
    let steps = vec![
        // Frame 1 is damaged by an ERR payload header.
        Step::Fragment(fragment(false, false, &[1, 1, 1])),
        Step::Fragment(vec![2, 0x40, 9, 9]),
        Step::Fragment(fragment(false, false, &[1, 1])),
        // Frame 2 is fine and ends with EOF.
        Step::Fragment(fragment(true, false, &[2, 2, 2])),
        Step::Fragment(fragment(true, true, &[2])),
    ];
    let (_ctx, _state, mut handle) = open_with(steps);
    let ctrl = negotiate(&handle);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .start_streaming(&ctrl, move |frame| {
            sink.lock().unwrap().push((frame.sequence(), frame.data().to_vec()));
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || !seen.lock().unwrap().is_empty()));
    handle.stop_streaming();

    let seen = seen.lock().unwrap();
    // Frame 1 was dropped; its sequence number shows up as a gap.
    assert_eq!(seen.as_slice(), &[(2, vec![2, 2, 2, 2])]);
}

#[test]
fn device_loss_tears_the_stream_down() {
    // Frames 1..4 in flight, then the device disappears at fragment 25.
    let mut steps = Vec::new();
    for frame in 0u8..4 {
        for _ in 0..6 {
            steps.push(Step::Fragment(fragment(frame % 2 == 1, false, &[frame; 10])));
        }
        steps.push(Step::Delay(Duration::from_millis(2)));
    }
    steps.push(Step::Transfer(TransferStatus::NoDevice));

    let (_ctx, state, mut handle) = open_with(steps);
    let ctrl = negotiate(&handle);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .start_streaming(&ctrl, move |frame| {
            sink.lock().unwrap().push(frame.sequence());
        })
        .unwrap();

    // Frames 1-3 completed on FID toggles before the device vanished; the
    // delivery thread drains them and exits on its own.
    assert!(wait_until(Duration::from_secs(2), || {
        seen.lock().unwrap().len() == 3
    }));
    thread::sleep(Duration::from_millis(50));

    handle.stop_streaming();
    assert!(!handle.is_streaming());
    // A second stop is a no-op.
    handle.stop_streaming();
    assert_eq!(seen.lock().unwrap().as_slice(), &[1, 2, 3]);
    // The streaming interface was released either way.
    assert_eq!(state.claimed.lock().unwrap().as_slice(), &[0]);
}

#[test]
fn stop_without_start_is_a_no_op() {
    let (_ctx, _state, mut handle) = open_with(Vec::new());
    handle.stop_streaming();
    handle.stop_streaming();
    assert!(!handle.is_streaming());
}

#[test]
fn status_interrupts_reach_the_callback() {
    let state = ControlState::new(0, 0);
    let status_steps = vec![
        Step::Fragment(vec![1, 3, 0x00, 0x04, 0x00, 0x2a, 0x00]),
        Step::Fragment(vec![2, 1, 0x01, 0x01]),
    ];
    let ctx = mock_context_with_status(FIXTURE, state, Vec::new(), status_steps);
    let mut handle = ctx.devices().unwrap().remove(0).open().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    handle
        .set_status_callback(move |event| {
            sink.lock().unwrap().push(event);
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        seen.lock().unwrap().len() == 2
    }));
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].class, StatusClass::Control);
    assert_eq!(seen[0].originator, 3);
    assert_eq!(seen[0].selector, Some(0x04));
    assert_eq!(seen[0].value, vec![0x2a, 0x00]);
    assert_eq!(seen[1].class, StatusClass::Streaming);
    assert_eq!(seen[1].value, vec![0x01]);
}
