use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = uvc_host::UvcContext::new()?;
    let dev = match ctx.devices()?.into_iter().next() {
        Some(dev) => dev,
        None => {
            eprintln!("no UVC devices found");
            return Ok(());
        }
    };
    println!(
        "using device {:04x}:{:04x}",
        dev.vendor_id(),
        dev.product_id()
    );

    let mut handle = dev.open()?;

    let format = match handle.format_descs().first() {
        Some(format) => format,
        None => {
            eprintln!("device advertises no stream formats");
            return Ok(());
        }
    };
    let frame = format.default_frame().or_else(|| format.frames().first());
    let frame = match frame {
        Some(frame) => frame,
        None => {
            eprintln!("format {} has no frame descriptors", format.fourcc());
            return Ok(());
        }
    };
    println!(
        "first format: ({}) {}x{} {} fps",
        format.fourcc(),
        frame.width(),
        frame.height(),
        frame.default_fps()
    );

    let ctrl = handle.stream_ctrl_for(
        format.fourcc(),
        frame.width(),
        frame.height(),
        frame.default_fps(),
    )?;
    println!("negotiated: {:?}", ctrl);

    let frames = Arc::new(AtomicU32::new(0));
    let counter = frames.clone();
    handle.start_streaming(&ctrl, move |frame| {
        counter.fetch_add(1, Ordering::Relaxed);
        println!(
            "frame {:4}: {:7} bytes, pts {:?}",
            frame.sequence(),
            frame.data().len(),
            frame.pts()
        );
    })?;
    println!("streaming...");

    std::thread::sleep(std::time::Duration::from_secs(10));

    handle.stop_streaming();
    println!("done, {} frames delivered", frames.load(Ordering::Relaxed));
    Ok(())
}
