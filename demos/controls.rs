use uvc_host::{camera, control::AutoExposureMode, processing_unit};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = uvc_host::UvcContext::new()?;
    let handle = ctx.find_device(None, None)?.open()?;

    let info = handle.device_info();
    println!("UVC {}", info.uvc_version());
    for term in info.control_interface().input_terminals() {
        println!(
            "input terminal {}: type {:#06x}",
            term.id().as_raw(),
            term.terminal_type_raw()
        );
        if let Some(cam) = term.camera() {
            println!("  camera controls: {:?}", cam.controls());
        }
    }
    for unit in info.control_interface().processing_units() {
        println!(
            "processing unit {}: controls {:?}",
            unit.id().as_raw(),
            unit.controls()
        );
    }

    if let Ok(mut cam) = handle.camera_terminal() {
        let mode = cam.read_control::<camera::AutoExposureMode>()?;
        println!("auto-exposure mode: {:?}", mode);
        cam.set_control::<camera::AutoExposureMode>(AutoExposureMode::AUTO)?;
    }

    if let Ok(pu) = handle.processing_unit() {
        let brightness = pu.read_control::<processing_unit::Brightness>()?;
        let min = pu.read_control_min::<processing_unit::Brightness>()?;
        let max = pu.read_control_max::<processing_unit::Brightness>()?;
        println!("brightness: {} (range {}..={})", brightness, min, max);
    }

    Ok(())
}
