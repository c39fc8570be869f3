//! Headless walk through a whole session: requests the validation layer and debug utils, creates an instance and a
//! device on the first GPU with a graphics queue, and tears everything down again.
//!
//! Validation and debug utils are optional. If they are not installed they are simply pruned before the instance is
//! created.

use orion_vk::{
    OrionError, Session,
    ash::vk,
    diagnostics::Severity,
    session::{FeatureKind, LibraryFlag, PhysicalDeviceCandidate},
};

fn run() -> Result<(), OrionError> {
    let mut session = Session::load()?;
    session
        .diagnostics()
        .configure_severity_mask(Severity::FATAL | Severity::ERROR | Severity::WARNING);
    session
        .diagnostics()
        .configure_severity_mask(Severity::NOTIFICATION);
    session.set_flag(LibraryFlag::AutoCreateDebugMessengers, true);

    if let Err(e) = session.request_layer("VK_LAYER_KHRONOS_validation") {
        log::warn!("Running without validation: {}", e);
    }
    session.request_extension("VK_EXT_debug_utils")?;
    session.specify_instance_debug_messages(
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
    )?;

    let instance = session.realize_instance()?;
    log::info!(
        "Instance {:?} with extensions {:?}",
        instance,
        session.enumerate_enabled(instance, FeatureKind::Extension)?
    );

    let debug_utils = session
        .enumerate_enabled(instance, FeatureKind::Extension)?
        .iter()
        .any(|e| e == "VK_EXT_debug_utils");
    if debug_utils {
        session.create_debug_messenger(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        )?;
    }

    let mut has_graphics =
        |c: &PhysicalDeviceCandidate| c.supports_queue_flags(vk::QueueFlags::GRAPHICS);
    let candidates = session.list_suitable_physical_devices(Some(&mut has_graphics))?;
    for candidate in &candidates {
        log::info!(
            "{} ({:?}), {} queue families",
            candidate.name(),
            candidate.properties.device_type,
            session.list_queue_families(candidate.handle)?.len()
        );
    }

    //prefer a discrete GPU, otherwise take whatever is there
    let chosen = candidates
        .iter()
        .find(|c| c.is_type(vk::PhysicalDeviceType::DISCRETE_GPU))
        .or(candidates.first())
        .cloned();
    if let Some(candidate) = chosen {
        let name = candidate.name();
        let device = session.realize_device(
            candidate
                .into_device_request()
                .with_extension(c"VK_KHR_swapchain"),
        )?;
        log::info!("Created device {:?} on {}", device, name);
    }

    log::info!("Tracking {} object(s)", session.registry().len());
    let report = session.teardown()?;
    log::info!("Destroyed {}", report);
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    match run() {
        Err(e) if e.is_fatal() => {
            log::error!("{}", e);
            std::process::abort();
        }
        other => Ok(other?),
    }
}
