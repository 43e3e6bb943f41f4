//! Mixer-to-compositor pipeline tests

use std::sync::Arc;
use std::time::Duration;

use evr_presenter::renderer::DeviceError;
use evr_presenter::{
    ClockSink, CompositionResource, Config, DeviceKind, DisplayControl, MixerError,
    PresenterError, PresenterEvent, PresenterMessage, PresenterService, PresenterState,
    ServiceKind, ServiceProvider,
};
use evr_presenter_integration_tests::*;

const SYNC: Duration = Duration::from_secs(2);

/// One compositor pass; returns whether a new frame was offered and the red
/// byte of the rendered frame
fn compose(presenter: &evr_presenter::EvrPresenter, resource: &CompositionResource) -> (bool, u8) {
    let renderer = presenter.renderer();
    let status = renderer.begin_composition(resource).unwrap();
    let device = match presenter.service(ServiceKind::RenderDevice) {
        Some(PresenterService::RenderDevice(device)) => device,
        other => panic!("no render device: {:?}", other),
    };
    let surface = renderer.begin_render(&device).unwrap();
    renderer.end_render().unwrap();
    renderer.end_composition(resource).unwrap();
    (status.new_frame, surface.pixels[2])
}

#[test]
fn test_frames_follow_the_clock() {
    let presenter = software_presenter().unwrap();
    let clock = ManualClock::running_at(0);
    presenter.set_mixer(Some(ScriptedMixer::sequence(0, 3))).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    presenter.on_clock_start(Some(0)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    let resource = CompositionResource::new();
    assert_eq!(compose(&presenter, &resource), (true, 0));
    assert_eq!(compose(&presenter, &resource), (false, 0));

    clock.set(FRAME + FRAME / 2);
    assert_eq!(compose(&presenter, &resource), (true, 1));

    clock.set(2 * FRAME);
    assert_eq!(compose(&presenter, &resource), (true, 2));

    let stats = presenter.stats();
    assert_eq!(stats.frames_presented, 3);
    assert_eq!(stats.frames_repeated, 1);
    assert_eq!(stats.placeholders, 0);
    assert_eq!(presenter.native_video_size(), Some((8, 4)));
    presenter.shutdown();
}

#[test]
fn test_flush_keeps_the_displayed_frame() {
    let presenter = software_presenter().unwrap();
    let clock = ManualClock::running_at(FRAME);
    presenter.set_mixer(Some(ScriptedMixer::sequence(FRAME, 3))).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    presenter.on_clock_start(Some(FRAME)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    let renderer = presenter.renderer();
    let resource = CompositionResource::new();
    assert!(renderer.begin_composition(&resource).unwrap().new_frame);

    // Flush while the compositor still holds the frame
    presenter.process_message(PresenterMessage::Flush).unwrap();
    renderer.end_composition(&resource).unwrap();

    clock.set(10 * FRAME);
    let (new_frame, red) = compose(&presenter, &resource);
    assert!(!new_frame);
    assert_eq!(red, 0);

    let stats = presenter.stats();
    assert_eq!(stats.placeholders, 0);
    assert_eq!(stats.queue.flushes, 1);
    presenter.shutdown();
}

#[test]
fn test_pause_before_first_frame_shows_placeholder() {
    let presenter = software_presenter().unwrap();
    let clock = ManualClock::running_at(0);
    presenter.set_mixer(Some(ScriptedMixer::sequence(3 * FRAME, 1))).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    presenter.on_clock_start(Some(0)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    clock.set(FRAME);
    clock.set_running(false);
    presenter.on_clock_pause().unwrap();
    assert_eq!(presenter.state(), PresenterState::Paused);

    let resource = CompositionResource::new();
    let renderer = presenter.renderer();
    let status = renderer.begin_composition(&resource).unwrap();
    assert!(!status.new_frame);
    assert!(status.software_fallback.is_none());
    let device = match presenter.service(ServiceKind::RenderDevice) {
        Some(PresenterService::RenderDevice(device)) => device,
        other => panic!("no render device: {:?}", other),
    };
    let surface = renderer.begin_render(&device).unwrap();
    assert!(surface.is_black());
    assert_eq!((surface.width, surface.height), (8, 4));
    renderer.end_render().unwrap();
    renderer.end_composition(&resource).unwrap();

    assert_eq!(presenter.stats().placeholders, 1);
    presenter.shutdown();
}

#[test]
fn test_hardware_failure_switches_to_software() {
    let hardware = SwitchableHardware::new();
    let factory = Arc::new(SwitchableFactory {
        hardware: hardware.clone(),
        software_fails: false,
    });
    let presenter = presenter_with(Config::default(), factory).unwrap();
    presenter.set_mixer(Some(ScriptedMixer::sequence(0, 2))).unwrap();
    presenter.on_clock_start(None).unwrap();

    match presenter.service(ServiceKind::RenderDevice) {
        Some(PresenterService::RenderDevice(device)) => assert_eq!(device.kind(), DeviceKind::Hardware),
        other => panic!("no render device: {:?}", other),
    }

    hardware.fail_with(DeviceError::DeviceRemoved);
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    let resource = CompositionResource::new();
    let renderer = presenter.renderer();
    let status = renderer.begin_composition(&resource).unwrap();
    assert_eq!(status.software_fallback, Some(DeviceError::DeviceRemoved));
    let device = match presenter.service(ServiceKind::RenderDevice) {
        Some(PresenterService::RenderDevice(device)) => device,
        other => panic!("no render device: {:?}", other),
    };
    assert_eq!(device.kind(), DeviceKind::Software);
    let surface = renderer.begin_render(&device).unwrap();
    assert_eq!(surface.device, device.id());
    renderer.end_render().unwrap();
    renderer.end_composition(&resource).unwrap();

    // Reported once
    let status = renderer.begin_composition(&resource).unwrap();
    assert!(status.software_fallback.is_none());
    renderer.end_composition(&resource).unwrap();

    let stats = presenter.stats();
    assert!(stats.software_rendering);
    assert_eq!(stats.fallbacks, 1);
    presenter.shutdown();
}

#[test]
fn test_fallback_failure_is_reported_once() {
    let hardware = SwitchableHardware::new();
    let factory = Arc::new(SwitchableFactory {
        hardware: hardware.clone(),
        software_fails: true,
    });
    let presenter = presenter_with(Config::default(), factory).unwrap();

    let mut sink = MockSink::new();
    sink.expect_on_event()
        .withf(|event| matches!(event, PresenterEvent::FallbackFailure(_)))
        .times(1)
        .return_const(());
    sink.expect_on_event()
        .withf(|event| !matches!(event, PresenterEvent::FallbackFailure(_)))
        .return_const(());
    presenter.set_event_sink(Some(Arc::new(sink)));

    presenter.set_mixer(Some(ScriptedMixer::sequence(0, 2))).unwrap();
    presenter.on_clock_start(None).unwrap();
    hardware.fail_with(DeviceError::DeviceLost);

    for _ in 0..3 {
        let result = presenter.process_message(PresenterMessage::ProcessInputNotify);
        assert!(matches!(result, Err(PresenterError::FallbackExhausted(_))));
    }

    let resource = CompositionResource::new();
    let result = presenter.renderer().begin_composition(&resource);
    assert!(matches!(result, Err(PresenterError::FallbackExhausted(_))));

    assert!(presenter.sync_events(SYNC));
    // Detaches and drops the sink, which checks the expectations
    presenter.shutdown();
}

#[test]
fn test_mixer_failure_ends_the_pass() {
    let presenter = software_presenter().unwrap();

    let mut mixer = MockFrameMixer::new();
    mixer.expect_output_type().return_const(Some(test_media_type()));
    mixer
        .expect_process_output()
        .times(1)
        .returning(|_| Err(MixerError::Failed("decoder crashed".to_string())));
    presenter.set_mixer(Some(Arc::new(mixer))).unwrap();
    presenter.on_clock_start(None).unwrap();

    let result = presenter.process_message(PresenterMessage::ProcessInputNotify);
    assert!(matches!(result, Err(PresenterError::Mixer(MixerError::Failed(_)))));

    // The abandoned slot is free again
    assert_eq!(presenter.scheduler().queue().snapshot().mixer_sample, None);
    presenter.shutdown();
}

#[test]
fn test_flush_message_reaches_the_mixer() {
    let presenter = software_presenter().unwrap();

    let mut mixer = MockFrameMixer::new();
    mixer.expect_output_type().return_const(Some(test_media_type()));
    mixer
        .expect_process_output()
        .returning(|_| Err(MixerError::NeedMoreInput));
    mixer.expect_flush().times(1).return_const(());
    presenter.set_mixer(Some(Arc::new(mixer))).unwrap();

    presenter.process_message(PresenterMessage::Flush).unwrap();
    presenter.shutdown();
}

#[test]
fn test_stream_change_renegotiates() {
    let presenter = software_presenter().unwrap();
    let (sink, events) = CollectingSink::new();
    presenter.set_event_sink(Some(sink));

    let mut mixer = MockFrameMixer::new();
    mixer.expect_output_type().return_const(Some(test_media_type()));
    mixer
        .expect_process_output()
        .times(1)
        .returning(|_| Err(MixerError::StreamChanged));
    mixer
        .expect_process_output()
        .returning(|_| Err(MixerError::NeedMoreInput));
    presenter.set_mixer(Some(Arc::new(mixer))).unwrap();
    presenter.on_clock_start(None).unwrap();

    let result = presenter.process_message(PresenterMessage::ProcessInputNotify);
    assert!(matches!(result, Err(PresenterError::StreamChanged)));
    assert_eq!(presenter.native_video_size(), None);

    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();
    assert_eq!(presenter.native_video_size(), Some((8, 4)));

    assert!(presenter.sync_events(SYNC));
    let negotiated = events
        .try_iter()
        .filter(|event| matches!(event, PresenterEvent::MediaTypeChanged(_)))
        .count();
    assert_eq!(negotiated, 2);
    presenter.shutdown();
}

#[test]
fn test_calls_after_shutdown_fail() {
    let presenter = software_presenter().unwrap();
    presenter.shutdown();
    presenter.shutdown();

    assert_eq!(presenter.state(), PresenterState::Shutdown);
    assert!(matches!(presenter.process_samples(), Err(PresenterError::Shutdown)));
    assert!(matches!(
        presenter.process_message(PresenterMessage::ProcessInputNotify),
        Err(PresenterError::Shutdown)
    ));
    assert!(matches!(presenter.on_clock_start(None), Err(PresenterError::Shutdown)));
}
