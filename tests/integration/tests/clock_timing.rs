//! Clock-driven presentation tests

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use evr_presenter::{
    ClockSink, CompositionResource, PresenterError, PresenterEvent, PresenterMessage,
    PresenterService, PresenterState, ServiceKind, ServiceProvider, SystemClock,
};
use evr_presenter_integration_tests::perf_test::PerfMeasure;
use evr_presenter_integration_tests::*;

/// Red byte of the frame shown by one compositor pass, None for a placeholder
fn shown_frame(presenter: &evr_presenter::EvrPresenter, resource: &CompositionResource) -> Option<u8> {
    let renderer = presenter.renderer();
    renderer.begin_composition(resource).unwrap();
    let device = match presenter.service(ServiceKind::RenderDevice) {
        Some(PresenterService::RenderDevice(device)) => device,
        other => panic!("no render device: {:?}", other),
    };
    let surface = renderer.begin_render(&device).unwrap();
    renderer.end_render().unwrap();
    renderer.end_composition(resource).unwrap();
    (!surface.is_black()).then(|| surface.pixels[2])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wall_clock_playback_reaches_every_frame() {
    let presenter = software_presenter().unwrap();
    let (sink, events) = CollectingSink::new();
    presenter.set_event_sink(Some(sink));

    let mixer = ScriptedMixer::sequence(0, 6);
    let clock = Arc::new(SystemClock::new());
    presenter.set_mixer(Some(mixer.clone())).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    presenter.process_message(PresenterMessage::BeginStreaming).unwrap();
    clock.start(Some(0));
    presenter.on_clock_start(Some(0)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    let resource = CompositionResource::new();
    let mut seen = BTreeSet::new();
    let mut finished = false;
    let mut eos_sent = false;
    let mut pass_time = PerfMeasure::new("composition pass");
    let mut vsync = tokio::time::interval(Duration::from_millis(5));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);

    while tokio::time::Instant::now() < deadline && !finished {
        vsync.tick().await;

        pass_time.start();
        if let Some(frame) = shown_frame(&presenter, &resource) {
            seen.insert(frame);
        }
        pass_time.stop();

        if !eos_sent && mixer.remaining() == 0 {
            presenter.process_message(PresenterMessage::EndOfStream).unwrap();
            eos_sent = true;
        }
        finished = events
            .try_iter()
            .any(|event| event == PresenterEvent::MediaFinished);
    }

    pass_time.report();
    if let Some(frame) = shown_frame(&presenter, &resource) {
        seen.insert(frame);
    }
    assert!(finished, "media never finished, saw frames {:?}", seen);
    // A slow runner may skip a frame, but playback must move forward
    assert!(seen.len() >= 4, "saw frames {:?}", seen);
    assert!(seen.contains(&5));
    assert!(presenter.stats().frames_presented >= 4);

    clock.stop();
    presenter.on_clock_stop().unwrap();
    presenter.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_paused_clock_holds_the_frame() {
    let presenter = software_presenter().unwrap();
    let clock = Arc::new(SystemClock::new());
    presenter.set_mixer(Some(ScriptedMixer::sequence(0, 3))).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    clock.start(Some(0));
    presenter.on_clock_start(Some(0)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    let resource = CompositionResource::new();
    assert_eq!(shown_frame(&presenter, &resource), Some(0));

    clock.pause();
    presenter.on_clock_pause().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(shown_frame(&presenter, &resource), Some(0));

    clock.restart();
    presenter.on_clock_restart().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_ne!(shown_frame(&presenter, &resource), Some(0));

    presenter.shutdown();
}

#[test]
fn test_scrubbing_pins_requested_frame() {
    let presenter = software_presenter().unwrap();
    let clock = ManualClock::running_at(0);
    presenter.set_mixer(Some(ScriptedMixer::sequence(0, 3))).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    presenter.on_clock_start(Some(0)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    assert!(matches!(
        presenter.scrub_to(FRAME),
        Err(PresenterError::InvalidState(_))
    ));

    presenter.on_clock_set_rate(0.0).unwrap();
    clock.set_running(false);
    presenter.on_clock_pause().unwrap();

    let resource = CompositionResource::new();
    presenter.scrub_to(2 * FRAME).unwrap();
    assert_eq!(shown_frame(&presenter, &resource), Some(2));

    presenter.scrub_to(FRAME + 1).unwrap();
    assert_eq!(shown_frame(&presenter, &resource), Some(1));

    presenter.on_clock_set_rate(1.0).unwrap();
    assert!(!presenter.scheduler().is_scrubbing());
    presenter.shutdown();
}

#[test]
fn test_stop_with_freeze_keeps_queued_frames() {
    let presenter = software_presenter().unwrap();
    let clock = ManualClock::running_at(0);
    presenter.set_mixer(Some(ScriptedMixer::sequence(0, 3))).unwrap();
    presenter.set_clock(Some(clock.clone())).unwrap();
    presenter.set_stop_to_pause_freeze(true);
    presenter.on_clock_start(Some(0)).unwrap();
    presenter.process_message(PresenterMessage::ProcessInputNotify).unwrap();

    let resource = CompositionResource::new();
    assert_eq!(shown_frame(&presenter, &resource), Some(0));

    clock.set_running(false);
    presenter.on_clock_stop().unwrap();
    assert_eq!(presenter.state(), PresenterState::Stopped);
    assert!(presenter.scheduler().is_frozen());

    clock.set(2 * FRAME);
    assert_eq!(shown_frame(&presenter, &resource), Some(0));
    let queued = presenter
        .scheduler()
        .queue()
        .snapshot()
        .sample_times
        .iter()
        .filter(|&&time| time >= 0)
        .count();
    assert_eq!(queued, 3);

    // Starting again from a position drops the frozen frames
    clock.set(0);
    clock.set_running(true);
    presenter.on_clock_start(Some(0)).unwrap();
    assert!(!presenter.scheduler().is_frozen());
    assert_eq!(presenter.stats().queue.flushes, 1);
    presenter.shutdown();
}

#[test]
fn test_unsupported_rate_is_rejected() {
    let presenter = software_presenter().unwrap();
    presenter.on_clock_start(None).unwrap();

    assert!(matches!(
        presenter.on_clock_set_rate(64.0),
        Err(PresenterError::UnsupportedRate(_))
    ));
    assert!(matches!(
        presenter.on_clock_set_rate(-1.0),
        Err(PresenterError::UnsupportedRate(_))
    ));
    presenter.on_clock_set_rate(2.0).unwrap();
    presenter.shutdown();
}
