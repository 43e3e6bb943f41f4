//! Sample queue behavior through the public API

use std::sync::Arc;

use evr_presenter::queue::{
    CompositionAcquire, PauseSample, ProducerAcquire, ProducerRelease, SAMPLE_TIME_INVALID,
    SAMPLE_TIME_RESERVED,
};
use evr_presenter::{SampleQueue, SoftwareDevice};
use evr_presenter_integration_tests::test_media_type;

fn ready_queue() -> SampleQueue {
    let queue = SampleQueue::new();
    queue.invalidate_device(Arc::new(SoftwareDevice::new()));
    queue.change_media_type(Some(test_media_type()));
    queue
}

/// Fill the next free slot with a frame at `time`
fn produce(queue: &SampleQueue, now: i64, time: i64) -> usize {
    let mut sample = match queue.acquire_for_producer(now).unwrap() {
        ProducerAcquire::Acquired(sample) => sample,
        other => panic!("expected a slot at {}, got {:?}", now, other),
    };
    let slot = sample.slot();
    sample.sample_mut().set_timing(time, 50);
    assert!(matches!(
        queue.release_from_producer(now, sample),
        ProducerRelease::Queued { .. }
    ));
    slot
}

#[test]
fn test_consumer_slot_is_not_reused_until_left_behind() {
    let queue = ready_queue();

    assert_eq!(produce(&queue, 0, 100), 0);
    assert_eq!(queue.acquire_for_consumer(false, 150), CompositionAcquire::New(0));

    // The other two slots are free to fill
    let second = produce(&queue, 200, 250);
    let third = produce(&queue, 200, 300);
    assert_ne!(second, 0);
    assert_ne!(third, 0);

    // Slot 0 is both held and on display
    assert!(matches!(
        queue.acquire_for_producer(200).unwrap(),
        ProducerAcquire::Full
    ));

    assert!(!queue.release_from_consumer());

    // Slot 0 was the last one shown, so the mixer waits for the next pass
    assert!(matches!(
        queue.acquire_for_producer(260).unwrap(),
        ProducerAcquire::WaitingForComposition
    ));
    assert_eq!(queue.acquire_for_consumer(false, 260), CompositionAcquire::New(second));
    assert!(queue.release_from_consumer());

    let reused = produce(&queue, 260, 350);
    assert_eq!(reused, 0);
}

#[test]
fn test_flush_preserves_held_frame() {
    let queue = ready_queue();

    let shown = produce(&queue, 0, 450);
    produce(&queue, 0, 600);
    assert_eq!(queue.acquire_for_consumer(false, 460), CompositionAcquire::New(shown));

    assert_eq!(queue.flush(500), Some(shown));

    let view = queue.snapshot();
    for slot in 0..view.sample_times.len() {
        let expected = if slot == shown {
            SAMPLE_TIME_RESERVED
        } else {
            SAMPLE_TIME_INVALID
        };
        assert_eq!(view.sample_times[slot], expected, "slot {}", slot);
    }

    assert_eq!(queue.acquire_for_consumer(false, 500), CompositionAcquire::Same(shown));
}

#[test]
fn test_pause_without_due_frame_shows_nothing() {
    let queue = ready_queue();
    produce(&queue, 0, 400);

    assert_eq!(queue.pause(300, false), None);
    assert_eq!(queue.snapshot().pause_sample, PauseSample::NoPauseSample);
    assert_eq!(queue.acquire_for_consumer(false, 300), CompositionAcquire::None);
    assert_eq!(queue.acquire_for_consumer(true, 10_000), CompositionAcquire::None);

    queue.unpause();
    assert!(queue.acquire_for_consumer(true, 10_000).slot().is_some());
}

#[test]
fn test_flush_while_mixer_holds_slot_discards_frame() {
    let queue = ready_queue();

    let mut sample = match queue.acquire_for_producer(0).unwrap() {
        ProducerAcquire::Acquired(sample) => sample,
        other => panic!("expected a slot, got {:?}", other),
    };
    queue.flush(0);
    sample.sample_mut().set_timing(100, 50);

    assert_eq!(queue.release_from_producer(0, sample), ProducerRelease::Discarded);
    assert_eq!(queue.acquire_for_consumer(true, 1_000), CompositionAcquire::None);
    assert_eq!(queue.stats().frames_discarded, 1);
}

#[test]
fn test_producer_and_consumer_threads_never_share_a_slot() {
    let queue = Arc::new(ready_queue());
    let frames = 2_000i64;

    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            let mut next = 0i64;
            while next < frames {
                match queue.acquire_for_producer(next).unwrap() {
                    ProducerAcquire::Acquired(mut sample) => {
                        let view = queue.snapshot();
                        assert_ne!(view.composition_sample, Some(sample.slot()));
                        sample.sample_mut().set_timing(next, 1);
                        queue.release_from_producer(next, sample);
                        next += 1;
                    }
                    _ => std::thread::yield_now(),
                }
            }
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            let mut shown = 0u64;
            for now in 0..frames * 2 {
                if let Some(slot) = queue.acquire_for_consumer(true, now).slot() {
                    assert_ne!(queue.snapshot().mixer_sample, Some(slot));
                    shown += 1;
                }
                queue.release_from_consumer();
            }
            shown
        })
    };

    producer.join().unwrap();
    let shown = consumer.join().unwrap();
    assert!(shown > 0);
    assert_eq!(queue.stats().frames_queued, frames as u64);
}
