//! Tests for the dispatcher correlation table.

use std::time::Duration;
use std::time::Instant;

use tagframe::Frame;

use crate::dispatch::Delivery;
use crate::dispatch::DeliveryMode;
use crate::dispatch::Dispatcher;
use crate::error::Error;

const IDLE: Duration = Duration::from_secs(18);

fn frame(tag: i32, payload: &[u8]) -> Frame {
    Frame::new(tag, payload.to_vec())
}

#[test]
fn test_duplicate_wait_rejected_until_satisfied() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, IDLE);

    let (_, signal) = dispatcher.register_wait(500).unwrap();
    assert_eq!(dispatcher.register_wait(500).unwrap_err(), Error::DuplicateWait { tag: 500 });

    assert_eq!(dispatcher.deliver(frame(500, b"abc")), Delivery::Matched);
    assert!(signal.is_set());
    assert!(!dispatcher.is_pending(500));

    // The frame is buffered, but nobody waits any more: a new wait is fine.
    assert!(dispatcher.register_wait(500).is_ok());
}

#[test]
fn test_removed_wait_frees_the_tag() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, IDLE);

    let (id, signal) = dispatcher.register_wait(999).unwrap();
    assert!(dispatcher.remove_wait(id, Instant::now()));
    assert!(!dispatcher.remove_wait(id, Instant::now()));
    assert!(!signal.is_set());
    assert!(dispatcher.pending_tags().is_empty());

    assert!(dispatcher.register_wait(999).is_ok());
}

#[test]
fn test_stale_wait_id_leaves_newer_registration() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, IDLE);

    let (old, _) = dispatcher.register_wait(42).unwrap();
    dispatcher.deliver(frame(42, b"x"));
    let (new, _) = dispatcher.register_wait(42).unwrap();

    assert_ne!(old, new);
    assert!(!dispatcher.remove_wait(old, Instant::now()));
    assert_eq!(dispatcher.pending_tags(), vec![42]);
}

#[test]
fn test_selective_mode_drops_unrequested_frames() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, IDLE);

    assert_eq!(dispatcher.deliver(frame(700, b"nobody")), Delivery::Lost);
    assert_eq!(dispatcher.deliver(frame(701, b"nobody")), Delivery::Lost);

    assert_eq!(dispatcher.lost_frames(), 2);
    assert_eq!(dispatcher.pop_frame(None).unwrap_err(), Error::BufferEmpty);
}

#[test]
fn test_non_selective_mode_keeps_everything_in_order() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::NonSelective, IDLE);

    let (_, signal) = dispatcher.register_wait(20).unwrap();
    assert_eq!(dispatcher.deliver(frame(10, b"a")), Delivery::Buffered);
    assert_eq!(dispatcher.deliver(frame(20, b"b")), Delivery::Matched);
    assert_eq!(dispatcher.deliver(frame(10, b"c")), Delivery::Buffered);
    assert!(signal.is_set());

    assert_eq!(dispatcher.buffered_tags(), vec![10, 20, 10]);
    assert_eq!(dispatcher.lost_frames(), 0);

    assert_eq!(dispatcher.pop_frame(Some(10)).unwrap().payload, b"a");
    assert_eq!(dispatcher.pop_frame(None).unwrap().tag, 20);
    assert_eq!(dispatcher.pop_frame(Some(10)).unwrap().payload, b"c");
}

#[test]
fn test_pop_frame_errors() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::NonSelective, IDLE);
    assert_eq!(dispatcher.pop_frame(Some(3)).unwrap_err(), Error::BufferEmpty);

    dispatcher.deliver(frame(4, b""));
    assert_eq!(dispatcher.pop_frame(Some(3)).unwrap_err(), Error::FrameNotFound { tag: 3 });
    assert!(dispatcher.has_buffered(4));
}

#[test]
fn test_clear_buffer_counts() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::NonSelective, IDLE);
    for tag in [5, 6, 5] {
        dispatcher.deliver(frame(tag, b"z"));
    }

    assert_eq!(dispatcher.clear_buffer(Some(5)), 2);
    assert_eq!(dispatcher.buffered_tags(), vec![6]);
    assert_eq!(dispatcher.clear_buffer(Some(5)), 0);

    dispatcher.deliver(frame(7, b"z"));
    dispatcher.deliver(frame(8, b"z"));
    assert_eq!(dispatcher.clear_buffer(None), 3);
    assert!(dispatcher.buffered_tags().is_empty());
}

#[test]
fn test_reset_all_wakes_waits_and_keeps_backlog() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::NonSelective, IDLE);
    dispatcher.deliver(frame(11, b"kept"));

    let (_, a) = dispatcher.register_wait(1000).unwrap();
    let (_, b) = dispatcher.register_wait(1001).unwrap();

    assert_eq!(dispatcher.reset_all(), 2);
    assert!(a.is_set());
    assert!(b.is_set());
    assert!(dispatcher.pending_tags().is_empty());
    assert_eq!(dispatcher.buffered_tags(), vec![11]);
    assert_eq!(dispatcher.reset_all(), 0);
}

#[test]
fn test_reset_all_starts_a_new_generation() {
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, IDLE);
    let before = dispatcher.generation();

    dispatcher.register_wait(1000).unwrap();
    dispatcher.reset_all();
    assert_eq!(dispatcher.generation(), before + 1);

    // Even an empty sweep counts.
    dispatcher.reset_all();
    assert_eq!(dispatcher.generation(), before + 2);
}

#[test]
fn test_is_active_requires_idle_and_no_waits() {
    let start = Instant::now();
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, Duration::from_secs(10));
    dispatcher.touch(start);

    assert!(dispatcher.is_active(start + Duration::from_secs(5)));
    assert!(!dispatcher.is_active(start + Duration::from_secs(11)));

    let (id, _) = dispatcher.register_wait(300).unwrap();
    assert!(dispatcher.is_active(start + Duration::from_secs(11)));

    // Giving up on a wait counts as activity.
    let later = start + Duration::from_secs(12);
    dispatcher.remove_wait(id, later);
    assert!(dispatcher.is_active(later + Duration::from_secs(9)));
    assert!(!dispatcher.is_active(later + Duration::from_secs(11)));
}

#[test]
fn test_removing_an_absent_wait_is_not_activity() {
    let start = Instant::now();
    let mut dispatcher = Dispatcher::new(DeliveryMode::Selective, Duration::from_secs(10));
    dispatcher.touch(start);

    let (id, _) = dispatcher.register_wait(300).unwrap();
    dispatcher.reset_all();

    // A handle dropped after the sweep finds nothing to remove.
    assert!(!dispatcher.remove_wait(id, start + Duration::from_secs(11)));
    assert!(!dispatcher.is_active(start + Duration::from_secs(11)));
}

#[test]
fn test_satisfied_delivery_stamps_activity() {
    let start = Instant::now();
    let mut dispatcher = Dispatcher::new(DeliveryMode::NonSelective, Duration::from_secs(10));
    dispatcher.touch(start);

    // Unrequested traffic does not keep the connection alive.
    dispatcher.deliver_at(frame(9, b""), start + Duration::from_secs(8));
    assert!(!dispatcher.is_active(start + Duration::from_secs(11)));

    dispatcher.register_wait(9).unwrap();
    dispatcher.deliver_at(frame(9, b""), start + Duration::from_secs(12));
    assert!(dispatcher.is_active(start + Duration::from_secs(21)));
}
