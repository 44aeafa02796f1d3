use cadence_rt::queue::QueueError;
use cadence_rt::EventQueue;

#[test]
fn push_and_pop() {
    let (mut tx, mut rx) = EventQueue::new(2);
    tx.try_push(1usize).unwrap();
    tx.try_push(2usize).unwrap();
    match tx.try_push(3usize) {
        Err(QueueError::Full(rejected)) => assert_eq!(rejected, 3),
        other => panic!("expected full queue, got {other:?}"),
    }
    assert_eq!(rx.try_pop(), Some(1));
    assert_eq!(rx.try_pop(), Some(2));
    assert_eq!(rx.try_pop(), None);
    assert!(rx.is_empty());
}

#[test]
fn preserves_order_across_threads() {
    let (mut tx, mut rx) = EventQueue::new(16);
    let producer = std::thread::spawn(move || {
        let mut next = 0u32;
        while next < 10_000 {
            if tx.try_push(next).is_ok() {
                next += 1;
            }
        }
    });
    let mut expected = 0u32;
    while expected < 10_000 {
        if let Some(value) = rx.try_pop() {
            assert_eq!(value, expected);
            expected += 1;
        }
    }
    producer.join().unwrap();
}

#[test]
fn sender_reports_abandoned_receiver() {
    let (tx, rx) = EventQueue::new::<u8>(4);
    assert_eq!(tx.capacity(), 4);
    assert_eq!(tx.free_slots(), 4);
    drop(rx);
    assert!(tx.is_abandoned());
}
