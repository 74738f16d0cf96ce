use crate::fsm::{nameMatch, BlockingQueue, OrderedSet, Queue};
use std::time::Duration;

#[test]
fn ordered_set_add_is_idempotent() {
    let mut set: OrderedSet<u32> = OrderedSet::new();
    set.add(1);
    set.add(2);
    set.add(1);
    assert_eq!(set.size(), 2);

    set.delete(&1);
    set.delete(&7); // unknown, ignored
    set.delete(&1); // already gone, ignored
    assert_eq!(set.size(), 1);
}

#[test]
fn ordered_set_keeps_insertion_order() {
    let mut set: OrderedSet<&str> = OrderedSet::new();
    set.add("c");
    set.add("a");
    set.add("b");
    set.add("a");
    let in_order: Vec<&str> = set.toList().iterator().cloned().collect();
    assert_eq!(in_order, vec!["c", "a", "b"]);
}

#[test]
fn ordered_set_union_appends_new_members_only() {
    let mut first: OrderedSet<u32> = OrderedSet::new();
    first.add(1);
    first.add(2);
    let mut second: OrderedSet<u32> = OrderedSet::new();
    second.add(2);
    second.add(3);

    first.union(&second);
    let in_order: Vec<u32> = first.toList().iterator().cloned().collect();
    assert_eq!(in_order, vec![1, 2, 3]);
}

#[test]
fn ordered_set_intersection() {
    let mut first: OrderedSet<u32> = OrderedSet::new();
    first.add(1);
    let mut second: OrderedSet<u32> = OrderedSet::new();
    assert!(!first.hasIntersection(&second));
    second.add(1);
    assert!(first.hasIntersection(&second));
    first.clear();
    assert!(!first.hasIntersection(&first));
    assert!(first.isEmpty());
}

#[test]
fn queue_is_fifo() {
    let mut queue: Queue<u32> = Queue::new();
    assert!(queue.isEmpty());
    queue.enqueue(1);
    queue.enqueue(2);
    assert_eq!(queue.dequeue(), 1);
    assert_eq!(queue.dequeue(), 2);
    assert!(queue.isEmpty());
}

#[test]
fn blocking_queue_timeout() {
    let queue: BlockingQueue<u32> = BlockingQueue::new();
    assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)), None);
    queue.enqueue(7);
    assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)), Some(7));
}

#[test]
fn event_name_matching() {
    let descriptor = |d: &str| vec![d.to_string()];

    assert!(nameMatch(&descriptor("a"), "a.b.c"));
    assert!(nameMatch(&descriptor("a.*"), "a.b.c"));
    assert!(nameMatch(&descriptor("a.b"), "a.b.c"));
    assert!(nameMatch(&descriptor("a.b.c"), "a.b.c"));
    assert!(nameMatch(&descriptor("*"), "a.b.c"));

    assert!(!nameMatch(&descriptor("a.b.c"), "a.b.cd"));
    assert!(!nameMatch(&descriptor("a.b.cd"), "a.b.c"));
    assert!(!nameMatch(&descriptor("b"), "a.b.c"));
    assert!(!nameMatch(&[], "a.b.c"));

    // Several descriptors on one transition.
    let many = vec!["x".to_string(), "a.b".to_string()];
    assert!(nameMatch(&many, "a.b.c"));
    assert!(!nameMatch(&many, "y"));
}
