use std::thread;
use std::time::Duration;

use crate::builder::DocumentBuilder;
use crate::datamodel::Data;
use crate::executable_content::{Cancel, Raise, SendParameters};
use crate::fsm::Fsm;
use crate::fsm_executor::FsmExecutor;
use crate::test::{
    log_block, logged_values, start_test_session, start_test_session_with_executor,
};

/// 's0' schedules a delayed 'ping' on entry; 'abort' cancels it while
/// moving to 's1'. A targetless transition on 'top' records delivery.
fn delayed_ping_machine() -> Box<Fsm> {
    let mut b = DocumentBuilder::new("sender");
    b.state("top");
    let got = log_block(&mut b, "got", "ping");
    b.transition_full(&["ping"], None, &[], got);
    b.state("s0");
    let send = b.content(vec![Box::new(SendParameters {
        name: "t".to_string(),
        event: Data::String("ping".to_string()),
        delay: "100ms".to_string(),
        parent_state_name: "s0".to_string(),
        ..Default::default()
    })]);
    b.on_entry(send);
    let cancel = b.content(vec![Box::new(Cancel::new("t"))]);
    b.transition_full(&["abort"], None, &["s1"], cancel);
    b.end();
    b.state("s1").end();
    b.end();
    b.build().expect("valid document")
}

#[test]
fn delayed_send_fires_exactly_once() {
    let t = start_test_session(delayed_ping_machine());
    let log = t.log.clone();
    thread::sleep(Duration::from_millis(300));
    t.cancel();
    t.join("delayed_send", 5000);
    assert_eq!(logged_values(&log, "got"), vec!["ping"]);
}

#[test]
fn cancel_before_fire_suppresses_the_send() {
    let t = start_test_session(delayed_ping_machine());
    let log = t.log.clone();
    thread::sleep(Duration::from_millis(10));
    t.send("abort");
    thread::sleep(Duration::from_millis(300));
    t.cancel();
    let config = t.join("send_cancel", 5000);
    assert!(logged_values(&log, "got").is_empty());
    assert!(config.iter().any(|s| s == "s1"));
}

#[test]
fn cancel_after_fire_is_a_no_op() {
    let t = start_test_session(delayed_ping_machine());
    let log = t.log.clone();
    thread::sleep(Duration::from_millis(300));
    t.send("abort");
    thread::sleep(Duration::from_millis(50));
    t.cancel();
    t.join("late_cancel", 5000);
    assert_eq!(logged_values(&log, "got"), vec!["ping"]);
}

#[test]
fn send_without_target_reaches_the_own_external_queue() {
    let mut b = DocumentBuilder::new("loopback");
    b.state("top");
    b.state("s0");
    let send = b.content(vec![Box::new(SendParameters {
        event: Data::String("pong".to_string()),
        ..Default::default()
    })]);
    b.on_entry(send);
    b.end();
    b.transition(&["pong"], &["hit"]);
    b.state("hit").end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    // The machine enqueues 'pong' while entering s0; give it time before
    // the cancel event lines up behind it.
    thread::sleep(Duration::from_millis(200));
    t.cancel();
    let config = t.join("loopback", 5000);
    assert!(config.iter().any(|s| s == "hit"));
}

#[test]
fn raised_events_are_processed_in_fifo_order() {
    let mut b = DocumentBuilder::new("raiser");
    b.state("top");
    let one = log_block(&mut b, "seen", "one");
    let two = log_block(&mut b, "seen", "two");
    b.transition_full(&["one"], None, &[], one);
    b.transition_full(&["two"], None, &[], two);
    b.state("s0");
    let raise = b.content(vec![
        Box::new(Raise::new("one")),
        Box::new(Raise::new("two")),
    ]);
    b.on_entry(raise);
    b.end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    let log = t.log.clone();
    t.cancel();
    t.join("raise_fifo", 5000);
    assert_eq!(logged_values(&log, "seen"), vec!["one", "two"]);
}

#[test]
fn unresolvable_session_target_raises_error_send_target() {
    let mut b = DocumentBuilder::new("badsend");
    b.state("top");
    b.state("s0");
    let send = b.content(vec![Box::new(SendParameters {
        event: Data::String("x".to_string()),
        target: Data::String("#_scxml_99999".to_string()),
        ..Default::default()
    })]);
    b.on_entry(send);
    b.end();
    b.transition(&["error.send.target"], &["caught"]);
    b.state("caught").end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    t.cancel();
    let config = t.join("bad_target", 5000);
    assert!(config.iter().any(|s| s == "caught"));
}

#[test]
fn unknown_send_type_raises_error_send_type() {
    let mut b = DocumentBuilder::new("badtype");
    b.state("top");
    b.state("s0");
    let send = b.content(vec![Box::new(SendParameters {
        event: Data::String("x".to_string()),
        type_value: Data::String("bogus".to_string()),
        ..Default::default()
    })]);
    b.on_entry(send);
    b.end();
    b.transition(&["error.send.type"], &["caught"]);
    b.state("caught").end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    t.cancel();
    let config = t.join("bad_type", 5000);
    assert!(config.iter().any(|s| s == "caught"));
}

#[test]
fn malformed_hints_raise_error_execution_hints() {
    let mut b = DocumentBuilder::new("badhints");
    b.state("top");
    b.state("s0");
    let send = b.content(vec![Box::new(SendParameters {
        event: Data::String("x".to_string()),
        hints: Data::String("{not json".to_string()),
        ..Default::default()
    })]);
    b.on_entry(send);
    b.end();
    b.transition(&["error.execution.hints"], &["caught"]);
    b.state("caught").end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    t.cancel();
    let config = t.join("bad_hints", 5000);
    assert!(config.iter().any(|s| s == "caught"));
}

#[test]
fn cross_session_send_by_session_id() {
    let executor = FsmExecutor::new_without_io_processor();

    let mut receiver = DocumentBuilder::new("receiver");
    receiver.state("wait").transition(&["hi"], &["heard"]).end();
    receiver.final_state("heard").end();
    let receiver_session = start_test_session_with_executor(
        receiver.build().expect("valid document"),
        executor.clone(),
    );
    let receiver_id = receiver_session.session.session_id;

    let mut sender = DocumentBuilder::new("peer");
    sender.state("s0");
    let send = sender.content(vec![Box::new(SendParameters {
        event: Data::String("hi".to_string()),
        target: Data::String(format!("#_scxml_{}", receiver_id)),
        ..Default::default()
    })]);
    sender.on_entry(send);
    sender.end();
    let sender_session =
        start_test_session_with_executor(sender.build().expect("valid document"), executor);

    // The receiver terminates on 'hi' by entering a top-level final state.
    let config = receiver_session.join("cross_session_rx", 5000);
    assert!(config.iter().any(|s| s == "heard"));
    sender_session.cancel();
    sender_session.join("cross_session_tx", 5000);
}
