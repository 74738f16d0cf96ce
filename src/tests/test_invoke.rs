use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::builder::DocumentBuilder;
use crate::datamodel::Data;
use crate::executable_content::SendParameters;
use crate::fsm::{Fsm, Invoke};
use crate::fsm_executor::FsmExecutor;
use crate::test::{log_block, logged_pairs, logged_values, start_test_session_with_executor};

/// Child document: greets its parent on entry and finishes as soon as the
/// greeting comes back (which only happens with autoforward).
fn greeting_child() -> Result<Box<Fsm>, String> {
    let mut b = DocumentBuilder::new("child");
    b.state("s");
    let hello = b.content(vec![Box::new(SendParameters {
        event: Data::String("child.hello".to_string()),
        target: Data::String("#_parent".to_string()),
        ..Default::default()
    })]);
    b.on_entry(hello);
    b.transition(&["child.hello"], &["f"]);
    b.end();
    b.final_state("f").end();
    b.build()
}

/// Child document that waits forever.
fn idle_child() -> Result<Box<Fsm>, String> {
    let mut b = DocumentBuilder::new("idle");
    b.state("wait").end();
    b.build()
}

fn loader(source: &str) -> Result<Box<Fsm>, String> {
    match source {
        "greeting-child" => greeting_child(),
        "idle-child" => idle_child(),
        _ => Err(format!("unknown document '{}'", source)),
    }
}

fn executor_with_loader() -> FsmExecutor {
    let mut executor = FsmExecutor::new_without_io_processor();
    executor.set_loader(Arc::new(loader));
    executor
}

#[test]
fn invoke_lifecycle_with_finalize_autoforward_and_done() {
    let mut b = DocumentBuilder::new("parent");
    b.state("host");
    let finalize = log_block(&mut b, "finalize", "ran");
    b.invoke(Invoke {
        invoke_id: "kid".to_string(),
        content: Some("greeting-child".to_string()),
        autoforward: true,
        finalize,
        ..Default::default()
    });
    let hello = log_block(&mut b, "hello", "got");
    b.transition_full(&["child.hello"], None, &[], hello);
    b.transition(&["done.invoke"], &["finished"]);
    b.end();
    b.final_state("finished").end();

    let t = start_test_session_with_executor(b.build().expect("valid document"), executor_with_loader());
    let log = t.log.clone();
    // The child greets, the greeting is finalized, autoforwarded back and
    // completes the child, whose done event finishes the parent.
    let config = t.join("invoke_lifecycle", 10000);
    assert!(config.iter().any(|s| s == "finished"));
    assert!(!logged_values(&log, "hello").is_empty());

    // Finalize ran before the event was processed (and autoforwarded).
    let pairs = logged_pairs(&log);
    let finalize_index = pairs
        .iter()
        .position(|(l, _)| l == "finalize")
        .expect("finalize ran");
    let hello_index = pairs
        .iter()
        .position(|(l, _)| l == "hello")
        .expect("hello transition ran");
    assert!(finalize_index < hello_index);
}

#[test]
fn leaving_the_state_cancels_its_invoke() {
    let mut b = DocumentBuilder::new("parent");
    b.state("host");
    b.invoke(Invoke {
        invoke_id: "kid".to_string(),
        content: Some("idle-child".to_string()),
        ..Default::default()
    });
    b.transition(&["leave"], &["s2"]);
    b.end();
    b.state("s2").end();

    let executor = executor_with_loader();
    let t = start_test_session_with_executor(b.build().expect("valid document"), executor.clone());

    // Wait for the child session to appear, then leave the invoking state.
    let mut tries = 0;
    while executor.session_ids().len() < 2 && tries < 100 {
        thread::sleep(Duration::from_millis(20));
        tries += 1;
    }
    assert_eq!(executor.session_ids().len(), 2, "child session did not start");
    t.send("leave");

    // Cancellation lets the (disposing) child session drain away.
    tries = 0;
    while executor.session_ids().len() > 1 && tries < 100 {
        thread::sleep(Duration::from_millis(20));
        tries += 1;
    }
    assert_eq!(executor.session_ids().len(), 1, "child session was not cancelled");

    t.cancel();
    let config = t.join("invoke_cancel", 5000);
    assert!(config.iter().any(|s| s == "s2"));
}

#[test]
fn unknown_invoke_type_raises_error_execution_invoke_type() {
    let mut b = DocumentBuilder::new("parent");
    b.state("top");
    b.state("host");
    b.invoke(Invoke {
        invoke_id: "kid".to_string(),
        type_name: "bogus".to_string(),
        content: Some("greeting-child".to_string()),
        ..Default::default()
    });
    b.end();
    b.transition(&["error.execution.invoke.type"], &["caught"]);
    b.state("caught").end();
    b.end();

    let t = start_test_session_with_executor(b.build().expect("valid document"), executor_with_loader());
    t.cancel();
    let config = t.join("invoke_bad_type", 5000);
    assert!(config.iter().any(|s| s == "caught"));
}

#[test]
fn invoke_without_loader_raises_error_execution() {
    let mut b = DocumentBuilder::new("parent");
    b.state("top");
    b.state("host");
    b.invoke(Invoke {
        invoke_id: "kid".to_string(),
        content: Some("greeting-child".to_string()),
        ..Default::default()
    });
    b.end();
    b.transition(&["error.execution"], &["caught"]);
    b.state("caught").end();
    b.end();

    let executor = FsmExecutor::new_without_io_processor();
    let t = start_test_session_with_executor(b.build().expect("valid document"), executor);
    t.cancel();
    let config = t.join("invoke_no_loader", 5000);
    assert!(config.iter().any(|s| s == "caught"));
}
