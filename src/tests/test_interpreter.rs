use crate::builder::DocumentBuilder;
use crate::datamodel::{str_to_source, Data};
use crate::executable_content::{Assign, If, Script};
use crate::fsm::Fsm;
use crate::test::{
    logged_pairs, logged_values, start_test_session, verify_final_configuration,
    with_entry_exit_log,
};

fn toggle_machine() -> Box<Fsm> {
    let mut b = DocumentBuilder::new("toggle");
    b.state("c");
    with_entry_exit_log(&mut b, "c");
    b.state("a");
    with_entry_exit_log(&mut b, "a");
    b.transition(&["click"], &["b"]);
    b.end();
    b.state("b");
    with_entry_exit_log(&mut b, "b");
    b.transition(&["click"], &["a"]);
    b.end();
    b.end();
    b.build().expect("valid document")
}

#[test]
fn simple_toggle() {
    let t = start_test_session(toggle_machine());
    let log = t.log.clone();
    t.send("click");
    t.send("click");
    t.send("click");
    t.cancel();
    let config = t.join("simple_toggle", 5000);

    assert_eq!(logged_values(&log, "entry"), vec!["c", "a", "b", "a", "b"]);
    assert_eq!(logged_values(&log, "exit"), vec!["a", "b", "a", "b", "c"]);
    assert!(verify_final_configuration(&["c", "b"], &config).is_ok());
}

#[test]
fn exits_precede_entries_within_each_microstep() {
    let t = start_test_session(toggle_machine());
    let log = t.log.clone();
    t.send("click");
    t.cancel();
    t.join("exit_enter_order", 5000);

    let pairs = logged_pairs(&log);
    let expect: Vec<(String, String)> = [
        ("entry", "c"),
        ("entry", "a"),
        ("exit", "a"),
        ("entry", "b"),
        ("exit", "b"),
        ("exit", "c"),
    ]
    .iter()
    .map(|(l, v)| (l.to_string(), v.to_string()))
    .collect();
    assert_eq!(pairs, expect);
}

#[test]
fn identical_runs_are_deterministic() {
    let run = || {
        let t = start_test_session(toggle_machine());
        let log = t.log.clone();
        t.send("click");
        t.send("click");
        t.cancel();
        let config = t.join("determinism", 5000);
        (logged_pairs(&log), config)
    };
    let (first_log, first_config) = run();
    let (second_log, second_config) = run();
    assert_eq!(first_log, second_log);
    assert_eq!(first_config, second_config);
}

#[test]
fn eventless_cascade_runs_before_first_external_event() {
    let mut b = DocumentBuilder::new("cascade");
    b.state("s0").transition_cond(&[], "true", &["s1"]).end();
    b.state("s1").transition_cond(&[], "true", &["s2"]).end();
    b.state("s2").end();

    let t = start_test_session(b.build().expect("valid document"));
    t.cancel();
    let config = t.join("cascade", 5000);
    assert!(config.iter().any(|s| s == "s2"));
    assert!(!config.iter().any(|s| s == "s0" || s == "s1"));
}

#[test]
fn assign_to_missing_location_is_caught_as_error_event() {
    let mut b = DocumentBuilder::new("errors");
    b.state("s0");
    let broken = b.content(vec![Box::new(Assign::new(
        str_to_source("nope"),
        str_to_source("1"),
    ))]);
    b.on_entry(broken);
    b.transition_cond(
        &["error.execution.*"],
        "_event.name == 'error.execution.nameerror'",
        &["caught"],
    );
    b.end();
    b.state("caught").end();

    let t = start_test_session(b.build().expect("valid document"));
    t.cancel();
    let config = t.join("error_catch", 5000);
    assert!(config.iter().any(|s| s == "caught"));
}

#[test]
fn document_data_and_global_script() {
    let mut b = DocumentBuilder::new("scripted");
    b.data("counter", str_to_source("1 + 1"));
    let bump = b.content(vec![Box::new(Script::new(str_to_source(
        "counter = counter + 1",
    )))]);
    b.script(bump);
    b.state("wait")
        .transition_cond(&[], "counter == 3", &["done_state"])
        .end();
    b.state("done_state").end();

    let t = start_test_session(b.build().expect("valid document"));
    t.cancel();
    let config = t.join("scripted", 5000);
    assert!(config.iter().any(|s| s == "done_state"));
}

#[test]
fn if_chains_take_the_first_truthy_branch() {
    let mut b = DocumentBuilder::new("branchy");
    b.data("x", Data::Integer(2));
    b.state("s0");
    let then_one = crate::test::log_block(&mut b, "branch", "one");
    let then_two = crate::test::log_block(&mut b, "branch", "two");
    let otherwise = crate::test::log_block(&mut b, "branch", "other");
    // if x == 1 … elseif x == 2 … else …: the elseif is a nested If in the
    // else-block.
    let mut inner = If::new(str_to_source("x == 2"));
    inner.content = then_two;
    inner.else_content = otherwise;
    let inner_block = b.content(vec![Box::new(inner)]);
    let mut outer = If::new(str_to_source("x == 1"));
    outer.content = then_one;
    outer.else_content = inner_block;
    let entry = b.content(vec![Box::new(outer)]);
    b.on_entry(entry);
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    let log = t.log.clone();
    t.cancel();
    t.join("if_chain", 5000);
    assert_eq!(logged_values(&log, "branch"), vec!["two"]);
}

#[test]
fn targetless_transition_keeps_the_configuration() {
    let mut b = DocumentBuilder::new("targetless");
    b.state("top");
    with_entry_exit_log(&mut b, "top");
    let noted = crate::test::log_block(&mut b, "noted", "tick");
    b.transition_full(&["tick"], None, &[], noted);
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    let log = t.log.clone();
    t.send("tick");
    t.send("tick");
    t.cancel();
    let config = t.join("targetless", 5000);

    assert_eq!(logged_values(&log, "noted"), vec!["tick", "tick"]);
    // No exit/entry happened for the targetless transition.
    assert_eq!(logged_values(&log, "entry"), vec!["top"]);
    assert!(config.iter().any(|s| s == "top"));
}
