use crate::builder::DocumentBuilder;
use crate::test::{log_block, logged_values, start_test_session};

#[test]
fn parallel_completion_raises_done_events_in_document_order() {
    let mut b = DocumentBuilder::new("regions");
    b.state("top");
    let done_r1 = log_block(&mut b, "done", "r1");
    let done_r2 = log_block(&mut b, "done", "r2");
    let done_p = log_block(&mut b, "done", "p");
    b.transition_full(&["done.state.r1"], None, &[], done_r1);
    b.transition_full(&["done.state.r2"], None, &[], done_r2);
    b.transition_full(&["done.state.p"], None, &[], done_p);
    b.parallel("p");
    b.state("r1");
    b.state("x").transition(&["go"], &["xf"]).end();
    b.final_state("xf").end();
    b.end();
    b.state("r2");
    b.state("y").transition(&["go"], &["yf"]).end();
    b.final_state("yf").end();
    b.end();
    b.end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    let log = t.log.clone();
    t.send("go");
    t.cancel();
    let config = t.join("parallel_done", 5000);

    // Region done events precede the parallel's own, which fires exactly once.
    assert_eq!(logged_values(&log, "done"), vec!["r1", "r2", "p"]);
    for expected in ["p", "r1", "xf", "r2", "yf"] {
        assert!(config.iter().any(|s| s == expected), "missing {}", expected);
    }
}

#[test]
fn entering_a_parallel_state_enters_all_regions() {
    let mut b = DocumentBuilder::new("fanout");
    b.state("start").transition(&["launch"], &["p"]).end();
    b.parallel("p");
    b.state("r1");
    b.state("x").end();
    b.end();
    b.state("r2");
    b.state("y").end();
    b.end();
    b.end();

    let t = start_test_session(b.build().expect("valid document"));
    t.send("launch");
    t.cancel();
    let config = t.join("parallel_entry", 5000);
    for expected in ["p", "r1", "x", "r2", "y"] {
        assert!(config.iter().any(|s| s == expected), "missing {}", expected);
    }
    assert!(!config.iter().any(|s| s == "start"));
}

#[test]
fn outer_transition_preempts_the_inner_one() {
    let mut b = DocumentBuilder::new("preempt");
    b.state("top");
    b.parallel("p");
    b.transition(&["e"], &["out"]);
    b.state("r1");
    b.state("x").end();
    b.end();
    b.state("r2");
    let inner = log_block(&mut b, "inner", "fired");
    b.state("y");
    b.transition_full(&["e"], None, &["y2"], inner);
    b.end();
    b.state("y2").end();
    b.end();
    b.end();
    b.end();
    b.state("out").end();

    let t = start_test_session(b.build().expect("valid document"));
    let log = t.log.clone();
    t.send("e");
    t.cancel();
    let config = t.join("preemption", 5000);

    // Only the outer transition ran in that microstep.
    assert!(logged_values(&log, "inner").is_empty());
    assert!(config.iter().any(|s| s == "out"));
    assert!(!config.iter().any(|s| s == "y2" || s == "p"));
}
