use crate::builder::DocumentBuilder;
use crate::fsm::{Fsm, HistoryType};
use crate::test::start_test_session;

/// Compound 'c' with a history child, two nested states and an 'outside'
/// sibling. 'out' leaves c, 'in' re-enters through the history state.
fn history_machine(history_type: HistoryType) -> Box<Fsm> {
    let mut b = DocumentBuilder::new("remember");
    b.state("c");
    b.history("h", history_type);
    b.transition(&[], &["a"]); // default when no history was recorded
    b.end();
    b.state("a");
    b.state("a1").transition(&["to_a2"], &["a2"]).end();
    b.state("a2").end();
    b.end();
    b.state("b").end();
    b.transition(&["out"], &["outside"]);
    b.end();
    b.state("outside").transition(&["in"], &["h"]).end();
    b.build().expect("valid document")
}

fn run(history_type: HistoryType, events: &[&str]) -> Vec<String> {
    let t = start_test_session(history_machine(history_type));
    for event in events {
        t.send(event);
    }
    t.cancel();
    t.join("history", 5000)
}

#[test]
fn deep_history_restores_the_atomic_configuration() {
    let config = run(HistoryType::Deep, &["to_a2", "out", "in"]);
    for expected in ["c", "a", "a2"] {
        assert!(config.iter().any(|s| s == expected), "missing {}", expected);
    }
    assert!(!config.iter().any(|s| s == "a1" || s == "outside"));
}

#[test]
fn shallow_history_restores_the_child_with_default_entry() {
    // Shallow memory records the immediate child 'a'; re-entering it takes
    // its default initial state again.
    let config = run(HistoryType::Shallow, &["to_a2", "out", "in"]);
    for expected in ["c", "a", "a1"] {
        assert!(config.iter().any(|s| s == expected), "missing {}", expected);
    }
    assert!(!config.iter().any(|s| s == "a2"));
}

#[test]
fn history_without_memory_takes_its_default_transition() {
    // The document starts outside of 'c', so targeting 'h' finds no
    // recorded value and follows the history's default transition.
    let mut b = DocumentBuilder::new("fresh");
    b.initial(&["outside"]);
    b.state("c");
    b.history("h", HistoryType::Deep);
    b.transition(&[], &["a2"]);
    b.end();
    b.state("a");
    b.state("a1").end();
    b.state("a2").end();
    b.end();
    b.end();
    b.state("outside").transition(&["in"], &["h"]).end();

    let t = start_test_session(b.build().expect("valid document"));
    t.send("in");
    t.cancel();
    let config = t.join("history_default", 5000);
    for expected in ["c", "a", "a2"] {
        assert!(config.iter().any(|s| s == expected), "missing {}", expected);
    }
    assert!(!config.iter().any(|s| s == "a1"));
}
