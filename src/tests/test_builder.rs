use crate::builder::DocumentBuilder;
use crate::fsm::HistoryType;

#[test]
fn default_initial_is_the_first_child_in_document_order() {
    let mut b = DocumentBuilder::new("doc");
    b.state("c");
    b.state("first").end();
    b.state("second").end();
    b.end();
    let fsm = b.build().expect("valid document");

    let c = fsm.state_by_name("c").expect("state exists");
    assert_ne!(c.initial, 0);
    let initial = fsm.get_transition(c.initial);
    assert_eq!(initial.target.len(), 1);
    assert_eq!(fsm.get_state(initial.target[0]).name, "first");

    let root = fsm.get_state(fsm.pseudo_root);
    assert_eq!(fsm.initial, root.initial);
}

#[test]
fn depth_and_document_order_are_assigned() {
    let mut b = DocumentBuilder::new("doc");
    b.state("outer");
    b.state("inner").end();
    b.end();
    b.state("later").end();
    let fsm = b.build().expect("valid document");

    let outer = fsm.state_by_name("outer").unwrap();
    let inner = fsm.state_by_name("inner").unwrap();
    let later = fsm.state_by_name("later").unwrap();
    assert_eq!(fsm.get_state(fsm.pseudo_root).depth, 0);
    assert_eq!(outer.depth, 1);
    assert_eq!(inner.depth, 2);
    assert_eq!(later.depth, 1);
    assert!(outer.doc_id < inner.doc_id);
    assert!(inner.doc_id < later.doc_id);
}

#[test]
fn history_children_are_kept_out_of_the_child_list() {
    let mut b = DocumentBuilder::new("doc");
    b.state("c");
    b.history("h", HistoryType::Shallow);
    b.transition(&[], &["a"]);
    b.end();
    b.state("a").end();
    b.end();
    let fsm = b.build().expect("valid document");

    let c = fsm.state_by_name("c").unwrap();
    assert_eq!(c.history.len(), 1);
    assert_eq!(c.states.len(), 1);
    assert_eq!(fsm.get_state(c.states[0]).name, "a");
    // The default initial skips the history child.
    assert_eq!(
        fsm.get_state(fsm.get_transition(c.initial).target[0]).name,
        "a"
    );
}

#[test]
fn trailing_wildcard_descriptors_are_normalized() {
    let mut b = DocumentBuilder::new("doc");
    b.state("s").transition(&["error.execution.*"], &["s"]).end();
    let fsm = b.build().expect("valid document");
    let s = fsm.state_by_name("s").unwrap();
    let transition = fsm.get_transition(s.transitions[0]);
    assert_eq!(transition.events, vec!["error.execution".to_string()]);
}

#[test]
fn unknown_target_is_rejected() {
    let mut b = DocumentBuilder::new("doc");
    b.state("s").transition(&["e"], &["nowhere"]).end();
    assert!(b.build().is_err());
}

#[test]
fn unclosed_state_is_rejected() {
    let mut b = DocumentBuilder::new("doc");
    b.state("s");
    assert!(b.build().is_err());
}
