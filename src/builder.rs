//! Programmatic construction of compiled documents.\
//! \
//! The parsing front-end is not part of this crate; the builder is the
//! supported way to produce the state graph the interpreter consumes.
//! States are opened and closed like nested elements; targets are given by
//! name and resolved when the document is finished.
//!
//! ```
//! use harel::builder::DocumentBuilder;
//!
//! let mut b = DocumentBuilder::new("toggle");
//! b.state("on").transition(&["flip"], &["off"]).end();
//! b.state("off").transition(&["flip"], &["on"]).end();
//! let fsm = b.build().expect("valid document");
//! assert_eq!(fsm.states.len(), 3);
//! ```

use crate::datamodel::{str_to_source, Data, DEFAULT_DATAMODEL};
use crate::executable_content::ExecutableContent;
use crate::fsm::{
    DocumentId, DoneData, ExecutableContentId, Fsm, HistoryType, Invoke, State, StateId,
    Transition, TransitionId,
};

pub struct DocumentBuilder {
    fsm: Box<Fsm>,
    stack: Vec<StateId>,
    doc_counter: DocumentId,
    /// Transition targets by name, resolved in [DocumentBuilder::build].
    pending_targets: Vec<(TransitionId, Vec<String>)>,
    /// 'initial' attributes by name.
    pending_initials: Vec<(StateId, Vec<String>)>,
}

impl DocumentBuilder {
    pub fn new(name: &str) -> DocumentBuilder {
        let mut builder = DocumentBuilder {
            fsm: Box::new(Fsm::new()),
            stack: Vec::new(),
            doc_counter: 0,
            pending_targets: Vec::new(),
            pending_initials: Vec::new(),
        };
        builder.fsm.name = name.to_string();
        builder.fsm.datamodel_name = DEFAULT_DATAMODEL.to_string();
        let root = builder.new_state(if name.is_empty() { "scxml" } else { name });
        builder.fsm.pseudo_root = root;
        builder
    }

    fn next_doc_id(&mut self) -> DocumentId {
        let id = self.doc_counter;
        self.doc_counter += 1;
        id
    }

    fn new_state(&mut self, name: &str) -> StateId {
        let id = (self.fsm.states.len() + 1) as StateId;
        let doc_id = self.next_doc_id();
        let parent = self.current();
        let mut state = State {
            id,
            doc_id,
            name: name.to_string(),
            parent,
            ..Default::default()
        };
        if parent != 0 {
            state.depth = self.fsm.get_state(parent).depth + 1;
        }
        self.fsm.states.push(state);
        id
    }

    /// The state under construction (the root before the first 'state').
    fn current(&self) -> StateId {
        match self.stack.last() {
            Some(id) => *id,
            None => self.fsm.pseudo_root,
        }
    }

    fn current_state_mut(&mut self) -> &mut State {
        let id = self.current();
        &mut self.fsm.states[(id - 1) as usize]
    }

    fn open_child(&mut self, name: &str) -> StateId {
        let id = self.new_state(name);
        let parent = self.current();
        self.fsm.states[(parent - 1) as usize].states.push(id);
        self.stack.push(id);
        id
    }

    /// Opens a \<state\> child. Close it with [DocumentBuilder::end].
    pub fn state(&mut self, name: &str) -> &mut Self {
        self.open_child(name);
        self
    }

    /// Opens a \<parallel\> child.
    pub fn parallel(&mut self, name: &str) -> &mut Self {
        self.open_child(name);
        self.current_state_mut().is_parallel = true;
        self
    }

    /// Opens a \<final\> child.
    pub fn final_state(&mut self, name: &str) -> &mut Self {
        self.open_child(name);
        self.current_state_mut().is_final = true;
        self
    }

    /// Opens a \<history\> child. Its default transition is added like a
    /// normal transition before the matching 'end'.
    pub fn history(&mut self, name: &str, history_type: HistoryType) -> &mut Self {
        let id = self.new_state(name);
        let parent = self.current();
        self.fsm.states[(parent - 1) as usize].history.push(id);
        self.stack.push(id);
        self.current_state_mut().history_type = history_type;
        self
    }

    /// Closes the state opened last.
    pub fn end(&mut self) -> &mut Self {
        self.stack.pop();
        self
    }

    /// Sets the 'initial' attribute of the current state (or the document).
    pub fn initial(&mut self, targets: &[&str]) -> &mut Self {
        let id = self.current();
        self.pending_initials
            .push((id, targets.iter().map(|t| t.to_string()).collect()));
        self
    }

    pub fn transition(&mut self, events: &[&str], targets: &[&str]) -> &mut Self {
        self.transition_full(events, None, targets, 0)
    }

    pub fn transition_cond(
        &mut self,
        events: &[&str],
        cond: &str,
        targets: &[&str],
    ) -> &mut Self {
        self.transition_full(events, Some(cond), targets, 0)
    }

    pub fn transition_content(
        &mut self,
        events: &[&str],
        targets: &[&str],
        content: ExecutableContentId,
    ) -> &mut Self {
        self.transition_full(events, None, targets, content)
    }

    /// Adds a transition to the current state. An empty event list marks an
    /// eventless transition, an empty target list a targetless one.
    pub fn transition_full(
        &mut self,
        events: &[&str],
        cond: Option<&str>,
        targets: &[&str],
        content: ExecutableContentId,
    ) -> &mut Self {
        let id = (self.fsm.transitions.len() + 1) as TransitionId;
        let doc_id = self.next_doc_id();
        let source = self.current();
        let transition = Transition {
            id,
            doc_id,
            source,
            target: Vec::new(),
            // Trailing '.*' matches like the bare prefix.
            events: events
                .iter()
                .map(|e| e.strip_suffix(".*").unwrap_or(e).to_string())
                .collect(),
            cond: cond.map(str_to_source),
            content,
        };
        self.fsm.transitions.push(transition);
        self.pending_targets
            .push((id, targets.iter().map(|t| t.to_string()).collect()));
        self.current_state_mut().transitions.push(id);
        self
    }

    /// Registers a block of executable content, returning its id.
    pub fn content(&mut self, block: Vec<Box<dyn ExecutableContent>>) -> ExecutableContentId {
        self.fsm.executableContent.push(block);
        self.fsm.executableContent.len() as ExecutableContentId
    }

    pub fn on_entry(&mut self, content: ExecutableContentId) -> &mut Self {
        self.current_state_mut().onentry.push(content);
        self
    }

    pub fn on_exit(&mut self, content: ExecutableContentId) -> &mut Self {
        self.current_state_mut().onexit.push(content);
        self
    }

    pub fn invoke(&mut self, mut invoke: Invoke) -> &mut Self {
        invoke.doc_id = self.next_doc_id();
        self.current_state_mut().invoke.push(invoke);
        self
    }

    pub fn done_data(&mut self, done_data: DoneData) -> &mut Self {
        self.current_state_mut().donedata = Some(done_data);
        self
    }

    /// Adds a document-level data declaration. 'Source' values are
    /// evaluated once when the data model is initialized.
    pub fn data(&mut self, name: &str, value: Data) -> &mut Self {
        self.fsm.data.push((name.to_string(), value));
        self
    }

    pub fn datamodel(&mut self, name: &str) -> &mut Self {
        self.fsm.datamodel_name = name.to_string();
        self
    }

    pub fn strict(&mut self, strict: bool) -> &mut Self {
        self.fsm.strict_mode = strict;
        self
    }

    /// Sets the global script block, run before the initial states are
    /// entered.
    pub fn script(&mut self, content: ExecutableContentId) -> &mut Self {
        self.fsm.script = content;
        self
    }

    /// Resolves all name references and finishes the document.
    pub fn build(mut self) -> Result<Box<Fsm>, String> {
        if !self.stack.is_empty() {
            return Err(format!(
                "unclosed state '{}'",
                self.fsm.get_state(self.current()).name
            ));
        }
        // Resolve transition targets.
        for (transition_id, names) in std::mem::take(&mut self.pending_targets) {
            let mut targets = Vec::new();
            for name in &names {
                match self.fsm.state_by_name(name) {
                    None => return Err(format!("unknown target state '{}'", name)),
                    Some(state) => targets.push(state.id),
                }
            }
            self.fsm.transitions[(transition_id - 1) as usize].target = targets;
        }
        // Explicit 'initial' attributes become initial transitions.
        for (state_id, names) in std::mem::take(&mut self.pending_initials) {
            let mut targets = Vec::new();
            for name in &names {
                match self.fsm.state_by_name(name) {
                    None => return Err(format!("unknown initial state '{}'", name)),
                    Some(state) => targets.push(state.id),
                }
            }
            let transition_id = self.add_initial_transition(state_id, targets);
            self.fsm.states[(state_id - 1) as usize].initial = transition_id;
        }
        // Compound states without an explicit initial default to their first
        // child in document order.
        for index in 0..self.fsm.states.len() {
            let (id, needs_default, first_child) = {
                let state = &self.fsm.states[index];
                (
                    state.id,
                    state.initial == 0
                        && !state.is_parallel
                        && !state.is_final
                        && state.history_type == HistoryType::None
                        && !state.states.is_empty(),
                    state.states.first().cloned(),
                )
            };
            if needs_default {
                let first_child = first_child.expect("non-empty child list");
                let transition_id = self.add_initial_transition(id, vec![first_child]);
                self.fsm.states[index].initial = transition_id;
            }
        }
        let root = self.fsm.pseudo_root;
        let root_initial = self.fsm.get_state(root).initial;
        if root_initial == 0 {
            return Err("document without states".to_string());
        }
        self.fsm.initial = root_initial;
        Ok(self.fsm)
    }

    fn add_initial_transition(&mut self, source: StateId, targets: Vec<StateId>) -> TransitionId {
        let id = (self.fsm.transitions.len() + 1) as TransitionId;
        let transition = Transition {
            id,
            doc_id: self.next_doc_id(),
            source,
            target: targets,
            events: Vec::new(),
            cond: None,
            content: 0,
        };
        self.fsm.transitions.push(transition);
        id
    }
}
