//! The statechart model and the interpreter algorithm.\
//! \
//! Data structures and procedure names follow the W3C pseudo-code for SCXML
//! interpretation where the behavior is taken from it, so the implementation
//! can be compared against the standard text side by side.\
//! See <https://www.w3.org/TR/scxml/#AlgorithmforSCXMLInterpretation>.
#![allow(non_snake_case)]

use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::slice::Iter;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use timer::{Guard, Timer};

#[cfg(feature = "Debug")]
use crate::common::debug;
use crate::common::{error, info};
use crate::datamodel::{createDatamodel, Data, Datamodel, GlobalDataAccess};
use crate::event_io_processor::EventIOProcessor;
use crate::executable_content::ExecutableContent;
use crate::fsm_executor::FsmExecutor;

pub type StateId = u32;
pub type TransitionId = u32;
pub type ExecutableContentId = u32;
pub type DocumentId = u32;
pub type SessionId = u32;
pub type InvokeId = String;

/// Platform wide counter for generated ids (send ids, invoke ids).
pub static PLATFORM_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Reserved event name by which the host (or a parent session) cancels a
/// running session. Clears the continuation flag of the event loop.
pub const EVENT_CANCEL_SESSION: &str = "cancel.session";

pub const EVENT_DONE_STATE_PREFIX: &str = "done.state.";
pub const EVENT_DONE_INVOKE_PREFIX: &str = "done.invoke.";

pub const EVENT_ERROR_EXECUTION: &str = "error.execution";
pub const EVENT_ERROR_COMMUNICATION: &str = "error.communication";
pub const EVENT_ERROR_SEND_TARGET: &str = "error.send.target";
pub const EVENT_ERROR_SEND_TYPE: &str = "error.send.type";
pub const EVENT_ERROR_EXECUTION_HINTS: &str = "error.execution.hints";
pub const EVENT_ERROR_EXECUTION_INVOKE_TYPE: &str = "error.execution.invoke.type";

/// Key in event data that carries the failure detail of platform error events.
pub const EXCEPTION_PARAM: &str = "exception";

pub const SCXML_INVOKE_TYPE: &str = "http://www.w3.org/TR/scxml/";
pub const SCXML_INVOKE_TYPE_SHORT: &str = "scxml";
pub const RESPONSE_SERVER_INVOKE_TYPE: &str = "x-pyscxml-responseserver";
pub const SOAP_INVOKE_TYPE: &str = "x-pyscxml-soap";

////////////////////////////////////////////////////////////////////////////////
// ## General purpose data types.
// Structs and methods are designed to match the signatures in the W3C pseudo-code.

/// #W3C says:
/// General purpose list type.
#[derive(Debug, Clone, Default)]
pub struct List<T: Clone> {
    data: Vec<T>,
}

impl<T: Clone> List<T> {
    pub fn new() -> List<T> {
        List {
            data: Default::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn isEmpty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, t: T) {
        self.data.push(t);
    }

    /// #W3C says:
    /// Returns the head of the list.
    pub fn head(&self) -> &T {
        self.data.first().expect("head() of empty list")
    }

    /// #W3C says:
    /// Returns the list of elements that satisfy the predicate f.
    /// # Actual implementation:
    /// Can't be named "filter", this would conflict with the Iterator method.
    pub fn filterBy(&self, f: &dyn Fn(&T) -> bool) -> List<T> {
        List {
            data: self.data.iter().filter(|t| f(t)).cloned().collect::<Vec<T>>(),
        }
    }

    /// #W3C says:
    /// Returns true if some element in the list satisfies the predicate f.
    /// Returns false for an empty list.
    pub fn some(&self, f: &dyn Fn(&T) -> bool) -> bool {
        self.data.iter().any(|t| f(t))
    }

    /// #W3C says:
    /// Returns true if every element in the list satisfies the predicate f.
    /// Returns true for an empty list.
    pub fn every(&self, f: &dyn Fn(&T) -> bool) -> bool {
        self.data.iter().all(|t| f(t))
    }

    /// Returns a sorted copy, the original list is not modified.
    pub fn sort<F>(&self, compare: &F) -> List<T>
    where
        F: Fn(&T, &T) -> std::cmp::Ordering + ?Sized,
    {
        let mut t = List {
            data: self.data.clone(),
        };
        t.data.sort_by(compare);
        t
    }

    pub fn iterator(&self) -> Iter<'_, T> {
        self.data.iter()
    }
}

/// Set datatype used by the algorithm.
/// #W3C says:
/// Note that the algorithm assumes a Lisp-like semantics in which the empty
/// Set null is equivalent to boolean 'false' and all other entities are
/// equivalent to 'true'.
#[derive(Debug, Clone, Default)]
pub struct OrderedSet<T> {
    data: Vec<T>,
}

impl<T: Clone + PartialEq> OrderedSet<T> {
    pub fn new() -> OrderedSet<T> {
        OrderedSet {
            data: Default::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// #W3C says:
    /// Adds e to the set if it is not already a member.
    pub fn add(&mut self, e: T) {
        if !self.data.contains(&e) {
            self.data.push(e);
        }
    }

    /// #W3C says:
    /// Deletes e from the set.
    pub fn delete(&mut self, e: &T) {
        self.data.retain(|x| *x != *e);
    }

    /// #W3C says:
    /// Adds all members of s that are not already members of the set.
    pub fn union(&mut self, s: &OrderedSet<T>) {
        for si in &s.data {
            self.add(si.clone());
        }
    }

    /// #W3C says:
    /// Is e a member of set?
    pub fn isMember(&self, e: &T) -> bool {
        self.data.contains(e)
    }

    /// #W3C says:
    /// Returns true if some element in the set satisfies the predicate f.
    /// Returns false for an empty set.
    pub fn some(&self, f: &dyn Fn(&T) -> bool) -> bool {
        self.data.iter().any(|t| f(t))
    }

    /// #W3C says:
    /// Returns true if every element in the set satisfies the predicate f.
    /// Returns true for an empty set.
    pub fn every(&self, f: &dyn Fn(&T) -> bool) -> bool {
        self.data.iter().all(|t| f(t))
    }

    /// #W3C says:
    /// Returns true if this set and set s have at least one member in common.
    pub fn hasIntersection(&self, s: &OrderedSet<T>) -> bool {
        self.data.iter().any(|t| s.isMember(t))
    }

    /// #W3C says:
    /// Is the set empty?
    pub fn isEmpty(&self) -> bool {
        self.data.is_empty()
    }

    /// #W3C says:
    /// Remove all elements from the set (make it empty).
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// #W3C says:
    /// Converts the set to a list that reflects the order in which elements
    /// were originally added.
    pub fn toList(&self) -> List<T> {
        List {
            data: self.data.clone(),
        }
    }

    pub fn iterator(&self) -> Iter<'_, T> {
        self.data.iter()
    }
}

/// Unbounded FIFO queue, single consumer. Used for the internal event queue.
#[derive(Debug, Default)]
pub struct Queue<T> {
    data: std::collections::VecDeque<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Queue<T> {
        Queue {
            data: std::collections::VecDeque::new(),
        }
    }

    /// #W3C says:
    /// Puts e last in the queue.
    pub fn enqueue(&mut self, e: T) {
        self.data.push_back(e);
    }

    /// #W3C says:
    /// Removes and returns first element in queue.
    pub fn dequeue(&mut self) -> T {
        self.data.pop_front().expect("dequeue() of empty queue")
    }

    /// #W3C says:
    /// Is the queue empty?
    pub fn isEmpty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Unbounded FIFO queue, multi-producer, single consumer, blocking take.\
/// Used for the external event queue and for the response and websocket
/// rendezvous of a session. Producers hold clones; the channel sender is the
/// only cross-thread interface to a running machine.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    pub sender: Sender<T>,
    pub receiver: Arc<Mutex<Receiver<T>>>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        BlockingQueue {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        BlockingQueue::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> BlockingQueue<T> {
        let (sender, receiver) = channel();
        BlockingQueue {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// #W3C says:
    /// Puts e last in the queue.
    pub fn enqueue(&self, e: T) {
        let _ = self.sender.send(e);
    }

    /// #W3C says:
    /// Removes and returns first element in queue, blocks if queue is empty.
    /// Returns None if all producers are gone.
    pub fn dequeue(&self) -> Option<T> {
        match self.receiver.lock() {
            Ok(receiver) => receiver.recv().ok(),
            Err(_) => None,
        }
    }

    /// Like [BlockingQueue::dequeue], but gives up after the timeout.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        match self.receiver.lock() {
            Ok(receiver) => receiver.recv_timeout(timeout).ok(),
            Err(_) => None,
        }
    }
}

/// #W3C says:
/// table\[foo\] returns the value associated with foo.
/// table\[foo\] = bar sets the value associated with foo to be bar.
#[derive(Debug, Default)]
pub struct HashTable<K, T> {
    data: HashMap<K, T>,
}

impl<K: Eq + Hash + Clone, T: Clone> HashTable<K, T> {
    pub fn new() -> HashTable<K, T> {
        HashTable {
            data: HashMap::new(),
        }
    }

    pub fn put(&mut self, k: K, v: &T) {
        self.data.insert(k, v.clone());
    }

    pub fn has(&self, k: K) -> bool {
        self.data.contains_key(&k)
    }

    pub fn get(&self, k: K) -> &T {
        self.data.get(&k).expect("get() of unknown key")
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Events

#[derive(Debug, Clone, PartialEq, Default)]
#[allow(non_camel_case_types)]
pub enum EventType {
    /// Raised by the platform itself, such as error events.
    platform,
    /// Raised by \<raise\> and \<send\> with target '#_internal'.
    internal,
    /// Everything else.
    #[default]
    external,
}

/// A name/value pair of evaluated \<param\> content.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamPair {
    pub name: String,
    pub value: Data,
}

impl ParamPair {
    pub fn new(name: &str, value: &Data) -> ParamPair {
        ParamPair {
            name: name.to_string(),
            value: value.clone(),
        }
    }

    pub fn new_moved(name: String, value: Data) -> ParamPair {
        ParamPair { name, value }
    }
}

impl Display for ParamPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Content of \<content\> child elements: either a literal or an expression
/// that is evaluated when the owning element fires.
#[derive(Debug, Clone, Default)]
pub struct CommonContent {
    pub content: Option<String>,
    pub content_expr: Option<String>,
}

/// Un-evaluated \<param\> definition.
#[derive(Debug, Clone, Default)]
pub struct Parameter {
    pub name: String,
    pub expr: String,
    pub location: String,
}

impl Display for Parameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parameter{{name:{} expr:{} location:{}}}",
            self.name, self.expr, self.location
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Event {
    pub name: String,
    pub etype: EventType,
    pub sendid: Option<String>,
    pub origin: Option<String>,
    pub origin_type: Option<String>,
    /// Set if the event was produced by a child invoke.
    pub invoke_id: Option<InvokeId>,
    pub param_values: Option<Vec<ParamPair>>,
    pub content: Option<Data>,
    /// Free-form key/value hints, carried to '#_response' and the wire envelope.
    pub hints: Option<HashMap<String, String>>,
}

impl Event {
    pub fn new_simple(name: &str) -> Event {
        Event {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn new_external(name: &str) -> Event {
        Event {
            name: name.to_string(),
            etype: EventType::external,
            ..Default::default()
        }
    }

    /// Internal 'done.state.\<id\>' event, raised when a final child of the
    /// state was entered.
    pub fn done_state(state_name: &str) -> Event {
        Event {
            name: format!("{}{}", EVENT_DONE_STATE_PREFIX, state_name),
            etype: EventType::internal,
            ..Default::default()
        }
    }

    /// External 'done.invoke.\<invokeid\>' event, sent to the parent session
    /// when an invoked child reaches a top-level final state.
    pub fn done_invoke(invoke_id: &InvokeId) -> Event {
        Event {
            name: format!("{}{}", EVENT_DONE_INVOKE_PREFIX, invoke_id),
            etype: EventType::external,
            invoke_id: Some(invoke_id.clone()),
            ..Default::default()
        }
    }

    /// Platform error event. The failure detail is carried in the event data
    /// under the 'exception' key.
    pub fn error(name: &str, exception: &str) -> Event {
        Event {
            name: name.to_string(),
            etype: EventType::platform,
            param_values: Some(vec![ParamPair::new_moved(
                EXCEPTION_PARAM.to_string(),
                Data::String(exception.to_string()),
            )]),
            ..Default::default()
        }
    }

    /// 'error.execution' or 'error.execution.\<kind\>' if a kind is given.
    pub fn error_execution(kind: Option<&str>, exception: &str) -> Event {
        match kind {
            None => Event::error(EVENT_ERROR_EXECUTION, exception),
            Some(kind) => Event::error(
                format!("{}.{}", EVENT_ERROR_EXECUTION, kind).as_str(),
                exception,
            ),
        }
    }

    pub fn error_communication(exception: &str) -> Event {
        Event::error(EVENT_ERROR_COMMUNICATION, exception)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event{{{} {:?}}}", self.name, self.etype)
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Model of the compiled document

#[derive(Debug, Clone, PartialEq, Default)]
pub enum HistoryType {
    #[default]
    None,
    Shallow,
    Deep,
}

/// Done-data producer of a final state. Content and params are evaluated
/// through the data model at the moment the final state is entered.
#[derive(Debug, Clone, Default)]
pub struct DoneData {
    pub content: Option<CommonContent>,
    pub params: Option<Vec<Parameter>>,
}

/// Invoke descriptor, owned by a state. Started when the state is entered
/// (after the macrostep stabilizes), cancelled when the state is exited.
#[derive(Debug, Clone, Default)]
pub struct Invoke {
    pub doc_id: DocumentId,
    /// The 'id' attribute. If empty, an id is generated at start time.
    pub invoke_id: InvokeId,
    /// Invoke type, 'scxml' if empty.
    pub type_name: String,
    /// Source URL of the invoked document.
    pub src: String,
    /// Inline source of the invoked document.
    pub content: Option<String>,
    pub autoforward: bool,
    /// Executable content, run on events coming back from this invocation.
    pub finalize: ExecutableContentId,
    /// Data model location that receives the (generated) invoke id.
    pub id_location: String,
}

/// Lifecycle of an invocation (tracked on the child session entry).
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeState {
    Pending,
    Running,
    Cancelled,
    Done,
}

/// A state node of the compiled graph. Used for \<state\>, \<parallel\>,
/// \<final\> and \<history\> elements; the flags tell the variants apart.
#[derive(Debug, Default)]
pub struct State {
    /// Arena index + 1. 0 is reserved for "none".
    pub id: StateId,
    /// Document order, assigned by the builder. Tiebreak of the entry and
    /// exit orderings.
    pub doc_id: DocumentId,
    /// Number of ancestors up to the root. Primary key of the entry and exit
    /// orderings.
    pub depth: u32,
    pub name: String,
    pub parent: StateId,
    /// The initial transition (only for compound states and the root).
    pub initial: TransitionId,
    /// Non-history children in document order.
    pub states: Vec<StateId>,
    /// History children.
    pub history: Vec<StateId>,
    pub is_parallel: bool,
    pub is_final: bool,
    pub history_type: HistoryType,
    pub onentry: Vec<ExecutableContentId>,
    pub onexit: Vec<ExecutableContentId>,
    pub transitions: Vec<TransitionId>,
    pub invoke: Vec<Invoke>,
    pub donedata: Option<DoneData>,
}

#[derive(Debug, Default)]
pub struct Transition {
    pub id: TransitionId,
    pub doc_id: DocumentId,
    pub source: StateId,
    /// Empty for targetless transitions (content runs without state change).
    pub target: Vec<StateId>,
    /// Event descriptors (dotted token lists). Empty marks an eventless
    /// transition.
    pub events: Vec<String>,
    /// Condition expression, evaluated by the data model.
    pub cond: Option<Data>,
    pub content: ExecutableContentId,
}

/// Matches an event name against the descriptors of a transition.\
/// A descriptor matches if its token list is a prefix of the event's token
/// list; '*' matches every event. Trailing '.*' is stripped by the builder
/// but also tolerated here.
pub fn nameMatch(descriptors: &[String], name: &str) -> bool {
    if descriptors.iter().any(|d| d == "*") {
        return true;
    }
    let name_tokens: Vec<&str> = name.split('.').collect();
    for descriptor in descriptors {
        let descriptor = descriptor.strip_suffix(".*").unwrap_or(descriptor);
        let tokens: Vec<&str> = descriptor.split('.').collect();
        if tokens.len() <= name_tokens.len()
            && tokens.iter().zip(name_tokens.iter()).all(|(a, b)| a == b)
        {
            return true;
        }
    }
    false
}

////////////////////////////////////////////////////////////////////////////////
// ## Session state

/// Entry of the '#_response' rendezvous queue, read by the HTTP response path.
#[derive(Debug, Clone, Default)]
pub struct ResponseEntry {
    pub content: Data,
    pub hints: HashMap<String, String>,
}

/// Handle of a running (or finished) session.
#[derive(Debug)]
pub struct ScxmlSession {
    pub session_id: SessionId,
    /// Set if this session is the child of an \<invoke\>.
    pub invoke_id: Option<InvokeId>,
    pub state: InvokeState,
    /// Sender of the session's external queue.
    pub sender: Sender<Box<Event>>,
    /// Only present on the handle returned from the start functions.
    pub session_thread: Option<JoinHandle<()>>,
    pub global_data: GlobalDataAccess,
}

impl Clone for ScxmlSession {
    fn clone(&self) -> Self {
        ScxmlSession {
            session_id: self.session_id,
            invoke_id: self.invoke_id.clone(),
            state: self.state.clone(),
            sender: self.sender.clone(),
            // Thread handles can't be cloned.
            session_thread: None,
            global_data: self.global_data.clone(),
        }
    }
}

/// A running invocation, keyed by the effective (possibly generated) invoke
/// id. Needed because generated ids are only known at start time, while the
/// descriptors in the state graph are immutable.
#[derive(Debug, Clone)]
pub struct ActiveInvoke {
    pub invoke_id: InvokeId,
    /// Owning state. The invocation is cancelled when it exits.
    pub state: StateId,
    pub autoforward: bool,
    pub finalize: ExecutableContentId,
    pub type_name: String,
}

/// All mutable runtime state of one session. Shared behind a mutex so that
/// the data model, the I/O processors and the host can reach it; the
/// interpreter itself runs single-threaded and holds the lock only briefly.
pub struct GlobalData {
    pub configuration: OrderedSet<StateId>,
    /// State names of the configuration, refreshed after each microstep
    /// (for the '/info' host surface and debug output).
    pub configuration_names: Vec<String>,
    pub statesToInvoke: OrderedSet<StateId>,
    pub internalQueue: Queue<Event>,
    pub externalQueue: BlockingQueue<Box<Event>>,
    pub historyValue: HashTable<StateId, OrderedSet<StateId>>,
    pub running: bool,
    pub finished: bool,
    pub session_id: SessionId,
    pub session_name: Option<String>,
    pub parent_session_id: Option<SessionId>,
    /// The invoke id under which this session was spawned.
    pub caller_invoke_id: Option<InvokeId>,
    /// Pending delayed sends by send id. Dropping a guard cancels the timer.
    pub delayed_send: HashMap<String, Guard>,
    pub child_sessions: HashMap<InvokeId, ScxmlSession>,
    /// Wire endpoints of response-server invocations.
    pub invoke_wire_endpoints: HashMap<InvokeId, String>,
    pub active_invokes: HashMap<InvokeId, ActiveInvoke>,
    pub io_processors: Vec<Arc<Mutex<dyn EventIOProcessor>>>,
    pub executor: Option<Box<FsmExecutor>>,
    /// Recorded before the exit pass tears the configuration down.
    pub final_configuration: Option<Vec<String>>,
    pub response_queue: BlockingQueue<ResponseEntry>,
    pub websocket_queue: BlockingQueue<String>,
    /// Host log sink for \<log\> output; falls back to the log crate.
    pub log_sink: Option<Box<dyn Fn(&str, &str) + Send>>,
}

impl Default for GlobalData {
    fn default() -> Self {
        GlobalData::new()
    }
}

impl GlobalData {
    pub fn new() -> GlobalData {
        GlobalData {
            configuration: OrderedSet::new(),
            configuration_names: Vec::new(),
            statesToInvoke: OrderedSet::new(),
            internalQueue: Queue::new(),
            externalQueue: BlockingQueue::new(),
            historyValue: HashTable::new(),
            running: false,
            finished: false,
            session_id: 0,
            session_name: None,
            parent_session_id: None,
            caller_invoke_id: None,
            delayed_send: HashMap::new(),
            child_sessions: HashMap::new(),
            invoke_wire_endpoints: HashMap::new(),
            active_invokes: HashMap::new(),
            io_processors: Vec::new(),
            executor: None,
            final_configuration: None,
            response_queue: BlockingQueue::new(),
            websocket_queue: BlockingQueue::new(),
            log_sink: None,
        }
    }

    pub fn enqueue_internal(&mut self, event: Event) {
        self.internalQueue.enqueue(event);
    }
}

impl Debug for GlobalData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalData")
            .field("session_id", &self.session_id)
            .field("running", &self.running)
            .field("configuration", &self.configuration_names)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## The interpreter

/// A compiled statechart document plus the interpreter operating on it.\
/// The graph is immutable during interpretation; all mutable state lives in
/// [GlobalData], owned by the data model.
pub struct Fsm {
    /// The 'name' attribute of the document, bound to '_name'.
    pub name: String,
    pub datamodel_name: String,
    /// Strict documents escalate unknown send/invoke types to session
    /// termination instead of an error event.
    pub strict_mode: bool,
    pub pseudo_root: StateId,
    /// Synthetic transition targeting the root's initial states.
    pub initial: TransitionId,
    /// Global script, run once before the initial states are entered.
    pub script: ExecutableContentId,
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
    /// Executable content blocks; block id is index + 1.
    pub executableContent: Vec<Vec<Box<dyn ExecutableContent>>>,
    /// Document-level data declarations in document order.
    pub data: Vec<(String, Data)>,
    pub caller_invoke_id: Option<InvokeId>,
    pub parent_session_id: Option<SessionId>,
    /// Scheduler for delayed sends. One worker thread with a priority queue.
    pub timer: Timer,
}

impl Default for Fsm {
    fn default() -> Self {
        Fsm::new()
    }
}

impl Display for Fsm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fsm{{name:{} states:{} transitions:{}}}",
            self.name,
            self.states.len(),
            self.transitions.len()
        )
    }
}

impl Fsm {
    pub fn new() -> Fsm {
        Fsm {
            name: String::new(),
            datamodel_name: crate::datamodel::DEFAULT_DATAMODEL.to_string(),
            strict_mode: false,
            pseudo_root: 0,
            initial: 0,
            script: 0,
            states: Vec::new(),
            transitions: Vec::new(),
            executableContent: Vec::new(),
            data: Vec::new(),
            caller_invoke_id: None,
            parent_session_id: None,
            timer: Timer::new(),
        }
    }

    pub fn get_state(&self, state_id: StateId) -> &State {
        &self.states[(state_id - 1) as usize]
    }

    pub fn get_transition(&self, transition_id: TransitionId) -> &Transition {
        &self.transitions[(transition_id - 1) as usize]
    }

    pub fn state_by_name(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Schedules a one-shot timer. The returned guard cancels the timer when
    /// dropped; keep it in [GlobalData::delayed_send] to support \<cancel\>.
    pub fn schedule<F>(&self, delay_ms: i64, cb: F) -> Option<Guard>
    where
        F: 'static + FnMut() + Send,
    {
        if delay_ms > 0 {
            Some(
                self.timer
                    .schedule_with_delay(chrono::Duration::milliseconds(delay_ms), cb),
            )
        } else {
            None
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // State predicates and tree navigation.

    pub fn isScxmlElement(&self, state: StateId) -> bool {
        self.get_state(state).parent == 0
    }

    pub fn isFinalState(&self, state: StateId) -> bool {
        self.get_state(state).is_final
    }

    pub fn isParallelState(&self, state: StateId) -> bool {
        self.get_state(state).is_parallel
    }

    pub fn isHistoryState(&self, state: StateId) -> bool {
        self.get_state(state).history_type != HistoryType::None
    }

    /// An atomic state is a final state or a state without children.
    pub fn isAtomicState(&self, state: StateId) -> bool {
        let s = self.get_state(state);
        s.is_final
            || (s.states.is_empty() && !s.is_parallel && s.history_type == HistoryType::None)
    }

    /// A compound state has children and is neither parallel nor the
    /// document root... the root is handled separately by isScxmlElement.
    pub fn isCompoundState(&self, state: StateId) -> bool {
        let s = self.get_state(state);
        !s.is_parallel && !s.is_final && s.history_type == HistoryType::None && !s.states.is_empty()
    }

    /// #W3C says:
    /// Returns a list containing all \<state\>, \<final\>, and \<parallel\>
    /// children of state1 (history children are not included).
    pub fn getChildStates(&self, state: StateId) -> List<StateId> {
        let mut l: List<StateId> = List::new();
        for c in &self.get_state(state).states {
            l.push(*c);
        }
        l
    }

    /// #W3C says:
    /// If state2 is null, returns the set of all ancestors of state1 in
    /// ancestry order (state1's parent followed by the parent's parent, etc.
    /// up to an including the \<scxml\> element). If state2 is non-null,
    /// returns in ancestry order the set of all ancestors of state1, up to
    /// but not including state2.
    pub fn getProperAncestors(&self, state1: StateId, state2: StateId) -> List<StateId> {
        let mut l = List::new();
        let mut s = state1;
        loop {
            let p = self.get_state(s).parent;
            if p == 0 || p == state2 {
                break;
            }
            l.push(p);
            s = p;
        }
        l
    }

    /// #W3C says:
    /// Returns 'true' if state1 is a descendant of state2 (a child, or a
    /// child of a child, or a child of a child of a child, etc.)
    pub fn isDescendant(&self, state1: StateId, state2: StateId) -> bool {
        if state2 == 0 {
            return false;
        }
        let mut s = state1;
        loop {
            let p = self.get_state(s).parent;
            if p == 0 {
                return false;
            }
            if p == state2 {
                return true;
            }
            s = p;
        }
    }

    /// #W3C says:
    /// The Least Common Ancestor is the element s such that s is a proper
    /// ancestor of all states on stateList and no descendant of s has this
    /// property. The LCA is never a member of stateList.
    pub fn findLCA(&self, state_list: &List<StateId>) -> StateId {
        for anc in self.getProperAncestors(*state_list.head(), 0).iterator() {
            if state_list
                .iterator()
                .skip(1)
                .all(|s| self.isDescendant(*s, *anc))
            {
                return *anc;
            }
        }
        0
    }

    fn findLCAOfTransition(&self, t: &Transition) -> StateId {
        let mut l = List::new();
        l.push(t.source);
        for s in &t.target {
            l.push(*s);
        }
        self.findLCA(&l)
    }

    /// Entry order: depth ascending, document order as tiebreak.
    pub fn entryOrder(&self, s1: &StateId, s2: &StateId) -> std::cmp::Ordering {
        let st1 = self.get_state(*s1);
        let st2 = self.get_state(*s2);
        (st1.depth, st1.doc_id).cmp(&(st2.depth, st2.doc_id))
    }

    /// Exit order: depth descending, document order as tiebreak.
    pub fn exitOrder(&self, s1: &StateId, s2: &StateId) -> std::cmp::Ordering {
        let st1 = self.get_state(*s1);
        let st2 = self.get_state(*s2);
        (std::cmp::Reverse(st1.depth), st1.doc_id).cmp(&(std::cmp::Reverse(st2.depth), st2.doc_id))
    }

    pub fn documentOrder(&self, s1: &StateId, s2: &StateId) -> std::cmp::Ordering {
        self.get_state(*s1).doc_id.cmp(&self.get_state(*s2).doc_id)
    }

    ////////////////////////////////////////////////////////////////////////////
    // The event loop (C9).

    /// #W3C says:
    /// The purpose of this procedure is to initialize the interpreter and to
    /// start processing: execute the global script, enter the initial states,
    /// then run the event loop.
    /// # Actual implementation:
    /// The initial eventless closure runs to completion before the first
    /// external event is consumed.
    pub fn interpret(&self, datamodel: &mut dyn Datamodel) {
        {
            let mut global = datamodel.global().lock();
            global.running = true;
        }
        if self.script != 0 {
            self.executeContent(datamodel, self.script);
        }
        let mut initial_transitions = List::new();
        initial_transitions.push(self.initial);
        self.executeTransitionContent(datamodel, &initial_transitions);
        self.enterStates(datamodel, &initial_transitions);
        self.eventlessClosure(datamodel);
        self.mainEventLoop(datamodel);
    }

    /// Drains eventless transitions and internal events until the
    /// configuration is stable. Part of every macrostep.
    fn eventlessClosure(&self, datamodel: &mut dyn Datamodel) {
        loop {
            if !datamodel.global().lock().running {
                return;
            }
            let mut enabled = self.selectEventlessTransitions(datamodel);
            if enabled.isEmpty() {
                let internal_event = {
                    let mut global = datamodel.global().lock();
                    if global.internalQueue.isEmpty() {
                        None
                    } else {
                        Some(global.internalQueue.dequeue())
                    }
                };
                match internal_event {
                    None => break,
                    Some(event) => {
                        #[cfg(feature = "Debug")]
                        debug!("internal event: {}", event.name);
                        datamodel.set_event(&event);
                        enabled = self.selectTransitions(datamodel, &event);
                    }
                }
            }
            if !enabled.isEmpty() {
                self.microstep(datamodel, &enabled.toList());
            }
        }
    }

    /// #W3C says:
    /// ## procedure mainEventLoop()
    /// This loop runs until we enter a top-level final state or an external
    /// entity cancels processing. Each iteration: start the invokes of
    /// states entered in the last macrostep, wait for an external event,
    /// apply finalize/autoforward processing, take the triggered
    /// transitions, then drain the eventless closure.
    fn mainEventLoop(&self, datamodel: &mut dyn Datamodel) {
        loop {
            // Start invokes scheduled by the last macrostep.
            let to_invoke: Vec<StateId> = {
                let mut global = datamodel.global().lock();
                if !global.running {
                    break;
                }
                let sorted = global
                    .statesToInvoke
                    .toList()
                    .sort(&|a, b| self.entryOrder(a, b));
                global.statesToInvoke.clear();
                sorted.iterator().cloned().collect()
            };
            for sid in &to_invoke {
                for inv in &self.get_state(*sid).invoke {
                    self.invoke(datamodel, *sid, inv);
                }
            }
            // Invoking may have raised internal error events.
            self.eventlessClosure(datamodel);
            if !datamodel.global().lock().running {
                break;
            }

            let external_queue = datamodel.global().lock().externalQueue.clone();
            let external_event = match external_queue.dequeue() {
                Some(event) => *event,
                None => {
                    // All producers are gone, nothing can wake us up again.
                    datamodel.global().lock().running = false;
                    break;
                }
            };
            if external_event.name == EVENT_CANCEL_SESSION {
                datamodel.global().lock().running = false;
                continue;
            }
            #[cfg(feature = "Debug")]
            debug!("external event: {}", external_event.name);
            datamodel.set_event(&external_event);
            if let Some(invoke_id) = external_event.invoke_id.clone() {
                self.applyFinalizeAndAutoforward(datamodel, &invoke_id, &external_event);
            }
            let enabled = self.selectTransitions(datamodel, &external_event);
            if !enabled.isEmpty() {
                self.microstep(datamodel, &enabled.toList());
            }
            self.eventlessClosure(datamodel);
        }
        self.exitInterpreter(datamodel);
    }

    /// #W3C says:
    /// # procedure exitInterpreter()
    /// The purpose of this procedure is to exit the current session by
    /// exiting all active states. If the machine was invoked and reached a
    /// top-level final state, 'done.invoke.\<id\>' is placed in the external
    /// queue of the invoking session.
    fn exitInterpreter(&self, datamodel: &mut dyn Datamodel) {
        let exit_list;
        {
            let mut global = datamodel.global().lock();
            let names: Vec<String> = global
                .configuration
                .iterator()
                .map(|s| self.get_state(*s).name.clone())
                .collect();
            global.final_configuration = Some(names);
            exit_list = global
                .configuration
                .toList()
                .sort(&|a, b| self.exitOrder(a, b));
        }
        let mut in_final_state = false;
        let mut done_data: (Option<Vec<ParamPair>>, Option<Data>) = (None, None);
        for sid in exit_list.iterator() {
            let state = self.get_state(*sid);
            for content in &state.onexit {
                self.executeContent(datamodel, *content);
            }
            self.cancelStateInvokes(datamodel, *sid);
            if state.is_final && self.isScxmlElement(state.parent) {
                in_final_state = true;
                done_data = self.evaluateDoneData(datamodel, state);
            }
            datamodel.global().lock().configuration.delete(sid);
        }
        let (session_id, caller_invoke_id, parent_session_id, executor) = {
            let mut global = datamodel.global().lock();
            global.finished = true;
            (
                global.session_id,
                global.caller_invoke_id.clone(),
                global.parent_session_id,
                global.executor.clone(),
            )
        };
        if in_final_state {
            if let (Some(invoke_id), Some(parent_id), Some(executor)) =
                (caller_invoke_id, parent_session_id, executor)
            {
                let mut event = Event::done_invoke(&invoke_id);
                (event.param_values, event.content) = done_data;
                if let Err(message) = executor.send_to_session(parent_id, event) {
                    error!(
                        "can't deliver done.invoke to parent session #{}. {}",
                        parent_id, message
                    );
                }
            }
        }
        info!("session #{} exiting", session_id);
    }

    ////////////////////////////////////////////////////////////////////////////
    // Transition selection (C4).

    fn atomicConfigurationStates(&self, datamodel: &mut dyn Datamodel) -> Vec<StateId> {
        let configuration = datamodel.global().lock().configuration.toList();
        configuration
            .filterBy(&|s| self.isAtomicState(*s))
            .sort(&|a, b| self.documentOrder(a, b))
            .iterator()
            .cloned()
            .collect()
    }

    /// The chain walked during selection: the atomic state itself followed
    /// by its proper ancestors, excluding the document root.
    fn selectionChain(&self, state: StateId) -> Vec<StateId> {
        let mut chain = vec![state];
        for anc in self.getProperAncestors(state, 0).iterator() {
            if *anc != self.pseudo_root {
                chain.push(*anc);
            }
        }
        chain
    }

    fn conditionMatch(&self, datamodel: &mut dyn Datamodel, t: &Transition) -> bool {
        match &t.cond {
            None => true,
            Some(cond) => match datamodel.execute_condition(cond) {
                Ok(value) => value,
                Err(err) => {
                    error!("condition '{}' can't be evaluated. {}", cond, err.message);
                    datamodel.internal_error_execution_kind(&err.kind, &err.message);
                    false
                }
            },
        }
    }

    /// #W3C says:
    /// # function selectEventlessTransitions()
    /// Selects all transitions enabled in the current configuration that do
    /// not require an event trigger: for each atomic state, walk through the
    /// state and its ancestors and take the first eventless transition whose
    /// condition holds. Preempted states are skipped.
    fn selectEventlessTransitions(&self, datamodel: &mut dyn Datamodel) -> OrderedSet<TransitionId> {
        let mut enabled: OrderedSet<TransitionId> = OrderedSet::new();
        for state in self.atomicConfigurationStates(datamodel) {
            if self.isPreempted(state, &enabled) {
                continue;
            }
            'walk: for s in self.selectionChain(state) {
                for tid in &self.get_state(s).transitions {
                    let t = self.get_transition(*tid);
                    if t.events.is_empty() && self.conditionMatch(datamodel, t) {
                        enabled.add(*tid);
                        break 'walk;
                    }
                }
            }
        }
        enabled
    }

    /// #W3C says:
    /// # function selectTransitions(event)
    /// Collects the transitions that are enabled by this event in the
    /// current configuration: for each atomic state, the first transition
    /// (in document order, state before ancestors) whose event descriptor
    /// matches and whose condition holds.
    fn selectTransitions(
        &self,
        datamodel: &mut dyn Datamodel,
        event: &Event,
    ) -> OrderedSet<TransitionId> {
        let mut enabled: OrderedSet<TransitionId> = OrderedSet::new();
        for state in self.atomicConfigurationStates(datamodel) {
            if self.isPreempted(state, &enabled) {
                continue;
            }
            'walk: for s in self.selectionChain(state) {
                for tid in &self.get_state(s).transitions {
                    let t = self.get_transition(*tid);
                    if !t.events.is_empty()
                        && nameMatch(&t.events, &event.name)
                        && self.conditionMatch(datamodel, t)
                    {
                        enabled.add(*tid);
                        break 'walk;
                    }
                }
            }
        }
        enabled
    }

    /// Outer transitions win within one microstep: a state is preempted if
    /// an already selected targeted transition has an LCA that is an
    /// ancestor of the state. Targetless transitions never preempt.
    fn isPreempted(&self, state: StateId, enabled: &OrderedSet<TransitionId>) -> bool {
        for tid in enabled.iterator() {
            let t = self.get_transition(*tid);
            if !t.target.is_empty() {
                let lca = self.findLCAOfTransition(t);
                if self.isDescendant(state, lca) {
                    return true;
                }
            }
        }
        false
    }

    ////////////////////////////////////////////////////////////////////////////
    // Microstep execution (C5).

    /// #W3C says:
    /// # procedure microstep(enabledTransitions)
    /// The purpose of the microstep procedure is to process a single set of
    /// transitions: the source states are exited, the transition content is
    /// executed, the target states are entered.
    fn microstep(&self, datamodel: &mut dyn Datamodel, enabled: &List<TransitionId>) {
        self.exitStates(datamodel, enabled);
        self.executeTransitionContent(datamodel, enabled);
        self.enterStates(datamodel, enabled);
        #[cfg(debug_assertions)]
        {
            let global = datamodel.global().lock();
            debug_assert!(
                self.configurationIsConsistent(&global),
                "configuration invariants violated: {{{}}}",
                global.configuration_names.join(", ")
            );
        }
    }

    /// #W3C says:
    /// # procedure exitStates(enabledTransitions)
    /// Compute the set of states to exit: every configuration member that is
    /// a descendant of a transition's LCA. Record history, run onexit
    /// handlers in exit order, cancel invocations, remove the states.
    fn exitStates(&self, datamodel: &mut dyn Datamodel, enabled: &List<TransitionId>) {
        let exit_list;
        {
            let mut global = datamodel.global().lock();
            let mut statesToExit: OrderedSet<StateId> = OrderedSet::new();
            for tid in enabled.iterator() {
                let t = self.get_transition(*tid);
                if t.target.is_empty() {
                    continue;
                }
                let lca = self.findLCAOfTransition(t);
                for s in global.configuration.iterator() {
                    if self.isDescendant(*s, lca) {
                        statesToExit.add(*s);
                    }
                }
            }
            for s in statesToExit.iterator() {
                global.statesToInvoke.delete(s);
            }
            exit_list = statesToExit.toList().sort(&|a, b| self.exitOrder(a, b));

            // Record history before anything is removed.
            for sid in exit_list.iterator() {
                let state = self.get_state(*sid);
                for h in &state.history {
                    let deep = self.get_state(*h).history_type == HistoryType::Deep;
                    let mut remembered: OrderedSet<StateId> = OrderedSet::new();
                    for s0 in global.configuration.iterator() {
                        let keep = if deep {
                            self.isAtomicState(*s0) && self.isDescendant(*s0, *sid)
                        } else {
                            self.get_state(*s0).parent == *sid
                        };
                        if keep {
                            remembered.add(*s0);
                        }
                    }
                    global.historyValue.put(*h, &remembered);
                }
            }
        }
        for sid in exit_list.iterator() {
            let state = self.get_state(*sid);
            for content in &state.onexit {
                self.executeContent(datamodel, *content);
            }
            self.cancelStateInvokes(datamodel, *sid);
            datamodel.global().lock().configuration.delete(sid);
        }
    }

    /// #W3C says:
    /// # procedure executeTransitionContent(enabledTransitions)
    /// For each transition in the list of enabledTransitions, execute its
    /// executable content.
    fn executeTransitionContent(&self, datamodel: &mut dyn Datamodel, enabled: &List<TransitionId>) {
        for tid in enabled.iterator() {
            let content = self.get_transition(*tid).content;
            if content != 0 {
                self.executeContent(datamodel, content);
            }
        }
    }

    /// #W3C says:
    /// ## procedure enterStates(enabledTransitions)
    /// Compute the complete entry set, sort it in entry order, then for each
    /// state: add it to the configuration, run its onentry handlers, run the
    /// initial transition's content for default entries and generate done
    /// events for final states.
    fn enterStates(&self, datamodel: &mut dyn Datamodel, enabled: &List<TransitionId>) {
        let mut statesToEnter: OrderedSet<StateId> = OrderedSet::new();
        let mut statesForDefaultEntry: OrderedSet<StateId> = OrderedSet::new();
        {
            let global = datamodel.global().lock();
            for tid in enabled.iterator() {
                let t = self.get_transition(*tid);
                if t.target.is_empty() {
                    continue;
                }
                let lca = self.findLCAOfTransition(t);
                if lca != 0 && self.isParallelState(lca) {
                    for child in self.getChildStates(lca).iterator() {
                        self.addStatesToEnter(
                            &global,
                            *child,
                            lca,
                            &mut statesToEnter,
                            &mut statesForDefaultEntry,
                        );
                    }
                }
                for s in &t.target {
                    self.addStatesToEnter(
                        &global,
                        *s,
                        lca,
                        &mut statesToEnter,
                        &mut statesForDefaultEntry,
                    );
                }
            }
        }
        {
            let mut global = datamodel.global().lock();
            for s in statesToEnter.iterator() {
                global.statesToInvoke.add(*s);
            }
        }
        let enter_list = statesToEnter.toList().sort(&|a, b| self.entryOrder(a, b));
        for sid in enter_list.iterator() {
            let state = self.get_state(*sid);
            datamodel.global().lock().configuration.add(*sid);
            for content in &state.onentry {
                self.executeContent(datamodel, *content);
            }
            if statesForDefaultEntry.isMember(sid) && state.initial != 0 {
                let content = self.get_transition(state.initial).content;
                if content != 0 {
                    self.executeContent(datamodel, content);
                }
            }
            if state.is_final {
                let parent = state.parent;
                if self.isScxmlElement(parent) {
                    // Reached a top-level final state.
                    datamodel.global().lock().running = false;
                } else {
                    let (param_values, content) = self.evaluateDoneData(datamodel, state);
                    let parent_state = self.get_state(parent);
                    let mut event = Event::done_state(&parent_state.name);
                    event.param_values = param_values;
                    event.content = content;
                    datamodel.global().lock().enqueue_internal(event);
                    let grandparent = parent_state.parent;
                    if grandparent != 0 && self.isParallelState(grandparent) {
                        let all_in_final = {
                            let global = datamodel.global().lock();
                            self.getChildStates(grandparent)
                                .every(&|c| self.isInFinalState(&global, *c))
                        };
                        if all_in_final {
                            datamodel
                                .global()
                                .lock()
                                .enqueue_internal(Event::done_state(&self.get_state(grandparent).name));
                        }
                    }
                }
            }
        }
        {
            let mut global = datamodel.global().lock();
            global.configuration_names = global
                .configuration
                .iterator()
                .map(|s| self.get_state(*s).name.clone())
                .collect();
            #[cfg(feature = "Debug")]
            debug!(
                "new configuration: {{{}}}",
                global.configuration_names.join(", ")
            );
        }
    }

    /// #W3C says:
    /// # procedure addStatesToEnter(state, root, statesToEnter, statesForDefaultEntry)
    /// Adds 'state' and any of its descendants the machine will end up
    /// entering, plus the ancestors between 'state' and 'root'. History
    /// pseudo-states are dereferenced to their recorded value or their
    /// default transition targets.
    fn addStatesToEnter(
        &self,
        global: &GlobalData,
        state: StateId,
        root: StateId,
        statesToEnter: &mut OrderedSet<StateId>,
        statesForDefaultEntry: &mut OrderedSet<StateId>,
    ) {
        if self.isHistoryState(state) {
            if global.historyValue.has(state) {
                let remembered = global.historyValue.get(state).clone();
                for s0 in remembered.iterator() {
                    self.addStatesToEnter(global, *s0, state, statesToEnter, statesForDefaultEntry);
                }
            } else {
                // No memory yet, follow the history's default transition.
                for tid in &self.get_state(state).transitions {
                    for s0 in &self.get_transition(*tid).target {
                        self.addStatesToEnter(
                            global,
                            *s0,
                            state,
                            statesToEnter,
                            statesForDefaultEntry,
                        );
                    }
                }
            }
        } else {
            statesToEnter.add(state);
            if self.isParallelState(state) {
                for child in self.getChildStates(state).iterator() {
                    self.addStatesToEnter(global, *child, state, statesToEnter, statesForDefaultEntry);
                }
            } else if self.isCompoundState(state) {
                statesForDefaultEntry.add(state);
                let initial = self.get_state(state).initial;
                if initial != 0 {
                    for s0 in &self.get_transition(initial).target {
                        self.addStatesToEnter(
                            global,
                            *s0,
                            state,
                            statesToEnter,
                            statesForDefaultEntry,
                        );
                    }
                }
            }
            for anc in self.getProperAncestors(state, root).iterator() {
                statesToEnter.add(*anc);
                if self.isParallelState(*anc) {
                    for child in self.getChildStates(*anc).iterator() {
                        if !statesToEnter.some(&|s2| self.isDescendant(*s2, *child)) {
                            self.addStatesToEnter(
                                global,
                                *child,
                                *anc,
                                statesToEnter,
                                statesForDefaultEntry,
                            );
                        }
                    }
                }
            }
        }
    }

    /// #W3C says:
    /// # procedure isInFinalState(s)
    /// True if s is a compound state with an active final child, or a
    /// parallel state all of whose children are in a final state.
    fn isInFinalState(&self, global: &GlobalData, state: StateId) -> bool {
        if self.isCompoundState(state) {
            self.getChildStates(state).some(&|c| {
                self.get_state(*c).is_final && global.configuration.isMember(c)
            })
        } else if self.isParallelState(state) {
            self.getChildStates(state)
                .every(&|c| self.isInFinalState(global, *c))
        } else {
            false
        }
    }

    fn evaluateDoneData(
        &self,
        datamodel: &mut dyn Datamodel,
        state: &State,
    ) -> (Option<Vec<ParamPair>>, Option<Data>) {
        match &state.donedata {
            None => (None, None),
            Some(donedata) => {
                let mut param_values = Vec::new();
                datamodel.evaluate_params(&donedata.params, &mut param_values);
                let content = datamodel.evaluate_content(&donedata.content);
                (
                    if param_values.is_empty() {
                        None
                    } else {
                        Some(param_values)
                    },
                    content,
                )
            }
        }
    }

    /// Runs one block of executable content. A failing element is skipped,
    /// its siblings still run; the element itself has raised the matching
    /// platform error event.
    pub fn executeContent(&self, datamodel: &mut dyn Datamodel, content_id: ExecutableContentId) -> bool {
        if content_id == 0 {
            return true;
        }
        match self.executableContent.get((content_id - 1) as usize) {
            None => {
                error!("unknown executable content block #{}", content_id);
                false
            }
            Some(block) => {
                let mut all_ok = true;
                for element in block {
                    if !element.execute(datamodel, self) {
                        all_ok = false;
                    }
                }
                all_ok
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Invoke handling (C8).

    /// Starts one invocation of a state that was entered in the last
    /// macrostep. Children run as independent sessions on their own thread,
    /// wired back to this session's external queue.
    fn invoke(&self, datamodel: &mut dyn Datamodel, state_id: StateId, inv: &Invoke) {
        let state = self.get_state(state_id);
        let (executor, session_id) = {
            let global = datamodel.global().lock();
            (global.executor.clone(), global.session_id)
        };
        let executor = match executor {
            Some(executor) => executor,
            None => {
                error!(
                    "no executor available, cannot start invoke in state '{}'",
                    state.name
                );
                return;
            }
        };
        let type_name = if inv.type_name.is_empty() {
            SCXML_INVOKE_TYPE_SHORT
        } else {
            inv.type_name.as_str()
        };
        match type_name {
            SCXML_INVOKE_TYPE_SHORT | SCXML_INVOKE_TYPE => {
                let child_session_id = crate::fsm_executor::next_session_id();
                let invoke_id = self.effectiveInvokeId(inv, state, child_session_id);
                if !inv.id_location.is_empty() {
                    datamodel.set(&inv.id_location, Data::String(invoke_id.clone()));
                }
                let source = match self.resolveInvokeSource(datamodel, inv) {
                    Some(source) => source,
                    None => return,
                };
                let mut child = match executor.load_machine(&source) {
                    Ok(child) => child,
                    Err(message) => {
                        error!("invoke in state '{}' failed: {}", state.name, message);
                        datamodel.internal_error_execution(&message);
                        return;
                    }
                };
                child.caller_invoke_id = Some(invoke_id.clone());
                child.parent_session_id = Some(session_id);
                let mut session = crate::fsm::start_fsm_with_session_id(
                    child,
                    executor.clone(),
                    &Vec::new(),
                    FinishMode::DISPOSE,
                    child_session_id,
                );
                session.invoke_id = Some(invoke_id.clone());
                session.state = InvokeState::Running;
                #[cfg(feature = "Debug")]
                debug!(
                    "invoke '{}': started session #{}",
                    invoke_id, child_session_id
                );
                let mut global = datamodel.global().lock();
                global.active_invokes.insert(
                    invoke_id.clone(),
                    ActiveInvoke {
                        invoke_id: invoke_id.clone(),
                        state: state_id,
                        autoforward: inv.autoforward,
                        finalize: inv.finalize,
                        type_name: type_name.to_string(),
                    },
                );
                global.child_sessions.insert(invoke_id, session);
            }
            RESPONSE_SERVER_INVOKE_TYPE => {
                // No child machine: events sent to '#_<id>' are serialized to
                // the wire envelope and posted to the configured endpoint.
                let invoke_id = self.effectiveInvokeId(
                    inv,
                    state,
                    PLATFORM_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                );
                if !inv.id_location.is_empty() {
                    datamodel.set(&inv.id_location, Data::String(invoke_id.clone()));
                }
                if inv.src.is_empty() {
                    datamodel.internal_error_execution("response server invoke without src");
                    return;
                }
                let mut global = datamodel.global().lock();
                global
                    .invoke_wire_endpoints
                    .insert(invoke_id.clone(), inv.src.clone());
                global.active_invokes.insert(
                    invoke_id.clone(),
                    ActiveInvoke {
                        invoke_id,
                        state: state_id,
                        autoforward: inv.autoforward,
                        finalize: inv.finalize,
                        type_name: type_name.to_string(),
                    },
                );
            }
            _ => {
                error!(
                    "unknown invoke type '{}' in state '{}'",
                    type_name, state.name
                );
                if self.strict_mode {
                    datamodel.global().lock().running = false;
                    return;
                }
                let event = Event::error(
                    EVENT_ERROR_EXECUTION_INVOKE_TYPE,
                    format!("unknown invoke type '{}'", type_name).as_str(),
                );
                datamodel.global().lock().enqueue_internal(event);
            }
        }
    }

    fn effectiveInvokeId(&self, inv: &Invoke, state: &State, unique: u32) -> InvokeId {
        if inv.invoke_id.is_empty() {
            format!("{}.{}", state.name, unique)
        } else {
            inv.invoke_id.clone()
        }
    }

    /// Resolves the invoked document source: inline content wins, otherwise
    /// the src URL is fetched. Fetch failures raise 'error.communication'.
    fn resolveInvokeSource(&self, datamodel: &mut dyn Datamodel, inv: &Invoke) -> Option<String> {
        if let Some(content) = &inv.content {
            return Some(content.clone());
        }
        if inv.src.is_empty() {
            datamodel.internal_error_execution("invoke without content or src");
            return None;
        }
        match ureq::get(&inv.src).call() {
            Ok(response) => match response.into_string() {
                Ok(body) => Some(body),
                Err(err) => {
                    datamodel.internal_error_communication(&format!(
                        "can't read invoke source '{}': {}",
                        inv.src, err
                    ));
                    None
                }
            },
            Err(err) => {
                datamodel.internal_error_communication(&format!(
                    "can't fetch invoke source '{}': {}",
                    inv.src, err
                ));
                None
            }
        }
    }

    /// Finalize runs before autoforward for the same event.
    fn applyFinalizeAndAutoforward(
        &self,
        datamodel: &mut dyn Datamodel,
        invoke_id: &InvokeId,
        event: &Event,
    ) {
        let (finalize, autoforward, child_sender) = {
            let global = datamodel.global().lock();
            match global.active_invokes.get(invoke_id) {
                None => return,
                Some(active) => {
                    if !global.configuration.isMember(&active.state) {
                        return;
                    }
                    (
                        active.finalize,
                        active.autoforward,
                        global
                            .child_sessions
                            .get(invoke_id)
                            .map(|session| session.sender.clone()),
                    )
                }
            }
        };
        if finalize != 0 {
            self.executeContent(datamodel, finalize);
        }
        if autoforward {
            if let Some(sender) = child_sender {
                let _ = sender.send(Box::new(event.clone()));
            }
        }
    }

    /// Cancels all invocations owned by the state (called when it exits and
    /// on interpreter exit).
    fn cancelStateInvokes(&self, datamodel: &mut dyn Datamodel, state_id: StateId) {
        let cancelled: Vec<(InvokeId, Option<ScxmlSession>)> = {
            let mut global = datamodel.global().lock();
            let ids: Vec<InvokeId> = global
                .active_invokes
                .values()
                .filter(|active| active.state == state_id)
                .map(|active| active.invoke_id.clone())
                .collect();
            ids.into_iter()
                .map(|id| {
                    global.active_invokes.remove(&id);
                    global.invoke_wire_endpoints.remove(&id);
                    let session = global.child_sessions.remove(&id).map(|mut session| {
                        session.state = InvokeState::Cancelled;
                        session
                    });
                    (id, session)
                })
                .collect()
        };
        for (invoke_id, session) in cancelled {
            #[cfg(feature = "Debug")]
            debug!("cancel invoke '{}'", invoke_id);
            let _ = invoke_id;
            if let Some(session) = session {
                // The child is expected to honor this promptly; we don't block on it.
                let _ = session
                    .sender
                    .send(Box::new(Event::new_simple(EVENT_CANCEL_SESSION)));
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    // Consistency checking (debug builds).

    /// Verifies the structural invariants of the configuration. Used from a
    /// debug assertion after every microstep.
    pub fn configurationIsConsistent(&self, global: &GlobalData) -> bool {
        let configuration = &global.configuration;
        if global.running && !configuration.isMember(&self.pseudo_root) {
            error!("configuration: root is not active while running");
            return false;
        }
        for sid in configuration.iterator() {
            let state = self.get_state(*sid);
            if self.isHistoryState(*sid) {
                error!("configuration: history state '{}' is active", state.name);
                return false;
            }
            if state.is_parallel {
                for child in &state.states {
                    if !configuration.isMember(child) {
                        error!(
                            "configuration: parallel '{}' misses child '{}'",
                            state.name,
                            self.get_state(*child).name
                        );
                        return false;
                    }
                }
            } else if !state.states.is_empty() {
                let active_children = state
                    .states
                    .iter()
                    .filter(|c| configuration.isMember(c))
                    .count();
                if active_children != 1 {
                    error!(
                        "configuration: compound '{}' has {} active children",
                        state.name, active_children
                    );
                    return false;
                }
            }
        }
        true
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Session start

/// What happens with the session entry in the registry when the machine
/// terminates.
#[derive(Debug, Clone, PartialEq)]
#[allow(non_camel_case_types)]
pub enum FinishMode {
    /// Remove the session from the registry.
    DISPOSE,
    /// Keep the (finished) session so the final configuration stays readable.
    KEEP_CONFIGURATION,
}

/// Starts the FSM inside a worker thread.
pub fn start_fsm(sm: Box<Fsm>, executor: Box<FsmExecutor>) -> ScxmlSession {
    start_fsm_with_data(sm, executor, &Vec::new())
}

pub fn start_fsm_with_data(
    sm: Box<Fsm>,
    executor: Box<FsmExecutor>,
    data: &[ParamPair],
) -> ScxmlSession {
    start_fsm_with_data_and_finish_mode(sm, executor, data, FinishMode::KEEP_CONFIGURATION)
}

pub fn start_fsm_with_data_and_finish_mode(
    sm: Box<Fsm>,
    executor: Box<FsmExecutor>,
    data: &[ParamPair],
    finish_mode: FinishMode,
) -> ScxmlSession {
    let session_id = crate::fsm_executor::next_session_id();
    start_fsm_with_session_id(sm, executor, data, finish_mode, session_id)
}

/// Starts with a host log sink that receives all \<log\> output of the
/// session.
pub fn start_fsm_with_log_sink(
    sm: Box<Fsm>,
    executor: Box<FsmExecutor>,
    log_sink: Box<dyn Fn(&str, &str) + Send>,
) -> ScxmlSession {
    start_fsm_with_options(
        sm,
        executor,
        &Vec::new(),
        FinishMode::KEEP_CONFIGURATION,
        crate::fsm_executor::next_session_id(),
        Some(log_sink),
    )
}

pub fn start_fsm_with_session_id(
    sm: Box<Fsm>,
    executor: Box<FsmExecutor>,
    data: &[ParamPair],
    finish_mode: FinishMode,
    session_id: SessionId,
) -> ScxmlSession {
    start_fsm_with_options(sm, executor, data, finish_mode, session_id, None)
}

fn start_fsm_with_options(
    sm: Box<Fsm>,
    executor: Box<FsmExecutor>,
    data: &[ParamPair],
    finish_mode: FinishMode,
    session_id: SessionId,
    log_sink: Option<Box<dyn Fn(&str, &str) + Send>>,
) -> ScxmlSession {
    let global = GlobalDataAccess::new();
    {
        let mut g = global.lock();
        g.log_sink = log_sink;
        g.session_id = session_id;
        g.session_name = if sm.name.is_empty() {
            None
        } else {
            Some(sm.name.clone())
        };
        g.parent_session_id = sm.parent_session_id;
        g.caller_invoke_id = sm.caller_invoke_id.clone();
        g.io_processors = executor.io_processors();
        g.executor = Some(executor.clone());
    }
    let sender = global.lock().externalQueue.sender.clone();
    let session = ScxmlSession {
        session_id,
        invoke_id: sm.caller_invoke_id.clone(),
        state: InvokeState::Running,
        sender,
        session_thread: None,
        global_data: global.clone(),
    };
    executor.register_session(session.clone());

    let datamodel_name = sm.datamodel_name.clone();
    let data_copy: Vec<ParamPair> = data.to_vec();
    let thread_global = global.clone();
    let thread_executor = executor.clone();
    let thread = thread::Builder::new()
        .name(format!("fsm_{}", session_id))
        .spawn(move || {
            let mut datamodel = createDatamodel(datamodel_name.as_str(), thread_global);
            datamodel.initializeDataModel(&sm, &data_copy);
            datamodel.implement_mandatory_functionality(&sm);
            sm.interpret(&mut *datamodel);
            if finish_mode == FinishMode::DISPOSE {
                thread_executor.remove_session(session_id);
            }
        })
        .expect("failed to spawn session thread");

    let mut result = session;
    result.session_thread = Some(thread);
    result
}
