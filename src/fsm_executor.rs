//! The session registry.\
//! Maintains the I/O processors and the running sessions of one host.
//! Every machine gets an explicit handle to its registry at construction;
//! cross-session sends, invokes and the HTTP/WS surfaces all go through it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::{error, info};
use crate::event_io_processor::basic_http_event_io_processor::{
    BasicHTTPEventIOProcessor, ServerType,
};
use crate::event_io_processor::scxml_event_io_processor::ScxmlEventIOProcessor;
use crate::event_io_processor::websocket_event_io_processor::WebSocketEventIOProcessor;
use crate::event_io_processor::EventIOProcessor;
use crate::fsm::{
    start_fsm_with_data_and_finish_mode, Event, FinishMode, Fsm, ScxmlSession, SessionId,
    EVENT_CANCEL_SESSION,
};

static SESSION_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Returns a new unique session id.
pub fn next_session_id() -> SessionId {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Produces compiled machines from document source text. The XML front-end
/// is not part of this crate; hosts plug their compiler in through this
/// trait. Invokes and 'start_session' need it.
pub trait MachineLoader: Send + Sync {
    fn load(&self, source: &str) -> Result<Box<Fsm>, String>;
}

impl<F> MachineLoader for F
where
    F: Fn(&str) -> Result<Box<Fsm>, String> + Send + Sync + 'static,
{
    fn load(&self, source: &str) -> Result<Box<Fsm>, String> {
        self(source)
    }
}

#[derive(Debug)]
pub struct ExecuteState {
    pub processors: Vec<Arc<Mutex<dyn EventIOProcessor>>>,
    pub sessions: HashMap<SessionId, ScxmlSession>,
}

impl Default for ExecuteState {
    fn default() -> Self {
        ExecuteState::new()
    }
}

impl ExecuteState {
    pub fn new() -> ExecuteState {
        ExecuteState {
            processors: Vec::new(),
            sessions: HashMap::new(),
        }
    }
}

pub type ExecutorStateArc = Arc<Mutex<ExecuteState>>;

/// Executes FSMs in separate threads.
/// Maintains the I/O processors used by the FSMs and the running sessions.
#[derive(Clone)]
pub struct FsmExecutor {
    pub state: ExecutorStateArc,
    pub loader: Option<Arc<dyn MachineLoader>>,
}

impl FsmExecutor {
    pub fn new_without_io_processor() -> FsmExecutor {
        let mut e = FsmExecutor {
            state: Arc::new(Mutex::new(ExecuteState::new())),
            loader: None,
        };
        e.add_processor(ScxmlEventIOProcessor::new());
        e
    }

    /// Registry with the HTTP surface attached. 'ws_addr' optionally adds
    /// the websocket surface.
    pub fn new_with_http_io_processor(
        http_addr: SocketAddr,
        ws_addr: Option<SocketAddr>,
        location_name: &str,
        server_type: ServerType,
    ) -> FsmExecutor {
        let mut e = FsmExecutor::new_without_io_processor();
        let http = BasicHTTPEventIOProcessor::new(
            http_addr,
            location_name,
            server_type,
            e.state.clone(),
        );
        e.add_processor(http);
        if let Some(ws_addr) = ws_addr {
            let ws = WebSocketEventIOProcessor::new(ws_addr, location_name, e.state.clone());
            e.add_processor(ws);
        }
        e
    }

    pub fn add_processor<P: EventIOProcessor + 'static>(&mut self, processor: P) {
        let arc: Arc<Mutex<dyn EventIOProcessor>> = Arc::new(Mutex::new(processor));
        self.state
            .lock()
            .expect("executor state lock poisoned")
            .processors
            .push(arc);
    }

    pub fn set_loader(&mut self, loader: Arc<dyn MachineLoader>) {
        self.loader = Some(loader);
    }

    pub fn io_processors(&self) -> Vec<Arc<Mutex<dyn EventIOProcessor>>> {
        self.state
            .lock()
            .expect("executor state lock poisoned")
            .processors
            .clone()
    }

    pub fn register_session(&self, session: ScxmlSession) {
        self.state
            .lock()
            .expect("executor state lock poisoned")
            .sessions
            .insert(session.session_id, session);
    }

    pub fn remove_session(&self, session_id: SessionId) {
        self.state
            .lock()
            .expect("executor state lock poisoned")
            .sessions
            .remove(&session_id);
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .state
            .lock()
            .expect("executor state lock poisoned")
            .sessions
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn get_session_sender(
        &self,
        session_id: SessionId,
    ) -> Option<std::sync::mpsc::Sender<Box<Event>>> {
        self.state
            .lock()
            .expect("executor state lock poisoned")
            .sessions
            .get(&session_id)
            .map(|session| session.sender.clone())
    }

    /// Puts the event on the external queue of the session.
    pub fn send_to_session(&self, session_id: SessionId, event: Event) -> Result<(), String> {
        match self.get_session_sender(session_id) {
            None => Err(format!("session #{} is not known", session_id)),
            Some(sender) => sender
                .send(Box::new(event))
                .map_err(|err| format!("session #{} is gone: {}", session_id, err)),
        }
    }

    /// Compiles document source through the configured loader.
    pub fn load_machine(&self, source: &str) -> Result<Box<Fsm>, String> {
        match &self.loader {
            None => Err("no machine loader configured".to_string()),
            Some(loader) => loader.load(source),
        }
    }

    /// Compiles and starts a sibling session, returning its id.
    pub fn start_session_from_source(&self, source: &str) -> Result<SessionId, String> {
        let machine = self.load_machine(source)?;
        let session = start_fsm_with_data_and_finish_mode(
            machine,
            Box::new(self.clone()),
            &Vec::new(),
            FinishMode::DISPOSE,
        );
        info!("started session #{}", session.session_id);
        Ok(session.session_id)
    }

    /// Shutdown of all sessions and I/O processors.
    pub fn shutdown(&mut self) {
        let (senders, processors) = {
            let guard = self.state.lock().expect("executor state lock poisoned");
            (
                guard
                    .sessions
                    .values()
                    .map(|session| session.sender.clone())
                    .collect::<Vec<_>>(),
                guard.processors.clone(),
            )
        };
        for sender in senders {
            let _ = sender.send(Box::new(Event::new_simple(EVENT_CANCEL_SESSION)));
        }
        for processor in processors {
            match processor.lock() {
                Ok(mut processor) => processor.shutdown(),
                Err(_) => error!("processor lock poisoned during shutdown"),
            }
        }
    }
}
