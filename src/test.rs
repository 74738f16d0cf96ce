//! Helpers to drive machines from tests and example hosts: a captured log
//! sink, a watchdog against hanging documents and a small session wrapper.

use std::sync::mpsc;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use std::{println as info_out, process};

use crate::builder::DocumentBuilder;
use crate::datamodel::str_to_source;
use crate::executable_content::Log;
use crate::fsm::{
    start_fsm_with_log_sink, Event, ExecutableContentId, Fsm, ScxmlSession, EVENT_CANCEL_SESSION,
};
use crate::fsm_executor::FsmExecutor;

/// Captured \<log\> output as (label, message) pairs, in emission order.
pub type CapturedLog = Arc<Mutex<Vec<(String, String)>>>;

pub fn captured_log_sink() -> (CapturedLog, Box<dyn Fn(&str, &str) + Send>) {
    let log: CapturedLog = Arc::new(Mutex::new(Vec::new()));
    let sink_log = log.clone();
    let sink = Box::new(move |label: &str, message: &str| {
        sink_log
            .lock()
            .expect("captured log lock poisoned")
            .push((label.to_string(), message.to_string()));
    });
    (log, sink)
}

/// The messages logged under one label.
pub fn logged_values(log: &CapturedLog, label: &str) -> Vec<String> {
    log.lock()
        .expect("captured log lock poisoned")
        .iter()
        .filter(|(l, _)| l == label)
        .map(|(_, message)| message.clone())
        .collect()
}

/// All captured (label, message) pairs.
pub fn logged_pairs(log: &CapturedLog) -> Vec<(String, String)> {
    log.lock().expect("captured log lock poisoned").clone()
}

/// Registers a block that logs the literal 'value' under 'label'.
pub fn log_block(builder: &mut DocumentBuilder, label: &str, value: &str) -> ExecutableContentId {
    builder.content(vec![Box::new(Log::new(
        label,
        str_to_source(&format!("'{}'", value)),
    ))])
}

/// Attaches entry/exit logging to the state that is currently open on the
/// builder, using the labels "entry" and "exit".
pub fn with_entry_exit_log(builder: &mut DocumentBuilder, name: &str) {
    let entry = log_block(builder, "entry", name);
    let exit = log_block(builder, "exit", name);
    builder.on_entry(entry).on_exit(exit);
}

/// A machine under test: its session, registry and captured log.
pub struct TestSession {
    pub session: ScxmlSession,
    pub executor: FsmExecutor,
    pub log: CapturedLog,
}

pub fn start_test_session(fsm: Box<Fsm>) -> TestSession {
    start_test_session_with_executor(fsm, FsmExecutor::new_without_io_processor())
}

pub fn start_test_session_with_executor(fsm: Box<Fsm>, executor: FsmExecutor) -> TestSession {
    let (log, sink) = captured_log_sink();
    let session = start_fsm_with_log_sink(fsm, Box::new(executor.clone()), sink);
    TestSession {
        session,
        executor,
        log,
    }
}

impl TestSession {
    pub fn send(&self, name: &str) {
        self.send_event(Event::new_external(name));
    }

    pub fn send_event(&self, event: Event) {
        let _ = self.session.sender.send(Box::new(event));
    }

    /// Asks the machine to terminate.
    pub fn cancel(&self) {
        self.send(EVENT_CANCEL_SESSION);
    }

    /// Waits for the session thread, guarded by a watchdog, and returns the
    /// final configuration (state names).
    pub fn join(self, test_name: &str, timeout_ms: u64) -> Vec<String> {
        let watchdog = start_watchdog(test_name, timeout_ms);
        let thread = self
            .session
            .session_thread
            .expect("session thread not available");
        let _ = thread.join();
        disable_watchdog(&watchdog);
        let global = self.session.global_data.lock();
        global
            .final_configuration
            .clone()
            .unwrap_or_else(|| panic!("[{}] final configuration not recorded", test_name))
    }
}

/// Verifies that the final configuration contains all expected states.
pub fn verify_final_configuration(
    expected_states: &[&str],
    fsm_config: &[String],
) -> Result<String, String> {
    for name in expected_states {
        if !fsm_config.iter().any(|c| c == name) {
            return Err(name.to_string());
        }
    }
    Ok(expected_states.join(","))
}

pub fn start_watchdog(test_name: &str, timeout_ms: u64) -> Box<Sender<String>> {
    let (watchdog_sender, watchdog_receiver) = mpsc::channel();
    let test_name = test_name.to_string();

    let _timer = thread::spawn(move || {
        match watchdog_receiver.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(_) => {
                // All ok, FSM terminated in time.
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Disconnected, also ok.
            }
            Err(mpsc::RecvTimeoutError::Timeout) => abort_test(format!(
                "[{}] ==> FSM timed out after {} milliseconds",
                test_name, timeout_ms
            )),
        }
    });
    Box::new(watchdog_sender)
}

/// Informs the watchdog that the test has finished.
pub fn disable_watchdog(watchdog_sender: &Sender<String>) {
    let _ = watchdog_sender.send("finished".to_string());
}

/// Aborts the test run with exit code 1.\
/// Never returns.
pub fn abort_test(message: String) -> ! {
    info_out!("Fatal Error: {}", message);
    process::exit(1);
}
