//! Implementation of the SCXML Event I/O Processor, the default send type.\
//! Resolves the special '#_' targets, peer sessions and plain HTTP URL
//! targets.

use std::fmt::Debug;

#[cfg(feature = "Debug")]
use crate::common::debug;
use crate::common::error;
use crate::datamodel::{event_data_value, GlobalDataAccess};
use crate::event_io_processor::{wire, EventIOProcessor};
use crate::fsm::{
    Event, EventType, ResponseEntry, SessionId, EVENT_ERROR_SEND_TARGET,
};

/// If the target is the special term '#_internal', the event goes to the
/// internal queue of the sending session.
pub const SCXML_TARGET_INTERNAL: &str = "#_internal";

/// '#_scxml_sessionid': the event goes to the external queue of that session.
pub const SCXML_TARGET_SESSION_ID_PREFIX: &str = "#_scxml_";

/// '#_parent': the event goes to the external queue of the session that
/// invoked the sending session.
pub const SCXML_TARGET_PARENT: &str = "#_parent";

/// '#_response': the event data and hints go to the response rendezvous of
/// the session, read by the HTTP response path.
pub const SCXML_TARGET_RESPONSE: &str = "#_response";

/// '#_websocket': the JSON envelope goes to the websocket outbound queue of
/// the session.
pub const SCXML_TARGET_WEBSOCKET: &str = "#_websocket";

/// '#_invokeid': the event goes to the send interface of that invocation.
/// This value is a prefix of the other special targets and needs care.
pub const SCXML_TARGET_INVOKE_ID_PREFIX: &str = "#_";

pub const SCXML_EVENT_PROCESSOR: &str = "http://www.w3.org/TR/scxml/#SCXMLEventProcessor";
pub const SCXML_EVENT_PROCESSOR_SHORT_TYPE: &str = "scxml";

const TYPES: &[&str] = &[SCXML_EVENT_PROCESSOR_SHORT_TYPE, SCXML_EVENT_PROCESSOR];

#[derive(Debug, Default)]
pub struct ScxmlEventIOProcessor {
    pub location: String,
}

impl ScxmlEventIOProcessor {
    pub fn new() -> ScxmlEventIOProcessor {
        ScxmlEventIOProcessor {
            location: SCXML_TARGET_SESSION_ID_PREFIX.to_string(),
        }
    }

    fn send_to_session(
        &self,
        global: &GlobalDataAccess,
        session_id: SessionId,
        event: Event,
    ) -> bool {
        let executor = global.lock().executor.clone();
        match executor {
            None => {
                error!("no executor available, can't reach session #{}", session_id);
                global
                    .lock()
                    .enqueue_internal(Event::error_communication("no session registry available"));
                false
            }
            Some(executor) => {
                #[cfg(feature = "Debug")]
                debug!("send '{}' to session #{}", event, session_id);
                match executor.send_to_session(session_id, event) {
                    Ok(_) => true,
                    Err(message) => {
                        error!("can't send to session #{}. {}", session_id, message);
                        global
                            .lock()
                            .enqueue_internal(Event::error(EVENT_ERROR_SEND_TARGET, &message));
                        false
                    }
                }
            }
        }
    }

    /// POST of the XML envelope to a URL target. Failures surface as
    /// 'error.communication'.
    fn send_to_url(&self, global: &GlobalDataAccess, url: &str, event: &Event) -> bool {
        if url::Url::parse(url).is_err() {
            return self.send_target_error(global, url);
        }
        let envelope = match wire::to_xml(event, Some(url)) {
            Ok(envelope) => envelope,
            Err(message) => {
                global
                    .lock()
                    .enqueue_internal(Event::error_communication(&message));
                return false;
            }
        };
        match ureq::post(url).send_form(&[("_content", envelope.as_str())]) {
            Ok(_) => true,
            Err(err) => {
                error!("POST to '{}' failed: {}", url, err);
                global
                    .lock()
                    .enqueue_internal(Event::error_communication(&format!(
                        "POST to '{}' failed: {}",
                        url, err
                    )));
                false
            }
        }
    }

    fn send_target_error(&self, global: &GlobalDataAccess, target: &str) -> bool {
        error!("send target '{}' can't be resolved", target);
        global.lock().enqueue_internal(Event::error(
            EVENT_ERROR_SEND_TARGET,
            &format!("send target '{}' can't be resolved", target),
        ));
        false
    }
}

impl EventIOProcessor for ScxmlEventIOProcessor {
    fn get_location(&self, id: SessionId) -> String {
        format!("{}{}", self.location, id)
    }

    fn get_types(&self) -> &[&str] {
        TYPES
    }

    /// *W3C says* (the relevant parts):\
    /// SCXML Processors must support the special targets '#_internal',
    /// '#_scxml_sessionid', '#_parent' and '#_invokeid'. If no target is
    /// specified, the event goes to the external queue of the sending
    /// session.\
    /// The '#_response' and '#_websocket' targets and URL targets are
    /// platform extensions of this processor.
    fn send(&mut self, global: &GlobalDataAccess, target: &str, event: Event) -> bool {
        let mut event = event;
        {
            let global_lock = global.lock();
            event.origin_type = Some(SCXML_EVENT_PROCESSOR_SHORT_TYPE.to_string());
            if event.origin.is_none() {
                event.origin = Some(self.get_location(global_lock.session_id));
            }
        }

        match target {
            "" => {
                global.lock().externalQueue.enqueue(Box::new(event));
                true
            }
            SCXML_TARGET_INTERNAL => {
                event.etype = EventType::internal;
                global.lock().enqueue_internal(event);
                true
            }
            SCXML_TARGET_PARENT => {
                let (parent_session_id, caller_invoke_id) = {
                    let global_lock = global.lock();
                    (
                        global_lock.parent_session_id,
                        global_lock.caller_invoke_id.clone(),
                    )
                };
                // The child's events towards the parent carry its invoke id.
                event.invoke_id = caller_invoke_id;
                match parent_session_id {
                    None => self.send_target_error(global, target),
                    Some(parent_id) => self.send_to_session(global, parent_id, event),
                }
            }
            SCXML_TARGET_RESPONSE => {
                let entry = ResponseEntry {
                    content: event_data_value(&event),
                    hints: event.hints.clone().unwrap_or_default(),
                };
                let queue = global.lock().response_queue.clone();
                queue.enqueue(entry);
                true
            }
            SCXML_TARGET_WEBSOCKET => {
                let envelope = wire::to_json(&event, Some(target));
                let queue = global.lock().websocket_queue.clone();
                queue.enqueue(envelope);
                true
            }
            _ => {
                if let Some(session_id_text) = target.strip_prefix(SCXML_TARGET_SESSION_ID_PREFIX) {
                    match session_id_text.parse::<SessionId>() {
                        Ok(session_id) => self.send_to_session(global, session_id, event),
                        Err(_) => self.send_target_error(global, target),
                    }
                } else if target.starts_with("http://") || target.starts_with("https://") {
                    self.send_to_url(global, target, &event)
                } else if let Some(invoke_id) = target.strip_prefix(SCXML_TARGET_INVOKE_ID_PREFIX) {
                    let (endpoint, child_sender) = {
                        let global_lock = global.lock();
                        (
                            global_lock.invoke_wire_endpoints.get(invoke_id).cloned(),
                            global_lock
                                .child_sessions
                                .get(invoke_id)
                                .map(|session| session.sender.clone()),
                        )
                    };
                    if let Some(endpoint) = endpoint {
                        // Response-server invocations get the wire form.
                        self.send_to_url(global, &endpoint, &event)
                    } else if let Some(sender) = child_sender {
                        sender.send(Box::new(event)).is_ok()
                            || self.send_target_error(global, target)
                    } else {
                        self.send_target_error(global, target)
                    }
                } else {
                    self.send_target_error(global, target)
                }
            }
        }
    }

    /// This processor doesn't hold resources, nothing to shut down.
    fn shutdown(&mut self) {}
}
