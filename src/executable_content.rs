//! Implementation of the executable-content elements.\
//! Elements are compiled to variants of [ExecutableContent]; blocks of
//! elements are stored on the [Fsm](crate::fsm::Fsm) and referenced by id.
//! A failing element raises its platform error event and reports false, the
//! siblings of the block still run.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::Ordering;

use crate::common::error;
use crate::datamodel::{Data, Datamodel, ToAny};
use crate::event_io_processor::scxml_event_io_processor::{
    SCXML_EVENT_PROCESSOR_SHORT_TYPE, SCXML_TARGET_INTERNAL,
};
use crate::fsm::{
    CommonContent, Event, EventType, ExecutableContentId, Fsm, ParamPair, Parameter,
    EVENT_ERROR_EXECUTION_HINTS, EVENT_ERROR_SEND_TYPE, PLATFORM_ID_COUNTER,
};

pub const TYPE_IF: u8 = 0;
pub const TYPE_SCRIPT: u8 = 1;
pub const TYPE_LOG: u8 = 2;
pub const TYPE_SEND: u8 = 3;
pub const TYPE_RAISE: u8 = 4;
pub const TYPE_CANCEL: u8 = 5;
pub const TYPE_ASSIGN: u8 = 6;
pub const TYPE_START_SESSION: u8 = 7;

pub const TYPE_NAMES: [&str; 8] = [
    "if",
    "script",
    "log",
    "send",
    "raise",
    "cancel",
    "assign",
    "start_session",
];

pub trait ExecutableContent: ToAny + Debug + Send {
    fn execute(&self, datamodel: &mut dyn Datamodel, fsm: &Fsm) -> bool;
    fn get_type(&self) -> u8;
}

pub fn get_executable_content_as<T: 'static>(ec: &mut dyn ExecutableContent) -> Option<&mut T> {
    ec.as_any_mut().downcast_mut::<T>()
}

////////////////////////////////////////////////////////////////////////////////
// ## log

#[derive(Debug, Default)]
pub struct Log {
    pub label: String,
    pub expression: Data,
}

impl Log {
    pub fn new(label: &str, expression: Data) -> Log {
        Log {
            label: label.to_string(),
            expression,
        }
    }
}

impl ExecutableContent for Log {
    fn execute(&self, datamodel: &mut dyn Datamodel, _fsm: &Fsm) -> bool {
        if self.expression.is_empty() {
            datamodel.log(&self.label, "");
            return true;
        }
        match datamodel.execute(&self.expression) {
            Ok(value) => {
                datamodel.log(&self.label, &value.to_string());
                true
            }
            Err(err) => {
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                false
            }
        }
    }

    fn get_type(&self) -> u8 {
        TYPE_LOG
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## raise

/// *W3C says*:
/// The \<raise\> element raises an event in the current session. The event
/// will not be processed until the current block of executable content has
/// completed and all events that are already in the internal event queue
/// have been processed.
#[derive(Debug, Default)]
pub struct Raise {
    pub event: String,
}

impl Raise {
    pub fn new(event: &str) -> Raise {
        Raise {
            event: event.to_string(),
        }
    }
}

impl ExecutableContent for Raise {
    fn execute(&self, datamodel: &mut dyn Datamodel, _fsm: &Fsm) -> bool {
        let mut event = Event::new_simple(&self.event);
        event.etype = EventType::internal;
        datamodel.global().lock().enqueue_internal(event);
        true
    }

    fn get_type(&self) -> u8 {
        TYPE_RAISE
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## script

#[derive(Debug, Default)]
pub struct Script {
    pub content: Data,
}

impl Script {
    pub fn new(content: Data) -> Script {
        Script { content }
    }
}

impl ExecutableContent for Script {
    fn execute(&self, datamodel: &mut dyn Datamodel, _fsm: &Fsm) -> bool {
        match datamodel.execute_script(&self.content) {
            Ok(()) => true,
            Err(err) => {
                error!("script failed: {}", err);
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                false
            }
        }
    }

    fn get_type(&self) -> u8 {
        TYPE_SCRIPT
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## assign

#[derive(Default)]
pub struct Assign {
    pub location: Data,
    pub expr: Data,
}

impl Assign {
    pub fn new(location: Data, expr: Data) -> Assign {
        Assign { location, expr }
    }
}

impl Debug for Assign {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assign")
            .field("location", &self.location)
            .field("expr", &self.expr)
            .finish()
    }
}

impl ExecutableContent for Assign {
    fn execute(&self, datamodel: &mut dyn Datamodel, _fsm: &Fsm) -> bool {
        datamodel.assign(&self.location, &self.expr)
    }

    fn get_type(&self) -> u8 {
        TYPE_ASSIGN
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## if / elseif / else

/// 'elseif'/'else' chains are compiled to nested [If] elements in the
/// else-block.
#[derive(Debug, Default)]
pub struct If {
    pub condition: Data,
    pub content: ExecutableContentId,
    pub else_content: ExecutableContentId,
}

impl If {
    pub fn new(condition: Data) -> If {
        If {
            condition,
            content: 0,
            else_content: 0,
        }
    }
}

impl ExecutableContent for If {
    fn execute(&self, datamodel: &mut dyn Datamodel, fsm: &Fsm) -> bool {
        let matched = match datamodel.execute_condition(&self.condition) {
            Ok(value) => value,
            Err(err) => {
                error!("condition '{}' can't be evaluated. {}", self.condition, err);
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                return false;
            }
        };
        if matched {
            fsm.executeContent(datamodel, self.content)
        } else {
            fsm.executeContent(datamodel, self.else_content)
        }
    }

    fn get_type(&self) -> u8 {
        TYPE_IF
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## cancel

#[derive(Debug, Default)]
pub struct Cancel {
    pub send_id: String,
    pub send_id_expr: Data,
}

impl Cancel {
    pub fn new(send_id: &str) -> Cancel {
        Cancel {
            send_id: send_id.to_string(),
            send_id_expr: Data::None,
        }
    }
}

impl ExecutableContent for Cancel {
    /// *W3C says*:
    /// The \<cancel\> element is used to cancel a delayed \<send\> event.
    /// The Processor SHOULD make its best attempt to cancel all delayed
    /// events with the specified id. Note, however, that it can not be
    /// guaranteed to succeed, for example if the event has already been
    /// delivered by the time the \<cancel\> tag executes.
    fn execute(&self, datamodel: &mut dyn Datamodel, _fsm: &Fsm) -> bool {
        let send_id = match datamodel.get_expression_alternative_value(
            &Data::String(self.send_id.clone()),
            &self.send_id_expr,
        ) {
            Ok(value) => value.to_string(),
            Err(err) => {
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                return false;
            }
        };
        // Dropping the guard cancels the timer. Idempotent if already fired.
        datamodel.global().lock().delayed_send.remove(&send_id);
        true
    }

    fn get_type(&self) -> u8 {
        TYPE_CANCEL
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## send

/// Holds all parameters of a \<send\> call.
#[derive(Default)]
pub struct SendParameters {
    /// \<send\> attribute 'idlocation'.
    pub name_location: String,
    /// \<send\> attribute 'id'.
    pub name: String,
    /// In case the id is generated, the parent state of the send.
    pub parent_state_name: String,
    pub event: Data,
    pub event_expr: Data,
    pub target: Data,
    pub target_expr: Data,
    /// \<send\> attribute 'type'. 'scxml' if empty.
    pub type_value: Data,
    pub type_expr: Data,
    /// \<send\> attribute 'delay'. Suffix 's' or 'ms'.
    pub delay: String,
    pub delay_expr: Data,
    /// \<send\> attribute 'namelist'. Must not be specified in conjunction
    /// with 'content'.
    pub name_list: Vec<String>,
    pub params: Option<Vec<Parameter>>,
    pub content: Option<CommonContent>,
    /// Free-form key/value hints (JSON object), carried on the event.
    pub hints: Data,
    pub hints_expr: Data,
}

impl SendParameters {
    pub fn new() -> SendParameters {
        SendParameters::default()
    }

    fn evaluate_hints(
        &self,
        datamodel: &mut dyn Datamodel,
    ) -> Result<Option<HashMap<String, String>>, ()> {
        let value = if !self.hints_expr.is_empty() {
            match datamodel.execute(&self.hints_expr) {
                Ok(value) => value,
                Err(err) => {
                    datamodel
                        .internal_error_event(Event::error(EVENT_ERROR_EXECUTION_HINTS, &err.message));
                    return Err(());
                }
            }
        } else if !self.hints.is_empty() {
            self.hints.clone()
        } else {
            return Ok(None);
        };
        match hints_to_map(&value) {
            Ok(map) => Ok(Some(map)),
            Err(message) => {
                datamodel.internal_error_event(Event::error(EVENT_ERROR_EXECUTION_HINTS, &message));
                Err(())
            }
        }
    }
}

impl Debug for SendParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Send")
            .field("name", &self.name)
            .field("event", &self.event)
            .field("target", &self.target)
            .finish()
    }
}

fn hints_to_map(value: &Data) -> Result<HashMap<String, String>, String> {
    match value {
        Data::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()),
        Data::String(text) | Data::Source(text) => {
            match serde_json::from_str::<serde_json::Value>(text) {
                Ok(serde_json::Value::Object(object)) => Ok(object
                    .iter()
                    .map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect()),
                Ok(_) => Err(format!("hints '{}' is not an object", text)),
                Err(err) => Err(format!("malformed hints '{}': {}", text, err)),
            }
        }
        other => Err(format!("malformed hints '{}'", other)),
    }
}

/// Implements the execution of the \<send\> element.
impl ExecutableContent for SendParameters {
    /// If the type is not supported, 'error.send.type' is raised.
    /// A negative or malformed delay raises 'error.execution'.
    /// Everything else is resolved by the I/O processor of the send type.
    fn execute(&self, datamodel: &mut dyn Datamodel, fsm: &Fsm) -> bool {
        let target = match datamodel.get_expression_alternative_value(&self.target, &self.target_expr)
        {
            Ok(value) => value.to_string(),
            Err(err) => {
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                return false;
            }
        };
        let event_name = match datamodel.get_expression_alternative_value(&self.event, &self.event_expr)
        {
            Ok(value) => value.to_string(),
            Err(err) => {
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                return false;
            }
        };

        let send_id = if !self.name.is_empty() {
            Some(self.name.clone())
        } else if !self.name_location.is_empty() {
            // W3C: if 'idlocation' is present, the Processor MUST generate an
            // id when the element is evaluated and store it in this location.
            let generated = format!(
                "{}.{}",
                self.parent_state_name,
                PLATFORM_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
            );
            datamodel.set(&self.name_location, Data::String(generated.clone()));
            Some(generated)
        } else {
            None
        };

        let delay_ms = if !self.delay_expr.is_empty() {
            match datamodel.execute(&self.delay_expr) {
                Ok(value) => parse_delay_to_milliseconds(&value.to_string()),
                Err(err) => {
                    datamodel.internal_error_execution_kind(&err.kind, &err.message);
                    return false;
                }
            }
        } else {
            parse_delay_to_milliseconds(&self.delay)
        };
        if delay_ms < 0 {
            error!("send: invalid delay '{}{}'", self.delay, self.delay_expr);
            datamodel.internal_error_execution("invalid send delay");
            return false;
        }
        if delay_ms > 0 && target == SCXML_TARGET_INTERNAL {
            error!("send: illegal delay for target {}", target);
            datamodel.internal_error_execution("delayed send to #_internal");
            return false;
        }

        let hints = match self.evaluate_hints(datamodel) {
            Ok(hints) => hints,
            Err(()) => return false,
        };

        // A conformant document MUST NOT specify 'namelist' or <param> with <content>.
        let mut param_values = Vec::new();
        let mut content = None;
        if self.content.is_some() {
            content = datamodel.evaluate_content(&self.content);
        } else {
            datamodel.evaluate_params(&self.params, &mut param_values);
            for name in &self.name_list {
                match datamodel.get_by_location(name) {
                    Err(err) => {
                        datamodel.internal_error_execution_kind(&err.kind, &err.message);
                        return false;
                    }
                    Ok(value) => param_values.push(ParamPair::new_moved(name.clone(), value)),
                }
            }
        }

        let type_value =
            match datamodel.get_expression_alternative_value(&self.type_value, &self.type_expr) {
                Ok(value) => value,
                Err(err) => {
                    datamodel.internal_error_execution_kind(&err.kind, &err.message);
                    return false;
                }
            };
        let type_name = if type_value.is_empty() {
            SCXML_EVENT_PROCESSOR_SHORT_TYPE.to_string()
        } else {
            type_value.to_string()
        };

        let event = Event {
            name: event_name,
            etype: EventType::external,
            sendid: send_id.clone(),
            origin: None,
            origin_type: None,
            invoke_id: fsm.caller_invoke_id.clone(),
            param_values: if param_values.is_empty() {
                None
            } else {
                Some(param_values)
            },
            content,
            hints,
        };

        let processor = match datamodel.get_io_processor(&type_name) {
            Some(processor) => processor,
            None => {
                error!("unknown send type '{}'", type_name);
                datamodel.internal_error_event(Event::error(
                    EVENT_ERROR_SEND_TYPE,
                    &format!("unknown send type '{}'", type_name),
                ));
                return false;
            }
        };

        if delay_ms > 0 {
            let global = datamodel.global_s().clone();
            let send_id_inner = send_id.clone();
            let processor_inner = processor.clone();
            let target_inner = target.clone();
            let guard = fsm.schedule(delay_ms, move || {
                if let Some(sid) = &send_id_inner {
                    global.lock().delayed_send.remove(sid);
                }
                if let Ok(mut p) = processor_inner.lock() {
                    p.send(&global, &target_inner, event.clone());
                }
            });
            if let Some(guard) = guard {
                match &send_id {
                    Some(sid) => {
                        datamodel
                            .global()
                            .lock()
                            .delayed_send
                            .insert(sid.clone(), guard);
                    }
                    // Not cancellable without an id, let the timer run free.
                    None => guard.ignore(),
                }
            }
            true
        } else {
            let global = datamodel.global_s().clone();
            match processor.lock() {
                Ok(mut p) => p.send(&global, &target, event),
                Err(_) => false,
            }
        }
    }

    fn get_type(&self) -> u8 {
        TYPE_SEND
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## start_session (extension)

/// Extension element: asks the session registry to spawn a sibling machine
/// from an inline document source. The new session id is stored to
/// 'id_location' if given.
#[derive(Debug, Default)]
pub struct StartSession {
    pub src: Data,
    pub id_location: String,
}

impl ExecutableContent for StartSession {
    fn execute(&self, datamodel: &mut dyn Datamodel, _fsm: &Fsm) -> bool {
        let source = match datamodel.execute(&self.src) {
            Ok(value) => value.to_string(),
            Err(err) => {
                datamodel.internal_error_execution_kind(&err.kind, &err.message);
                return false;
            }
        };
        let executor_opt = datamodel.global().lock().executor.clone();
        let executor = match executor_opt {
            Some(executor) => executor,
            None => {
                error!("start_session: no executor available");
                datamodel.internal_error_execution("no session registry available");
                return false;
            }
        };
        match executor.start_session_from_source(&source) {
            Ok(session_id) => {
                if !self.id_location.is_empty() {
                    datamodel.set(&self.id_location, Data::Integer(session_id as i64));
                }
                true
            }
            Err(message) => {
                error!("start_session failed: {}", message);
                datamodel.internal_error_execution(&message);
                false
            }
        }
    }

    fn get_type(&self) -> u8 {
        TYPE_START_SESSION
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Parses a \<send\> delay: an integer with suffix 's' or 'ms'.
/// Returns -1 for anything else; the empty string counts as no delay.
pub fn parse_delay_to_milliseconds(delay: &str) -> i64 {
    if delay.is_empty() {
        return 0;
    }
    let (number, factor) = if let Some(prefix) = delay.strip_suffix("ms") {
        (prefix, 1)
    } else if let Some(prefix) = delay.strip_suffix('s') {
        (prefix, 1000)
    } else {
        return -1;
    };
    match number.parse::<i64>() {
        Ok(value) if value >= 0 => value * factor,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use crate::executable_content::parse_delay_to_milliseconds;

    #[test]
    fn delay_parse() {
        assert_eq!(parse_delay_to_milliseconds(""), 0);
        assert_eq!(parse_delay_to_milliseconds("0s"), 0);
        assert_eq!(parse_delay_to_milliseconds("100ms"), 100);
        assert_eq!(parse_delay_to_milliseconds("2s"), 2000);

        // Only 'Ns' and 'Nms' are supported.
        assert_eq!(parse_delay_to_milliseconds("1.5s"), -1);
        assert_eq!(parse_delay_to_milliseconds("1m"), -1);
        assert_eq!(parse_delay_to_milliseconds("s"), -1);
        assert_eq!(parse_delay_to_milliseconds("10"), -1);
        assert_eq!(parse_delay_to_milliseconds("-5s"), -1);
    }
}
