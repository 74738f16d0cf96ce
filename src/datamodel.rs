//! Defines the API used to access the data models.\
//! \
//! The interpreter depends only on the [Datamodel] capability: evaluate
//! expressions, execute statements, read and write locations. Concrete
//! implementations live in sub-modules; which one a document uses is
//! selected by its 'datamodel' attribute.

use lazy_static::lazy_static;
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::{error, info};
use crate::event_io_processor::EventIOProcessor;
use crate::fsm::{
    CommonContent, Event, EventType, Fsm, GlobalData, ParamPair, Parameter, StateId,
};

#[cfg(feature = "ExpressionEngine")]
pub mod expression_engine;

pub const NULL_DATAMODEL: &str = "null";

#[cfg(feature = "ExpressionEngine")]
pub const EXPRESSION_DATAMODEL: &str = "expression";

#[cfg(feature = "ExpressionEngine")]
pub const DEFAULT_DATAMODEL: &str = EXPRESSION_DATAMODEL;
#[cfg(not(feature = "ExpressionEngine"))]
pub const DEFAULT_DATAMODEL: &str = NULL_DATAMODEL;

/// Name of system variable "_sessionid".\
/// Bound at load time to the system-generated id of the session.
pub const SESSION_ID_VARIABLE_NAME: &str = "_sessionid";

/// Name of system variable "_name", the 'name' attribute of the document.
pub const SESSION_NAME_VARIABLE_NAME: &str = "_name";

/// Name of system variable "_event", refreshed before every transition-set
/// evaluation.
pub const EVENT_VARIABLE_NAME: &str = "_event";

/// Name of system variable "_parent": session id of the invoking session.
pub const PARENT_SESSION_VARIABLE_NAME: &str = "_parent";

/// Name of system variable "_invokeid": the id under which this session was
/// invoked.
pub const INVOKE_ID_VARIABLE_NAME: &str = "_invokeid";

/// Name of system variable "_x.sessions": ids of the sessions known to the
/// registry at machine construction time.
pub const SESSIONS_VARIABLE_NAME: &str = "_x.sessions";

pub const ERROR_KIND_NAME: &str = "nameerror";
pub const ERROR_KIND_SYNTAX: &str = "syntaxerror";
pub const ERROR_KIND_TYPE: &str = "typeerror";

/// Gets the global data store from a datamodel.
#[macro_export]
macro_rules! get_global {
    ($x:expr) => {
        $x.global().lock()
    };
}

////////////////////////////////////////////////////////////////////////////////
// ## Values

/// The value type of the data models. 'Source' wraps not-yet-evaluated
/// expression text; 'None' marks an absent value (distinct from 'Null').
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Data {
    Integer(i64),
    Double(f64),
    String(String),
    Boolean(bool),
    Array(Vec<Data>),
    Map(HashMap<String, Data>),
    Source(String),
    Null,
    #[default]
    None,
}

pub fn str_to_source(s: &str) -> Data {
    Data::Source(s.to_string())
}

impl Data {
    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Data::None | Data::Null => true,
            Data::String(s) | Data::Source(s) => s.is_empty(),
            Data::Array(a) => a.is_empty(),
            Data::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// The source text of an expression value.
    pub fn as_script(&self) -> &str {
        match self {
            Data::Source(s) | Data::String(s) => s.as_str(),
            _ => "",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Data::Integer(i) => serde_json::Value::from(*i),
            Data::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Data::String(s) | Data::Source(s) => serde_json::Value::String(s.clone()),
            Data::Boolean(b) => serde_json::Value::Bool(*b),
            Data::Array(a) => serde_json::Value::Array(a.iter().map(|d| d.to_json()).collect()),
            Data::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Data::Null | Data::None => serde_json::Value::Null,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Data {
        match value {
            serde_json::Value::Null => Data::Null,
            serde_json::Value::Bool(b) => Data::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Data::Integer(i)
                } else {
                    Data::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Data::String(s.clone()),
            serde_json::Value::Array(a) => Data::Array(a.iter().map(Data::from_json).collect()),
            serde_json::Value::Object(o) => Data::Map(
                o.iter()
                    .map(|(k, v)| (k.clone(), Data::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl Display for Data {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Data::Integer(i) => write!(f, "{}", i),
            Data::Double(d) => write!(f, "{}", d),
            Data::String(s) | Data::Source(s) => write!(f, "{}", s),
            Data::Boolean(b) => write!(f, "{}", b),
            Data::Array(_) | Data::Map(_) => write!(f, "{}", self.to_json()),
            Data::Null => write!(f, "null"),
            Data::None => write!(f, "none"),
        }
    }
}

/// Plain key/value store backing a data model instance.
#[derive(Debug, Default)]
pub struct DataStore {
    pub values: HashMap<String, Data>,
}

impl DataStore {
    pub fn new() -> DataStore {
        DataStore {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Data> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Data> {
        self.values.get_mut(key)
    }

    pub fn set(&mut self, key: &str, data: Data) {
        self.values.insert(key.to_string(), data);
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Errors

/// Evaluation error of a data model. The kind forms the platform event name
/// 'error.execution.\<kind\>'.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: String,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: &str, message: &str) -> EvalError {
        EvalError {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    pub fn name_error(message: &str) -> EvalError {
        EvalError::new(ERROR_KIND_NAME, message)
    }

    pub fn syntax_error(message: &str) -> EvalError {
        EvalError::new(ERROR_KIND_SYNTAX, message)
    }

    pub fn type_error(message: &str) -> EvalError {
        EvalError::new(ERROR_KIND_TYPE, message)
    }
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Global data access

pub type GlobalDataLock<'a> = MutexGuard<'a, GlobalData>;

/// Handle to the shared runtime state of one session.
#[derive(Clone)]
pub struct GlobalDataAccess {
    arc: Arc<Mutex<GlobalData>>,
}

impl Default for GlobalDataAccess {
    fn default() -> Self {
        GlobalDataAccess::new()
    }
}

impl Debug for GlobalDataAccess {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GlobalDataAccess")
    }
}

impl GlobalDataAccess {
    pub fn new() -> GlobalDataAccess {
        GlobalDataAccess {
            arc: Arc::new(Mutex::new(GlobalData::new())),
        }
    }

    pub fn lock(&self) -> GlobalDataLock {
        self.arc.lock().expect("global data lock poisoned")
    }
}

/// Builds the value of the '_event' system variable.
pub fn event_to_data(event: &Event) -> Data {
    let mut map: HashMap<String, Data> = HashMap::new();
    map.insert("name".to_string(), Data::String(event.name.clone()));
    map.insert(
        "type".to_string(),
        Data::String(
            match event.etype {
                EventType::platform => "platform",
                EventType::internal => "internal",
                EventType::external => "external",
            }
            .to_string(),
        ),
    );
    if let Some(sendid) = &event.sendid {
        map.insert("sendid".to_string(), Data::String(sendid.clone()));
    }
    if let Some(origin) = &event.origin {
        map.insert("origin".to_string(), Data::String(origin.clone()));
    }
    if let Some(origin_type) = &event.origin_type {
        map.insert("origintype".to_string(), Data::String(origin_type.clone()));
    }
    if let Some(invoke_id) = &event.invoke_id {
        map.insert("invokeid".to_string(), Data::String(invoke_id.clone()));
    }
    map.insert("data".to_string(), event_data_value(event));
    Data::Map(map)
}

/// The 'data' field of an event: the param map if params are present,
/// otherwise the content value.
pub fn event_data_value(event: &Event) -> Data {
    match &event.param_values {
        Some(params) => {
            let mut data: HashMap<String, Data> = HashMap::new();
            for pair in params {
                data.insert(pair.name.clone(), pair.value.clone());
            }
            Data::Map(data)
        }
        None => match &event.content {
            Some(content) => content.clone(),
            None => Data::Null,
        },
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## The data model capability

/// Data model interface trait.\
/// *W3C says*:
/// The Data Model offers the capability of storing, reading, and modifying a
/// set of data that is internal to the state machine. This specification
/// does not mandate any specific data model, but instead defines a set of
/// abstract capabilities that can be realized by various languages.
pub trait Datamodel {
    /// Returns the shared runtime state. The interpreter, the executable
    /// content and the I/O processors all reach the session through it.
    fn global(&mut self) -> &mut GlobalDataAccess;

    fn global_s(&self) -> &GlobalDataAccess;

    /// The name as used by the 'datamodel' attribute.
    fn get_name(&self) -> &str;

    /// Initialize the store from the document data declarations plus values
    /// handed over by the host or the invoking session.
    #[allow(non_snake_case)]
    fn initializeDataModel(&mut self, fsm: &Fsm, data: &[ParamPair]);

    /// Adds the 'In' predicate and binds the remaining system variables.
    fn implement_mandatory_functionality(&mut self, fsm: &Fsm);

    /// Sets a location. Creates it if not present.
    fn set(&mut self, location: &str, data: Data);

    /// Sets system variable "_event".
    fn set_event(&mut self, event: &Event);

    /// True if the location is declared.
    fn has(&self, location: &str) -> bool;

    /// Reads a location.
    fn get_by_location(&mut self, location: &str) -> Result<Data, EvalError>;

    /// Clear all.
    fn clear(&mut self);

    /// Evaluates an expression and returns its value.
    fn execute(&mut self, script: &Data) -> Result<Data, EvalError>;

    /// Executes statements for their side effects (\<script\> content).
    fn execute_script(&mut self, script: &Data) -> Result<(), EvalError>;

    /// Evaluates a boolean condition.\
    /// *W3C says*:
    /// The set of operators in conditional expressions varies depending on
    /// the data model, but all data models must support the 'In()'
    /// predicate, which takes a state ID as its argument and returns true if
    /// the state machine is in that state.
    fn execute_condition(&mut self, script: &Data) -> Result<bool, EvalError>;

    /// Executes an assignment. Assigning to an undeclared location raises
    /// 'error.execution.nameerror' and reports false; the caller skips the
    /// element and continues with its siblings.
    fn assign(&mut self, location: &Data, expr: &Data) -> bool {
        let location = location.to_string();
        if !self.has(&location) {
            error!("assign: undeclared location '{}'", location);
            self.internal_error_execution_kind(
                ERROR_KIND_NAME,
                &format!("assign to undeclared location '{}'", location),
            );
            return false;
        }
        match self.execute(expr) {
            Ok(value) => {
                self.set(&location, value);
                true
            }
            Err(err) => {
                self.internal_error_execution_kind(&err.kind, &err.message);
                false
            }
        }
    }

    /// "log" function, used for \<log\> content. Forwards to the host log
    /// sink of the session if one is installed.
    fn log(&mut self, label: &str, msg: &str) {
        let sink_used = {
            let global = self.global_s().lock();
            if let Some(sink) = &global.log_sink {
                sink(label, msg);
                true
            } else {
                false
            }
        };
        if !sink_used {
            info!("{}: {}", label, msg);
        }
    }

    /// Convenience to retrieve a value that has an alternative
    /// expression-variant ('target' vs 'targetexpr' etc.).
    fn get_expression_alternative_value(
        &mut self,
        value: &Data,
        expression: &Data,
    ) -> Result<Data, EvalError> {
        if expression.is_empty() {
            Ok(value.clone())
        } else {
            self.execute(expression)
        }
    }

    fn get_io_processor(&mut self, type_name: &str) -> Option<Arc<Mutex<dyn EventIOProcessor>>> {
        // Collect first, the processor locks must not nest inside the global lock.
        let processors: Vec<Arc<Mutex<dyn EventIOProcessor>>> =
            self.global_s().lock().io_processors.clone();
        processors.into_iter().find(|processor| {
            processor
                .lock()
                .map(|p| p.get_types().contains(&type_name))
                .unwrap_or(false)
        })
    }

    /// Indicates that an error internal to the execution of the document has
    /// occurred, such as one arising from expression evaluation.
    fn internal_error_execution(&mut self, message: &str) {
        self.global()
            .lock()
            .enqueue_internal(Event::error_execution(None, message));
    }

    fn internal_error_execution_kind(&mut self, kind: &str, message: &str) {
        self.global()
            .lock()
            .enqueue_internal(Event::error_execution(Some(kind), message));
    }

    /// Indicates that an error has occurred while trying to communicate with
    /// an external entity.
    fn internal_error_communication(&mut self, message: &str) {
        self.global()
            .lock()
            .enqueue_internal(Event::error_communication(message));
    }

    fn internal_error_event(&mut self, event: Event) {
        self.global().lock().enqueue_internal(event);
    }

    fn evaluate_content(&mut self, content: &Option<CommonContent>) -> Option<Data> {
        match content {
            None => None,
            Some(ct) => match &ct.content_expr {
                None => ct.content.as_ref().map(|c| Data::String(c.clone())),
                Some(expr) => match self.execute(&str_to_source(expr)) {
                    Err(err) => {
                        // W3C: on error place error.execution in the internal
                        // event queue and use the empty string as the value.
                        error!("content expr '{}' is invalid ({})", expr, err);
                        self.internal_error_execution_kind(&err.kind, &err.message);
                        Some(Data::String(String::new()))
                    }
                    Ok(value) => Some(value),
                },
            },
        }
    }

    fn evaluate_params(&mut self, params: &Option<Vec<Parameter>>, values: &mut Vec<ParamPair>) {
        let params = match params {
            None => return,
            Some(params) => params.clone(),
        };
        for param in &params {
            if !param.location.is_empty() {
                match self.get_by_location(&param.location) {
                    Err(err) => {
                        // W3C: invalid location -> error.execution, the name
                        // and value are ignored.
                        error!("location of param {} is invalid ({})", param, err);
                        self.internal_error_execution_kind(&err.kind, &err.message);
                    }
                    Ok(value) => {
                        values.push(ParamPair::new_moved(param.name.clone(), value));
                    }
                }
            } else if !param.expr.is_empty() {
                match self.execute(&str_to_source(&param.expr)) {
                    Err(err) => {
                        error!("expr of param {} is invalid ({})", param, err);
                        self.internal_error_execution_kind(&err.kind, &err.message);
                    }
                    Ok(value) => {
                        values.push(ParamPair::new_moved(param.name.clone(), value));
                    }
                }
            }
        }
    }
}

#[allow(non_snake_case)]
pub fn createDatamodel(name: &str, global: GlobalDataAccess) -> Box<dyn Datamodel + Send> {
    match name.to_lowercase().as_str() {
        #[cfg(feature = "ExpressionEngine")]
        EXPRESSION_DATAMODEL => Box::new(expression_engine::ExpressionDatamodel::new(global)),
        NULL_DATAMODEL => Box::new(NullDatamodel::new(global)),
        _ => panic!("Unsupported datamodel '{}'", name),
    }
}

pub trait ToAny: 'static {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Debug + 'static> ToAny for T {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// ## Null data model

/// ## W3C says:
/// ### B.1 The Null Data Model
/// The value "null" for the 'datamodel' attribute results in an absent or
/// empty data model. The boolean expression language consists of the In
/// predicate only. It has the form 'In(id)', where id is the id of a state
/// in the enclosing state machine.
pub struct NullDatamodel {
    pub global: GlobalDataAccess,
    pub state_name_to_id: HashMap<String, StateId>,
}

impl NullDatamodel {
    pub fn new(global: GlobalDataAccess) -> NullDatamodel {
        NullDatamodel {
            global,
            state_name_to_id: HashMap::new(),
        }
    }
}

impl Datamodel for NullDatamodel {
    fn global(&mut self) -> &mut GlobalDataAccess {
        &mut self.global
    }

    fn global_s(&self) -> &GlobalDataAccess {
        &self.global
    }

    fn get_name(&self) -> &str {
        NULL_DATAMODEL
    }

    #[allow(non_snake_case)]
    fn initializeDataModel(&mut self, _fsm: &Fsm, _data: &[ParamPair]) {
        // nothing to do
    }

    fn implement_mandatory_functionality(&mut self, fsm: &Fsm) {
        for state in fsm.states.as_slice() {
            self.state_name_to_id.insert(state.name.clone(), state.id);
        }
    }

    fn set(&mut self, _location: &str, _data: Data) {
        // nothing to do
    }

    fn set_event(&mut self, _event: &Event) {
        // nothing to do
    }

    fn has(&self, _location: &str) -> bool {
        false
    }

    fn get_by_location(&mut self, location: &str) -> Result<Data, EvalError> {
        Err(EvalError::name_error(location))
    }

    fn clear(&mut self) {}

    fn execute(&mut self, _script: &Data) -> Result<Data, EvalError> {
        Err(EvalError::new("unsupported", "no expression language"))
    }

    fn execute_script(&mut self, _script: &Data) -> Result<(), EvalError> {
        Err(EvalError::new("unsupported", "no scripting language"))
    }

    /// *W3C says*:
    /// The boolean expression language consists of the In predicate only.
    fn execute_condition(&mut self, script: &Data) -> Result<bool, EvalError> {
        lazy_static! {
            static ref IN_RE: Regex = Regex::new(r"In\((.*)\)").unwrap();
        }
        let script = script.as_script();
        let caps = match IN_RE.captures(script) {
            None => return Ok(false),
            Some(caps) => caps,
        };
        let mut value = caps.get(1).map_or("", |m| m.as_str()).trim();
        if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
            value = &value[1..value.len() - 1];
        }
        match self.state_name_to_id.get(value) {
            None => Ok(false),
            Some(state_id) => Ok(self.global.lock().configuration.isMember(state_id)),
        }
    }
}
