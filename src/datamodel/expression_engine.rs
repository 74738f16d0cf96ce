//! Data model implementation on top of the expression engine.\
//! The default model of documents that don't declare another one.

use std::collections::HashMap;

use crate::common::error;
use crate::datamodel::{
    event_to_data, Data, DataStore, Datamodel, EvalError, GlobalDataAccess, EVENT_VARIABLE_NAME,
    EXPRESSION_DATAMODEL, INVOKE_ID_VARIABLE_NAME, PARENT_SESSION_VARIABLE_NAME,
    SESSION_ID_VARIABLE_NAME, SESSION_NAME_VARIABLE_NAME,
};
use crate::event_io_processor::SYS_IO_PROCESSORS;
use crate::expression_engine::parser::{evaluate, to_bool, Environment, ExpressionParser};
use crate::fsm::{Event, Fsm, ParamPair, StateId};

pub struct ExpressionDatamodel {
    pub global: GlobalDataAccess,
    pub data: DataStore,
    pub state_name_to_id: HashMap<String, StateId>,
}

impl ExpressionDatamodel {
    pub fn new(global: GlobalDataAccess) -> ExpressionDatamodel {
        ExpressionDatamodel {
            global,
            data: DataStore::new(),
            state_name_to_id: HashMap::new(),
        }
    }

    fn split_path(location: &str) -> Vec<String> {
        location.split('.').map(|p| p.to_string()).collect()
    }
}

impl Environment for ExpressionDatamodel {
    fn get_path(&self, path: &[String]) -> Result<Data, EvalError> {
        let mut current = match self.data.get(&path[0]) {
            None => {
                return Err(EvalError::name_error(&format!(
                    "'{}' is not declared",
                    path[0]
                )))
            }
            Some(data) => data,
        };
        for member in &path[1..] {
            current = match current {
                Data::Map(map) => match map.get(member) {
                    Some(data) => data,
                    None => {
                        return Err(EvalError::name_error(&format!(
                            "'{}' has no member '{}'",
                            path.join("."),
                            member
                        )))
                    }
                },
                _ => {
                    return Err(EvalError::type_error(&format!(
                        "'{}' is not a map",
                        path.join(".")
                    )))
                }
            };
        }
        Ok(current.clone())
    }

    fn set_path(&mut self, path: &[String], value: Data) -> Result<(), EvalError> {
        if path.len() == 1 {
            self.data.set(&path[0], value);
            return Ok(());
        }
        let mut current = match self.data.get_mut(&path[0]) {
            None => {
                return Err(EvalError::name_error(&format!(
                    "'{}' is not declared",
                    path[0]
                )))
            }
            Some(data) => data,
        };
        for member in &path[1..path.len() - 1] {
            current = match current {
                Data::Map(map) => map
                    .entry(member.clone())
                    .or_insert_with(|| Data::Map(HashMap::new())),
                _ => {
                    return Err(EvalError::type_error(&format!(
                        "'{}' is not a map",
                        path.join(".")
                    )))
                }
            };
        }
        match current {
            Data::Map(map) => {
                map.insert(path[path.len() - 1].clone(), value);
                Ok(())
            }
            _ => Err(EvalError::type_error(&format!(
                "'{}' is not a map",
                path.join(".")
            ))),
        }
    }

    fn in_state(&self, state_name: &str) -> bool {
        match self.state_name_to_id.get(state_name) {
            None => false,
            Some(state_id) => self.global.lock().configuration.isMember(state_id),
        }
    }
}

impl Datamodel for ExpressionDatamodel {
    fn global(&mut self) -> &mut GlobalDataAccess {
        &mut self.global
    }

    fn global_s(&self) -> &GlobalDataAccess {
        &self.global
    }

    fn get_name(&self) -> &str {
        EXPRESSION_DATAMODEL
    }

    /// Document data declarations are evaluated once here (early binding);
    /// values handed over by the host override them.
    #[allow(non_snake_case)]
    fn initializeDataModel(&mut self, fsm: &Fsm, data: &[ParamPair]) {
        for (name, value) in &fsm.data {
            let resolved = match value {
                Data::Source(expr) => match ExpressionParser::parse(expr)
                    .and_then(|parsed| evaluate(&parsed, self))
                {
                    Ok(value) => value,
                    Err(err) => {
                        error!("data '{}' can't be initialized: {}", name, err);
                        Data::Null
                    }
                },
                other => other.clone(),
            };
            self.data.set(name, resolved);
        }
        for pair in data {
            self.data.set(&pair.name, pair.value.clone());
        }
    }

    fn implement_mandatory_functionality(&mut self, fsm: &Fsm) {
        for state in fsm.states.as_slice() {
            self.state_name_to_id.insert(state.name.clone(), state.id);
        }
        let (session_id, session_name, parent_session_id, caller_invoke_id, processors, executor) = {
            let global = self.global.lock();
            (
                global.session_id,
                global.session_name.clone(),
                global.parent_session_id,
                global.caller_invoke_id.clone(),
                global.io_processors.clone(),
                global.executor.clone(),
            )
        };
        self.data.set(
            SESSION_ID_VARIABLE_NAME,
            Data::Integer(session_id as i64),
        );
        if let Some(name) = session_name {
            self.data.set(SESSION_NAME_VARIABLE_NAME, Data::String(name));
        }
        self.data.set(
            PARENT_SESSION_VARIABLE_NAME,
            match parent_session_id {
                Some(id) => Data::Integer(id as i64),
                None => Data::Null,
            },
        );
        if let Some(invoke_id) = caller_invoke_id {
            self.data
                .set(INVOKE_ID_VARIABLE_NAME, Data::String(invoke_id));
        }
        let mut io_map: HashMap<String, Data> = HashMap::new();
        for processor in processors {
            if let Ok(processor) = processor.lock() {
                let location = processor.get_location(session_id);
                for type_name in processor.get_types() {
                    io_map.insert(type_name.to_string(), Data::String(location.clone()));
                }
            }
        }
        self.data.set(SYS_IO_PROCESSORS, Data::Map(io_map));
        // "_x.sessions": registry snapshot at construction time.
        let sessions = match executor {
            None => Vec::new(),
            Some(executor) => executor
                .session_ids()
                .into_iter()
                .map(|id| Data::Integer(id as i64))
                .collect(),
        };
        let mut x_map: HashMap<String, Data> = HashMap::new();
        x_map.insert("sessions".to_string(), Data::Array(sessions));
        self.data.set("_x", Data::Map(x_map));
    }

    fn set(&mut self, location: &str, data: Data) {
        let path = Self::split_path(location);
        if path.len() > 1 {
            if let Err(err) = self.set_path(&path, data) {
                error!("can't set '{}': {}", location, err);
            }
        } else {
            self.data.set(location, data);
        }
    }

    fn set_event(&mut self, event: &Event) {
        self.data.set(EVENT_VARIABLE_NAME, event_to_data(event));
    }

    fn has(&self, location: &str) -> bool {
        self.get_path(&Self::split_path(location)).is_ok()
    }

    fn get_by_location(&mut self, location: &str) -> Result<Data, EvalError> {
        self.get_path(&Self::split_path(location))
    }

    fn clear(&mut self) {
        self.data.values.clear();
    }

    fn execute(&mut self, script: &Data) -> Result<Data, EvalError> {
        let parsed = ExpressionParser::parse(script.as_script())?;
        evaluate(&parsed, self)
    }

    fn execute_script(&mut self, script: &Data) -> Result<(), EvalError> {
        let statements = ExpressionParser::parse_script(script.as_script())?;
        for statement in &statements {
            evaluate(statement, self)?;
        }
        Ok(())
    }

    fn execute_condition(&mut self, script: &Data) -> Result<bool, EvalError> {
        Ok(to_bool(&self.execute(script)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::str_to_source;

    fn model() -> ExpressionDatamodel {
        let mut dm = ExpressionDatamodel::new(GlobalDataAccess::new());
        dm.data.set("counter", Data::Integer(1));
        dm
    }

    #[test]
    fn execute_reads_the_store() {
        let mut dm = model();
        assert_eq!(
            dm.execute(&str_to_source("counter + 1")).unwrap(),
            Data::Integer(2)
        );
    }

    #[test]
    fn assign_to_declared_location() {
        let mut dm = model();
        assert!(dm.assign(&str_to_source("counter"), &str_to_source("counter * 10")));
        assert_eq!(dm.data.get("counter"), Some(&Data::Integer(10)));
    }

    #[test]
    fn assign_to_undeclared_location_fails() {
        let mut dm = model();
        assert!(!dm.assign(&str_to_source("nope"), &str_to_source("1")));
        // The matching platform error is queued for the document to catch.
        let mut global = dm.global.lock();
        assert!(!global.internalQueue.isEmpty());
        let event = global.internalQueue.dequeue();
        assert_eq!(event.name, "error.execution.nameerror");
    }

    #[test]
    fn event_fields_are_reachable() {
        let mut dm = model();
        let mut event = Event::new_simple("click");
        event.param_values = Some(vec![ParamPair::new("button", &Data::Integer(2))]);
        dm.set_event(&event);
        assert_eq!(
            dm.execute(&str_to_source("_event.name")).unwrap(),
            Data::String("click".to_string())
        );
        assert_eq!(
            dm.execute(&str_to_source("_event.data.button")).unwrap(),
            Data::Integer(2)
        );
    }

    #[test]
    fn script_execution() {
        let mut dm = model();
        dm.execute_script(&str_to_source("a = 2; counter = counter + a;"))
            .unwrap();
        assert_eq!(dm.data.get("counter"), Some(&Data::Integer(3)));
    }
}
