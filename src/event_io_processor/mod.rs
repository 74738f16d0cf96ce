//! Event I/O processors.\
//! A processor resolves the 'target' of a \<send\> for one send type and
//! delivers the event. Processors are registered on the session registry;
//! additional send types can be supported by registering further
//! implementations of [EventIOProcessor].

use std::fmt::Debug;

use crate::datamodel::{GlobalDataAccess, ToAny};
use crate::fsm::{Event, SessionId};

pub mod basic_http_event_io_processor;
pub mod scxml_event_io_processor;
pub mod websocket_event_io_processor;
pub mod wire;

/// Name of the "_ioprocessors" system variable: maps the processor types to
/// their session locations.
pub const SYS_IO_PROCESSORS: &str = "_ioprocessors";

/// Trait for Event I/O Processors.\
/// As processors hold session related data only through the global data they
/// are handed on each call, one instance may be shared by all sessions of a
/// registry.
pub trait EventIOProcessor: ToAny + Debug + Send {
    /// Returns the location of this session and processor.
    fn get_location(&self, id: SessionId) -> String;

    /// Returns the type names of this processor.
    fn get_types(&self) -> &[&str];

    /// Resolves the target and delivers the event on behalf of the session
    /// owning 'global'. Returns false if delivery failed; the matching error
    /// event was then placed on the session's internal queue.
    fn send(&mut self, global: &GlobalDataAccess, target: &str, event: Event) -> bool;

    fn shutdown(&mut self);
}
