//! An interpreter for Harel statecharts, following the SCXML processing model.\
//! \
//! The crate executes already-compiled statechart documents: nested and
//! parallel states, history pseudo-states, final states and transitions,
//! driven by an external event stream and producing internal events,
//! external sends and invocations of nested machines.\
//! Documents are constructed through [builder::DocumentBuilder]; parsing
//! front-ends are deliberately not part of this crate.

extern crate core;

pub mod builder;
pub mod common;
pub mod datamodel;
pub mod event_io_processor;
pub mod executable_content;
#[cfg(feature = "ExpressionEngine")]
pub mod expression_engine;
pub mod fsm;
pub mod fsm_executor;
pub mod test;

#[cfg(test)]
mod tests;
