mod test_builder;
mod test_datatypes;
mod test_history;
mod test_interpreter;
mod test_invoke;
mod test_parallel;
mod test_send;
