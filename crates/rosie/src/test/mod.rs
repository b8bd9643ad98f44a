pub mod test_compile;
pub mod test_load;
pub mod test_match;
pub mod test_trace;
