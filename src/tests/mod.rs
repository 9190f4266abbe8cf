//! Tests for test timeout enforcement




#[cfg(test)]
mod thread_tests;

#[cfg(test)]
mod lifecycle_tests;
