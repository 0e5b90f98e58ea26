//! Client integration tests
//!
//! Readiness, reconnects and closing, the authorized request primitive,
//! typed operations and the model adapter, all against a fake scope.

mod lifecycle;
mod requests;
