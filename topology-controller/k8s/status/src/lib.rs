//! Writes the outcome of each topology build back onto the routing objects
//! that produced it.
//!
//! The [`Index`] is handed to the build loop as its `StatusSink`. It remembers
//! the conditions last written for every object and, after each build, sends
//! a status patch for every object whose conditions changed. The
//! [`Controller`] receives those patches and applies them to the API server.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;


pub use self::index::{
    Controller, ControllerMetrics, Index, IndexMetrics, Update, STATUS_CONTROLLER_NAME,
};
