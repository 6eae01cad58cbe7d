#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use topology_controller_core as core;
pub use topology_controller_k8s_api as k8s;
pub use topology_controller_k8s_index as index;
pub use topology_controller_k8s_status as status;

mod args;

pub use self::args::Args;
