#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use agentpf_core as core;
pub use agentpf_grpc as grpc;
pub use agentpf_k8s as k8s;
pub use agentpf_pool as pool;

mod args;

pub use self::args::Args;
