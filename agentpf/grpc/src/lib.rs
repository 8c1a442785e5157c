#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! gRPC clients for the manager's agent feed and the agents' tunnel API.

mod agent;
pub mod api;
mod convert;
mod manager;
mod rt;
mod transport;


pub use self::{
    agent::{GrpcAgentClient, SESSION_ID_HEADER},
    manager::GrpcManagerClient,
    rt::TokioExecutor,
    transport::GrpcHttp,
};

use agentpf_core::Error;
use tonic::Code;

/// Classifies a gRPC status so that callers can tell transient and
/// unsupported failures from the rest.
pub fn status_to_error(status: tonic::Status) -> Error {
    let message = if status.message().is_empty() {
        status.code().description()
    } else {
        status.message()
    };
    match status.code() {
        Code::Unavailable => Error::unavailable(message),
        Code::Unimplemented => Error::unimplemented(message),
        code => Error::Rpc {
            code: code as i32,
            message: message.into(),
        },
    }
}
