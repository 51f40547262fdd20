//! Generated client code for the daemon's public gRPC API.
//!
//! Compiled by [`tonic-build`] from the trimmed protos under `proto/`; only the
//! client halves are generated.

pub mod lnrpc {
    tonic::include_proto!("lnrpc");
}

pub mod routerrpc {
    tonic::include_proto!("routerrpc");
}
