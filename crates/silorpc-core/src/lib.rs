//! Cross-silo RPC dispatch.
//!
//! A logically single service interface is implemented either locally
//! (in-process) or remotely (over signed HTTP in another silo); the choice is
//! made once per contract at startup from the configured topology mode.
//! Contracts are declared with an explicit builder and validated loudly at
//! definition time; per-call work is limited to argument (de)serialization,
//! region resolution, request signing, and one transport round trip.

pub mod auth;
pub mod codec;
pub mod config;
pub mod contract;
pub mod dispatch;
pub mod region;
pub mod registry;
pub mod schema;
pub mod topology;
pub mod transport;

pub use auth::{AuthError, RequestSigner};
pub use contract::{
    ContractBuilder, ContractError, MethodDecl, MethodSignature, ParamSpec, ReturnSpec,
    ServiceContract,
};
pub use dispatch::{
    bind_for_topology, dispatch_to_local, DelegatingService, DispatchContext, DispatchError,
    ServiceHandler,
};
pub use region::{Region, RegionDirectory, RegionResolutionError, RegionResolver};
pub use schema::{ArgumentMap, ValueType};
pub use topology::{ServiceAffinity, TopologyMode};
pub use transport::{HttpTransport, RpcTransport, TransportError, TransportResponse};
