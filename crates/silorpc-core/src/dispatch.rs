//! The dispatch engine: binds each contract to a local or remote delegate at
//! startup, drives the outbound call pipeline, and hosts the inbound
//! local-dispatch entry point.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use silorpc_protocol::{rpc_path, RequestEnvelope, ResponseEnvelope};

use crate::auth::RequestSigner;
use crate::contract::{ContractError, MethodSignature, ServiceContract};
use crate::region::{Region, RegionResolutionError};
use crate::registry;
use crate::schema::ArgumentMap;
use crate::topology::TopologyMode;
use crate::transport::RpcTransport;

/// Per-call failures. None of these are retried at this layer; retry policy,
/// if any, belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{service}.{method}: invalid arguments: {detail}")]
    ArgumentValidation {
        service: String,
        method: String,
        detail: String,
    },
    #[error("{service}.{method}: could not deserialize arguments: {detail}")]
    ArgumentDeserialization {
        service: String,
        method: String,
        detail: String,
    },
    /// Unknown service or method key: a routing/version mismatch between
    /// caller and callee.
    #[error("unknown service or method: {0}")]
    Resolution(String),
    #[error("{service}.{method}: service unavailable: {detail}")]
    ServiceUnavailable {
        service: String,
        method: String,
        detail: String,
    },
    #[error("{service}.{method}: remote call failed ({status} status): {detail}")]
    Remote {
        service: String,
        method: String,
        status: u16,
        detail: String,
    },
    #[error("{service}.{method}: response contract violation: {detail}")]
    ResponseContract {
        service: String,
        method: String,
        detail: String,
    },
    #[error("{service}.{method}: transport failure: {detail}")]
    Transport {
        service: String,
        method: String,
        detail: String,
    },
    #[error("{service}.{method}: dispatch misconfigured: {detail}")]
    Configuration {
        service: String,
        method: String,
        detail: String,
    },
    #[error("{service}.{method}: local handler error: {source}")]
    Handler {
        service: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A local (database-backed or override) implementation of a contract.
///
/// Handlers are synchronous; concurrency comes from the surrounding host
/// process. `call` receives arguments that already passed schema validation
/// when they crossed a wire; local-delegate calls hand the caller's argument
/// map through untouched.
pub trait ServiceHandler: Send + Sync {
    /// Contract methods this handler implements.
    fn methods(&self) -> Vec<&'static str>;

    /// Execute one method. The returned value must already be plain
    /// serializable JSON (`serde_json::to_value` output).
    fn call(&self, method: &str, args: ArgumentMap) -> anyhow::Result<Value>;
}

/// Execution strategy for one method, fixed at bind time.
pub enum MethodDelegate {
    Local(Arc<dyn ServiceHandler>),
    Remote,
}

impl MethodDelegate {
    pub fn is_local(&self) -> bool {
        matches!(self, MethodDelegate::Local(_))
    }
}

/// Shared collaborators every remote-capable facade needs.
pub struct DispatchContext {
    pub signer: Arc<RequestSigner>,
    pub transport: Arc<dyn RpcTransport>,
    pub control_address: Option<String>,
}

/// The bound, callable facade for one contract in this process. Constructed
/// once per contract at startup and cached in the global registry.
pub struct DelegatingService {
    contract: Arc<ServiceContract>,
    delegates: HashMap<String, MethodDelegate>,
    ctx: Arc<DispatchContext>,
}

impl std::fmt::Debug for DelegatingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingService")
            .field("contract", &self.contract.key())
            .field("delegates", &self.delegates.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolve the delegate per method for the given topology mode.
///
/// The local handler is used for every method when this process is the
/// contract's home topology (or a monolith). Otherwise methods claimed by the
/// partial override run locally — never remotely, even though a remote path
/// exists — and all remaining methods dispatch remotely.
pub fn bind_for_topology(
    contract: Arc<ServiceContract>,
    local: Option<Arc<dyn ServiceHandler>>,
    partial_override: Option<Arc<dyn ServiceHandler>>,
    mode: TopologyMode,
    ctx: Arc<DispatchContext>,
) -> Result<DelegatingService, ContractError> {
    let service = contract.key().to_string();
    let mut delegates = HashMap::new();

    if mode.is_home_for(contract.affinity()) {
        let local = local.ok_or(ContractError::MissingLocalHandler {
            service: service.clone(),
        })?;
        let implemented = local.methods();
        for method in contract.method_names() {
            if !implemented.contains(&method) {
                return Err(ContractError::MissingLocalMethod {
                    service,
                    method: method.to_string(),
                });
            }
            delegates.insert(method.to_string(), MethodDelegate::Local(local.clone()));
        }
    } else {
        if let Some(overlay) = &partial_override {
            for method in overlay.methods() {
                if contract.signature(method).is_none() {
                    return Err(ContractError::UnknownOverrideMethod {
                        service,
                        method: method.to_string(),
                    });
                }
            }
        }
        for method in contract.method_names() {
            let delegate = match &partial_override {
                Some(overlay) if overlay.methods().contains(&method) => {
                    MethodDelegate::Local(overlay.clone())
                }
                _ => MethodDelegate::Remote,
            };
            delegates.insert(method.to_string(), delegate);
        }
    }

    Ok(DelegatingService {
        contract,
        delegates,
        ctx,
    })
}

impl DelegatingService {
    pub fn key(&self) -> &str {
        self.contract.key()
    }

    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    pub fn delegate(&self, method: &str) -> Option<&MethodDelegate> {
        self.delegates.get(method)
    }

    /// True when the given method executes in-process under this binding.
    pub fn is_local(&self, method: &str) -> bool {
        self.delegates.get(method).is_some_and(MethodDelegate::is_local)
    }

    /// Invoke one contract method through whichever delegate was bound.
    /// Returns `None` for void/null results.
    pub async fn call(
        &self,
        method: &str,
        args: ArgumentMap,
    ) -> Result<Option<Value>, DispatchError> {
        let signature = self.contract.signature(method).ok_or_else(|| {
            DispatchError::Resolution(format!("{}.{}", self.contract.key(), method))
        })?;
        match self.delegates.get(method) {
            Some(MethodDelegate::Local(handler)) => {
                let value =
                    handler
                        .call(method, args)
                        .map_err(|source| DispatchError::Handler {
                            service: self.contract.key().to_string(),
                            method: method.to_string(),
                            source,
                        })?;
                Ok(if value.is_null() { None } else { Some(value) })
            }
            Some(MethodDelegate::Remote) => self.call_remote(signature, args).await,
            None => Err(DispatchError::Resolution(format!(
                "{}.{}",
                self.contract.key(),
                method
            ))),
        }
    }

    async fn call_remote(
        &self,
        signature: &Arc<MethodSignature>,
        args: ArgumentMap,
    ) -> Result<Option<Value>, DispatchError> {
        let service = signature.service.as_str();
        let method = signature.name.as_str();
        let fail = |detail: String| DispatchError::ServiceUnavailable {
            service: service.to_string(),
            method: method.to_string(),
            detail,
        };

        let region: Option<Region> = match &signature.region {
            Some(binding) => match binding.resolver.resolve(&args) {
                Ok(region) => Some(region),
                Err(RegionResolutionError::MappingNotFound) if binding.return_none_on_miss => {
                    debug!(
                        target: "rpc.dispatch",
                        service, method,
                        "region mapping miss; halting early with null result"
                    );
                    return Ok(None);
                }
                Err(err) => return Err(fail(format!("error while resolving region: {err}"))),
            },
            None => None,
        };

        let address = match &region {
            Some(region) => region.address.clone().ok_or_else(|| {
                DispatchError::Configuration {
                    service: service.to_string(),
                    method: method.to_string(),
                    detail: format!("address for region `{}` is not configured", region.name),
                }
            })?,
            None => self.ctx.control_address.clone().ok_or_else(|| {
                DispatchError::Configuration {
                    service: service.to_string(),
                    method: method.to_string(),
                    detail: "control-plane address is not configured".into(),
                }
            })?,
        };

        let serial = signature.serialize_arguments(&args)?;
        let envelope = RequestEnvelope {
            meta: serde_json::Map::new(),
            args: serial,
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|err| fail(format!("could not encode request envelope: {err}")))?;

        let path = rpc_path(service, method);
        let tag = self.ctx.signer.sign(&path, &body);

        let started = Instant::now();
        let response = self
            .ctx
            .transport
            .post(&address, &path, body, &tag)
            .await
            .map_err(|err| DispatchError::Transport {
                service: service.to_string(),
                method: method.to_string(),
                detail: err.to_string(),
            })?;
        debug!(
            target: "rpc.dispatch",
            service,
            method,
            region = region.as_ref().map(|r| r.name.as_str()).unwrap_or("control"),
            status = response.status,
            response_bytes = response.body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rpc dispatched"
        );

        if response.status != 200 {
            warn!(
                target: "rpc.dispatch",
                service, method, status = response.status,
                "remote rpc returned an error status"
            );
            return Err(remote_error(service, method, &path, response.status));
        }
        let envelope: ResponseEnvelope = serde_json::from_slice(&response.body).map_err(|err| {
            DispatchError::ResponseContract {
                service: service.to_string(),
                method: method.to_string(),
                detail: format!("malformed response envelope: {err}"),
            }
        })?;
        signature.deserialize_return_value(envelope.value.as_ref())
    }
}

fn verbose_errors() -> bool {
    cfg!(test) || std::env::var("SILORPC_VERBOSE_ERRORS").ok().as_deref() == Some("1")
}

/// Map a non-200 status to a terminal error. Detail stays deliberately thin
/// outside verbose contexts so topology information never leaks across silo
/// boundaries.
fn remote_error(service: &str, method: &str, path: &str, status: u16) -> DispatchError {
    let detail = if verbose_errors() {
        format!("error invoking rpc at `{path}`")
    } else {
        match status {
            403 => "unauthorized service access".to_string(),
            400 => "invalid service request".to_string(),
            _ => "service unavailable".to_string(),
        }
    };
    DispatchError::Remote {
        service: service.to_string(),
        method: method.to_string(),
        status,
        detail,
    }
}

/// Inbound entry point: execute a locally-bound method from serialized
/// arguments and wrap the result in the response envelope.
pub fn dispatch_to_local(
    service_key: &str,
    method: &str,
    serial_args: &ArgumentMap,
) -> Result<ResponseEnvelope, DispatchError> {
    let service = registry::lookup(service_key)
        .ok_or_else(|| DispatchError::Resolution(format!("not a service key: `{service_key}`")))?;
    let signature = service.contract().signature(method).ok_or_else(|| {
        DispatchError::Resolution(format!("not a method on `{service_key}`: `{method}`"))
    })?;
    let args = signature.deserialize_arguments(serial_args)?;

    let handler = match service.delegate(method) {
        Some(MethodDelegate::Local(handler)) => handler.clone(),
        _ => {
            return Err(DispatchError::Configuration {
                service: service_key.to_string(),
                method: method.to_string(),
                detail: "method is not bound locally in this topology".into(),
            })
        }
    };

    let value = handler
        .call(method, args)
        .map_err(|source| DispatchError::Handler {
            service: service_key.to_string(),
            method: method.to_string(),
            source,
        })?;

    Ok(ResponseEnvelope {
        meta: serde_json::Map::new(),
        value: if value.is_null() { None } else { Some(value) },
    })
}
