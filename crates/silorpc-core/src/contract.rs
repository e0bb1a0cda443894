//! Service contract declaration and definition-time validation.
//!
//! A contract is declared once per process at startup with an explicit
//! builder, validated loudly, and frozen. Everything the dispatch layer
//! needs per call — parameter schema, return schema, region binding — is
//! derived here and cached for the process lifetime.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::region::RegionResolver;
use crate::schema::ValueType;
use crate::topology::ServiceAffinity;

/// Declaration-time errors. These indicate a programming error in the
/// service author's declaration and abort startup; they are never recovered.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("service key must be a non-empty string")]
    MissingKey,
    #[error("{service}: contract declares no methods")]
    NoMethods { service: String },
    #[error("{service}.{method}: {detail}")]
    BadMethod {
        service: String,
        method: String,
        detail: String,
    },
    #[error("{service}.{method}: regional services need a region resolver on every method")]
    MissingRegionResolver { service: String, method: String },
    #[error("{service}.{method}: region resolver declared on a control-affinity service")]
    UnexpectedRegionResolver { service: String, method: String },
    #[error("{service}: no local handler supplied for home topology")]
    MissingLocalHandler { service: String },
    #[error("{service}: local handler does not implement `{method}`")]
    MissingLocalMethod { service: String, method: String },
    #[error("{service}: override handler claims unknown method `{method}`")]
    UnknownOverrideMethod { service: String, method: String },
    #[error("service `{0}` is already registered")]
    DuplicateKey(String),
}

/// One declared parameter: required type, optional default for omission.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ValueType,
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum ReturnSpec {
    Void,
    Value(ValueType),
}

/// Region binding for one method of a regional-affinity service.
pub struct RegionBinding {
    pub resolver: Arc<dyn RegionResolver>,
    /// Treat a mapping miss as "entity does not exist" and return null
    /// without any call. Only legal on methods returning `option<..>`.
    pub return_none_on_miss: bool,
}

/// The cached, immutable shape of one RPC method.
pub struct MethodSignature {
    pub service: String,
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub returns: ReturnSpec,
    pub region: Option<RegionBinding>,
}

impl MethodSignature {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// A named, immutable set of method signatures with a topology affinity.
pub struct ServiceContract {
    key: String,
    affinity: ServiceAffinity,
    signatures: HashMap<String, Arc<MethodSignature>>,
}

impl std::fmt::Debug for ServiceContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContract")
            .field("key", &self.key)
            .field("affinity", &self.affinity)
            .field("signatures", &self.signatures.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceContract {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn affinity(&self) -> ServiceAffinity {
        self.affinity
    }

    pub fn signature(&self, method: &str) -> Option<&Arc<MethodSignature>> {
        self.signatures.get(method)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.signatures.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Fluent declaration of one exposed method.
pub struct MethodDecl {
    name: String,
    params: Vec<ParamSpec>,
    returns: ReturnSpec,
    resolver: Option<Arc<dyn RegionResolver>>,
    return_none_on_miss: bool,
}

impl MethodDecl {
    pub fn new(name: impl Into<String>) -> MethodDecl {
        MethodDecl {
            name: name.into(),
            params: Vec::new(),
            returns: ReturnSpec::Void,
            resolver: None,
            return_none_on_miss: false,
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ValueType) -> MethodDecl {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    pub fn param_with_default(
        mut self,
        name: impl Into<String>,
        ty: ValueType,
        default: Value,
    ) -> MethodDecl {
        self.params.push(ParamSpec {
            name: name.into(),
            ty,
            default: Some(default),
        });
        self
    }

    pub fn returns(mut self, ty: ValueType) -> MethodDecl {
        self.returns = ReturnSpec::Value(ty);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn RegionResolver>) -> MethodDecl {
        self.resolver = Some(resolver);
        self
    }

    pub fn return_none_on_miss(mut self) -> MethodDecl {
        self.return_none_on_miss = true;
        self
    }
}

/// Explicit contract builder: all validation happens in [`build`], before any
/// call can be dispatched.
///
/// [`build`]: ContractBuilder::build
pub struct ContractBuilder {
    key: String,
    affinity: ServiceAffinity,
    methods: Vec<MethodDecl>,
}

impl ContractBuilder {
    pub fn new(key: impl Into<String>, affinity: ServiceAffinity) -> ContractBuilder {
        ContractBuilder {
            key: key.into(),
            affinity,
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, decl: MethodDecl) -> ContractBuilder {
        self.methods.push(decl);
        self
    }

    pub fn build(self) -> Result<Arc<ServiceContract>, ContractError> {
        if self.key.trim().is_empty() {
            return Err(ContractError::MissingKey);
        }
        if self.methods.is_empty() {
            return Err(ContractError::NoMethods { service: self.key });
        }

        let mut signatures = HashMap::new();
        for decl in self.methods {
            let signature = validate_method(&self.key, self.affinity, decl)?;
            let name = signature.name.clone();
            if signatures.contains_key(&name) {
                return Err(ContractError::BadMethod {
                    service: self.key,
                    method: name,
                    detail: "duplicate method name".into(),
                });
            }
            signatures.insert(name, Arc::new(signature));
        }

        Ok(Arc::new(ServiceContract {
            key: self.key,
            affinity: self.affinity,
            signatures,
        }))
    }
}

fn validate_method(
    service: &str,
    affinity: ServiceAffinity,
    decl: MethodDecl,
) -> Result<MethodSignature, ContractError> {
    let method = decl.name.clone();
    let bad = |detail: String| ContractError::BadMethod {
        service: service.to_string(),
        method: method.clone(),
        detail,
    };

    let mut seen = std::collections::HashSet::new();
    for param in &decl.params {
        if !seen.insert(param.name.as_str()) {
            return Err(bad(format!("duplicate parameter `{}`", param.name)));
        }
        if !param.ty.is_concrete() {
            return Err(bad(format!(
                "parameter `{}` uses a deferred type reference ({}); type tokens must be concrete",
                param.name, param.ty
            )));
        }
        if let Some(default) = &param.default {
            param
                .ty
                .check(default)
                .map_err(|err| bad(format!("default for `{}` is invalid: {}", param.name, err)))?;
        }
    }

    if let ReturnSpec::Value(ty) = &decl.returns {
        if !ty.is_concrete() {
            return Err(bad(format!(
                "return type uses a deferred type reference ({})",
                ty
            )));
        }
    }

    let region = match (affinity, decl.resolver) {
        (ServiceAffinity::Region, Some(resolver)) => Some(RegionBinding {
            resolver,
            return_none_on_miss: decl.return_none_on_miss,
        }),
        (ServiceAffinity::Region, None) => {
            return Err(ContractError::MissingRegionResolver {
                service: service.to_string(),
                method: decl.name,
            })
        }
        (ServiceAffinity::Control, Some(_)) => {
            return Err(ContractError::UnexpectedRegionResolver {
                service: service.to_string(),
                method: decl.name,
            })
        }
        (ServiceAffinity::Control, None) => None,
    };

    if decl.return_none_on_miss {
        let optional = matches!(&decl.returns, ReturnSpec::Value(ty) if ty.is_option());
        if !optional {
            return Err(bad(
                "return_none_on_miss requires an option<..> return type".into(),
            ));
        }
    }

    Ok(MethodSignature {
        service: service.to_string(),
        name: decl.name,
        params: decl.params,
        returns: decl.returns,
        region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{FixedRegion, Region};
    use serde_json::json;

    fn fixed() -> Arc<dyn RegionResolver> {
        Arc::new(FixedRegion(Region::new("us", Some("https://us".into()))))
    }

    #[test]
    fn builds_a_control_contract() {
        let contract = ContractBuilder::new("user", ServiceAffinity::Control)
            .method(
                MethodDecl::new("get_user")
                    .param("user_id", ValueType::Int)
                    .returns(ValueType::option_of(ValueType::Json)),
            )
            .method(MethodDecl::new("ping"))
            .build()
            .unwrap();
        assert_eq!(contract.key(), "user");
        assert_eq!(contract.method_names(), vec!["get_user", "ping"]);
        assert!(contract.signature("get_user").is_some());
        assert!(contract.signature("nope").is_none());
    }

    #[test]
    fn rejects_empty_key_and_empty_contract() {
        assert!(matches!(
            ContractBuilder::new("  ", ServiceAffinity::Control)
                .method(MethodDecl::new("m"))
                .build(),
            Err(ContractError::MissingKey)
        ));
        assert!(matches!(
            ContractBuilder::new("user", ServiceAffinity::Control).build(),
            Err(ContractError::NoMethods { .. })
        ));
    }

    #[test]
    fn rejects_deferred_parameter_types_at_build_time() {
        let err = ContractBuilder::new("user", ServiceAffinity::Control)
            .method(
                MethodDecl::new("get_user")
                    .param("user", ValueType::Deferred("RpcUser".into())),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::BadMethod { .. }));
        assert!(err.to_string().contains("deferred type reference"));
    }

    #[test]
    fn rejects_nested_deferred_return_type() {
        let err = ContractBuilder::new("user", ServiceAffinity::Control)
            .method(MethodDecl::new("list_users").returns(ValueType::list_of(
                ValueType::Deferred("RpcUser".into()),
            )))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::BadMethod { .. }));
    }

    #[test]
    fn regional_contracts_require_a_resolver_per_method() {
        let err = ContractBuilder::new("org", ServiceAffinity::Region)
            .method(MethodDecl::new("get_org").param("id", ValueType::Int))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::MissingRegionResolver { .. }));

        let ok = ContractBuilder::new("org", ServiceAffinity::Region)
            .method(
                MethodDecl::new("get_org")
                    .param("id", ValueType::Int)
                    .returns(ValueType::option_of(ValueType::Json))
                    .resolver(fixed()),
            )
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn control_contracts_reject_resolvers() {
        let err = ContractBuilder::new("user", ServiceAffinity::Control)
            .method(MethodDecl::new("get_user").resolver(fixed()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::UnexpectedRegionResolver { .. }));
    }

    #[test]
    fn return_none_on_miss_requires_optional_return() {
        let err = ContractBuilder::new("org", ServiceAffinity::Region)
            .method(
                MethodDecl::new("get_org")
                    .returns(ValueType::Json)
                    .resolver(fixed())
                    .return_none_on_miss(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::BadMethod { .. }));
    }

    #[test]
    fn rejects_mistyped_defaults() {
        let err = ContractBuilder::new("user", ServiceAffinity::Control)
            .method(MethodDecl::new("list").param_with_default(
                "limit",
                ValueType::Int,
                json!("ten"),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::BadMethod { .. }));
    }
}
