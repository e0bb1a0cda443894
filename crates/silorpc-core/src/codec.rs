//! Argument and return-value (de)serialization against a method signature.
//!
//! Arguments travel as a JSON object validated name-by-name against the
//! parameter schema; return values travel in the response envelope and are
//! checked against the return schema on the caller side. The same checking
//! mechanism covers scalars, `option<..>`, and `list<..>` uniformly.

use serde_json::Value;

use crate::contract::{MethodSignature, ReturnSpec};
use crate::dispatch::DispatchError;
use crate::schema::{json_kind, ArgumentMap};

impl MethodSignature {
    /// Validate outbound named arguments against the parameter schema,
    /// applying declared defaults for omitted optional parameters. Failures
    /// are caller bugs and are never retried.
    pub fn serialize_arguments(&self, args: &ArgumentMap) -> Result<ArgumentMap, DispatchError> {
        self.bind_arguments(args)
            .map_err(|detail| DispatchError::ArgumentValidation {
                service: self.service.clone(),
                method: self.name.clone(),
                detail,
            })
    }

    /// Inverse of [`serialize_arguments`], used on the receiving side.
    ///
    /// [`serialize_arguments`]: MethodSignature::serialize_arguments
    pub fn deserialize_arguments(&self, serial: &ArgumentMap) -> Result<ArgumentMap, DispatchError> {
        self.bind_arguments(serial)
            .map_err(|detail| DispatchError::ArgumentDeserialization {
                service: self.service.clone(),
                method: self.name.clone(),
                detail,
            })
    }

    fn bind_arguments(&self, supplied: &ArgumentMap) -> Result<ArgumentMap, String> {
        for name in supplied.keys() {
            if self.param(name).is_none() {
                return Err(format!("unknown parameter `{}`", name));
            }
        }
        let mut bound = ArgumentMap::new();
        for param in &self.params {
            match supplied.get(&param.name) {
                Some(value) => {
                    param
                        .ty
                        .check(value)
                        .map_err(|err| format!("parameter `{}`: {}", param.name, err))?;
                    bound.insert(param.name.clone(), value.clone());
                }
                None => match &param.default {
                    Some(default) => {
                        bound.insert(param.name.clone(), default.clone());
                    }
                    None => {
                        return Err(format!("missing required parameter `{}`", param.name));
                    }
                },
            }
        }
        Ok(bound)
    }

    /// Check a remote response value against the return schema. A void method
    /// receiving any non-null value is a contract violation on the callee's
    /// side and surfaces as a hard failure, never a silent discard.
    pub fn deserialize_return_value(
        &self,
        value: Option<&Value>,
    ) -> Result<Option<Value>, DispatchError> {
        let violation = |detail: String| DispatchError::ResponseContract {
            service: self.service.clone(),
            method: self.name.clone(),
            detail,
        };

        match &self.returns {
            ReturnSpec::Void => match value {
                None => Ok(None),
                Some(v) if v.is_null() => Ok(None),
                Some(v) => Err(violation(format!(
                    "expected null for a void method, got {}",
                    json_kind(v)
                ))),
            },
            ReturnSpec::Value(ty) => {
                let v = value.unwrap_or(&Value::Null);
                if v.is_null() {
                    return if ty.is_option() {
                        Ok(None)
                    } else {
                        Err(violation(format!("expected {}, got null", ty)))
                    };
                }
                ty.check(v).map_err(|err| violation(err.to_string()))?;
                Ok(Some(v.clone()))
            }
        }
    }
}
