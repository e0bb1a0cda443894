//! Process-wide service registry.
//!
//! Populated during single-threaded startup and read-only during steady-state
//! traffic. Duplicate keys are a startup error; [`replace_service`] is the
//! explicit override point for the rare administrative swap.

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::contract::ContractError;
use crate::dispatch::DelegatingService;

static SERVICES: OnceCell<RwLock<HashMap<String, Arc<DelegatingService>>>> = OnceCell::new();

fn table() -> &'static RwLock<HashMap<String, Arc<DelegatingService>>> {
    SERVICES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Insert a bound facade under its contract key. Registering the same key
/// twice indicates two contracts fighting over one route and aborts startup.
pub fn register_service(service: Arc<DelegatingService>) -> Result<(), ContractError> {
    let key = service.key().to_string();
    let mut map = table().write().expect("service registry poisoned");
    if map.contains_key(&key) {
        return Err(ContractError::DuplicateKey(key));
    }
    map.insert(key, service);
    Ok(())
}

/// Swap in a new facade for an already-registered key, returning the previous
/// entry. Administrative/test use only; steady-state traffic never writes.
pub fn replace_service(service: Arc<DelegatingService>) -> Option<Arc<DelegatingService>> {
    let key = service.key().to_string();
    let mut map = table().write().expect("service registry poisoned");
    map.insert(key, service)
}

pub fn lookup(key: &str) -> Option<Arc<DelegatingService>> {
    table()
        .read()
        .expect("service registry poisoned")
        .get(key)
        .cloned()
}

/// Sorted snapshot of registered service keys, for startup logs and
/// operator introspection.
pub fn service_keys() -> Vec<String> {
    let mut keys: Vec<String> = table()
        .read()
        .expect("service registry poisoned")
        .keys()
        .cloned()
        .collect();
    keys.sort();
    keys
}
