use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::info;

use silorpc_core::config::load_config;
use silorpc_core::contract::{ContractBuilder, MethodDecl};
use silorpc_core::dispatch::{bind_for_topology, DispatchContext, ServiceHandler};
use silorpc_core::schema::ArgumentMap;
use silorpc_core::{registry, HttpTransport, ServiceAffinity, TopologyMode, ValueType};

mod router;
mod rpc;

pub(crate) use rpc::AppState;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(2);
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> anyhow::Result<()> {
    let config_path =
        std::env::var("SILORPC_CONFIG").unwrap_or_else(|_| "silorpc.toml".to_string());
    let config =
        load_config(&config_path).with_context(|| format!("loading config `{config_path}`"))?;
    let mode = config.mode();
    silorpc_core::topology::init_topology(mode)
        .map_err(|prev| anyhow::anyhow!("topology mode already initialized to {prev:?}"))?;

    let signer = Arc::new(config.signer()?);
    let ctx = Arc::new(DispatchContext {
        signer: signer.clone(),
        transport: Arc::new(HttpTransport),
        control_address: config.topology.control_address.clone(),
    });
    register_diagnostics(mode, ctx)?;

    let state = AppState { signer, mode };
    let app = router::build_router(state);

    let bind = std::env::var("SILORPC_BIND").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding `{bind}`"))?;
    info!(
        %bind,
        mode = ?mode,
        services = ?registry::service_keys(),
        "rpc server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

/// Built-in control-affinity service for liveness probes and operator
/// introspection of the registry.
struct Diagnostics;

impl ServiceHandler for Diagnostics {
    fn methods(&self) -> Vec<&'static str> {
        vec!["ping", "registered_services"]
    }

    fn call(&self, method: &str, _args: ArgumentMap) -> anyhow::Result<Value> {
        match method {
            "ping" => Ok(json!("pong")),
            "registered_services" => Ok(json!(registry::service_keys())),
            other => anyhow::bail!("unknown diagnostics method `{other}`"),
        }
    }
}

fn register_diagnostics(mode: TopologyMode, ctx: Arc<DispatchContext>) -> anyhow::Result<()> {
    let contract = ContractBuilder::new("diagnostics", ServiceAffinity::Control)
        .method(MethodDecl::new("ping").returns(ValueType::Str))
        .method(
            MethodDecl::new("registered_services").returns(ValueType::list_of(ValueType::Str)),
        )
        .build()?;
    let handler: Arc<dyn ServiceHandler> = Arc::new(Diagnostics);
    // Diagnostics answer locally in every silo, so a foreign-topology binding
    // claims all methods through the override path.
    let service = if mode.is_home_for(ServiceAffinity::Control) {
        bind_for_topology(contract, Some(handler), None, mode, ctx)?
    } else {
        bind_for_topology(contract, None, Some(handler), mode, ctx)?
    };
    registry::register_service(Arc::new(service))?;
    Ok(())
}
