//! Subcommand handlers and the engine wiring they share.

pub mod check;
pub mod config_cmd;
pub mod reactions;
pub mod run;

use std::sync::Arc;

use serde::Serialize;

use shadowgraph_config::Config;
use shadowgraph_core::{
    Coordinator, HookRegistry, ObjectGraph, SinkSet, StoreGateway, TraceBuffer, TraceSink,
    TracingSink,
};

use crate::cli::OutputFormat;
use crate::error::CliError;
use crate::hooks::LoggingHook;

/// A coordinator plus the trace buffer its records land in.
pub struct Engine {
    pub coordinator: Coordinator,
    pub traces: Arc<TraceBuffer>,
}

/// Wire registry, reactions, graph, hooks and sinks over `store`.
pub fn build_engine(config: &Config, store: &Arc<dyn StoreGateway>) -> Result<Engine, CliError> {
    let registry = Arc::new(config.build_registry(store)?);
    let reactions = Arc::new(config.build_reactions(&registry)?);
    let graph = Arc::new(ObjectGraph::new(registry));

    let traces = Arc::new(TraceBuffer::new(config.coordinator.trace_buffer));
    let sinks = SinkSet::new()
        .with(Arc::new(TracingSink))
        .with(Arc::clone(&traces) as Arc<dyn TraceSink>);
    let hooks = HookRegistry::new().fallback(Arc::new(LoggingHook));

    let coordinator = Coordinator::new(
        graph,
        reactions,
        hooks,
        Arc::new(sinks),
        config.coordinator_config(),
    )?;
    Ok(Engine { coordinator, traces })
}

/// Write `value` to stdout in the requested format.
pub fn print_report<T: Serialize>(value: &T, format: OutputFormat) -> Result<(), CliError> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::JsonCompact => serde_json::to_string(value)?,
    };
    println!("{text}");
    Ok(())
}
