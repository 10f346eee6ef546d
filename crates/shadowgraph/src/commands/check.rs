use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use shadowgraph_api::RawChangeEvent;
use shadowgraph_config::Config;
use shadowgraph_core::{
    ChangeEvent, CoordinatorState, GraphStats, MemoryStore, StoreGateway, SymmetryViolation,
    SyncReport, TraceRecord,
};

use super::{build_engine, print_report};
use crate::cli::{CheckArgs, GlobalOpts};
use crate::error::CliError;

#[derive(Serialize)]
struct CheckReport {
    state: CoordinatorState,
    sync: SyncReport,
    graph: GraphStats,
    violations: Vec<SymmetryViolation>,
    events: Vec<TraceRecord>,
}

/// Resync from a JSON snapshot, optionally replay events, and report the
/// resulting graph. Fails when any reference edge lacks its mirror.
pub async fn handle(config: &Config, args: &CheckArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let seed: Value = serde_json::from_str(&std::fs::read_to_string(&args.seed)?)?;
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::from_seed(&seed)?);
    let engine = build_engine(config, &store)?;
    let coordinator = &engine.coordinator;

    let sync = coordinator.initial_sync().await?;

    let mut events = Vec::new();
    if let Some(ref path) = args.events {
        let raw: Vec<RawChangeEvent> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        for raw in raw {
            match ChangeEvent::try_from(raw) {
                Ok(event) => events.push(coordinator.process(event).await?),
                Err(e) => warn!(error = %e, "skipping malformed event"),
            }
        }
    }

    let graph = coordinator.graph();
    let report = CheckReport {
        state: coordinator.state(),
        sync,
        graph: graph.stats(),
        violations: graph.check_symmetry(),
        events,
    };
    print_report(&report, global.output)?;

    if report.violations.is_empty() {
        Ok(())
    } else {
        Err(CliError::Engine {
            message: format!("{} asymmetric reference edges", report.violations.len()),
        })
    }
}
