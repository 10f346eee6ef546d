use std::sync::Arc;

use serde::Serialize;

use shadowgraph_config::Config;
use shadowgraph_core::{CompiledRule, MemoryStore, ResourceType, StoreGateway};

use super::print_report;
use crate::cli::GlobalOpts;
use crate::error::CliError;

#[derive(Serialize)]
struct ReactionReport<'a> {
    types: Vec<&'a str>,
    rules: Vec<&'a CompiledRule>,
}

/// Validate `[[resources]]` and `[[reactions]]` and print the compiled map.
///
/// No store is contacted; the registry is built over an empty gateway.
pub fn handle(config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let store: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
    let registry = config.build_registry(&store)?;
    let reactions = config.build_reactions(&registry)?;

    let report = ReactionReport {
        types: registry.kinds().map(ResourceType::as_str).collect(),
        rules: reactions.rules().collect(),
    };
    print_report(&report, global.output)
}
