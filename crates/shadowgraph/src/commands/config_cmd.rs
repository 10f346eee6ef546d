use shadowgraph_config::Config;

use crate::error::CliError;

/// Print the merged configuration (defaults, file, environment) with the
/// plaintext token masked.
pub fn handle(config: &Config) -> Result<(), CliError> {
    let mut shown = config.clone();
    if shown.store.token.is_some() {
        shown.store.token = Some("********".into());
    }
    print!("{}", shown.to_toml()?);
    Ok(())
}
