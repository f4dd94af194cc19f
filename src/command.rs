//! Runs the parsed command against the declared stack.

use std::io::Write;

use crate::config::{Command, Config};
use crate::error::{AppError, Result};
use crate::output;
use crate::stack::{AppsyncNeptuneStack, StackSettings};

/// Declares the stack and runs `config`'s command. Listings go to `out`.
pub async fn run(config: &Config, out: &mut impl Write) -> Result<()> {
    let app = AppsyncNeptuneStack::new(&StackSettings::from(config))?;

    match config.command() {
        Command::Synth => {
            let files = app.assembly()?;
            let paths = output::write_assembly(&config.output_dir, files).await?;
            tracing::info!(
                dir = %config.output_dir.display(),
                files = paths.len(),
                "Cloud assembly written",
            );
        }
        Command::Order => write_order(&app, out)?,
    }
    Ok(())
}

/// One `logical-id<TAB>resource-type` line per resource, in deployment order.
pub fn write_order(app: &AppsyncNeptuneStack, out: &mut impl Write) -> Result<()> {
    let stack = app.stack();
    for id in app.deployment_order()? {
        let resource_type = stack.resource(&id).map_or("", |r| r.resource_type());
        writeln!(out, "{id}\t{resource_type}").map_err(AppError::Output)?;
    }
    out.flush().map_err(AppError::Output)
}
