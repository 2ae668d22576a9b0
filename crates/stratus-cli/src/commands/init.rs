//! Implementation of the `stratus init` command.

use std::path::PathBuf;

use stratus_control::definition::{write_definition, FUNCTION_FILES, FUNCTION_URL_FILES};

use super::Context;

/// Arguments for the init command.
pub struct InitArgs {
    pub function_name: String,
    pub qualifier: Option<String>,
    /// Overwrite existing definition files.
    pub force: bool,
}

pub async fn run(context: &Context, args: InitArgs) -> anyhow::Result<()> {
    let qualifier = args
        .qualifier
        .or_else(|| context.config.function.qualifier.clone());
    let exported = context
        .deployer()?
        .export(&args.function_name, qualifier.as_deref())
        .await?;

    let function_path = context
        .config
        .function
        .definition
        .clone()
        .unwrap_or_else(|| PathBuf::from(FUNCTION_FILES[0]));
    write_definition(&function_path, &exported.function, args.force)?;
    println!("Wrote {}", function_path.display());

    if let Some(function_url) = &exported.function_url {
        let url_path = context
            .config
            .function
            .url_definition
            .clone()
            .unwrap_or_else(|| PathBuf::from(FUNCTION_URL_FILES[0]));
        write_definition(&url_path, function_url, args.force)?;
        println!("Wrote {}", url_path.display());
    }
    Ok(())
}
