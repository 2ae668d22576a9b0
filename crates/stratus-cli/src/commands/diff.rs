//! Implementation of the `stratus diff` command.

use std::path::PathBuf;

use stratus_control::ReconciliationPlan;

use super::Context;

/// Arguments for the diff command.
pub struct DiffArgs {
    pub src: Option<PathBuf>,
    /// Compare the package digest with the deployed one.
    pub code_sha256: bool,
    pub function: Option<PathBuf>,
    pub function_url: Option<PathBuf>,
}

pub async fn run(context: &Context, args: DiffArgs) -> anyhow::Result<()> {
    let desired = context.load_desired(args.function, args.function_url).await?;
    let code = if args.code_sha256 {
        Some(context.code_source(args.src, None, false)?)
    } else {
        None
    };

    let report = context.deployer()?.diff(&desired, code.as_ref()).await?;

    print!("{}", report.function_diff);
    if let Some(code_diff) = &report.code_diff {
        print!("{code_diff}");
    }
    if let Some(url_diff) = &report.url_diff {
        print!("{url_diff}");
    }
    if let Some(plan) = &report.grant_plan {
        print_plan(plan);
    }
    if !report.has_changes() {
        println!("No changes");
    }

    match report.transition_error.or(report.code_error) {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// One line per grant change, `+` for additions and `-` for removals.
pub fn print_plan(plan: &ReconciliationPlan) {
    for grant in &plan.to_add {
        println!("+ grant {} to {}", grant.id(), grant.content().principal);
    }
    for grant in &plan.to_remove {
        println!("- grant {} from {}", grant.id(), grant.content().principal);
    }
}
