//! Implementation of the `stratus deploy` command.

use std::path::PathBuf;

use stratus_control::{Change, ConvergeOptions, ConvergeReport, PackageType};

use super::diff::print_plan;
use super::Context;

/// Arguments for the deploy command.
pub struct DeployArgs {
    pub src: Option<PathBuf>,
    pub function: Option<PathBuf>,
    pub function_url: Option<PathBuf>,
    /// Report changes without applying them.
    pub dry_run: bool,
    pub skip_code: bool,
    pub symlink: bool,
}

pub async fn run(context: &Context, args: DeployArgs) -> anyhow::Result<()> {
    let desired = context.load_desired(args.function, args.function_url).await?;

    let needs_source = !args.skip_code
        && desired.function.effective_package_type() == PackageType::Zip;
    let source = if needs_source {
        Some(context.code_source(args.src, None, args.symlink)?)
    } else {
        None
    };

    let options = ConvergeOptions {
        source,
        skip_code: args.skip_code,
        dry_run: args.dry_run,
    };
    let report = context.deployer()?.converge(&desired, &options).await?;
    print_report(&report);

    if report.interrupted() {
        anyhow::bail!("deployment of {} was interrupted", report.function_name);
    }
    Ok(())
}

fn print_report(report: &ConvergeReport) {
    if report.dry_run {
        print!("{}", report.diff);
    }

    let suffix = if report.dry_run { " (dry run)" } else { "" };
    println!("{}{suffix}", report.function_name);
    if let Some(arn) = &report.function_arn {
        println!("  arn:           {arn}");
    }
    println!("  configuration: {}", describe(report.configuration));
    println!("  tags:          {}", describe(report.tags));
    println!("  code:          {}", describe(report.code));

    if let Some(url) = &report.url {
        println!("  function URL:  {}", describe(url.config));
        if let Some(function_url) = &url.function_url {
            println!("  url:           {function_url}");
        }
        if report.dry_run {
            print_plan(&url.plan);
        } else {
            println!(
                "  grants:        {} added, {} removed",
                url.grants.added.len(),
                url.grants.removed.len()
            );
        }
    }
}

fn describe(change: Change) -> &'static str {
    match change {
        Change::Unchanged => "unchanged",
        Change::Created => "created",
        Change::Updated => "updated",
        Change::Planned => "would change",
        Change::Skipped => "skipped",
    }
}
