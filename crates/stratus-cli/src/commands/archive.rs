//! Implementation of the `stratus archive` command.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tracing::info;

use super::Context;

/// Arguments for the archive command.
pub struct ArchiveArgs {
    pub src: Option<PathBuf>,
    /// Output file, `-` for stdout.
    pub dest: PathBuf,
    pub exclude_file: Option<PathBuf>,
    pub symlink: bool,
}

pub async fn run(context: &Context, args: ArchiveArgs) -> anyhow::Result<()> {
    let source = context.code_source(args.src, args.exclude_file, args.symlink)?;
    let dest = args.dest;

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut package = source.prepare()?;
        let written = if dest == Path::new("-") {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let written = package.write_to(&mut out)?;
            out.flush()?;
            written
        } else {
            let mut file = File::create(&dest)
                .with_context(|| format!("creating {}", dest.display()))?;
            let written = package.write_to(&mut file)?;
            file.sync_all()?;
            written
        };
        info!(
            dest = %dest.display(),
            bytes = written,
            entries = package.entries().len(),
            "wrote archive"
        );
        Ok(())
    })
    .await?
}
