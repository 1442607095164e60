//! Subcommand implementations and the plumbing they share.

pub mod correlate;
pub mod export;
pub mod history;
pub mod load;
pub mod methods;
pub mod report;
pub mod suggest;
pub mod summary;
pub mod top;
pub mod tree;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use jitlog_engine::{
    parse_source, EngineConfig, FileSource, FollowSource, FrozenIndex, LogSource, MethodIdentity,
    QueryFacade, SessionReport,
};

use crate::output::{color_choice, Terminal};

/// Flags accepted by every subcommand.
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub color: String,
    pub follow: bool,
}

impl GlobalArgs {
    pub fn output(&self) -> Terminal {
        Terminal::new(color_choice(&self.color))
    }

    /// `--config`, else `jitlog.toml` in the working directory, else defaults.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        let config = EngineConfig::load(self.config.as_deref(), &cwd).with_context(|| match self.config {
            Some(ref path) => format!("Failed to load config {}", path.display()),
            None => "Failed to load jitlog.toml".to_string(),
        })?;
        Ok(config)
    }

    /// Parse `log` into a frozen index, reporting truncation on stderr.
    pub fn parse(&self, log: &Path, out: &mut Terminal) -> anyhow::Result<(FrozenIndex, SessionReport)> {
        let config = self.engine_config()?;
        let source: Box<dyn LogSource> = if self.follow {
            Box::new(
                FollowSource::new(log, config.poll_interval()).with_idle_timeout(config.idle_timeout()),
            )
        } else {
            Box::new(FileSource::new(log))
        };
        let (index, report) = parse_source(source.as_ref(), config)
            .with_context(|| format!("Failed to parse {}", log.display()))?;
        tracing::debug!(
            methods = index.method_count(),
            tasks = index.task_count(),
            "parsed {}",
            log.display()
        );

        for pass in &report.passes {
            if let Some(ref truncation) = pass.truncation {
                out.warn(&format!("{} ended early: {:?}", pass.source, truncation));
            }
        }
        Ok((index, report))
    }

    pub fn facade(&self, log: &Path, out: &mut Terminal) -> anyhow::Result<QueryFacade> {
        let (index, _) = self.parse(log, out)?;
        Ok(QueryFacade::new(std::sync::Arc::new(index)))
    }
}

/// Resolve a method argument: a full `class method descriptor` signature, or
/// text matching exactly one compiled method.
pub fn resolve_method(facade: &QueryFacade, query: &str) -> anyhow::Result<MethodIdentity> {
    if let Some(method) = MethodIdentity::parse_log_signature(query) {
        if facade.history_of(&method).is_some() {
            return Ok(method);
        }
    }
    let matches = facade.find_methods(query);
    match matches.as_slice() {
        [] => bail!("No compiled method matches '{}'", query),
        [only] => Ok((*only).clone()),
        many => {
            let listed: Vec<String> = many.iter().take(10).map(|m| format!("  {}", m)).collect();
            bail!(
                "'{}' matches {} methods:\n{}",
                query,
                many.len(),
                listed.join("\n")
            )
        }
    }
}
