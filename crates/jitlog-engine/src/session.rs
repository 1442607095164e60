//! Parse sessions.
//!
//! A [`Session`] owns one [`HistoryIndex`] and runs reader, decoder and
//! builder as one sequential pass per log source. Several sources merge into
//! the same index one pass at a time. [`Session::finish`] ends the writing
//! phase; [`SharedIndex`] publishes the frozen result to concurrent readers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::builder::{BuilderStats, TaskBuilder};
use crate::config::{ConfigError, EngineConfig};
use crate::decoder::decode;
use crate::history::{FrozenIndex, HistoryIndex};
use crate::query::QueryFacade;
use crate::reader::{CancelToken, EventReader, LogSource, SourceError, Truncation};
use crate::schema::SchemaTable;

/// Outcome of one pass over one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub source: String,
    pub fragments: u64,
    pub truncation: Option<Truncation>,
    pub cancelled: bool,
    pub builder: BuilderStats,
}

impl PassReport {
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub passes: Vec<PassReport>,
}

impl SessionReport {
    pub fn truncated(&self) -> bool {
        self.passes.iter().any(PassReport::is_truncated)
    }

    pub fn cancelled(&self) -> bool {
        self.passes.iter().any(|p| p.cancelled)
    }

    /// Builder counters summed over all passes.
    pub fn builder_totals(&self) -> BuilderStats {
        self.passes.iter().fold(BuilderStats::default(), |mut acc, p| {
            let b = &p.builder;
            acc.tasks_closed += b.tasks_closed;
            acc.tasks_abandoned += b.tasks_abandoned;
            acc.implicit_tasks += b.implicit_tasks;
            acc.duplicate_starts += b.duplicate_starts;
            acc.stray_events += b.stray_events;
            acc.opaque_events += b.opaque_events;
            acc.unparsed_attributes += b.unparsed_attributes;
            acc.orphan_assemblies += b.orphan_assemblies;
            acc
        })
    }
}

pub struct Session {
    config: EngineConfig,
    schema: SchemaTable,
    index: HistoryIndex,
    report: SessionReport,
}

impl Session {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let schema = config.schema_table()?;
        let index = HistoryIndex::new(config.deopt_buffer_capacity);
        Ok(Session {
            config,
            schema,
            index,
            report: SessionReport::default(),
        })
    }

    /// Continue writing into a previously frozen index.
    pub fn resume(config: EngineConfig, frozen: FrozenIndex) -> Result<Self, ConfigError> {
        let mut session = Session::new(config)?;
        session.index = frozen.thaw(session.config.deopt_buffer_capacity);
        Ok(session)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The index as built so far. Only valid to read between passes.
    pub fn index(&self) -> &HistoryIndex {
        &self.index
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn parse(&mut self, source: &dyn LogSource) -> Result<&PassReport, SourceError> {
        self.run(source, None)
    }

    /// Like [`Session::parse`], stopping between fragments once `cancel` fires.
    ///
    /// Tasks still open at that point are handed to the index as abandoned.
    pub fn parse_with_cancel(
        &mut self,
        source: &dyn LogSource,
        cancel: &CancelToken,
    ) -> Result<&PassReport, SourceError> {
        self.run(source, Some(cancel.clone()))
    }

    fn run(
        &mut self,
        source: &dyn LogSource,
        cancel: Option<CancelToken>,
    ) -> Result<&PassReport, SourceError> {
        let name = source.name();
        let mut reader = EventReader::open(source)?;
        if let Some(cancel) = cancel {
            reader = reader.with_cancel(cancel);
        }
        let ordinal = self.index.begin_pass();
        tracing::debug!(source = %name, pass = ordinal, "pass started");

        let mut builder = TaskBuilder::new(self.config.builder_options());
        let mut out = Vec::new();
        for raw in reader.by_ref() {
            builder.accept(decode(&raw, &self.schema), &mut out);
            for item in out.drain(..) {
                self.index.record(item);
            }
        }
        builder.finish(&mut out);
        for item in out.drain(..) {
            self.index.record(item);
        }
        self.index.record_header(builder.header().clone());

        let pass = PassReport {
            source: name,
            fragments: reader.fragments_read(),
            truncation: reader.truncation().cloned(),
            cancelled: reader.was_cancelled(),
            builder: builder.stats(),
        };
        if let Some(ref truncation) = pass.truncation {
            tracing::warn!(source = %pass.source, ?truncation, "log source ended early");
        }
        tracing::info!(
            source = %pass.source,
            fragments = pass.fragments,
            closed = pass.builder.tasks_closed,
            abandoned = pass.builder.tasks_abandoned,
            cancelled = pass.cancelled,
            "pass finished"
        );
        let at = self.report.passes.len();
        self.report.passes.push(pass);
        Ok(&self.report.passes[at])
    }

    /// End the writing phase.
    pub fn finish(self) -> (FrozenIndex, SessionReport) {
        (self.index.freeze(), self.report)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Parse one source with `config` and freeze the result.
pub fn parse_source(
    source: &dyn LogSource,
    config: EngineConfig,
) -> Result<(FrozenIndex, SessionReport), SessionError> {
    let mut session = Session::new(config)?;
    session.parse(source)?;
    Ok(session.finish())
}

/// Host-side slot holding the latest frozen index.
///
/// Readers take an `Arc` snapshot and query it without holding the lock; a
/// new pass publishes a replacement.
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Option<Arc<FrozenIndex>>>,
}

impl SharedIndex {
    pub fn new(index: FrozenIndex) -> Self {
        SharedIndex {
            current: RwLock::new(Some(Arc::new(index))),
        }
    }

    pub fn publish(&self, index: FrozenIndex) {
        *self.current.write() = Some(Arc::new(index));
    }

    pub fn snapshot(&self) -> Option<Arc<FrozenIndex>> {
        self.current.read().clone()
    }

    pub fn facade(&self) -> Option<QueryFacade> {
        self.snapshot().map(QueryFacade::new)
    }
}
