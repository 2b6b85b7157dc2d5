//! Executing a migration run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

use crate::database::schema::{CREATE_APPLIED_MIGRATIONS_TABLE, INSERT_APPLIED_MIGRATION};
use crate::database::ConnectionPool;
use crate::error::{Error, Result};

use super::ordering::MigrationEntry;
use super::progress::{ProgressCallback, ProgressEstimator, ProgressReporter};
use super::requirement::MigrationRequirement;

/// Processes a requirement inside the given write transaction.
pub type RequirementProcessor =
    Arc<dyn Fn(&Connection, MigrationRequirement) -> Result<()> + Send + Sync>;

/// Callbacks for one migration run. Dropped when the run ends.
#[derive(Clone, Default)]
pub struct MigrationHooks {
    on_progress: Option<ProgressCallback>,
    on_requirement: Option<RequirementProcessor>,
}

impl MigrationHooks {
    /// Hooks that do nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives `(overall progress, expected time remaining)`.
    #[must_use]
    pub fn with_progress(mut self, f: impl Fn(f64, Duration) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Processes requirements.
    #[must_use]
    pub fn with_requirement_processor(
        mut self,
        f: impl Fn(&Connection, MigrationRequirement) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_requirement = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for MigrationHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationHooks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_requirement", &self.on_requirement.is_some())
            .finish()
    }
}

/// Outcome of a migration run.
#[derive(Debug)]
pub struct MigrationReport {
    /// `Ok` if every pending migration ran.
    pub result: Result<()>,
    /// Whether any executed migration asked for a configuration sync.
    pub needs_config_sync: bool,
    /// Keys executed and committed during this run, in order.
    pub performed: Vec<String>,
}

impl MigrationReport {
    /// A successful run that had nothing to do.
    #[must_use]
    pub fn nothing_to_do() -> Self {
        Self {
            result: Ok(()),
            needs_config_sync: false,
            performed: Vec::new(),
        }
    }

    /// A run that could not start.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self {
            result: Err(error),
            needs_config_sync: false,
            performed: Vec::new(),
        }
    }

    /// Whether the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Handed to a migration body.
pub struct MigrationContext<'a> {
    key: &'a str,
    reporter: &'a ProgressReporter,
}

impl MigrationContext<'_> {
    /// The running migration's key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key
    }

    /// Reports intra-migration progress (`0.0..=1.0`).
    pub fn report_progress(&self, fraction: f64) {
        self.reporter.report(self.key, fraction);
    }
}

/// State of one run. Holds the hooks and the still-pending requirements;
/// both go away with the run.
pub(crate) struct MigrationRun {
    entries: Vec<MigrationEntry>,
    pending_requirements: BTreeSet<MigrationRequirement>,
    on_requirement: Option<RequirementProcessor>,
    reporter: Arc<ProgressReporter>,
}

impl MigrationRun {
    pub(crate) fn new(entries: Vec<MigrationEntry>, hooks: MigrationHooks) -> Self {
        let estimator = ProgressEstimator::new(&entries);
        Self {
            entries,
            pending_requirements: MigrationRequirement::ALL.into_iter().collect(),
            on_requirement: hooks.on_requirement,
            reporter: Arc::new(ProgressReporter::new(estimator, hooks.on_progress)),
        }
    }

    pub(crate) fn reporter(&self) -> Arc<ProgressReporter> {
        Arc::clone(&self.reporter)
    }

    /// Runs every entry in order. `gate` is checked inside each write
    /// transaction before any work; `is_suspended` classifies failures.
    pub(crate) fn execute(
        mut self,
        pool: &ConnectionPool,
        gate: &dyn Fn() -> Result<()>,
        is_suspended: &dyn Fn() -> bool,
    ) -> MigrationReport {
        let mut performed = Vec::new();
        let mut needs_config_sync = false;
        let mut result = Ok(());

        if let Some(first) = self.entries.first() {
            self.reporter.report(&first.key, 0.0);
        }

        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            let due: Vec<MigrationRequirement> = entry
                .migration
                .requirements()
                .iter()
                .copied()
                .filter(|r| self.pending_requirements.remove(r))
                .collect();

            log::info!("Running migration {}", entry.key);
            let outcome = pool.write(|conn| {
                gate()?;
                for requirement in &due {
                    self.process_requirement(conn, *requirement)?;
                }
                let context = MigrationContext {
                    key: &entry.key,
                    reporter: &self.reporter,
                };
                entry.migration.migrate(conn, &context)?;
                record_applied(conn, &entry.key)
            });

            match outcome {
                Ok(()) => {
                    self.reporter.report(&entry.key, 1.0);
                    needs_config_sync |= entry.migration.needs_config_sync();
                    performed.push(entry.key.clone());
                }
                Err(e) => {
                    log_failure(&entry.key, &e, is_suspended());
                    result = Err(e);
                    break;
                }
            }
        }

        self.finish(pool, gate, is_suspended);

        MigrationReport {
            result,
            needs_config_sync,
            performed,
        }
    }

    fn finish(
        &mut self,
        pool: &ConnectionPool,
        gate: &dyn Fn() -> Result<()>,
        is_suspended: &dyn Fn() -> bool,
    ) {
        let remaining: Vec<MigrationRequirement> = std::mem::take(&mut self.pending_requirements)
            .into_iter()
            .filter(|r| r.process_at_completion_if_not_required())
            .collect();
        if remaining.is_empty() || self.on_requirement.is_none() {
            return;
        }

        let outcome = pool.write(|conn| {
            gate()?;
            for requirement in &remaining {
                self.process_requirement(conn, *requirement)?;
            }
            Ok(())
        });
        if let Err(e) = outcome {
            log_failure("completion requirements", &e, is_suspended());
        }
    }

    fn process_requirement(&self, conn: &Connection, requirement: MigrationRequirement) -> Result<()> {
        log::debug!("Processing migration requirement {requirement}");
        match &self.on_requirement {
            Some(processor) => processor(conn, requirement),
            None => Ok(()),
        }
    }
}

fn record_applied(conn: &Connection, key: &str) -> Result<()> {
    let applied_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    conn.execute_batch(CREATE_APPLIED_MIGRATIONS_TABLE)?;
    conn.execute(INSERT_APPLIED_MIGRATION, params![key, applied_at])?;
    Ok(())
}

/// Interrupts come from suspension and are expected. Aborts are only
/// expected while suspended.
fn log_failure(what: &str, error: &Error, suspended: bool) {
    match error {
        Error::Interrupted | Error::DatabaseSuspended => {
            log::info!("Migration {what} stopped: {error}");
        }
        Error::Aborted if suspended => log::info!("Migration {what} stopped: {error}"),
        _ => log::error!("Migration {what} failed: {error}"),
    }
}
