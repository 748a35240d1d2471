//! Backup session executor - drives one backup from plan to report.
//!
//! Pipeline:
//! - Resolve the plan into a catalog of existing sources
//! - Lock the destination and materialize the session tree
//! - Copy every resolved folder (bounded worker pool)
//! - Hash the destination tree into the inventory manifest
//! - Encrypt sensitive folders when a password was supplied
//!
//! Per-file problems never stop the pipeline. Structural problems move the
//! session to [`Phase::Failed`], after which whatever was accumulated is
//! still written out.

pub mod copy;
pub mod encrypt;
pub mod inventory;
pub mod manifest;
pub mod report;

use crate::catalog::{self, BackupPlan, Catalog, SkipReason};
use crate::events::{EventBus, SessionEvent};
use crate::fs::layout::{new_session_id, LayoutBuilder, SessionLock};
use crate::progress::{format_bytes, ProgressSink, DEFAULT_PROGRESS_INTERVAL};
use crate::utils::{EngineError, Result};
use copy::CopyEngine;
use encrypt::{KeyDerivation, SensitiveEncryptor, DEFAULT_ENCRYPTED_SUFFIX};
use inventory::InventoryBuilder;
use report::{ExitStatus, FolderOutcome, FolderReport, InventorySummary, RunReport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default product directory under the destination root
pub const DEFAULT_PRODUCT_NAME: &str = "PC_Backup";

/// Default size of the copy and hashing pools
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Lifecycle of a backup session.
///
/// `Init -> StructureReady -> Copying -> InventoryBuilt -> [Encrypting] -> Complete`,
/// with `Failed` reachable from every non-terminal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    Init,
    StructureReady,
    Copying,
    InventoryBuilt,
    Encrypting,
    Complete,
    Failed(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed(_))
    }

    /// Whether `next` directly follows `self`.
    pub fn can_advance_to(&self, next: &Phase) -> bool {
        use Phase::*;

        match (self, next) {
            (Complete | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Init, StructureReady)
            | (StructureReady, Copying)
            | (Copying, InventoryBuilt)
            | (InventoryBuilt, Encrypting)
            | (InventoryBuilt, Complete)
            | (Encrypting, Complete) => true,
            _ => false,
        }
    }
}

/// Tunables of a session, independent of where they were configured.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub product_name: String,
    pub max_workers: usize,
    pub progress_interval: usize,
    pub encrypted_suffix: String,
    pub key_derivation: KeyDerivation,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            product_name: DEFAULT_PRODUCT_NAME.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            encrypted_suffix: DEFAULT_ENCRYPTED_SUFFIX.to_string(),
            key_derivation: KeyDerivation::default(),
        }
    }
}

/// One backup invocation.
pub struct BackupSession {
    session_id: String,
    settings: SessionSettings,
    cancel_token: CancellationToken,
    events: EventBus,
}

impl BackupSession {
    /// Create a session with a fresh timestamp-derived identifier.
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            session_id: new_session_id(),
            settings,
            cancel_token: CancellationToken::new(),
            events: EventBus::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Share cancellation with an outer token (e.g. the signal handler).
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run the whole pipeline once.
    ///
    /// Never returns an error: the outcome, fatal or not, is described by
    /// the returned report.
    pub async fn run(self, plan: &BackupPlan) -> RunReport {
        let start_time = Instant::now();
        let mut report = RunReport::new(&self.session_id);

        info!(
            "Starting backup session {} ({} folders planned, destination {})",
            self.session_id,
            plan.folders().len(),
            plan.destination_root().display()
        );

        let catalog = catalog::resolve(plan);
        for skipped in &catalog.skipped {
            self.events.emit(SessionEvent::FolderSkipped {
                folder: skipped.spec.logical_name.clone(),
                reason: skipped.reason.to_string(),
            });
            report.folders.push(FolderReport {
                name: skipped.spec.logical_name.clone(),
                source_path: skipped.spec.source_path.clone(),
                sensitivity: skipped.spec.sensitivity,
                outcome: FolderOutcome::Skipped {
                    reason: skipped.reason.clone(),
                },
            });
        }

        if catalog.is_empty() {
            self.conclude(&mut report, Err(EngineError::EmptyCatalog));
            return report;
        }

        let layout = LayoutBuilder::new(plan.destination_root(), &self.settings.product_name);
        match SessionLock::acquire(layout.product_root(), &self.session_id) {
            Ok(_lock) => {
                let result = self.execute(plan, &catalog, &layout, &mut report).await;
                self.conclude(&mut report, result);
            }
            Err(e) => self.conclude(&mut report, Err(e)),
        }

        info!(
            "Session {} finished in {:.1}s: {:?}",
            self.session_id,
            start_time.elapsed().as_secs_f64(),
            report.exit_status.unwrap_or(ExitStatus::Failed)
        );

        report
    }

    async fn execute(
        &self,
        plan: &BackupPlan,
        catalog: &Catalog,
        layout: &LayoutBuilder,
        report: &mut RunReport,
    ) -> Result<()> {
        let names: Vec<String> = catalog
            .resolved
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        let session_path = match layout.materialize(&self.session_id, &names) {
            Ok(path) => path,
            Err(e) => {
                // A half-built session root still gets its report
                let partial = layout.session_path(&self.session_id);
                if !matches!(e, EngineError::SessionExists(_)) && partial.is_dir() {
                    report.session_path = Some(partial);
                }
                return Err(e);
            }
        };
        report.session_path = Some(session_path.clone());
        self.advance(report, Phase::StructureReady);

        self.advance(report, Phase::Copying);
        self.copy_all(catalog, &session_path, report).await?;

        if self.cancel_token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let inventory = InventoryBuilder::new(self.settings.max_workers)
            .build(&session_path, &self.session_id)
            .await?;
        let manifest_path = inventory.write_to(&session_path)?;
        info!("Inventory written to {}", manifest_path.display());
        report.inventory = Some(InventorySummary {
            manifest_path,
            total_files: inventory.total_files,
            total_size_bytes: inventory.total_size_bytes,
            unreadable: inventory.unreadable.len(),
        });
        self.advance(report, Phase::InventoryBuilt);

        if self.cancel_token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if plan.password().is_some() {
            self.advance(report, Phase::Encrypting);
        }
        let encryptor =
            SensitiveEncryptor::new(&self.settings.encrypted_suffix, self.settings.key_derivation);
        let encryption = encryptor
            .encrypt(&session_path, &catalog.sensitive_names(), plan.password())
            .await;
        if encryption.is_degraded() {
            warn!("Encryption incomplete: {:?}", encryption);
        }
        report.encryption = Some(encryption);

        self.advance(report, Phase::Complete);
        Ok(())
    }

    async fn copy_all(
        &self,
        catalog: &Catalog,
        session_path: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let engine = CopyEngine::new(self.settings.max_workers, self.cancel_token.clone())
            .with_progress_interval(self.settings.progress_interval);

        for folder in &catalog.resolved {
            let outcome = if self.cancel_token.is_cancelled() {
                warn!("Skipping {}: session cancelled", folder.name());
                FolderOutcome::Skipped {
                    reason: SkipReason::Cancelled,
                }
            } else {
                self.events.emit(SessionEvent::FolderStarted {
                    folder: folder.name().to_string(),
                });

                let events = self.events.clone();
                let sink: ProgressSink =
                    Arc::new(move |progress| events.emit(SessionEvent::Progress(progress)));

                let result = engine
                    .copy_folder(folder, &session_path.join(folder.name()), Some(sink))
                    .await?;

                self.events.emit(SessionEvent::FolderFinished {
                    folder: folder.name().to_string(),
                    copied: result.copied,
                    skipped: result.skipped,
                    failed: result.failed,
                    bytes_copied: result.bytes_copied,
                });
                FolderOutcome::Copied(result)
            };

            report.folders.push(FolderReport {
                name: folder.name().to_string(),
                source_path: folder.spec.source_path.clone(),
                sensitivity: folder.spec.sensitivity,
                outcome,
            });
        }

        info!(
            "Copy finished: {} files, {}",
            report.files_copied(),
            format_bytes(report.bytes_copied())
        );

        Ok(())
    }

    fn advance(&self, report: &mut RunReport, next: Phase) {
        debug_assert!(
            report.phase.can_advance_to(&next),
            "illegal phase transition {:?} -> {:?}",
            report.phase,
            next
        );

        info!("Session {}: {:?} -> {:?}", self.session_id, report.phase, next);
        report.phase = next.clone();
        self.events.emit(SessionEvent::PhaseChanged {
            session_id: self.session_id.clone(),
            phase: next,
        });
    }

    /// Settle the final phase, then flush the report into the session tree
    /// if one was created.
    fn conclude(&self, report: &mut RunReport, result: Result<()>) {
        if let Err(e) = result {
            error!("Backup session {} failed: {}", self.session_id, e);
            self.advance(report, Phase::Failed(e.to_string()));
        }

        report.finalize();

        if let Some(session_path) = &report.session_path {
            match report.write_to(session_path) {
                Ok(path) => info!("Run report written to {}", path.display()),
                Err(e) => warn!("Could not write run report: {}", e),
            }
        }

        let event = match &report.phase {
            Phase::Failed(reason) => SessionEvent::SessionFailed {
                session_id: self.session_id.clone(),
                error: reason.clone(),
            },
            _ => SessionEvent::SessionCompleted {
                session_id: self.session_id.clone(),
                exit_status: report.exit_status.unwrap_or(ExitStatus::Failed),
                files_copied: report.files_copied(),
                bytes_copied: report.bytes_copied(),
            },
        };
        self.events.emit(event);
    }
}
