//! Drives the export: reads the journal, waits for changes to settle, merges
//! them and writes the result.
//!
//! [`ExportService`] runs single cycles and can be driven by hand.
//! [`ExportTask`] runs it on a background thread on a fixed schedule.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Instant,
};

use crossbeam_channel::{select, Receiver, Sender};
use jod_thread::JoinHandle;
use memofs::Vfs;

use crate::{
    category::CategoryClassifier,
    collector::ChangeCollector,
    config::ExportConfig,
    content::{ContentTree, EventJournal},
    cursor::RevisionCursor,
    error::{ErrorDisplay, ExportError},
    merge::{DefinitionMergeService, MergeResult},
    model::ConfigurationModel,
    writer::ModuleWriter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// Nothing is waiting to be exported.
    Idle,

    /// Changes were collected but have not settled yet.
    Accumulating,

    /// Changes have settled and the next cycle will export them.
    ReadyToProcess,

    Processing,

    /// A cycle failed unexpectedly. Nothing is exported until a restart.
    Failed,
}

/// The committed baseline. Readers clone the inner `Arc` and keep a valid
/// model for as long as they need it.
pub type SharedBaseline = Arc<RwLock<Arc<ConfigurationModel>>>;

pub struct ExportService {
    config: ExportConfig,
    tree: Arc<dyn ContentTree + Send + Sync>,
    journal: Arc<dyn EventJournal + Send + Sync>,
    classifier: Arc<dyn CategoryClassifier + Send + Sync>,

    baseline: SharedBaseline,
    writer: ModuleWriter,
    cursor: RevisionCursor,
    collector: ChangeCollector,

    /// Revision of the last event fed to the collector.
    read_revision: u64,

    /// Revision stored in the cursor.
    committed_revision: u64,

    status: Arc<Mutex<ExportStatus>>,
    interrupt: Arc<AtomicBool>,
}

impl ExportService {
    /// Creates a service exporting into module directories below
    /// `project_root`, classifying with the configured rules.
    pub fn new(
        config: ExportConfig,
        tree: Arc<dyn ContentTree + Send + Sync>,
        journal: Arc<dyn EventJournal + Send + Sync>,
        baseline: ConfigurationModel,
        project_root: &Path,
    ) -> Result<Self, ExportError> {
        let classifier = Arc::new(config.classifier.clone());
        Self::with_classifier(config, tree, journal, classifier, baseline, project_root)
    }

    pub fn with_classifier(
        config: ExportConfig,
        tree: Arc<dyn ContentTree + Send + Sync>,
        journal: Arc<dyn EventJournal + Send + Sync>,
        classifier: Arc<dyn CategoryClassifier + Send + Sync>,
        baseline: ConfigurationModel,
        project_root: &Path,
    ) -> Result<Self, ExportError> {
        config.validate(baseline.modules())?;

        let vfs = Vfs::new_default();
        vfs.set_watch_enabled(false);
        let vfs = Arc::new(vfs);

        let writer = ModuleWriter::new(Arc::clone(&vfs), project_root);
        let cursor = RevisionCursor::new(vfs, project_root);
        let revision = cursor.load()?;

        let collector = ChangeCollector::new(
            &config.exclude,
            config.ignore_user_data.clone(),
            Arc::clone(&classifier),
        )?;

        log::debug!("Starting export from revision {}", revision);

        Ok(Self {
            config,
            tree,
            journal,
            classifier,
            baseline: Arc::new(RwLock::new(Arc::new(baseline))),
            writer,
            cursor,
            collector,
            read_revision: revision,
            committed_revision: revision,
            status: Arc::new(Mutex::new(ExportStatus::Idle)),
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn status(&self) -> ExportStatus {
        *self.status.lock().unwrap()
    }

    /// The committed baseline as of now.
    pub fn baseline(&self) -> Arc<ConfigurationModel> {
        Arc::clone(&self.baseline.read().unwrap())
    }

    pub fn shared_baseline(&self) -> SharedBaseline {
        Arc::clone(&self.baseline)
    }

    pub fn committed_revision(&self) -> u64 {
        self.committed_revision
    }

    /// Setting the flag makes a running cycle give up at the next path.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Runs one scheduled cycle: exports only if the collected changes have
    /// been quiet for long enough.
    pub fn tick(&mut self, now: Instant) -> ExportStatus {
        self.run_cycle(now, false)
    }

    /// Exports whatever has been collected, settled or not.
    pub fn run_now(&mut self) -> ExportStatus {
        self.run_cycle(Instant::now(), true)
    }

    /// Clears a failure. Events after the committed revision are read again.
    pub fn restart(&mut self) {
        log::info!("Restarting export from revision {}", self.committed_revision);

        self.collector.take_batch();
        self.read_revision = self.committed_revision;
        self.interrupt.store(false, Ordering::SeqCst);
        self.set_status(ExportStatus::Idle);
    }

    fn set_status(&self, status: ExportStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn run_cycle(&mut self, now: Instant, force: bool) -> ExportStatus {
        if self.status() == ExportStatus::Failed {
            return ExportStatus::Failed;
        }

        let status = match self.cycle(now, force) {
            Ok(status) => status,
            Err(ExportError::Interrupted) => {
                log::info!("Export cycle was interrupted; pending changes are kept");
                self.pending_status()
            }
            Err(err) if err.is_transient() => {
                log::warn!("Export cycle abandoned, retrying later: {}", ErrorDisplay(err));
                self.pending_status()
            }
            Err(err) => {
                log::error!(
                    "Export failed and is suspended until restarted: {}",
                    ErrorDisplay(err)
                );
                ExportStatus::Failed
            }
        };

        self.set_status(status);
        status
    }

    fn pending_status(&self) -> ExportStatus {
        if self.collector.has_changes() {
            ExportStatus::Accumulating
        } else {
            ExportStatus::Idle
        }
    }

    fn cycle(&mut self, now: Instant, force: bool) -> Result<ExportStatus, ExportError> {
        self.drain_events(now)?;

        if !self.collector.has_changes() {
            self.collector.take_batch();

            // Everything read was skipped, so nothing needs exporting to move
            // past it.
            if self.read_revision > self.committed_revision {
                self.cursor.commit(self.read_revision)?;
                self.committed_revision = self.read_revision;
            }

            return Ok(ExportStatus::Idle);
        }

        if !force && !self.collector.is_ready(now, self.config.min_quiescence) {
            return Ok(ExportStatus::Accumulating);
        }

        self.set_status(ExportStatus::Processing);

        for attempt in 0..=self.config.max_retries {
            let Some(batch) = self.collector.batch().cloned() else {
                return Ok(ExportStatus::Idle);
            };
            let baseline = self.baseline();

            log::debug!(
                "Processing changes up to revision {}: config {:?}, content {:?}, namespaces {:?}",
                self.read_revision,
                batch.config,
                batch.content,
                batch.namespaces
            );

            let merged = {
                let service = DefinitionMergeService::new(
                    &*self.tree,
                    &*self.classifier,
                    &self.config.excluded,
                    &self.config.router,
                    self.config.location_mapper(),
                );
                service.merge(&baseline, &batch, &self.interrupt)?
            };

            if self.drain_events(Instant::now())? {
                log::debug!(
                    "Changes arrived while merging, retrying (attempt {} of {})",
                    attempt + 1,
                    self.config.max_retries
                );
                continue;
            }

            self.commit(&baseline, merged)?;
            return Ok(ExportStatus::Idle);
        }

        log::warn!(
            "The content kept changing during {} merge attempts; trying again on the next tick",
            self.config.max_retries + 1
        );

        Ok(ExportStatus::ReadyToProcess)
    }

    /// Feeds every new journal event to the collector. Returns whether there
    /// were any.
    fn drain_events(&mut self, now: Instant) -> Result<bool, ExportError> {
        let batch_size = self.config.event_batch_size;
        let baseline = self.baseline();
        let mut any = false;

        loop {
            let events = self.journal.read_events(self.read_revision, batch_size)?;

            for event in &events {
                self.collector.collect(event, &baseline, now);
                self.read_revision = event.revision;
            }

            any |= !events.is_empty();
            if events.len() < batch_size {
                return Ok(any);
            }
        }
    }

    fn commit(
        &mut self,
        baseline: &ConfigurationModel,
        merged: MergeResult,
    ) -> Result<(), ExportError> {
        let report = self.writer.write(baseline.modules(), &merged.modules)?;

        for file in &report.written {
            log::debug!("Wrote {}", file.display());
        }
        for file in &report.removed {
            log::debug!("Removed {}", file.display());
        }

        *self.baseline.write().unwrap() = Arc::new(merged.model);

        self.cursor.commit(self.read_revision)?;
        self.committed_revision = self.read_revision;
        self.collector.take_batch();

        log::info!(
            "Exported changes up to revision {}: {} source(s) changed, {} removed",
            self.committed_revision,
            merged.changed_sources.len(),
            merged.removed_sources.len()
        );

        Ok(())
    }
}

enum Control {
    Enable,
    Disable,
    RunNow,
    Restart,
    Stop,
}

/// Runs an [`ExportService`] on its own thread. Dropping the task stops the
/// thread after its current cycle.
pub struct ExportTask {
    control_sender: Sender<Control>,
    status: Arc<Mutex<ExportStatus>>,
    baseline: SharedBaseline,
    interrupt: Arc<AtomicBool>,
    _thread_handle: JoinHandle<()>,
}

impl ExportTask {
    pub fn start(service: ExportService, enabled: bool) -> Self {
        let (control_sender, control_receiver) = crossbeam_channel::unbounded();

        let status = Arc::clone(&service.status);
        let baseline = service.shared_baseline();
        let interrupt = service.interrupt_flag();

        let thread_handle = jod_thread::Builder::new()
            .name("ExportTask thread".to_owned())
            .spawn(move || {
                log::trace!("ExportTask thread started");
                Self::main_task(control_receiver, service, enabled);
                log::trace!("ExportTask thread stopped");
            })
            .expect("Could not start ExportTask thread");

        Self {
            control_sender,
            status,
            baseline,
            interrupt,
            _thread_handle: thread_handle,
        }
    }

    fn main_task(control_receiver: Receiver<Control>, mut service: ExportService, enabled: bool) {
        let ticker = crossbeam_channel::tick(service.config().tick_interval);
        let mut enabled = enabled;

        loop {
            select! {
                recv(ticker) -> _ => {
                    if enabled {
                        service.tick(Instant::now());
                    }
                },
                recv(control_receiver) -> message => {
                    match message {
                        Ok(Control::Enable) => {
                            log::debug!("Export enabled");
                            enabled = true;
                            service.run_now();
                        }
                        Ok(Control::Disable) => {
                            log::debug!("Export disabled");
                            if enabled {
                                service.run_now();
                            }
                            enabled = false;
                        }
                        Ok(Control::RunNow) => {
                            service.run_now();
                        }
                        Ok(Control::Restart) => service.restart(),
                        Ok(Control::Stop) | Err(_) => {
                            log::trace!("ExportTask stop signal received...");
                            break;
                        }
                    }
                },
            }
        }
    }

    pub fn status(&self) -> ExportStatus {
        *self.status.lock().unwrap()
    }

    pub fn baseline(&self) -> Arc<ConfigurationModel> {
        Arc::clone(&self.baseline.read().unwrap())
    }

    /// Resumes the schedule after exporting everything collected so far.
    pub fn enable(&self) {
        let _ = self.control_sender.send(Control::Enable);
    }

    /// Exports everything collected so far, then pauses the schedule.
    pub fn disable(&self) {
        let _ = self.control_sender.send(Control::Disable);
    }

    pub fn run_now(&self) {
        let _ = self.control_sender.send(Control::RunNow);
    }

    pub fn restart(&self) {
        let _ = self.control_sender.send(Control::Restart);
    }

    /// Lets the current cycle finish, then stops the thread.
    pub fn stop(self) {
        drop(self);
    }

    /// Interrupts the current cycle, then stops the thread. Pending changes
    /// are not exported.
    pub fn shutdown(self) {
        self.interrupt.store(true, Ordering::SeqCst);
        drop(self);
    }
}

impl Drop for ExportTask {
    fn drop(&mut self) {
        let _ = self.control_sender.send(Control::Stop);
    }
}
