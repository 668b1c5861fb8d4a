//! # Action Queue
//!
//! Every edit of a document goes through its [`ActionAccumulator`]. Callers submit actions from
//! any thread; they are queued and later drained by [`ActionAccumulator::process`] in batches.
//!
//! A batch is every consecutive action submission at the head of the queue, or a single undo or
//! redo. Each batch runs under the document's write lock, so readers never observe a
//! half-applied batch. Once the lock is released, observers hear about the whole batch at once
//! and the tiles it touched are rendered a single time.
//!
//! Batches of one document never overlap. Submissions made while a batch is executing (e.g. by
//! an observer) wait in the queue and are picked up by the running `process` call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::actions::{Action, ActionSource};
use crate::changes::{self, ChangeError, ChangeInfo, TrackedChange, ValidationError};
use crate::document::{Document, DocumentID};
use crate::graph::NodeRegistry;
use crate::render::{RenderError, RenderedRegion, Renderer};
use crate::settings::EngineSettings;
use crate::tile::TileCoord;

mod history;

use history::{History, UndoStep};

/// Receives notifications after every batch.
pub trait DocumentObserver: Send + Sync {
    /// What a batch changed, already optimized.
    fn on_changes(&self, document: DocumentID, changes: &[ChangeInfo]);
    /// Freshly rendered tiles, once per active resolution.
    fn on_render(&self, document: DocumentID, region: &RenderedRegion) {
        let _ = (document, region);
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("document history is corrupted, edits are refused")]
    Poisoned,
    /// An undo or redo failed partway. The document may be in any state.
    #[error("failed to {operation} {change}: {source}")]
    Corrupted {
        operation: &'static str,
        change: &'static str,
        #[source]
        source: ChangeError,
    },
}

/// Why an action was not applied. The document is unchanged by it.
#[derive(thiserror::Error, Debug)]
pub enum RejectReason {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Failed(#[from] ChangeError),
    /// Another action of the same group was rejected.
    #[error("group aborted")]
    GroupAborted,
}

#[derive(Debug)]
pub struct Rejection {
    pub source: ActionSource,
    pub action: &'static str,
    pub reason: RejectReason,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, strum::AsRefStr)]
pub enum BatchKind {
    Actions,
    Undo,
    Redo,
}

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchReport {
    pub kind: BatchKind,
    /// Changes applied, reverted, or redone.
    pub applied: usize,
    /// Changes that did nothing, and so were not kept for undo.
    pub ignored: usize,
    pub rejected: Vec<Rejection>,
    /// Optimized, in the order they were given to observers.
    pub infos: Vec<ChangeInfo>,
    /// Tiles rendered, summed over active resolutions.
    pub rendered_tiles: usize,
    pub render_error: Option<RenderError>,
}
impl BatchReport {
    fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            applied: 0,
            ignored: 0,
            rejected: Vec::new(),
            infos: Vec::new(),
            rendered_tiles: 0,
            render_error: None,
        }
    }
}

enum Submission {
    /// One or more actions forming a single undo step.
    Actions {
        source: ActionSource,
        actions: Vec<Action>,
    },
    Undo,
    Redo,
}
enum Batch {
    Actions(Vec<(ActionSource, Vec<Action>)>),
    Undo,
    Redo,
}

/// Clears the executing flag however the batch ends.
struct ExecutingGuard<'a>(&'a AtomicBool);
impl<'a> ExecutingGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}
impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The mutation pipeline of one document.
pub struct ActionAccumulator {
    id: DocumentID,
    document: Arc<parking_lot::RwLock<Document>>,
    renderer: Renderer,
    registry: Arc<NodeRegistry>,
    settings: EngineSettings,
    queued: parking_lot::Mutex<VecDeque<Submission>>,
    history: parking_lot::Mutex<History>,
    observers: parking_lot::RwLock<Vec<Arc<dyn DocumentObserver>>>,
    executing: AtomicBool,
    poisoned: AtomicBool,
}
impl ActionAccumulator {
    #[must_use]
    pub fn new(document: Document, settings: EngineSettings, registry: Arc<NodeRegistry>) -> Self {
        let settings = settings.validated();
        let id = document.id();
        let document = Arc::new(parking_lot::RwLock::new(document));
        let renderer = Renderer::new(&document, settings.render_threads);
        Self {
            id,
            renderer,
            registry,
            history: parking_lot::Mutex::new(History::new(settings.max_undo_steps)),
            settings,
            document,
            queued: parking_lot::Mutex::default(),
            observers: parking_lot::RwLock::default(),
            executing: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        }
    }
    #[must_use]
    pub fn id(&self) -> DocumentID {
        self.id
    }
    /// The document. Only ever locked for writing by [`Self::process`].
    #[must_use]
    pub fn document(&self) -> &Arc<parking_lot::RwLock<Document>> {
        &self.document
    }
    #[must_use]
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
    pub fn add_observer(&self, observer: Arc<dyn DocumentObserver>) {
        self.observers.write().push(observer);
    }
    /// Queue an action as its own undo step.
    pub fn submit(&self, source: ActionSource, action: Action) {
        log::trace!("queued {} from {}", action.name(), source.as_ref());
        self.queued.lock().push_back(Submission::Actions {
            source,
            actions: vec![action],
        });
    }
    /// Queue actions that are applied, and undone, all together. If any of them is rejected,
    /// none are applied.
    pub fn submit_group(&self, source: ActionSource, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        log::trace!("queued group of {} from {}", actions.len(), source.as_ref());
        self.queued
            .lock()
            .push_back(Submission::Actions { source, actions });
    }
    pub fn undo(&self) {
        self.queued.lock().push_back(Submission::Undo);
    }
    pub fn redo(&self) {
        self.queued.lock().push_back(Submission::Redo);
    }
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.history.lock().undo_len()
    }
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.history.lock().redo_len()
    }
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
    /// Make the current state permanent, dropping everything held for undo and redo.
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
    /// Execute every queued batch, in order.
    ///
    /// Returns immediately with no reports if another call is already executing; that call
    /// drains whatever was queued meanwhile.
    pub fn process(&self) -> Result<Vec<BatchReport>, PipelineError> {
        let mut reports = Vec::new();
        loop {
            if self.is_poisoned() {
                return Err(PipelineError::Poisoned);
            }
            let Some(guard) = ExecutingGuard::try_acquire(&self.executing) else {
                log::trace!("batch already executing, leaving queue to it");
                return Ok(reports);
            };
            while let Some(batch) = self.next_batch() {
                reports.push(self.execute(batch)?);
            }
            drop(guard);
            // Something may have been queued between draining and releasing.
            if self.queued.lock().is_empty() {
                return Ok(reports);
            }
        }
    }

    fn next_batch(&self) -> Option<Batch> {
        let mut queued = self.queued.lock();
        match queued.pop_front()? {
            Submission::Undo => Some(Batch::Undo),
            Submission::Redo => Some(Batch::Redo),
            Submission::Actions { source, actions } => {
                let mut batch = vec![(source, actions)];
                while let Some(Submission::Actions { .. }) = queued.front() {
                    if let Some(Submission::Actions { source, actions }) = queued.pop_front() {
                        batch.push((source, actions));
                    }
                }
                Some(Batch::Actions(batch))
            }
        }
    }
    fn execute(&self, batch: Batch) -> Result<BatchReport, PipelineError> {
        let mut document = self.document.write();
        let (mut report, infos) = match batch {
            Batch::Actions(steps) => self.run_actions(&mut document, steps),
            Batch::Undo => self.run_undo(&mut document)?,
            Batch::Redo => self.run_redo(&mut document)?,
        };

        let infos = changes::info::optimize(infos);
        let area = document.take_affected_area();
        let tiles: Vec<TileCoord> = if infos.iter().any(ChangeInfo::requires_full_render) {
            TileCoord::covering(document.bounds(), document.tile_size()).collect()
        } else {
            area.tiles.into_iter().collect()
        };
        drop(document);
        log::debug!(
            "{} batch: {} applied, {} ignored, {} rejected, {} infos, {} tiles dirty",
            report.kind.as_ref(),
            report.applied,
            report.ignored,
            report.rejected.len(),
            infos.len(),
            tiles.len()
        );

        if !infos.is_empty() {
            for observer in self.observers.read().iter() {
                observer.on_changes(self.id, &infos);
            }
        }
        if !tiles.is_empty() {
            self.render(&tiles, &mut report);
        }
        if infos.iter().any(|info| {
            matches!(
                info,
                ChangeInfo::MemberDeleted { .. }
                    | ChangeInfo::NodeRemoved { .. }
                    | ChangeInfo::SizeChanged { .. }
            )
        }) {
            self.renderer.prune();
        }
        report.infos = infos;
        Ok(report)
    }
    fn render(&self, tiles: &[TileCoord], report: &mut BatchReport) {
        for &resolution in &self.settings.active_resolutions {
            match self
                .renderer
                .render_region(tiles.iter().copied(), resolution, 0)
            {
                Ok(region) => {
                    report.rendered_tiles += region.tiles.len();
                    for observer in self.observers.read().iter() {
                        observer.on_render(self.id, &region);
                    }
                }
                Err(err) => {
                    log::error!("render after batch failed: {err}");
                    report.render_error = Some(err);
                    return;
                }
            }
        }
    }
    /// Validate and apply each action in turn. One undo step per submission.
    fn run_actions(
        &self,
        document: &mut Document,
        steps: Vec<(ActionSource, Vec<Action>)>,
    ) -> (BatchReport, Vec<ChangeInfo>) {
        let mut report = BatchReport::new(BatchKind::Actions);
        let mut infos = Vec::new();
        for (source, actions) in steps {
            let names: Vec<&'static str> = actions.iter().map(Action::name).collect();
            let mut step = Vec::with_capacity(actions.len());
            let mut step_infos = Vec::new();
            let mut ignored = 0;
            let mut failure = None;
            for (idx, action) in actions.into_iter().enumerate() {
                let mut change = TrackedChange::new(action.into_change());
                let applied = change
                    .validate(document, &self.registry)
                    .map_err(RejectReason::from)
                    .and_then(|()| change.apply(document).map_err(RejectReason::from));
                match applied {
                    Ok(applied) => {
                        step_infos.extend(applied.infos);
                        if applied.ignore_in_undo {
                            ignored += 1;
                            change.finalize();
                        } else {
                            step.push(change);
                        }
                    }
                    Err(reason) => {
                        failure = Some((idx, reason));
                        break;
                    }
                }
            }

            if let Some((failed, reason)) = failure {
                log::info!("rejected {} from {}: {reason}", names[failed], source.as_ref());
                // Take back the rest of the group. Ignored changes did nothing.
                for mut change in step.into_iter().rev() {
                    if let Err(err) = change.revert(document) {
                        log::error!("failed to roll back {}: {err}", change.name());
                        self.poisoned.store(true, Ordering::Release);
                    }
                }
                let mut reason = Some(reason);
                report.rejected.extend(names.iter().enumerate().map(|(idx, &action)| Rejection {
                    source,
                    action,
                    reason: if idx == failed { reason.take() } else { None }
                        .unwrap_or(RejectReason::GroupAborted),
                }));
                continue;
            }

            report.ignored += ignored;
            infos.append(&mut step_infos);
            if !step.is_empty() {
                report.applied += step.len();
                self.history.lock().push(UndoStep { changes: step });
            }
        }
        (report, infos)
    }
    fn run_undo(
        &self,
        document: &mut Document,
    ) -> Result<(BatchReport, Vec<ChangeInfo>), PipelineError> {
        let mut report = BatchReport::new(BatchKind::Undo);
        let mut history = self.history.lock();
        let Some(mut step) = history.pop_undo() else {
            log::debug!("nothing to undo");
            return Ok((report, Vec::new()));
        };
        let mut infos = Vec::new();
        for change in step.changes.iter_mut().rev() {
            infos.extend(self.check(change.revert(document), "revert", change.name())?);
        }
        report.applied = step.changes.len();
        history.push_redo(step);
        Ok((report, infos))
    }
    fn run_redo(
        &self,
        document: &mut Document,
    ) -> Result<(BatchReport, Vec<ChangeInfo>), PipelineError> {
        let mut report = BatchReport::new(BatchKind::Redo);
        let mut history = self.history.lock();
        let Some(mut step) = history.pop_redo() else {
            log::debug!("nothing to redo");
            return Ok((report, Vec::new()));
        };
        let mut infos = Vec::new();
        for change in &mut step.changes {
            let applied = self.check(change.apply(document), "redo", change.name())?;
            infos.extend(applied.infos);
        }
        report.applied = step.changes.len();
        history.push_undo(step);
        Ok((report, infos))
    }
    /// A failure while moving through history means it no longer matches the document.
    fn check<T>(
        &self,
        result: Result<T, ChangeError>,
        operation: &'static str,
        change: &'static str,
    ) -> Result<T, PipelineError> {
        result.map_err(|source| {
            log::error!("failed to {operation} {change}, history is corrupted: {source}");
            self.poisoned.store(true, Ordering::Release);
            PipelineError::Corrupted {
                operation,
                change,
                source,
            }
        })
    }
}
