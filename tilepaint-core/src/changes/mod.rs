//! # Changes
//!
//! A change is the validated, document-bound form of an [`crate::actions::Action`]. It is
//! checked against the document once, then applied and reverted any number of times as the
//! user undoes and redoes. A change owns whatever it needs to revert itself (tile diffs, the
//! inverse graph edits, removed nodes), and drops it when finalized.
//!
//! ```text
//! Created -> Validated -> Applied <-> Reverted
//!                            \           /
//!                             Finalized
//! ```

pub mod drawing;
pub mod graph;
pub mod info;
pub mod properties;
pub mod resize;
pub mod structure;

pub use info::ChangeInfo;

use crate::diff::{ChainError, DiffError};
use crate::document::{Document, DrawTarget};
use crate::fill::FillError;
use crate::graph::{GraphEdit, GraphError, NodeGraph, NodeId, NodeRegistry, ParamError};

/// The action can't be performed on the document as it is. Nothing was modified.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("node {0} not found")]
    UnknownNode(NodeId),
    #[error("{0} has no raster content")]
    NotARasterLayer(NodeId),
    #[error("{0} has no mask")]
    NoMask(NodeId),
    #[error("{0} already has a mask")]
    MaskExists(NodeId),
    #[error("{0} is not a layer or folder")]
    NotAMember(NodeId),
    #[error("the output node can't be edited this way")]
    OutputNode,
    #[error("node {0} already exists")]
    IdInUse(NodeId),
    #[error("image size {}x{} is empty", .0[0], .0[1])]
    EmptySize([u32; 2]),
    #[error("image size {}x{} exceeds the limit of {}", .0[0], .0[1], resize::MAX_SIDE)]
    TooLarge([u32; 2]),
    #[error("offset {}, {} moves the whole image out of bounds", .0[0], .0[1])]
    OffsetTooLarge([i32; 2]),
    #[error("can't move {0} into itself")]
    MoveIntoSelf(NodeId),
    #[error("nothing to draw")]
    NoOperations,
    #[error("{0} is a layer or folder, delete it as a member")]
    UseDeleteMember(NodeId),
    #[error("change was already validated")]
    AlreadyValidated,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Fill(#[from] FillError),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Created,
    Validated,
    Applied,
    Reverted,
    Finalized,
}

/// A validated change failed to apply or revert. During a revert or redo this means the history
/// no longer matches the document.
#[derive(thiserror::Error, Debug)]
pub enum ChangeError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error(transparent)]
    Chain(#[from] ChainError<(NodeId, DrawTarget)>),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Fill(#[from] FillError),
    #[error("{member} has no {target:?} store")]
    MissingStore { member: NodeId, target: DrawTarget },
    #[error("node {0} vanished")]
    MissingNode(NodeId),
    #[error("{0} unexpectedly has a mask")]
    MaskExists(NodeId),
    #[error("captured state was already consumed")]
    DiffConsumed,
    #[error("can't {operation} a change that is {state:?}")]
    InvalidState {
        state: ChangeState,
        operation: &'static str,
    },
}

/// What an apply did.
#[derive(Debug, Default)]
pub struct Applied {
    pub infos: Vec<ChangeInfo>,
    /// The change did nothing observable. It is not kept for undo.
    pub ignore_in_undo: bool,
}
impl Applied {
    #[must_use]
    pub fn new(infos: Vec<ChangeInfo>) -> Self {
        Self {
            infos,
            ignore_in_undo: false,
        }
    }
    #[must_use]
    pub fn ignored(infos: Vec<ChangeInfo>) -> Self {
        Self {
            infos,
            ignore_in_undo: true,
        }
    }
}

pub trait Change: Send {
    /// Short human readable name, for logs.
    fn name(&self) -> &'static str;
    /// Check every precondition. Must not modify anything, and once this passes `apply` with
    /// `first_apply` is expected to succeed.
    fn initialize_and_validate(
        &mut self,
        document: &Document,
        registry: &NodeRegistry,
    ) -> Result<(), ValidationError>;
    /// Perform the change. `first_apply` is false when redoing after a revert.
    /// On error the document must be left as it was.
    fn apply(&mut self, document: &mut Document, first_apply: bool) -> Result<Applied, ChangeError>;
    /// Restore the document to how it was before the last apply.
    fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError>;
    /// Bytes held for reverting.
    fn memory_usage(&self) -> usize {
        0
    }
}

/// A change together with where it is in its lifecycle. Calls out of order are refused.
pub struct TrackedChange {
    change: Box<dyn Change>,
    state: ChangeState,
}
impl std::fmt::Debug for TrackedChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedChange")
            .field("change", &self.change.name())
            .field("state", &self.state)
            .finish()
    }
}
impl TrackedChange {
    #[must_use]
    pub fn new(change: Box<dyn Change>) -> Self {
        Self {
            change,
            state: ChangeState::Created,
        }
    }
    #[must_use]
    pub fn state(&self) -> ChangeState {
        self.state
    }
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.change.name()
    }
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.change.memory_usage()
    }
    pub fn validate(
        &mut self,
        document: &Document,
        registry: &NodeRegistry,
    ) -> Result<(), ValidationError> {
        if self.state != ChangeState::Created {
            return Err(ValidationError::AlreadyValidated);
        }
        self.change.initialize_and_validate(document, registry)?;
        self.state = ChangeState::Validated;
        Ok(())
    }
    /// First apply after validation, or a redo after a revert.
    pub fn apply(&mut self, document: &mut Document) -> Result<Applied, ChangeError> {
        let first_apply = match self.state {
            ChangeState::Validated => true,
            ChangeState::Reverted => false,
            state => {
                return Err(ChangeError::InvalidState {
                    state,
                    operation: "apply",
                })
            }
        };
        let applied = self.change.apply(document, first_apply)?;
        self.state = ChangeState::Applied;
        Ok(applied)
    }
    pub fn revert(&mut self, document: &mut Document) -> Result<Vec<ChangeInfo>, ChangeError> {
        if self.state != ChangeState::Applied {
            return Err(ChangeError::InvalidState {
                state: self.state,
                operation: "revert",
            });
        }
        let infos = self.change.revert(document)?;
        self.state = ChangeState::Reverted;
        Ok(infos)
    }
    /// Make the change permanent (or permanently undone), freeing what it held for reverting.
    pub fn finalize(mut self) {
        log::trace!(
            "finalizing {} ({:?}), freeing {}",
            self.change.name(),
            self.state,
            human_bytes::human_bytes(self.change.memory_usage() as f64)
        );
        self.state = ChangeState::Finalized;
    }
}

/// Graph edits made by a change, kept as whichever list undoes the current state.
#[derive(Default)]
pub(crate) struct EditLog {
    undo: Vec<GraphEdit>,
    redo: Vec<GraphEdit>,
}
impl EditLog {
    /// Record edits as `edit` makes them. If `edit` fails, everything it did is rolled back.
    pub(crate) fn record(
        &mut self,
        graph: &mut NodeGraph,
        edit: impl FnOnce(&mut EditRecorder<'_>) -> Result<(), GraphError>,
    ) -> Result<(), GraphError> {
        let mut recorder = EditRecorder {
            graph,
            inverses: Vec::new(),
        };
        match edit(&mut recorder) {
            Ok(()) => {
                self.undo = recorder.finish();
                self.redo.clear();
                Ok(())
            }
            Err(err) => {
                recorder.rollback();
                Err(err)
            }
        }
    }
    pub(crate) fn undo(&mut self, graph: &mut NodeGraph) -> Result<(), GraphError> {
        self.redo = run_edits(graph, std::mem::take(&mut self.undo))?;
        Ok(())
    }
    pub(crate) fn redo(&mut self, graph: &mut NodeGraph) -> Result<(), GraphError> {
        self.undo = run_edits(graph, std::mem::take(&mut self.redo))?;
        Ok(())
    }
}

/// Applies graph edits while remembering their inverses.
pub(crate) struct EditRecorder<'g> {
    graph: &'g mut NodeGraph,
    inverses: Vec<GraphEdit>,
}
impl EditRecorder<'_> {
    /// The graph with every edit so far applied.
    pub(crate) fn graph(&self) -> &NodeGraph {
        self.graph
    }
    pub(crate) fn apply(&mut self, edit: GraphEdit) -> Result<(), GraphError> {
        let inverse = self.graph.apply_edit(edit)?;
        self.inverses.push(inverse);
        Ok(())
    }
    pub(crate) fn apply_all(
        &mut self,
        edits: impl IntoIterator<Item = GraphEdit>,
    ) -> Result<(), GraphError> {
        edits.into_iter().try_for_each(|edit| self.apply(edit))
    }
    /// Inverses in the order they must be applied.
    fn finish(mut self) -> Vec<GraphEdit> {
        self.inverses.reverse();
        self.inverses
    }
    fn rollback(self) {
        let graph = self.graph;
        for inverse in self.inverses.into_iter().rev() {
            if let Err(err) = graph.apply_edit(inverse) {
                log::error!("rolling back a failed graph edit failed too: {err}");
            }
        }
    }
}

/// Apply a fixed list of edits, all or nothing. Returns the list that undoes them.
fn run_edits(graph: &mut NodeGraph, edits: Vec<GraphEdit>) -> Result<Vec<GraphEdit>, GraphError> {
    let mut recorder = EditRecorder {
        graph,
        inverses: Vec::with_capacity(edits.len()),
    };
    for edit in edits {
        if let Err(err) = recorder.apply(edit) {
            recorder.rollback();
            return Err(err);
        }
    }
    Ok(recorder.finish())
}

/// Find the raster store an edit targets, as a validation step.
pub(crate) fn validate_store(
    document: &Document,
    member: NodeId,
    target: DrawTarget,
) -> Result<(), ValidationError> {
    let node = document
        .graph
        .get(member)
        .ok_or(ValidationError::UnknownNode(member))?;
    let raster = node
        .raster()
        .ok_or(ValidationError::NotARasterLayer(member))?;
    if target == DrawTarget::Mask && raster.mask.is_none() {
        return Err(ValidationError::NoMask(member));
    }
    Ok(())
}
