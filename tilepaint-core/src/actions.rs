//! # Actions
//!
//! Requests from the outside world to modify a document. Actions are plain data, and can be
//! queued before the document they refer to is in the right state (e.g. drawing on a layer
//! whose creation is queued just before it). Each is turned into a [`Change`] when its batch
//! executes, which validates it against the document as it is at that moment.

use crate::blend::Blend;
use crate::changes::{drawing, graph, properties, resize, structure, Change};
use crate::color::Rgba8;
use crate::document::DrawTarget;
use crate::fill::FillOptions;
use crate::graph::{InputRef, Location, NodeId, NodeKind, OutputRef, ParamValue};
use crate::tile::{DrawOperation, Shape, Surface};

pub use drawing::FillReference;

/// Who asked for an action. Only used for reporting.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, strum::AsRefStr)]
pub enum ActionSource {
    #[default]
    User,
    /// Scripts, plugins, and other programmatic edits.
    Automated,
}

#[derive(Clone, Debug)]
pub enum Action {
    DrawShape {
        member: NodeId,
        target: DrawTarget,
        shape: Shape,
        color: Rgba8,
        blend: Blend,
        antialias: bool,
    },
    Blit {
        member: NodeId,
        target: DrawTarget,
        surface: Surface,
        position: [i32; 2],
        blend: Blend,
    },
    ClearLayer {
        member: NodeId,
        target: DrawTarget,
    },
    FloodFill {
        member: NodeId,
        target: DrawTarget,
        options: FillOptions,
        reference: FillReference,
    },
    /// Change the document size. Content moves by `offset` pixels.
    ResizeCanvas {
        size: [u32; 2],
        offset: [i32; 2],
    },
    /// Create a layer or folder. The id is chosen by the caller, so later actions can refer
    /// to it.
    CreateMember {
        id: NodeId,
        kind: NodeKind,
        name: Option<String>,
        location: Location,
    },
    /// Delete a layer or folder, along with everything inside it.
    DeleteMember {
        member: NodeId,
    },
    MoveMember {
        member: NodeId,
        location: Location,
    },
    SetParameter {
        node: NodeId,
        name: String,
        value: ParamValue,
    },
    CreateMask {
        member: NodeId,
    },
    DeleteMask {
        member: NodeId,
    },
    AddNode {
        id: NodeId,
        kind: NodeKind,
        parameters: Vec<(String, ParamValue)>,
    },
    RemoveNode {
        node: NodeId,
    },
    Connect {
        from: OutputRef,
        to: InputRef,
    },
    Disconnect {
        input: InputRef,
    },
}
impl Action {
    /// Short name, for logs and reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DrawShape { .. } => "draw shape",
            Self::Blit { .. } => "blit",
            Self::ClearLayer { .. } => "clear layer",
            Self::FloodFill { .. } => "flood fill",
            Self::ResizeCanvas { .. } => "resize canvas",
            Self::CreateMember { .. } => "create member",
            Self::DeleteMember { .. } => "delete member",
            Self::MoveMember { .. } => "move member",
            Self::SetParameter { .. } => "set parameter",
            Self::CreateMask { .. } => "create mask",
            Self::DeleteMask { .. } => "delete mask",
            Self::AddNode { .. } => "add node",
            Self::RemoveNode { .. } => "remove node",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
        }
    }
    /// The change performing this action. Not yet validated.
    #[must_use]
    pub fn into_change(self) -> Box<dyn Change> {
        match self {
            Self::DrawShape {
                member,
                target,
                shape,
                color,
                blend,
                antialias,
            } => Box::new(drawing::DrawChange::new(
                member,
                target,
                vec![DrawOperation::Shape {
                    shape,
                    color,
                    blend,
                    antialias,
                }],
            )),
            Self::Blit {
                member,
                target,
                surface,
                position,
                blend,
            } => Box::new(drawing::DrawChange::new(
                member,
                target,
                vec![DrawOperation::Blit {
                    surface,
                    position,
                    blend,
                }],
            )),
            Self::ClearLayer { member, target } => Box::new(drawing::DrawChange::new(
                member,
                target,
                vec![DrawOperation::Clear],
            )),
            Self::FloodFill {
                member,
                target,
                options,
                reference,
            } => Box::new(drawing::FloodFillChange::new(
                member, target, options, reference,
            )),
            Self::ResizeCanvas { size, offset } => {
                Box::new(resize::ResizeCanvas::new(size, offset))
            }
            Self::CreateMember {
                id,
                kind,
                name,
                location,
            } => Box::new(structure::CreateMember::new(id, kind, name, location)),
            Self::DeleteMember { member } => Box::new(structure::DeleteMember::new(member)),
            Self::MoveMember { member, location } => {
                Box::new(structure::MoveMember::new(member, location))
            }
            Self::SetParameter { node, name, value } => {
                Box::new(properties::SetParameter::new(node, name, value))
            }
            Self::CreateMask { member } => Box::new(structure::CreateMask::new(member)),
            Self::DeleteMask { member } => Box::new(structure::DeleteMask::new(member)),
            Self::AddNode {
                id,
                kind,
                parameters,
            } => Box::new(graph::AddNode::new(id, kind, parameters)),
            Self::RemoveNode { node } => Box::new(graph::RemoveNode::new(node)),
            Self::Connect { from, to } => Box::new(graph::Connect::new(from, to)),
            Self::Disconnect { input } => Box::new(graph::Disconnect::new(input)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::changes::TrackedChange;
    use crate::document::Document;
    use crate::graph::NodeRegistry;
    use crate::settings::EngineSettings;

    #[test]
    fn queued_actions_refer_to_preallocated_ids() {
        let mut document = Document::new([32, 32], &EngineSettings::default()).unwrap();
        let registry = NodeRegistry::default();
        let layer = NodeId::default();
        let actions = [
            Action::CreateMember {
                id: layer,
                kind: NodeKind::RasterLayer,
                name: Some("ink".into()),
                location: Location::IndexIntoRoot(0),
            },
            Action::DrawShape {
                member: layer,
                target: DrawTarget::Image,
                shape: Shape::rectangle(0.0, 0.0, 4.0, 4.0),
                color: Rgba8::WHITE,
                blend: Blend::default(),
                antialias: false,
            },
        ];
        for action in actions {
            let mut change = TrackedChange::new(action.into_change());
            change.validate(&document, &registry).unwrap();
            change.apply(&mut document).unwrap();
        }
        let store = document.store(layer, DrawTarget::Image).unwrap();
        assert_eq!(store.read_pixel([1, 1]), Rgba8::WHITE);
    }
}
