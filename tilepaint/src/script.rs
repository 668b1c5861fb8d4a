//! # Scripts
//!
//! A TOML list of edits replayed against a fresh document. Steps refer to layers and nodes by
//! labels the script chooses, the label `output` names the document's output node.
//!
//! ```toml
//! size = [256, 256]
//! output = "out.png"
//!
//! [[step]]
//! action = "create"
//! label = "ink"
//! kind = "raster_layer"
//!
//! [[step]]
//! action = "draw"
//! layer = "ink"
//! color = [255, 0, 0, 255]
//! shape = { rectangle = { min = [0, 0], max = [64, 64] } }
//! ```

use std::collections::BTreeMap;

use anyhow::Context;
use tilepaint_core::actions::{Action, FillReference};
use tilepaint_core::blend::{Blend, BlendMode};
use tilepaint_core::color::Rgba8;
use tilepaint_core::document::DrawTarget;
use tilepaint_core::fill::{Connectivity, FillOptions};
use tilepaint_core::graph::{InputRef, Location, NodeId, NodeKind, OutputRef, ParamValue};
use tilepaint_core::tile::{Resolution, Shape};
use tilepaint_core::util::FiniteF32;

const OUTPUT_LABEL: &str = "output";

fn one() -> usize {
    1
}
fn yes() -> bool {
    true
}

#[derive(serde::Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Script {
    pub size: [u32; 2],
    /// Resolution the result is rendered at.
    #[serde(default)]
    pub resolution: Resolution,
    /// Where to write the result, relative to the working directory.
    pub output: Option<std::path::PathBuf>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}
impl Script {
    pub fn read(path: &std::path::Path) -> anyhow::Result<Self> {
        let string =
            std::fs::read_to_string(path).with_context(|| format!("reading script {path:?}"))?;
        toml::from_str(&string).with_context(|| format!("parsing script {path:?}"))
    }
}

#[derive(serde::Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Create a layer or folder. Placed above `above`, into folder `parent`, or into the root.
    Create {
        label: String,
        kind: NodeKind,
        name: Option<String>,
        parent: Option<String>,
        above: Option<String>,
        #[serde(default)]
        index: usize,
    },
    Delete {
        layer: String,
    },
    Move {
        layer: String,
        parent: Option<String>,
        above: Option<String>,
        #[serde(default)]
        index: usize,
    },
    Draw {
        layer: String,
        #[serde(default)]
        mask: bool,
        shape: Shape,
        /// Straight alpha RGBA.
        color: [u8; 4],
        #[serde(default)]
        mode: BlendMode,
        opacity: Option<f32>,
        #[serde(default = "yes")]
        antialias: bool,
    },
    Clear {
        layer: String,
        #[serde(default)]
        mask: bool,
    },
    Fill {
        layer: String,
        #[serde(default)]
        mask: bool,
        seed: [i32; 2],
        color: [u8; 4],
        #[serde(default)]
        tolerance: u8,
        #[serde(default)]
        connectivity: Connectivity,
        /// Compare against these layers composited instead of the filled layer.
        merged: Option<Vec<String>>,
        clip: Option<Shape>,
    },
    Resize {
        size: [u32; 2],
        #[serde(default)]
        offset: [i32; 2],
    },
    Set {
        node: String,
        name: String,
        value: ParamValue,
    },
    CreateMask {
        layer: String,
    },
    DeleteMask {
        layer: String,
    },
    AddNode {
        label: String,
        kind: NodeKind,
        #[serde(default)]
        parameters: BTreeMap<String, ParamValue>,
    },
    RemoveNode {
        node: String,
    },
    Connect {
        from: String,
        #[serde(default)]
        from_socket: usize,
        to: String,
        #[serde(default)]
        to_socket: usize,
    },
    Disconnect {
        node: String,
        socket: usize,
    },
    /// Steps applied and undone together.
    Group {
        steps: Vec<Step>,
    },
    Undo {
        #[serde(default = "one")]
        count: usize,
    },
    Redo {
        #[serde(default = "one")]
        count: usize,
    },
}

/// What to hand the document's queue, in order.
#[derive(Debug)]
pub enum Command {
    /// One undo step.
    Submit(Vec<Action>),
    Undo,
    Redo,
}

/// Label to node mapping. Labels are assigned fresh IDs on definition, before the node exists.
pub struct Labels {
    ids: hashbrown::HashMap<String, NodeId>,
}
impl Labels {
    #[must_use]
    pub fn new(output: NodeId) -> Self {
        let mut ids = hashbrown::HashMap::new();
        ids.insert(OUTPUT_LABEL.to_owned(), output);
        Self { ids }
    }
    fn get(&self, label: &str) -> anyhow::Result<NodeId> {
        self.ids
            .get(label)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown label {label:?}"))
    }
    fn define(&mut self, label: &str) -> anyhow::Result<NodeId> {
        match self.ids.entry(label.to_owned()) {
            hashbrown::hash_map::Entry::Occupied(_) => {
                anyhow::bail!("label {label:?} defined twice")
            }
            hashbrown::hash_map::Entry::Vacant(v) => Ok(*v.insert(NodeId::default())),
        }
    }
    fn location(
        &self,
        parent: Option<&str>,
        above: Option<&str>,
        index: usize,
    ) -> anyhow::Result<Location> {
        Ok(match (parent, above) {
            (_, Some(above)) => Location::AboveMember(self.get(above)?),
            (Some(parent), None) => Location::IndexIntoFolder(self.get(parent)?, index),
            (None, None) => Location::IndexIntoRoot(index),
        })
    }
}

fn target(mask: bool) -> DrawTarget {
    if mask {
        DrawTarget::Mask
    } else {
        DrawTarget::Image
    }
}
fn color([r, g, b, a]: [u8; 4]) -> Rgba8 {
    Rgba8::from_straight(r, g, b, a)
}

/// Turn steps into queue commands, resolving labels as they are defined.
pub fn compile(steps: Vec<Step>, labels: &mut Labels) -> anyhow::Result<Vec<Command>> {
    let mut commands = Vec::with_capacity(steps.len());
    for (idx, step) in steps.into_iter().enumerate() {
        let command = match step {
            Step::Undo { count } => {
                commands.extend(std::iter::repeat_with(|| Command::Undo).take(count));
                continue;
            }
            Step::Redo { count } => {
                commands.extend(std::iter::repeat_with(|| Command::Redo).take(count));
                continue;
            }
            Step::Group { steps } => {
                let mut actions = Vec::with_capacity(steps.len());
                for step in steps {
                    let action =
                        action(step, labels).with_context(|| format!("group at step {idx}"))?;
                    actions.push(action);
                }
                Command::Submit(actions)
            }
            step => {
                let action = action(step, labels).with_context(|| format!("step {idx}"))?;
                Command::Submit(vec![action])
            }
        };
        commands.push(command);
    }
    Ok(commands)
}

fn action(step: Step, labels: &mut Labels) -> anyhow::Result<Action> {
    Ok(match step {
        Step::Create {
            label,
            kind,
            name,
            parent,
            above,
            index,
        } => {
            let location = labels.location(parent.as_deref(), above.as_deref(), index)?;
            Action::CreateMember {
                id: labels.define(&label)?,
                kind,
                name: Some(name.unwrap_or(label)),
                location,
            }
        }
        Step::Delete { layer } => Action::DeleteMember {
            member: labels.get(&layer)?,
        },
        Step::Move {
            layer,
            parent,
            above,
            index,
        } => Action::MoveMember {
            member: labels.get(&layer)?,
            location: labels.location(parent.as_deref(), above.as_deref(), index)?,
        },
        Step::Draw {
            layer,
            mask,
            shape,
            color: rgba,
            mode,
            opacity,
            antialias,
        } => Action::DrawShape {
            member: labels.get(&layer)?,
            target: target(mask),
            shape,
            color: color(rgba),
            blend: Blend {
                mode,
                opacity: FiniteF32::clamped(opacity.unwrap_or(1.0), 0.0, 1.0),
                alpha_clip: false,
            },
            antialias,
        },
        Step::Clear { layer, mask } => Action::ClearLayer {
            member: labels.get(&layer)?,
            target: target(mask),
        },
        Step::Fill {
            layer,
            mask,
            seed,
            color: rgba,
            tolerance,
            connectivity,
            merged,
            clip,
        } => {
            let mut options = FillOptions::new(seed, color(rgba));
            options.tolerance = tolerance;
            options.connectivity = connectivity;
            options.clip = clip;
            let reference = match merged {
                None => FillReference::Target,
                Some(layers) => FillReference::Merged(
                    layers
                        .iter()
                        .map(|label| labels.get(label))
                        .collect::<anyhow::Result<_>>()?,
                ),
            };
            Action::FloodFill {
                member: labels.get(&layer)?,
                target: target(mask),
                options,
                reference,
            }
        }
        Step::Resize { size, offset } => Action::ResizeCanvas { size, offset },
        Step::Set { node, name, value } => Action::SetParameter {
            node: labels.get(&node)?,
            name,
            value,
        },
        Step::CreateMask { layer } => Action::CreateMask {
            member: labels.get(&layer)?,
        },
        Step::DeleteMask { layer } => Action::DeleteMask {
            member: labels.get(&layer)?,
        },
        Step::AddNode {
            label,
            kind,
            parameters,
        } => Action::AddNode {
            id: labels.define(&label)?,
            kind,
            parameters: parameters.into_iter().collect(),
        },
        Step::RemoveNode { node } => Action::RemoveNode {
            node: labels.get(&node)?,
        },
        Step::Connect {
            from,
            from_socket,
            to,
            to_socket,
        } => Action::Connect {
            from: OutputRef::new(labels.get(&from)?, from_socket),
            to: InputRef::new(labels.get(&to)?, to_socket),
        },
        Step::Disconnect { node, socket } => Action::Disconnect {
            input: InputRef::new(labels.get(&node)?, socket),
        },
        Step::Group { .. } => anyhow::bail!("groups can't be nested"),
        Step::Undo { .. } | Step::Redo { .. } => anyhow::bail!("undo and redo can't be grouped"),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = r#"
size = [64, 32]
resolution = "half"

[[step]]
action = "create"
label = "folder"
kind = "folder"

[[step]]
action = "create"
label = "ink"
kind = "raster_layer"
parent = "folder"

[[step]]
action = "draw"
layer = "ink"
color = [255, 0, 0, 255]
shape = { ellipse = { min = [0, 0], max = [16, 16] } }

[[step]]
action = "group"
steps = [
    { action = "create_mask", layer = "ink" },
    { action = "set", node = "ink", name = "opacity", value = { type = "float", value = 0.5 } },
]

[[step]]
action = "undo"
count = 2
"#;

    #[test]
    fn parses_and_compiles() {
        let script: Script = toml::from_str(SCRIPT).unwrap();
        assert_eq!(script.size, [64, 32]);
        assert_eq!(script.resolution, Resolution::Half);
        let output = NodeId::default();
        let mut labels = Labels::new(output);
        let commands = compile(script.steps, &mut labels).unwrap();
        assert_eq!(commands.len(), 6);
        let ink = labels.get("ink").unwrap();
        let folder = labels.get("folder").unwrap();
        assert!(matches!(
            &commands[1],
            Command::Submit(actions) if matches!(
                actions.as_slice(),
                [Action::CreateMember { id, location: Location::IndexIntoFolder(parent, 0), .. }]
                    if *id == ink && *parent == folder
            )
        ));
        assert!(matches!(&commands[3], Command::Submit(actions) if actions.len() == 2));
        assert!(matches!(commands[4..], [Command::Undo, Command::Undo]));
        assert_eq!(labels.get(OUTPUT_LABEL).unwrap(), output);
    }
    #[test]
    fn bad_labels_are_errors() {
        let mut labels = Labels::new(NodeId::default());
        let draw_on_nothing = vec![Step::Clear {
            layer: "nothing".into(),
            mask: false,
        }];
        assert!(compile(draw_on_nothing, &mut labels).is_err());
        let redefine_output = vec![Step::AddNode {
            label: OUTPUT_LABEL.into(),
            kind: NodeKind::Color,
            parameters: BTreeMap::new(),
        }];
        assert!(compile(redefine_output, &mut labels).is_err());
    }
    #[test]
    fn nested_groups_are_refused() {
        let mut labels = Labels::new(NodeId::default());
        let nested = vec![Step::Group {
            steps: vec![Step::Group { steps: Vec::new() }],
        }];
        assert!(compile(nested, &mut labels).is_err());
    }
}
