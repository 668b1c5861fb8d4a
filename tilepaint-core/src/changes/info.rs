//! Change notifications: plain descriptions of what a change did, for observers that should not
//! see internal storage.

use crate::document::DrawTarget;
use crate::graph::{InputRef, NodeId, NodeKind, OutputRef, ParamValue};
use crate::tile::TileCoord;
use crate::util::RectI;

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeInfo {
    /// Pixels of a store changed.
    ImageArea {
        member: NodeId,
        target: DrawTarget,
        tiles: Vec<TileCoord>,
        bounds: RectI,
    },
    MemberCreated {
        member: NodeId,
        kind: NodeKind,
        parent: Option<NodeId>,
        index: usize,
    },
    MemberDeleted {
        member: NodeId,
    },
    MemberMoved {
        member: NodeId,
        parent: Option<NodeId>,
        index: usize,
    },
    MaskCreated {
        member: NodeId,
    },
    MaskDeleted {
        member: NodeId,
    },
    ParameterChanged {
        node: NodeId,
        name: String,
        value: ParamValue,
    },
    SizeChanged {
        old: [u32; 2],
        new: [u32; 2],
    },
    NodeAdded {
        node: NodeId,
        kind: NodeKind,
    },
    NodeRemoved {
        node: NodeId,
    },
    Connected {
        from: OutputRef,
        to: InputRef,
    },
    Disconnected {
        input: InputRef,
    },
}
impl ChangeInfo {
    /// Whether the change may affect pixels anywhere in the document, rather than only the
    /// tiles reported by the stores.
    #[must_use]
    pub fn requires_full_render(&self) -> bool {
        !matches!(self, Self::ImageArea { .. })
    }
    /// The member or node this info is about, if any.
    #[must_use]
    pub fn subject(&self) -> Option<NodeId> {
        match self {
            Self::ImageArea { member, .. }
            | Self::MemberCreated { member, .. }
            | Self::MemberDeleted { member }
            | Self::MemberMoved { member, .. }
            | Self::MaskCreated { member }
            | Self::MaskDeleted { member } => Some(*member),
            Self::ParameterChanged { node, .. }
            | Self::NodeAdded { node, .. }
            | Self::NodeRemoved { node } => Some(*node),
            Self::Connected { to, .. } => Some(to.node),
            Self::Disconnected { input } => Some(input.node),
            Self::SizeChanged { .. } => None,
        }
    }
}

/// Collapse the infos of one batch:
///
/// * image areas are merged per store, at the position of the first one,
/// * a member or node created and then deleted in the batch vanishes, together with every info
///   about it from that lifetime. If it is created again, the later lifetime is kept,
/// * only the last value of each parameter is kept.
#[must_use]
pub fn optimize(infos: Vec<ChangeInfo>) -> Vec<ChangeInfo> {
    // Index ranges, per id, of lifetimes that both began and ended within the batch.
    let mut born: hashbrown::HashMap<NodeId, usize> = hashbrown::HashMap::new();
    let mut transient: hashbrown::HashMap<NodeId, Vec<(usize, usize)>> = hashbrown::HashMap::new();
    for (idx, info) in infos.iter().enumerate() {
        match info {
            ChangeInfo::MemberCreated { member: id, .. } | ChangeInfo::NodeAdded { node: id, .. } => {
                born.insert(*id, idx);
            }
            ChangeInfo::MemberDeleted { member: id } | ChangeInfo::NodeRemoved { node: id } => {
                if let Some(start) = born.remove(id) {
                    transient.entry(*id).or_default().push((start, idx));
                }
            }
            _ => (),
        }
    }
    let is_transient = |id: NodeId, idx: usize| {
        transient
            .get(&id)
            .is_some_and(|ranges| ranges.iter().any(|(start, end)| (*start..=*end).contains(&idx)))
    };

    let mut out: Vec<ChangeInfo> = Vec::with_capacity(infos.len());
    let mut areas: hashbrown::HashMap<(NodeId, DrawTarget), usize> = hashbrown::HashMap::new();
    let mut params: hashbrown::HashMap<(NodeId, String), usize> = hashbrown::HashMap::new();
    for (idx, info) in infos.into_iter().enumerate() {
        if info.subject().is_some_and(|id| is_transient(id, idx)) {
            continue;
        }
        if let ChangeInfo::Connected { from, .. } = &info {
            if is_transient(from.node, idx) {
                continue;
            }
        }
        match info {
            ChangeInfo::ImageArea {
                member,
                target,
                tiles,
                bounds,
            } => match areas.get(&(member, target)) {
                Some(&idx) => {
                    if let ChangeInfo::ImageArea {
                        tiles: existing,
                        bounds: existing_bounds,
                        ..
                    } = &mut out[idx]
                    {
                        existing.extend(tiles);
                        existing.sort_unstable();
                        existing.dedup();
                        *existing_bounds = existing_bounds.union(&bounds);
                    }
                }
                None => {
                    areas.insert((member, target), out.len());
                    out.push(ChangeInfo::ImageArea {
                        member,
                        target,
                        tiles,
                        bounds,
                    });
                }
            },
            ChangeInfo::ParameterChanged { node, name, value } => {
                match params.get(&(node, name.clone())) {
                    Some(&idx) => {
                        if let ChangeInfo::ParameterChanged {
                            value: existing, ..
                        } = &mut out[idx]
                        {
                            *existing = value;
                        }
                    }
                    None => {
                        params.insert((node, name.clone()), out.len());
                        out.push(ChangeInfo::ParameterChanged { node, name, value });
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}
