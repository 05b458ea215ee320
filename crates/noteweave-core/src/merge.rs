//! Identity-based tree merge, split into a pure planning step and an apply
//! step.
//!
//! The incoming tree wins: every matched element takes the incoming scalar
//! fields verbatim, children are reconciled by id, elements only present in
//! the incoming tree are adopted as-is and elements only present locally are
//! dropped. No structural diffing happens beyond identity matching.
//!
//! [`absorb`] is the local-wins counterpart used when a save loses a version
//! race: local content stays, and only elements the local side has never
//! seen are taken from the competing tree.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::element::{Element, ElementFields};

/// Slot in a reconciled child list.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildSlot {
    /// Keep the local child with this id (it gets its own ops).
    Keep(Uuid),
    /// Adopt an incoming subtree wholesale.
    Adopt(Element),
}

impl ChildSlot {
    pub fn id(&self) -> Uuid {
        match self {
            ChildSlot::Keep(id) => *id,
            ChildSlot::Adopt(element) => element.id(),
        }
    }
}

/// One step of a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOp {
    /// Overwrite the scalar fields of element `id`.
    SetFields { id: Uuid, fields: ElementFields },
    /// Replace the children of `parent` with `slots`, in order.
    SetChildren { parent: Uuid, slots: Vec<ChildSlot> },
}

/// Ordered list of merge operations. Parents come before their children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    ops: Vec<MergeOp>,
}

/// Plan the merge of `incoming` into `local`. Both roots must share an id;
/// when they differ the plan adopts the incoming root's content under the
/// local root.
pub fn plan(local: &Element, incoming: &Element) -> MergePlan {
    let mut plan = MergePlan::default();
    plan_into(local, incoming, &mut plan.ops);
    plan
}

fn plan_into(local: &Element, incoming: &Element, ops: &mut Vec<MergeOp>) {
    ops.push(MergeOp::SetFields {
        id: local.id(),
        fields: incoming.fields(),
    });

    let local_children: HashMap<Uuid, &Element> =
        local.children().iter().map(|c| (c.id(), c)).collect();

    let mut slots = Vec::with_capacity(incoming.children().len());
    let mut kept: Vec<(&Element, &Element)> = Vec::new();
    for child in incoming.children() {
        match local_children.get(&child.id()) {
            Some(&existing) => {
                slots.push(ChildSlot::Keep(child.id()));
                kept.push((existing, child));
            }
            None => slots.push(ChildSlot::Adopt(child.clone())),
        }
    }
    ops.push(MergeOp::SetChildren {
        parent: local.id(),
        slots,
    });

    for (existing, child) in kept {
        plan_into(existing, child, ops);
    }
}

impl MergePlan {
    pub fn ops(&self) -> &[MergeOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Ids of local elements the plan drops.
    pub fn dropped(&self, local: &Element) -> Vec<Uuid> {
        let mut kept: HashSet<Uuid> = HashSet::new();
        kept.insert(local.id());
        for op in &self.ops {
            if let MergeOp::SetChildren { slots, .. } = op {
                for slot in slots {
                    match slot {
                        ChildSlot::Keep(id) => {
                            kept.insert(*id);
                        }
                        ChildSlot::Adopt(element) => kept.extend(element.subtree_ids()),
                    }
                }
            }
        }
        local
            .subtree_ids()
            .into_iter()
            .filter(|id| !kept.contains(id))
            .collect()
    }

    /// Apply the plan to `root`. Nothing is recorded in the change logs.
    /// Ops naming elements that are not in the tree are skipped; the
    /// number of ops applied is returned.
    pub fn apply(self, root: &mut Element) -> usize {
        let mut applied = 0;
        for op in self.ops {
            match op {
                MergeOp::SetFields { id, fields } => {
                    if let Some(element) = root.find_mut(id) {
                        element.apply_fields(fields);
                        applied += 1;
                    }
                }
                MergeOp::SetChildren { parent, slots } => {
                    let Some(element) = root.find_mut(parent) else {
                        continue;
                    };
                    let mut old: HashMap<Uuid, Element> = std::mem::take(&mut element.children)
                        .into_iter()
                        .map(|c| (c.id(), c))
                        .collect();
                    element.children = slots
                        .into_iter()
                        .filter_map(|slot| match slot {
                            ChildSlot::Keep(id) => old.remove(&id),
                            ChildSlot::Adopt(mut adopted) => {
                                adopted.clear_changes();
                                Some(adopted)
                            }
                        })
                        .collect();
                    applied += 1;
                }
            }
        }
        applied
    }
}

/// An incoming subtree to graft under `parent`.
struct Adoption {
    parent: Uuid,
    /// Incoming siblings before the subtree, nearest first.
    preceding: Vec<Uuid>,
    /// Incoming siblings after the subtree, in order.
    following: Vec<Uuid>,
    element: Element,
}

/// Fold a competing version of the same note into `local` without giving
/// up local content.
///
/// Local elements keep their fields and positions. An incoming subtree is
/// adopted only when its root id is in neither `local` nor `known` (the ids
/// the local side already persisted or received). A known id missing locally
/// was deleted here and stays deleted. Adopted subtrees go under their
/// incoming parent, next to the nearest incoming sibling that exists
/// locally, and never duplicate a local id. Nothing is recorded in the
/// change logs. Returns the number of subtrees adopted.
pub fn absorb(local: &mut Element, incoming: &Element, known: &HashSet<Uuid>) -> usize {
    let present: HashSet<Uuid> = local.subtree_ids().into_iter().collect();
    let mut adoptions = Vec::new();
    collect_unseen(incoming, &present, known, &mut adoptions);

    let count = adoptions.len();
    for adoption in adoptions {
        let parent = if local.contains(adoption.parent) {
            adoption.parent
        } else {
            local.id()
        };
        let Some(target) = local.find_mut(parent) else {
            continue;
        };
        let index = adoption
            .preceding
            .iter()
            .find_map(|id| target.index_of_child(*id))
            .map(|i| i + 1)
            .or_else(|| {
                adoption
                    .following
                    .iter()
                    .find_map(|id| target.index_of_child(*id))
            })
            .unwrap_or(target.children.len());
        target.children.insert(index, adoption.element);
    }
    count
}

fn collect_unseen(
    parent: &Element,
    present: &HashSet<Uuid>,
    known: &HashSet<Uuid>,
    out: &mut Vec<Adoption>,
) {
    let siblings = parent.children();
    for (i, child) in siblings.iter().enumerate() {
        if present.contains(&child.id()) {
            collect_unseen(child, present, known, out);
        } else if !known.contains(&child.id()) {
            let mut element = child.clone();
            prune(&mut element, present);
            element.clear_changes();
            out.push(Adoption {
                parent: parent.id(),
                preceding: siblings[..i].iter().rev().map(Element::id).collect(),
                following: siblings[i + 1..].iter().map(Element::id).collect(),
                element,
            });
        }
    }
}

/// Drop descendants whose ids already exist elsewhere.
fn prune(element: &mut Element, present: &HashSet<Uuid>) {
    element.children.retain(|c| !present.contains(&c.id()));
    for child in &mut element.children {
        prune(child, present);
    }
}
