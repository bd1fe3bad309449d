use log::{debug, warn};

use crate::dialog::node::{DialogNode, RefKind};
use crate::dialog::tree::{DialogTree, NodeStore};

/// Line spoken at nodes the repairer had to invent.
pub const PLACEHOLDER_TEXT: &str = "I don't have anything more to say about that.";

/// What a repair pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Missing references pointed at an existing node.
    pub linked: usize,
    /// Placeholder nodes added.
    pub synthesized: usize,
    /// Node ids rewritten to match their key.
    pub renamed: usize,
    /// Missing option lists replaced by empty ones.
    pub normalized: usize,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == RepairReport::default()
    }
}

/// Patch `tree` in place so every option reference resolves. Only adds:
/// no node or option is ever removed. A tree without a nodes map is left
/// untouched.
///
/// Missing required references are pointed at the first pre-existing node
/// (in key order) other than the one holding the option; when there is no
/// such node, or when a reference names a node that does not exist, a
/// terminal placeholder is inserted and referenced instead.
pub fn repair(tree: &mut DialogTree) -> RepairReport {
    let mut report = RepairReport::default();
    let Some(store) = tree.nodes.as_mut() else {
        warn!("Cannot repair a dialog tree without a nodes map");
        return report;
    };

    let snapshot: Vec<String> = store.ids().map(str::to_string).collect();

    for key in &snapshot {
        let Some(node) = store.get_mut(key) else {
            continue;
        };
        if node.id != *key {
            debug!("Node '{key}' had id '{}', renaming", node.id);
            node.id = key.clone();
            report.renamed += 1;
        }
        let mut options = match node.options.take() {
            Some(options) => options,
            None => {
                report.normalized += 1;
                Vec::new()
            }
        };

        for (idx, option) in options.iter_mut().enumerate() {
            for (kind, required, slot) in option.action.references_mut() {
                match slot.as_deref() {
                    None if required => {
                        let target = match snapshot.iter().find(|id| *id != key) {
                            Some(other) => {
                                report.linked += 1;
                                other.clone()
                            }
                            None => {
                                report.synthesized += 1;
                                insert_placeholder(store, kind)
                            }
                        };
                        warn!(
                            "Node '{key}' option {idx} had no {}; linked to '{target}'",
                            kind.field()
                        );
                        *slot = Some(target);
                    }
                    Some(target) if !store.has(target) => {
                        let placeholder = insert_placeholder(store, kind);
                        warn!(
                            "Node '{key}' option {idx} {} pointed to missing '{target}'; now '{placeholder}'",
                            kind.field()
                        );
                        report.synthesized += 1;
                        *slot = Some(placeholder);
                    }
                    _ => {}
                }
            }
        }

        if let Some(node) = store.get_mut(key) {
            node.options = Some(options);
        }
    }

    if !report.is_clean() {
        debug!("Repair summary: {report:?}");
    }
    report
}

fn insert_placeholder(store: &mut NodeStore, kind: RefKind) -> String {
    let id = store.fresh_id(&format!("generated_{}", kind.slug()));
    store.insert(DialogNode::new(id.clone(), PLACEHOLDER_TEXT));
    id
}
