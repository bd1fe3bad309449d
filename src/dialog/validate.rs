use thiserror::Error;

use crate::dialog::tree::DialogTree;

/// A defect found in a dialog tree. Never shown to the player; the repairer
/// heals every variant except the missing-map/missing-root ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralDefect {
    #[error("tree has no nodes map")]
    MissingNodes,

    #[error("tree has no rootNodeId")]
    MissingRootId,

    #[error("root node '{0}' does not exist")]
    RootNotFound(String),

    #[error("node '{key}' carries mismatched id '{id}'")]
    IdMismatch { key: String, id: String },

    #[error("node '{node}' has no options list")]
    MissingOptions { node: String },

    #[error("node '{node}' option {option} ({kind}) is missing {field}")]
    MissingReference {
        node: String,
        option: usize,
        kind: &'static str,
        field: &'static str,
    },

    #[error("node '{node}' option {option} {field} points to missing node '{target}'")]
    DanglingReference {
        node: String,
        option: usize,
        field: &'static str,
        target: String,
    },
}

impl StructuralDefect {
    /// Defects the repairer is expected to clear.
    pub fn is_reference_defect(&self) -> bool {
        !matches!(
            self,
            StructuralDefect::MissingNodes
                | StructuralDefect::MissingRootId
                | StructuralDefect::RootNotFound(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub defects: Vec<StructuralDefect>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.defects.is_empty()
    }

    pub fn errors(&self) -> Vec<String> {
        self.defects.iter().map(ToString::to_string).collect()
    }
}

/// Report every structural defect in `tree`. Pure: the same tree always
/// yields the same report.
pub fn validate(tree: &DialogTree) -> ValidationReport {
    let mut defects = Vec::new();

    let Some(nodes) = &tree.nodes else {
        defects.push(StructuralDefect::MissingNodes);
        return ValidationReport { defects };
    };
    let Some(root) = &tree.root_node_id else {
        defects.push(StructuralDefect::MissingRootId);
        return ValidationReport { defects };
    };

    if !nodes.has(root) {
        defects.push(StructuralDefect::RootNotFound(root.clone()));
    }

    for (key, node) in nodes.iter() {
        if node.id != key {
            defects.push(StructuralDefect::IdMismatch {
                key: key.to_string(),
                id: node.id.clone(),
            });
        }

        let Some(options) = &node.options else {
            defects.push(StructuralDefect::MissingOptions {
                node: key.to_string(),
            });
            continue;
        };

        for (idx, option) in options.iter().enumerate() {
            for (kind, required, target) in option.action.references() {
                match target {
                    None if required => defects.push(StructuralDefect::MissingReference {
                        node: key.to_string(),
                        option: idx,
                        kind: option.action.type_name(),
                        field: kind.field(),
                    }),
                    None => {}
                    Some(target) if !nodes.has(target) => {
                        defects.push(StructuralDefect::DanglingReference {
                            node: key.to_string(),
                            option: idx,
                            field: kind.field(),
                            target: target.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
    }

    ValidationReport { defects }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::node::{DialogNode, DialogOption, OptionAction, Skill};

    fn talk(id: u32, next: Option<&str>) -> DialogOption {
        DialogOption::new(
            id,
            "Go on",
            OptionAction::Talk {
                next_node_id: next.map(str::to_string),
            },
        )
    }

    #[test]
    fn test_valid_tree_has_no_errors() {
        let tree = DialogTree::new(
            "node_1",
            [
                DialogNode::new("node_1", "Hi").with_option(talk(1, Some("node_2"))),
                DialogNode::new("node_2", "Bye"),
            ],
        );
        let report = validate(&tree);
        assert!(report.is_valid(), "{:?}", report.errors());
    }

    #[test]
    fn test_dangling_talk_is_named() {
        let tree = DialogTree::new(
            "node_1",
            [DialogNode::new("node_1", "Hi").with_option(talk(1, Some("node_99")))],
        );
        let report = validate(&tree);
        assert!(!report.is_valid());
        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("node_1"));
        assert!(errors[0].contains("option 0"));
        assert!(errors[0].contains("node_99"));
    }

    #[test]
    fn test_missing_nodes_short_circuits() {
        let tree = DialogTree {
            root_node_id: Some("node_1".into()),
            nodes: None,
        };
        assert_eq!(validate(&tree).defects, vec![StructuralDefect::MissingNodes]);

        let rootless = DialogTree {
            root_node_id: None,
            nodes: Some(Default::default()),
        };
        assert_eq!(validate(&rootless).defects, vec![StructuralDefect::MissingRootId]);
    }

    #[test]
    fn test_missing_root_keeps_collecting() {
        let tree = DialogTree::new(
            "start",
            [DialogNode::new("node_1", "Hi").with_option(talk(1, None))],
        );
        let defects = validate(&tree).defects;
        assert_eq!(defects.len(), 2);
        assert_eq!(defects[0], StructuralDefect::RootNotFound("start".into()));
        assert!(matches!(defects[1], StructuralDefect::MissingReference { .. }));
        assert!(!defects[0].is_reference_defect());
        assert!(defects[1].is_reference_defect());
    }

    #[test]
    fn test_skill_check_reports_each_missing_field() {
        let tree = DialogTree::new(
            "node_1",
            [DialogNode::new("node_1", "Hmm?").with_option(DialogOption::new(
                1,
                "Persuade",
                OptionAction::SkillCheck {
                    skill: Skill::Persuasion,
                    dc: 15,
                    success_node_id: None,
                    failure_node_id: None,
                },
            ))],
        );
        let errors = validate(&tree).errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("successNodeId"));
        assert!(errors[1].contains("failureNodeId"));
    }

    #[test]
    fn test_missing_options_skips_option_checks() {
        let mut node = DialogNode::new("node_1", "...");
        node.options = None;
        let tree = DialogTree::new("node_1", [node]);
        assert_eq!(
            validate(&tree).defects,
            vec![StructuralDefect::MissingOptions {
                node: "node_1".into()
            }]
        );
    }

    #[test]
    fn test_non_graph_options_need_no_target() {
        let tree = DialogTree::new(
            "node_1",
            [DialogNode::new("node_1", "Well?")
                .with_option(DialogOption::new(1, "Shop", OptionAction::Trade))
                .with_option(DialogOption::new(2, "Fight", OptionAction::Attack))
                .with_option(DialogOption::new(3, "Leave", OptionAction::Leave))],
        );
        assert!(validate(&tree).is_valid());
    }

    #[test]
    fn test_validation_is_repeatable() {
        let tree = DialogTree::new(
            "node_1",
            [DialogNode::new("node_1", "Hi").with_option(talk(1, Some("gone")))],
        );
        assert_eq!(validate(&tree), validate(&tree));
    }
}
