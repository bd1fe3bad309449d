use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dialog::node::DialogNode;

/// Canonical node map for one conversation, keyed by node id. Iteration
/// order is key order, which keeps repair deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NodeStore {
    nodes: BTreeMap<String, DialogNode>,
}

impl NodeStore {
    pub fn get(&self, id: &str) -> Option<&DialogNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut DialogNode> {
        self.nodes.get_mut(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Adds or overwrites the node under `node.id`.
    pub fn insert(&mut self, node: DialogNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DialogNode)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First id that is not already taken by `prefix_<n>`, counting from 1.
    pub fn fresh_id(&self, prefix: &str) -> String {
        (1..)
            .map(|n| format!("{prefix}_{n}"))
            .find(|id| !self.has(id))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Build from untyped generator output. Entries that are not node
    /// objects become empty nodes rather than being lost.
    pub fn from_raw(raw: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut store = NodeStore::default();
        for (key, value) in raw {
            let mut node = match serde_json::from_value::<DialogNode>(value) {
                Ok(node) => node,
                Err(e) => {
                    warn!("Node '{key}' is not a node object ({e}); keeping it empty");
                    DialogNode {
                        options: None,
                        ..DialogNode::new(key.clone(), "")
                    }
                }
            };
            if node.id.is_empty() {
                node.id = key.clone();
            }
            store.nodes.insert(key, node);
        }
        store
    }
}

impl<'de> Deserialize<'de> for NodeStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Ok(NodeStore::from_raw(raw))
    }
}

impl FromIterator<DialogNode> for NodeStore {
    fn from_iter<I: IntoIterator<Item = DialogNode>>(iter: I) -> Self {
        let mut store = NodeStore::default();
        for node in iter {
            store.insert(node);
        }
        store
    }
}

/// A whole conversation graph. Both fields are optional because this type
/// also holds raw generator output, which may lack either.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeStore>,
}

impl DialogTree {
    pub fn new(root_node_id: impl Into<String>, nodes: impl IntoIterator<Item = DialogNode>) -> Self {
        Self {
            root_node_id: Some(root_node_id.into()),
            nodes: Some(nodes.into_iter().collect()),
        }
    }

    /// Decode a generated tree without ever failing: wrong-typed fields
    /// are treated as absent and left for the validator to report.
    pub fn from_generated(value: &Value) -> Self {
        let root_node_id = value
            .get("rootNodeId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let nodes = match value.get("nodes") {
            Some(Value::Object(map)) => Some(NodeStore::from_raw(map.clone())),
            _ => None,
        };
        Self {
            root_node_id,
            nodes,
        }
    }

    pub fn get(&self, id: &str) -> Option<&DialogNode> {
        self.nodes.as_ref()?.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.as_ref().map_or(0, NodeStore::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::node::{DialogOption, OptionAction, Skill};
    use crate::dialog::repair::repair;
    use crate::dialog::validate::validate;
    use serde_json::json;

    #[test]
    fn test_store_insert_overwrites() {
        let mut store = NodeStore::default();
        store.insert(DialogNode::new("a", "first"));
        store.insert(DialogNode::new("a", "second"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().npc_text, "second");
        assert!(store.has("a"));
        assert!(!store.has("b"));
    }

    #[test]
    fn test_fresh_id_skips_taken() {
        let store: NodeStore = [DialogNode::new("fallback_1", "")].into_iter().collect();
        assert_eq!(store.fresh_id("fallback"), "fallback_2");
    }

    #[test]
    fn test_from_generated_tolerates_garbage() {
        let tree = DialogTree::from_generated(&json!({
            "rootNodeId": 7,
            "nodes": {
                "node_1": {"npcText": "Hi", "options": []},
                "node_2": "oops"
            }
        }));
        assert!(tree.root_node_id.is_none());
        assert_eq!(tree.node_count(), 2);
        assert_eq!(tree.get("node_1").unwrap().id, "node_1");
        assert!(tree.get("node_2").unwrap().options.is_none());

        let no_nodes = DialogTree::from_generated(&json!({"rootNodeId": "x", "nodes": []}));
        assert!(no_nodes.nodes.is_none());
    }

    #[test]
    fn test_tree_json_round_trip() {
        let tree = DialogTree::new(
            "node_1",
            [
                DialogNode::new("node_1", "Hail, traveller.")
                    .with_option(DialogOption::new(1, "Hail.", OptionAction::talk("node_2")))
                    .with_option(DialogOption::new(
                        2,
                        "Lie about your name",
                        OptionAction::SkillCheck {
                            skill: Skill::Deception,
                            dc: 12,
                            success_node_id: Some("node_2".into()),
                            failure_node_id: Some("node_1".into()),
                        },
                    ))
                    .with_option(DialogOption::new(3, "Goodbye", OptionAction::Leave)),
                DialogNode::new("node_2", "Safe travels."),
            ],
        );
        let text = serde_json::to_string(&tree).unwrap();
        let back: DialogTree = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn test_repaired_tree_json_round_trip() {
        let mut tree = DialogTree::from_generated(&json!({
            "rootNodeId": "node_1",
            "nodes": {
                "node_1": {"id": "node_1", "npcText": "Who goes there?", "options": [
                    {"text": "A friend", "type": "talk"},
                    {"text": "Bluff", "type": "skill_check", "skill": "Charisma", "dc": "13",
                     "successNodeId": "node_99"},
                    {"text": "Join me", "type": "recruit", "requiresRoll": true},
                    {"text": "Draw steel", "type": "attack"}
                ], "outcome": {"type": "give_quest", "questId": "gate_watch", "goldReward": -2}},
                "node_2": {"id": "wrong", "npcText": "Pass.", "options": "none"}
            }
        }));
        let report = repair(&mut tree);
        assert!(!report.is_clean());
        assert!(validate(&tree).is_valid());

        let text = serde_json::to_string(&tree).unwrap();
        let back: DialogTree = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.node_count(), tree.node_count());
        assert!(!text.contains("node_99"));
    }
}
