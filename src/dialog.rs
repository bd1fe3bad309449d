pub mod navigate;
pub mod node;
pub mod outcome;
pub mod prompt;
pub mod repair;
pub mod tree;
pub mod validate;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{ChatMessage, GenerationError, Generator};
use crate::world::{GameState, Npc};

use node::DialogNode;
use tree::{DialogTree, NodeStore};

#[derive(Debug, Error)]
pub enum DialogError {
    #[error("{0} is dead and cannot be spoken to")]
    NpcUnavailable(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("generated tree has no nodes")]
    MissingNodes,
}

/// Read-only view of the world a conversation happens in.
#[derive(Clone, Copy)]
pub struct DialogContext<'a> {
    pub state: &'a GameState,
    pub npc: &'a Npc,
}

impl<'a> DialogContext<'a> {
    pub fn new(state: &'a GameState, npc: &'a Npc) -> Self {
        Self { state, npc }
    }
}

// ---------------------------------------------------------------------------
// Tree generation
// ---------------------------------------------------------------------------

/// Generate, repair and check a fresh tree for a conversation with
/// `ctx.npc`. Residual defects are logged, not returned.
pub fn generate_tree(
    generator: &mut dyn Generator,
    ctx: &DialogContext,
) -> Result<DialogTree, DialogError> {
    if ctx.state.is_dead(&ctx.npc.name) {
        warn!("Refusing to open a conversation with dead NPC {}", ctx.npc.name);
        return Err(DialogError::NpcUnavailable(ctx.npc.name.clone()));
    }

    info!(
        "Generating dialog tree for {} with {}",
        ctx.npc.name,
        generator.model_name()
    );
    let raw = generator.generate(&prompt::tree_messages(ctx), &prompt::tree_schema())?;
    debug!("Raw tree: {raw}");

    let mut tree = DialogTree::from_generated(&raw);
    if tree.nodes.as_ref().map_or(true, NodeStore::is_empty) {
        warn!("Generated tree for {} has no nodes", ctx.npc.name);
        return Err(DialogError::MissingNodes);
    }

    let before = validate::validate(&tree);
    if !before.is_valid() {
        warn!(
            "Generated tree has {} defect(s): {:?}",
            before.defects.len(),
            before.errors()
        );
    }

    let report = repair::repair(&mut tree);
    let after = validate::validate(&tree);
    if after.is_valid() {
        info!(
            "Dialog tree ready: {} nodes, root {:?} ({report:?})",
            tree.node_count(),
            tree.root_node_id
        );
    } else {
        let (broken, other): (Vec<_>, Vec<_>) = after
            .defects
            .iter()
            .partition(|d| d.is_reference_defect());
        if !broken.is_empty() {
            warn!("Dialog tree still has broken references after repair: {broken:?}");
        }
        if !other.is_empty() {
            info!("Dialog tree will start without its declared root: {other:?}");
        }
    }

    Ok(tree)
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Generate the node that answers `input` at `current_id`. The returned
/// node's id is unique within `store`.
pub fn expand_node(
    generator: &mut dyn Generator,
    ctx: &DialogContext,
    store: &NodeStore,
    current_id: &str,
    transcript: &[ChatMessage],
    input: &str,
) -> Result<DialogNode, GenerationError> {
    info!("Expanding dialog at '{current_id}' for input \"{input}\"");
    let messages = prompt::expansion_messages(ctx, store.get(current_id), transcript, input);
    let raw = generator.generate(&messages, &prompt::expansion_schema())?;
    debug!("Raw expansion: {raw}");

    let mut node = decode_expansion(raw)?;
    if node.id.is_empty() || store.has(&node.id) {
        let fresh = store.fresh_id("custom");
        debug!("Expansion id '{}' unusable, using '{fresh}'", node.id);
        node.id = fresh;
    }
    if node.options.is_none() {
        node.options = Some(Vec::new());
    }
    Ok(node)
}

fn decode_expansion(raw: Value) -> Result<DialogNode, GenerationError> {
    let mut map = match raw {
        Value::Object(map) => map,
        other => {
            return Err(GenerationError::MalformedResponse(format!(
                "expansion is not an object: {other}"
            )))
        }
    };
    if !map.get("npcText").is_some_and(Value::is_string) {
        return Err(GenerationError::MalformedResponse(
            "expansion has no npcText".into(),
        ));
    }
    let id = map.remove("newNodeId").unwrap_or(Value::Null);
    map.insert(
        "id".into(),
        Value::String(id.as_str().unwrap_or_default().to_string()),
    );
    serde_json::from_value(Value::Object(map))
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Closing summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary: String,
    #[serde(default)]
    pub relationship_change: i32,
}

/// Summarize a finished conversation. Never fails: without the backend a
/// plain local summary with no relationship change is returned.
pub fn summarize(
    generator: &mut dyn Generator,
    ctx: &DialogContext,
    transcript: &[ChatMessage],
) -> Summary {
    let fallback = || Summary {
        summary: format!(
            "Spoke briefly with {} ({} exchanges).",
            ctx.state.player.name,
            transcript.iter().filter(|m| m.role == "user").count()
        ),
        relationship_change: 0,
    };

    if transcript.is_empty() {
        return fallback();
    }

    let messages = prompt::summary_messages(ctx, transcript);
    match generator
        .generate(&messages, &prompt::summary_schema())
        .and_then(|v| {
            serde_json::from_value::<Summary>(v)
                .map_err(|e| GenerationError::MalformedResponse(e.to_string()))
        }) {
        Ok(summary) => {
            info!("Conversation summary: {summary:?}");
            summary
        }
        Err(e) => {
            warn!("Summary generation failed: {e}");
            fallback()
        }
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
