use serde_json::{json, Value};

use crate::dialog::node::{DialogNode, Skill};
use crate::dialog::DialogContext;
use crate::llm::ChatMessage;

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

const OPTION_TYPES: [&str; 6] = ["talk", "skill_check", "trade", "recruit", "attack", "leave"];
const OUTCOME_TYPES: [&str; 6] = [
    "continue",
    "start_combat",
    "start_trade",
    "join_party",
    "give_quest",
    "give_item",
];

fn skill_names() -> Vec<&'static str> {
    Skill::ALL.iter().map(|s| s.name()).collect()
}

fn option_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "integer"},
            "text": {"type": "string"},
            "type": {"type": "string", "enum": OPTION_TYPES},
            "nextNodeId": {"type": "string"},
            "skill": {"type": "string", "enum": skill_names()},
            "dc": {"type": "integer"},
            "successNodeId": {"type": "string"},
            "failureNodeId": {"type": "string"},
            "requiresRoll": {"type": "boolean"}
        },
        "required": ["id", "text", "type"]
    })
}

fn outcome_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": {"type": "string", "enum": OUTCOME_TYPES},
            "relationshipChange": {"type": "integer"},
            "questId": {"type": "string"},
            "itemName": {"type": "string"},
            "goldReward": {"type": "integer"},
            "xpReward": {"type": "integer"}
        },
        "required": ["type"]
    })
}

fn node_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "npcText": {"type": "string"},
            "isTerminal": {"type": "boolean"},
            "options": {"type": "array", "items": option_schema()},
            "outcome": outcome_schema()
        },
        "required": ["id", "npcText", "options"]
    })
}

pub fn tree_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "rootNodeId": {"type": "string"},
            "nodes": {"type": "object", "additionalProperties": node_schema()}
        },
        "required": ["rootNodeId", "nodes"]
    })
}

pub fn expansion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "newNodeId": {"type": "string"},
            "npcText": {"type": "string"},
            "isTerminal": {"type": "boolean"},
            "options": {"type": "array", "items": option_schema()},
            "outcome": outcome_schema()
        },
        "required": ["newNodeId", "npcText", "options"]
    })
}

pub fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "relationshipChange": {"type": "integer"}
        },
        "required": ["summary", "relationshipChange"]
    })
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

const GAME_MASTER_PROMPT: &str = "\
You are the game master of a fantasy tabletop RPG, voicing a single non-player character (NPC). \
Stay in character, keep lines short, and never speak for the player.";

const OPTION_RULES: &str = "\
Option types:
- talk: continue the conversation; set nextNodeId.
- skill_check: the player attempts a skill; set skill, dc (5-25), successNodeId and failureNodeId.
- trade: open the NPC's shop.
- recruit: ask the NPC to join the party; set requiresRoll with skill and dc if it needs convincing.
- attack: start a fight.
- leave: end the conversation.
Outcome types (optional, fired when a node is reached): continue, start_combat, start_trade, \
join_party, give_quest (questId), give_item (itemName); any outcome may add goldReward, xpReward \
and relationshipChange.";

/// Everything the model should know about who is talking to whom.
fn describe_scene(ctx: &DialogContext) -> String {
    let state = ctx.state;
    let player = &state.player;
    let npc = ctx.npc;

    let mut s = format!(
        "NPC: {} ({} {}). Personality: {}.\n",
        npc.name, npc.race, npc.occupation, npc.personality
    );
    s.push_str(&format!(
        "Player: {}, level {} {} {}.\n",
        player.name, player.level, player.race, player.class
    ));
    if !state.party.is_empty() {
        let names: Vec<&str> = state.party.iter().map(|m| m.name.as_str()).collect();
        s.push_str(&format!("Party: {}.\n", names.join(", ")));
    }
    if !state.location.is_empty() {
        s.push_str(&format!("Location: {}.\n", state.location));
    }
    s.push_str(&format!(
        "Relationship with the player: {} (from -100 hostile to 100 devoted).\n",
        state.relationship(&npc.name)
    ));
    if !state.active_quests.is_empty() {
        s.push_str(&format!("Active quests: {}.\n", state.active_quests.join(", ")));
    }
    if !npc.memories.is_empty() {
        s.push_str("Earlier conversations:\n");
        for memory in &npc.memories {
            s.push_str(&format!("- {memory}\n"));
        }
    }
    s
}

/// Messages for generating a whole conversation tree.
pub fn tree_messages(ctx: &DialogContext) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "{GAME_MASTER_PROMPT}\n\n\
             Write a branching conversation as a dialog tree of 10 to 15 nodes. \
             Use ids node_1, node_2, ... and start at node_1. Every node needs npcText and a list \
             of 2 to 4 player options; ending nodes may have only leave options. \
             Every nextNodeId, successNodeId and failureNodeId must name a node in the tree.\n\n\
             {OPTION_RULES}"
        )),
        ChatMessage::user(format!(
            "{}\nThe player approaches {}. Write the dialog tree.",
            describe_scene(ctx),
            ctx.npc.name
        )),
    ]
}

/// Messages for generating the single node that answers `input`.
pub fn expansion_messages(
    ctx: &DialogContext,
    current: Option<&DialogNode>,
    transcript: &[ChatMessage],
    input: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(format!(
        "{GAME_MASTER_PROMPT}\n\n\
         The player said something the prepared conversation does not cover. Write the NPC's \
         next node: its npcText replies to the player, and its options (1 to 4) let the \
         conversation go on. Give it a short unique newNodeId.\n\n\
         {OPTION_RULES}\n\n{}",
        describe_scene(ctx)
    ))];

    messages.extend(transcript.iter().cloned());

    if let Some(node) = current {
        let offered: Vec<&str> = node.options().iter().map(|o| o.text.as_str()).collect();
        if !offered.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Options that were on offer: {}",
                offered.join(" | ")
            )));
        }
    }

    // The triggering input is usually the last transcript turn already.
    let already_last = transcript
        .last()
        .is_some_and(|m| m.role == "user" && m.content == input);
    if !already_last {
        messages.push(ChatMessage::user(input));
    }
    messages
}

/// Messages for the closing summary of a finished conversation.
pub fn summary_messages(ctx: &DialogContext, transcript: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut lines = String::new();
    for turn in transcript {
        let speaker = if turn.role == "assistant" {
            ctx.npc.name.as_str()
        } else {
            ctx.state.player.name.as_str()
        };
        lines.push_str(&format!("{speaker}: {}\n", turn.content));
    }

    vec![
        ChatMessage::system(format!(
            "Summarize this conversation between {} and {} in one or two sentences from the \
             NPC's point of view, and rate how it changed the NPC's opinion of the player \
             as relationshipChange between -10 and 10.",
            ctx.npc.name, ctx.state.player.name
        )),
        ChatMessage::user(lines),
    ]
}
