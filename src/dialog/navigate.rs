use log::{info, warn};
use thiserror::Error;

use crate::dialog::node::{DialogNode, DialogOption, OptionAction, Outcome, OutcomeKind, Skill};
use crate::dialog::tree::{DialogTree, NodeStore};
use crate::dialog::{expand_node, DialogContext};
use crate::llm::{ChatMessage, Generator};

/// Line shown when the backend could not produce the next node.
pub const FALLBACK_TEXT: &str = "...";

const DEFAULT_RECRUIT_SKILL: Skill = Skill::Persuasion;
const DEFAULT_RECRUIT_DC: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Left,
    Combat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationState {
    AtNode(String),
    /// A roll decides where `option` leads; `from` is the node it was picked at.
    AwaitingRoll { from: String, option: DialogOption },
    /// A generation request is in flight.
    AwaitingGeneration,
    /// Paused in the shop; resumes at `return_to`.
    Trading { return_to: String },
    Ended(EndReason),
}

/// What a single player action produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A node became current. `outcome` is set when it carries an effect.
    Arrived {
        node_id: String,
        outcome: Option<Outcome>,
    },
    RollRequired { skill: Skill, dc: u32 },
    /// A recruit with no target node succeeded; the NPC joins.
    Recruited,
    /// A recruit roll failed with no failure node; nothing moved.
    Refused,
    ShopOpened,
    Ended(EndReason),
}

/// Misuse of the conversation API. Backend failures never show up here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NavError {
    #[error("conversation is not at a node")]
    NotAtNode,
    #[error("no option #{0} at the current node")]
    NoSuchOption(usize),
    #[error("a roll must be resolved first")]
    RollPending,
    #[error("no roll is pending")]
    NoRollPending,
    #[error("the shop is not open")]
    NotTrading,
    #[error("the conversation has ended")]
    Ended,
    #[error("the NPC has nothing more to say")]
    GenerationClosed,
}

/// One conversation with one NPC. Owns its node store; discarded at the end.
pub struct Conversation {
    npc_name: String,
    store: NodeStore,
    state: ConversationState,
    transcript: Vec<ChatMessage>,
    /// Set after a failed expansion: no further backend calls.
    generation_closed: bool,
}

impl Conversation {
    /// Begin at the tree's root. A root that does not resolve falls back to
    /// the first node; an empty tree starts at a fallback node.
    pub fn start(npc_name: impl Into<String>, tree: DialogTree) -> (Self, Step) {
        let store = tree.nodes.unwrap_or_default();
        let mut conversation = Self {
            npc_name: npc_name.into(),
            store,
            state: ConversationState::AwaitingGeneration,
            transcript: Vec::new(),
            generation_closed: false,
        };

        let root = match tree.root_node_id {
            Some(root) if conversation.store.has(&root) => Some(root),
            other => {
                let first = conversation.store.ids().next().map(str::to_string);
                warn!("Root {other:?} not in tree, starting at {first:?}");
                first
            }
        };

        let step = match root {
            Some(root) => conversation.arrive(root),
            None => conversation.fall_back(),
        };
        info!("Conversation with {} started", conversation.npc_name);
        (conversation, step)
    }

    pub fn npc_name(&self) -> &str {
        &self.npc_name
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, ConversationState::Ended(_))
    }

    pub fn generation_closed(&self) -> bool {
        self.generation_closed
    }

    pub fn current_node(&self) -> Option<&DialogNode> {
        match &self.state {
            ConversationState::AtNode(id) | ConversationState::Trading { return_to: id } => {
                self.store.get(id)
            }
            ConversationState::AwaitingRoll { from, .. } => self.store.get(from),
            _ => None,
        }
    }

    fn current_id(&self) -> Result<String, NavError> {
        match &self.state {
            ConversationState::AtNode(id) => Ok(id.clone()),
            ConversationState::AwaitingRoll { .. } => Err(NavError::RollPending),
            ConversationState::Ended(_) => Err(NavError::Ended),
            _ => Err(NavError::NotAtNode),
        }
    }

    /// Pick the option at `index` (position in the node's option list).
    pub fn choose(
        &mut self,
        index: usize,
        generator: &mut dyn Generator,
        ctx: &DialogContext,
    ) -> Result<Step, NavError> {
        let current = self.current_id()?;
        let option = self
            .store
            .get(&current)
            .and_then(|node| node.options().get(index))
            .cloned()
            .ok_or(NavError::NoSuchOption(index))?;

        info!(
            "Player picked '{}' ({}) at {current}",
            option.text,
            option.action.type_name()
        );
        self.transcript.push(ChatMessage::user(&option.text));

        match &option.action {
            OptionAction::Talk { next_node_id } => match self.resolvable(next_node_id) {
                Some(next) => Ok(self.arrive(next)),
                None => self.expand(&current, &option.text, generator, ctx),
            },
            OptionAction::SkillCheck { skill, dc, .. } => {
                let step = Step::RollRequired {
                    skill: *skill,
                    dc: *dc,
                };
                self.await_roll(current, option.clone());
                Ok(step)
            }
            OptionAction::Recruit {
                requires_roll: true,
                skill,
                dc,
                ..
            } => {
                let step = Step::RollRequired {
                    skill: skill.unwrap_or(DEFAULT_RECRUIT_SKILL),
                    dc: dc.unwrap_or(DEFAULT_RECRUIT_DC),
                };
                self.await_roll(current, option.clone());
                Ok(step)
            }
            OptionAction::Recruit { next_node_id, .. } => match self.resolvable(next_node_id) {
                Some(next) => Ok(self.arrive(next)),
                None => Ok(Step::Recruited),
            },
            OptionAction::Trade => {
                self.state = ConversationState::Trading { return_to: current };
                Ok(Step::ShopOpened)
            }
            OptionAction::Attack => Ok(self.end(EndReason::Combat)),
            OptionAction::Leave => Ok(self.end(EndReason::Left)),
        }
    }

    /// Settle a pending roll. The dice themselves live outside the dialog.
    pub fn resolve_roll(
        &mut self,
        success: bool,
        generator: &mut dyn Generator,
        ctx: &DialogContext,
    ) -> Result<Step, NavError> {
        let ConversationState::AwaitingRoll { from, option } = &self.state else {
            return Err(NavError::NoRollPending);
        };
        let (from, option) = (from.clone(), option.clone());
        info!(
            "Roll for '{}' {}",
            option.text,
            if success { "succeeded" } else { "failed" }
        );
        self.state = ConversationState::AtNode(from.clone());

        match &option.action {
            OptionAction::SkillCheck {
                success_node_id,
                failure_node_id,
                ..
            } => {
                let target = if success { success_node_id } else { failure_node_id };
                match self.resolvable(target) {
                    Some(next) => Ok(self.arrive(next)),
                    None => {
                        let trigger = format!(
                            "{} ({})",
                            option.text,
                            if success { "success" } else { "failure" }
                        );
                        self.expand(&from, &trigger, generator, ctx)
                    }
                }
            }
            OptionAction::Recruit {
                success_node_id,
                failure_node_id,
                ..
            } => {
                let target = if success { success_node_id } else { failure_node_id };
                match (self.resolvable(target), success) {
                    (Some(next), _) => Ok(self.arrive(next)),
                    (None, true) => Ok(Step::Recruited),
                    (None, false) => Ok(Step::Refused),
                }
            }
            _ => Ok(Step::Refused),
        }
    }

    /// Free-form player input: always answered by a generated node.
    pub fn say(
        &mut self,
        input: &str,
        generator: &mut dyn Generator,
        ctx: &DialogContext,
    ) -> Result<Step, NavError> {
        let current = self.current_id()?;
        if self.generation_closed {
            return Err(NavError::GenerationClosed);
        }
        self.transcript.push(ChatMessage::user(input));
        self.expand(&current, input, generator, ctx)
    }

    pub fn close_shop(&mut self) -> Result<Step, NavError> {
        match &self.state {
            ConversationState::Trading { return_to } => {
                let return_to = return_to.clone();
                self.state = ConversationState::AtNode(return_to.clone());
                Ok(Step::Arrived {
                    node_id: return_to,
                    outcome: None,
                })
            }
            _ => Err(NavError::NotTrading),
        }
    }

    /// Walk away. Allowed anywhere except mid-roll.
    pub fn leave(&mut self) -> Result<Step, NavError> {
        match self.state {
            ConversationState::AwaitingRoll { .. } => Err(NavError::RollPending),
            ConversationState::Ended(_) => Err(NavError::Ended),
            _ => Ok(self.end(EndReason::Left)),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn resolvable(&self, target: &Option<String>) -> Option<String> {
        target.as_ref().filter(|id| self.store.has(id)).cloned()
    }

    fn await_roll(&mut self, from: String, option: DialogOption) {
        self.state = ConversationState::AwaitingRoll { from, option };
    }

    fn end(&mut self, reason: EndReason) -> Step {
        info!("Conversation with {} ended: {reason:?}", self.npc_name);
        self.state = ConversationState::Ended(reason);
        Step::Ended(reason)
    }

    /// Make `node_id` current and report its outcome. Combat and trade
    /// outcomes also move the conversation out of the node.
    fn arrive(&mut self, node_id: String) -> Step {
        let Some(node) = self.store.get(&node_id) else {
            return self.fall_back();
        };
        info!("Now at node {node_id} (terminal={})", node.is_terminal());
        self.transcript.push(ChatMessage::assistant(&node.npc_text));
        let outcome = node.outcome.clone().filter(|o| !o.is_noop());

        self.state = match outcome.as_ref().map(|o| o.kind) {
            Some(OutcomeKind::StartCombat) => ConversationState::Ended(EndReason::Combat),
            Some(OutcomeKind::StartTrade) => ConversationState::Trading {
                return_to: node_id.clone(),
            },
            _ => ConversationState::AtNode(node_id.clone()),
        };
        Step::Arrived { node_id, outcome }
    }

    fn expand(
        &mut self,
        from: &str,
        input: &str,
        generator: &mut dyn Generator,
        ctx: &DialogContext,
    ) -> Result<Step, NavError> {
        if self.generation_closed {
            return Ok(self.fall_back());
        }

        self.state = ConversationState::AwaitingGeneration;
        match expand_node(generator, ctx, &self.store, from, &self.transcript, input) {
            Ok(node) => {
                let id = node.id.clone();
                self.store.insert(node);
                Ok(self.arrive(id))
            }
            Err(e) => {
                warn!("Expansion failed, ending with fallback node: {e}");
                Ok(self.fall_back())
            }
        }
    }

    /// Insert and move to a terminal apology node; no more generation.
    fn fall_back(&mut self) -> Step {
        self.generation_closed = true;
        let id = self.store.fresh_id("fallback");
        self.store.insert(DialogNode::new(id.clone(), FALLBACK_TEXT));
        self.arrive(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::testing::ScriptedGenerator;
    use crate::llm::GenerationError;
    use crate::world::{GameState, Npc};
    use serde_json::json;

    fn sample_tree() -> DialogTree {
        DialogTree::new(
            "node_1",
            [
                DialogNode::new("node_1", "Welcome to the Rusty Tankard.")
                    .with_option(DialogOption::new(1, "Any rumours?", OptionAction::talk("node_2")))
                    .with_option(DialogOption::new(
                        2,
                        "Tell me your secrets",
                        OptionAction::SkillCheck {
                            skill: Skill::Persuasion,
                            dc: 15,
                            success_node_id: Some("node_3".into()),
                            failure_node_id: Some("node_4".into()),
                        },
                    ))
                    .with_option(DialogOption::new(
                        3,
                        "What about the mill?",
                        OptionAction::Talk { next_node_id: None },
                    ))
                    .with_option(DialogOption::new(4, "Show me your wares", OptionAction::Trade))
                    .with_option(DialogOption::new(5, "Draw steel", OptionAction::Attack))
                    .with_option(DialogOption::new(6, "Goodbye", OptionAction::Leave)),
                DialogNode::new("node_2", "Wolves in the hills.")
                    .with_option(DialogOption::new(1, "Back", OptionAction::talk("node_1"))),
                DialogNode::new("node_3", "Take this key.").with_outcome(Outcome {
                    item_name: Some("Cellar Key".into()),
                    ..Outcome::of(OutcomeKind::GiveItem)
                }),
                DialogNode::new("node_4", "Nice try."),
            ],
        )
    }

    fn world() -> (GameState, Npc) {
        let state = GameState::default();
        let npc = state.npc("Bren");
        (state, npc)
    }

    #[test]
    fn test_start_at_root() {
        let (conv, step) = Conversation::start("Bren", sample_tree());
        assert_eq!(
            step,
            Step::Arrived {
                node_id: "node_1".into(),
                outcome: None
            }
        );
        assert_eq!(&conv.state, &ConversationState::AtNode("node_1".into()));
        assert_eq!(conv.transcript().len(), 1);
    }

    #[test]
    fn test_talk_moves_to_target() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, _) = Conversation::start("Bren", sample_tree());

        let step = conv.choose(0, &mut generator, &ctx).unwrap();
        assert!(matches!(step, Step::Arrived { ref node_id, .. } if node_id == "node_2"));
        assert_eq!(conv.current_node().unwrap().npc_text, "Wolves in the hills.");
        assert_eq!(generator.calls, 0);
    }

    #[test]
    fn test_skill_check_waits_for_roll() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, _) = Conversation::start("Bren", sample_tree());

        let step = conv.choose(1, &mut generator, &ctx).unwrap();
        assert_eq!(
            step,
            Step::RollRequired {
                skill: Skill::Persuasion,
                dc: 15
            }
        );
        assert_eq!(conv.leave(), Err(NavError::RollPending));
        assert_eq!(
            conv.choose(0, &mut generator, &ctx),
            Err(NavError::RollPending)
        );

        let step = conv.resolve_roll(true, &mut generator, &ctx).unwrap();
        let Step::Arrived {
            node_id,
            outcome: Some(outcome),
        } = step
        else {
            panic!("expected arrival with outcome");
        };
        assert_eq!(node_id, "node_3");
        assert_eq!(outcome.kind, OutcomeKind::GiveItem);
    }

    #[test]
    fn test_failed_roll_goes_to_failure_node() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, _) = Conversation::start("Bren", sample_tree());
        conv.choose(1, &mut generator, &ctx).unwrap();
        let step = conv.resolve_roll(false, &mut generator, &ctx).unwrap();
        assert!(matches!(step, Step::Arrived { ref node_id, .. } if node_id == "node_4"));
        assert_eq!(
            conv.resolve_roll(false, &mut generator, &ctx),
            Err(NavError::NoRollPending)
        );
    }

    #[test]
    fn test_missing_target_expands() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::new([Ok(json!({
            "newNodeId": "custom_mill",
            "npcText": "Burned down, they say. Nobody knows who did it.",
            "options": [{"id": 1, "text": "Who would know?", "type": "talk"}]
        }))]);
        let (mut conv, _) = Conversation::start("Bren", sample_tree());

        let step = conv.choose(2, &mut generator, &ctx).unwrap();
        assert!(matches!(step, Step::Arrived { ref node_id, .. } if node_id == "custom_mill"));
        assert!(conv.store.has("custom_mill"));
        assert_eq!(generator.calls, 1);
        assert!(!conv.generation_closed());
    }

    #[test]
    fn test_expansion_failure_falls_back_once() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::new([Err(GenerationError::BackendUnavailable(
            "connection refused".into(),
        ))]);
        let (mut conv, _) = Conversation::start("Bren", sample_tree());

        let step = conv.choose(2, &mut generator, &ctx).unwrap();
        let Step::Arrived { node_id, outcome } = step else {
            panic!("expected fallback arrival");
        };
        assert!(outcome.is_none());
        let node = conv.current_node().unwrap();
        assert_eq!(node.id, node_id);
        assert_eq!(node.npc_text, FALLBACK_TEXT);
        assert!(node.options().is_empty());
        assert_eq!(generator.calls, 1);

        // No further backend traffic; leaving still works.
        assert_eq!(
            conv.say("Hello?", &mut generator, &ctx),
            Err(NavError::GenerationClosed)
        );
        assert_eq!(generator.calls, 1);
        assert_eq!(conv.leave(), Ok(Step::Ended(EndReason::Left)));
    }

    #[test]
    fn test_free_text_always_expands() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::new([Ok(json!({
            "newNodeId": "custom_1",
            "npcText": "Ha! Good one.",
            "options": []
        }))]);
        let (mut conv, _) = Conversation::start("Bren", sample_tree());
        let step = conv.say("Tell me a joke", &mut generator, &ctx).unwrap();
        assert!(matches!(step, Step::Arrived { ref node_id, .. } if node_id == "custom_1"));
        assert!(generator
            .last_messages
            .iter()
            .any(|m| m.content == "Tell me a joke"));
    }

    #[test]
    fn test_trade_pauses_and_resumes() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, _) = Conversation::start("Bren", sample_tree());

        assert_eq!(conv.choose(3, &mut generator, &ctx), Ok(Step::ShopOpened));
        assert_eq!(
            conv.choose(0, &mut generator, &ctx),
            Err(NavError::NotAtNode)
        );
        assert_eq!(
            conv.close_shop(),
            Ok(Step::Arrived {
                node_id: "node_1".into(),
                outcome: None,
            })
        );
        assert_eq!(&conv.state, &ConversationState::AtNode("node_1".into()));
        assert_eq!(conv.close_shop(), Err(NavError::NotTrading));
    }

    #[test]
    fn test_attack_and_leave_end() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();

        let (mut conv, _) = Conversation::start("Bren", sample_tree());
        assert_eq!(
            conv.choose(4, &mut generator, &ctx),
            Ok(Step::Ended(EndReason::Combat))
        );
        assert!(conv.is_ended());
        assert_eq!(conv.leave(), Err(NavError::Ended));

        let (mut conv, _) = Conversation::start("Bren", sample_tree());
        assert_eq!(
            conv.choose(5, &mut generator, &ctx),
            Ok(Step::Ended(EndReason::Left))
        );
    }

    #[test]
    fn test_outcome_fires_on_every_visit() {
        let tree = DialogTree::new(
            "a",
            [
                DialogNode::new("a", "Here's a coin.")
                    .with_outcome(Outcome {
                        gold_reward: Some(1),
                        ..Outcome::default()
                    })
                    .with_option(DialogOption::new(1, "Again", OptionAction::talk("a"))),
            ],
        );
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, first) = Conversation::start("Bren", tree);
        assert!(matches!(first, Step::Arrived { outcome: Some(_), .. }));
        let again = conv.choose(0, &mut generator, &ctx).unwrap();
        assert!(matches!(again, Step::Arrived { outcome: Some(_), .. }));
    }

    #[test]
    fn test_combat_outcome_ends_conversation() {
        let tree = DialogTree::new(
            "a",
            [DialogNode::new("a", "You'll regret that!")
                .with_outcome(Outcome::of(OutcomeKind::StartCombat))],
        );
        let (conv, step) = Conversation::start("Bren", tree);
        assert!(matches!(step, Step::Arrived { outcome: Some(_), .. }));
        assert_eq!(&conv.state, &ConversationState::Ended(EndReason::Combat));
    }

    #[test]
    fn test_recruit_without_target_or_roll() {
        let tree = DialogTree::new(
            "a",
            [DialogNode::new("a", "Need a sword arm?")
                .with_option(DialogOption::new(
                    1,
                    "Join us",
                    OptionAction::Recruit {
                        requires_roll: false,
                        skill: None,
                        dc: None,
                        next_node_id: None,
                        success_node_id: None,
                        failure_node_id: None,
                    },
                ))
                .with_option(DialogOption::new(
                    2,
                    "Convince them",
                    OptionAction::Recruit {
                        requires_roll: true,
                        skill: None,
                        dc: Some(14),
                        next_node_id: None,
                        success_node_id: None,
                        failure_node_id: None,
                    },
                ))],
        );
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, _) = Conversation::start("Bren", tree);
        assert_eq!(conv.choose(0, &mut generator, &ctx), Ok(Step::Recruited));
        assert_eq!(
            conv.choose(1, &mut generator, &ctx),
            Ok(Step::RollRequired {
                skill: Skill::Persuasion,
                dc: 14
            })
        );
        assert_eq!(
            conv.resolve_roll(false, &mut generator, &ctx),
            Ok(Step::Refused)
        );
        assert_eq!(&conv.state, &ConversationState::AtNode("a".into()));
    }

    #[test]
    fn test_missing_root_starts_at_first_node() {
        let mut tree = sample_tree();
        tree.root_node_id = Some("nowhere".into());
        let (conv, step) = Conversation::start("Bren", tree);
        assert!(matches!(step, Step::Arrived { ref node_id, .. } if node_id == "node_1"));
        assert!(!conv.generation_closed());
    }

    #[test]
    fn test_empty_tree_starts_at_fallback() {
        let (conv, _) = Conversation::start("Bren", DialogTree::default());
        assert!(conv.generation_closed());
        assert_eq!(conv.current_node().unwrap().npc_text, FALLBACK_TEXT);
    }

    #[test]
    fn test_bad_option_index() {
        let (state, npc) = world();
        let ctx = DialogContext::new(&state, &npc);
        let mut generator = ScriptedGenerator::unavailable();
        let (mut conv, _) = Conversation::start("Bren", sample_tree());
        assert_eq!(
            conv.choose(42, &mut generator, &ctx),
            Err(NavError::NoSuchOption(42))
        );
    }
}
