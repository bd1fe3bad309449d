use log::{info, warn};

use crate::dialog::node::{Outcome, OutcomeKind};
use crate::world::{GameState, Item, Npc, PartyMember};

/// Control leaves the conversation for another subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Combat,
    Trade,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeReport {
    /// Player-facing lines describing what changed.
    pub messages: Vec<String>,
    pub handoff: Option<Handoff>,
}

/// Apply an outcome to the game state. Called once per arrival at a node,
/// so revisiting a rewarding node rewards again.
pub fn apply(outcome: &Outcome, npc: &Npc, state: &mut GameState) -> OutcomeReport {
    let mut report = OutcomeReport::default();
    info!("Applying outcome {:?} from {}", outcome.kind, npc.name);

    match outcome.kind {
        OutcomeKind::Continue => {}
        OutcomeKind::JoinParty => {
            if state.in_party(&npc.name) {
                report
                    .messages
                    .push(format!("{} is already travelling with you.", npc.name));
            } else {
                state.party.push(PartyMember::from_npc(npc));
                report.messages.push(format!("{} joins your party!", npc.name));
            }
        }
        OutcomeKind::GiveQuest => match outcome.quest_id.as_deref().filter(|q| !q.is_empty()) {
            Some(quest) if state.active_quests.iter().any(|q| q == quest) => {
                report.messages.push(format!("Quest already active: {quest}"));
            }
            Some(quest) => {
                state.active_quests.push(quest.to_string());
                report.messages.push(format!("New quest: {quest}"));
            }
            None => warn!("give_quest outcome without a questId"),
        },
        OutcomeKind::GiveItem => match outcome.item_name.as_deref().filter(|i| !i.is_empty()) {
            Some(item) => {
                state.player.inventory.push(Item {
                    name: item.to_string(),
                    description: format!("A gift from {}.", npc.name),
                });
                report.messages.push(format!("Received: {item}"));
            }
            None => warn!("give_item outcome without an itemName"),
        },
        OutcomeKind::StartCombat => {
            report.messages.push(format!("{} attacks!", npc.name));
            report.handoff = Some(Handoff::Combat);
        }
        OutcomeKind::StartTrade => {
            report
                .messages
                .push(format!("{} shows you their wares.", npc.name));
            report.handoff = Some(Handoff::Trade);
        }
    }

    if let Some(gold) = outcome.gold_reward.filter(|g| *g != 0) {
        state.player.gold = state.player.gold.saturating_add_signed(gold);
        report.messages.push(format!("{gold:+} gold"));
    }
    if let Some(xp) = outcome.xp_reward.filter(|x| *x != 0) {
        state.player.xp = state.player.xp.saturating_add_signed(xp);
        report.messages.push(format!("{xp:+} XP"));
    }
    if let Some(delta) = outcome.relationship_change.filter(|d| *d != 0) {
        let now = state.adjust_relationship(&npc.name, delta);
        let word = if delta > 0 { "improves" } else { "worsens" };
        report
            .messages
            .push(format!("Your standing with {} {word} ({now}).", npc.name));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npc() -> Npc {
        Npc {
            name: "Mira".into(),
            ..Npc::default()
        }
    }

    #[test]
    fn test_join_party_appends_member_once() {
        let mut state = GameState::default();
        let report = apply(&Outcome::of(OutcomeKind::JoinParty), &npc(), &mut state);
        assert_eq!(state.party.len(), 1);
        assert_eq!(state.party[0].name, "Mira");
        assert!(report.handoff.is_none());

        apply(&Outcome::of(OutcomeKind::JoinParty), &npc(), &mut state);
        assert_eq!(state.party.len(), 1);
    }

    #[test]
    fn test_quest_and_item() {
        let mut state = GameState::default();
        let quest = Outcome {
            quest_id: Some("missing_cart".into()),
            ..Outcome::of(OutcomeKind::GiveQuest)
        };
        apply(&quest, &npc(), &mut state);
        assert_eq!(state.active_quests, vec!["missing_cart".to_string()]);

        let item = Outcome {
            item_name: Some("Silver Ring".into()),
            ..Outcome::of(OutcomeKind::GiveItem)
        };
        apply(&item, &npc(), &mut state);
        assert_eq!(state.player.inventory.last().unwrap().name, "Silver Ring");
    }

    #[test]
    fn test_rewards_apply_regardless_of_kind_and_on_every_visit() {
        let mut state = GameState::default();
        let gold_before = state.player.gold;
        let outcome = Outcome {
            gold_reward: Some(5),
            xp_reward: Some(20),
            relationship_change: Some(-3),
            ..Outcome::of(OutcomeKind::StartTrade)
        };
        let report = apply(&outcome, &npc(), &mut state);
        assert_eq!(report.handoff, Some(Handoff::Trade));
        apply(&outcome, &npc(), &mut state);

        assert_eq!(state.player.gold, gold_before + 10);
        assert_eq!(state.player.xp, 40);
        assert_eq!(state.relationship("Mira"), -6);
    }

    #[test]
    fn test_payment_takes_gold_but_never_below_zero() {
        let mut state = GameState::default();
        state.player.gold = 10;
        let bribe = Outcome {
            gold_reward: Some(-5),
            relationship_change: Some(-10),
            ..Outcome::default()
        };
        let report = apply(&bribe, &npc(), &mut state);
        assert_eq!(state.player.gold, 5);
        assert_eq!(state.relationship("Mira"), -10);
        assert!(report.messages.contains(&"-5 gold".to_string()));

        apply(
            &Outcome {
                gold_reward: Some(-50),
                ..Outcome::default()
            },
            &npc(),
            &mut state,
        );
        assert_eq!(state.player.gold, 0);
    }

    #[test]
    fn test_combat_hands_off() {
        let mut state = GameState::default();
        let report = apply(&Outcome::of(OutcomeKind::StartCombat), &npc(), &mut state);
        assert_eq!(report.handoff, Some(Handoff::Combat));
    }
}
