use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::dialog::node::Ability;

pub const RELATIONSHIP_MIN: i32 = -100;
pub const RELATIONSHIP_MAX: i32 = 100;

// ---------------------------------------------------------------------------
// Ability scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

impl AbilityScores {
    pub fn score(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    /// Standard d20 modifier: (score - 10) / 2, rounded down.
    pub fn modifier(&self, ability: Ability) -> i32 {
        (self.score(ability) - 10).div_euclid(2)
    }
}

/// Scores as an NPC sheet presents them; any may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialScores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dexterity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constitution: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intelligence: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wisdom: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charisma: Option<i32>,
}

impl PartialScores {
    pub fn or_defaults(&self) -> AbilityScores {
        let d = AbilityScores::default();
        AbilityScores {
            strength: self.strength.unwrap_or(d.strength),
            dexterity: self.dexterity.unwrap_or(d.dexterity),
            constitution: self.constitution.unwrap_or(d.constitution),
            intelligence: self.intelligence.unwrap_or(d.intelligence),
            wisdom: self.wisdom.unwrap_or(d.wisdom),
            charisma: self.charisma.unwrap_or(d.charisma),
        }
    }
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerCharacter {
    pub name: String,
    pub race: String,
    pub class: String,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub gold: u32,
    pub xp: u32,
    pub abilities: AbilityScores,
    pub inventory: Vec<Item>,
}

impl Default for PlayerCharacter {
    fn default() -> Self {
        Self {
            name: "Adventurer".into(),
            race: "Human".into(),
            class: "Fighter".into(),
            level: 1,
            hp: 10,
            max_hp: 10,
            gold: 10,
            xp: 0,
            abilities: AbilityScores::default(),
            inventory: Vec::new(),
        }
    }
}

/// Stats an NPC sheet may present; gaps are filled when the NPC joins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NpcStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hp: Option<i32>,
    pub abilities: PartialScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Npc {
    pub name: String,
    pub race: String,
    pub occupation: String,
    pub personality: String,
    pub stats: NpcStats,
    /// Summaries of earlier conversations, oldest first.
    pub memories: Vec<String>,
}

impl Default for Npc {
    fn default() -> Self {
        Self {
            name: "Stranger".into(),
            race: "Human".into(),
            occupation: "commoner".into(),
            personality: "guarded but polite".into(),
            stats: NpcStats::default(),
            memories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyMember {
    pub name: String,
    pub race: String,
    pub class: String,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub abilities: AbilityScores,
}

impl PartyMember {
    /// Build a companion record from whatever the NPC sheet provides.
    pub fn from_npc(npc: &Npc) -> Self {
        let abilities = npc.stats.abilities.or_defaults();
        let level = npc.stats.level.unwrap_or(1).max(1);
        let hp = npc
            .stats
            .hp
            .unwrap_or(8 + abilities.modifier(Ability::Constitution) * level as i32)
            .max(1);
        Self {
            name: npc.name.clone(),
            race: npc.race.clone(),
            class: npc.stats.class.clone().unwrap_or_else(|| "Commoner".into()),
            level,
            hp,
            max_hp: hp,
            abilities,
        }
    }
}

// ---------------------------------------------------------------------------
// Game state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameState {
    pub player: PlayerCharacter,
    pub party: Vec<PartyMember>,
    pub location: String,
    pub npcs: BTreeMap<String, Npc>,
    pub dead_npcs: Vec<String>,
    pub active_quests: Vec<String>,
    /// Relationship score per NPC name, in [-100, 100].
    pub relationships: BTreeMap<String, i32>,
}

impl GameState {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read save file {}", path.display()))?;
        let state = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse save file {}", path.display()))?;
        info!("Loaded game state from {}", path.display());
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("failed to serialize game state")?;
        fs::write(path, text)
            .with_context(|| format!("failed to write save file {}", path.display()))?;
        info!("Saved game state to {}", path.display());
        Ok(())
    }

    pub fn is_dead(&self, npc_name: &str) -> bool {
        self.dead_npcs
            .iter()
            .any(|dead| dead.eq_ignore_ascii_case(npc_name))
    }

    /// The NPC's sheet, or a default sheet carrying the given name.
    pub fn npc(&self, name: &str) -> Npc {
        self.npcs.get(name).cloned().unwrap_or_else(|| Npc {
            name: name.to_string(),
            ..Npc::default()
        })
    }

    pub fn relationship(&self, npc_name: &str) -> i32 {
        self.relationships.get(npc_name).copied().unwrap_or(0)
    }

    /// Apply a relationship delta, clamped to the valid range. Returns the
    /// new score.
    pub fn adjust_relationship(&mut self, npc_name: &str, delta: i32) -> i32 {
        let entry = self.relationships.entry(npc_name.to_string()).or_insert(0);
        *entry = entry
            .saturating_add(delta)
            .clamp(RELATIONSHIP_MIN, RELATIONSHIP_MAX);
        *entry
    }

    pub fn in_party(&self, name: &str) -> bool {
        self.party.iter().any(|m| m.name == name)
    }

    /// Store a post-conversation summary on the NPC sheet.
    pub fn remember(&mut self, npc: &Npc, summary: impl Into<String>) {
        self.npcs
            .entry(npc.name.clone())
            .or_insert_with(|| npc.clone())
            .memories
            .push(summary.into());
    }
}
