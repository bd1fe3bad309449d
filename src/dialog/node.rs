use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Skills and abilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    /// Parses full names and the usual three-letter abbreviations.
    pub fn parse(s: &str) -> Option<Ability> {
        let lower = s.trim().to_ascii_lowercase();
        let ability = match lower.get(..3)? {
            "str" => Ability::Strength,
            "dex" => Ability::Dexterity,
            "con" => Ability::Constitution,
            "int" => Ability::Intelligence,
            "wis" => Ability::Wisdom,
            "cha" => Ability::Charisma,
            _ => return None,
        };
        let full = format!("{ability:?}").to_ascii_lowercase();
        (lower.len() == 3 || lower == full).then_some(ability)
    }

    /// Skill rolled when a check names the ability instead of a skill.
    pub fn check_skill(self) -> Skill {
        match self {
            Ability::Strength | Ability::Constitution => Skill::Athletics,
            Ability::Dexterity => Skill::Acrobatics,
            Ability::Intelligence => Skill::Investigation,
            Ability::Wisdom => Skill::Insight,
            Ability::Charisma => Skill::Persuasion,
        }
    }
}

/// The fixed set of ability skills a skill check may test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Skill {
    Acrobatics,
    AnimalHandling,
    Arcana,
    Athletics,
    Deception,
    History,
    Insight,
    Intimidation,
    Investigation,
    Medicine,
    Nature,
    Perception,
    Performance,
    Persuasion,
    Religion,
    SleightOfHand,
    Stealth,
    Survival,
}

impl Skill {
    pub const ALL: [Skill; 18] = [
        Skill::Acrobatics,
        Skill::AnimalHandling,
        Skill::Arcana,
        Skill::Athletics,
        Skill::Deception,
        Skill::History,
        Skill::Insight,
        Skill::Intimidation,
        Skill::Investigation,
        Skill::Medicine,
        Skill::Nature,
        Skill::Perception,
        Skill::Performance,
        Skill::Persuasion,
        Skill::Religion,
        Skill::SleightOfHand,
        Skill::Stealth,
        Skill::Survival,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Skill::Acrobatics => "Acrobatics",
            Skill::AnimalHandling => "Animal Handling",
            Skill::Arcana => "Arcana",
            Skill::Athletics => "Athletics",
            Skill::Deception => "Deception",
            Skill::History => "History",
            Skill::Insight => "Insight",
            Skill::Intimidation => "Intimidation",
            Skill::Investigation => "Investigation",
            Skill::Medicine => "Medicine",
            Skill::Nature => "Nature",
            Skill::Perception => "Perception",
            Skill::Performance => "Performance",
            Skill::Persuasion => "Persuasion",
            Skill::Religion => "Religion",
            Skill::SleightOfHand => "Sleight of Hand",
            Skill::Stealth => "Stealth",
            Skill::Survival => "Survival",
        }
    }

    /// Governing ability for the roll modifier.
    pub fn ability(self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Skill {
    type Err = String;

    /// Case- and separator-insensitive: "sleight_of_hand", "Sleight of Hand"
    /// and "SleightOfHand" all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Skill::ALL
            .into_iter()
            .find(|skill| {
                skill
                    .name()
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .map(|c| c.to_ascii_lowercase())
                    .eq(wanted.chars())
            })
            .ok_or_else(|| format!("unknown skill '{s}'"))
    }
}

impl TryFrom<String> for Skill {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Skill> for String {
    fn from(skill: Skill) -> Self {
        skill.name().to_string()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    #[default]
    Continue,
    StartCombat,
    StartTrade,
    JoinParty,
    GiveQuest,
    GiveItem,
}

/// Side effect attached to a node, fired each time the node becomes current.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(rename = "type", default)]
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_change: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    /// Negative when the player pays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_reward: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp_reward: Option<i32>,
}

impl Outcome {
    pub fn of(kind: OutcomeKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// A `continue` outcome with no rewards does nothing.
    pub fn is_noop(&self) -> bool {
        self.kind == OutcomeKind::Continue
            && self.relationship_change.unwrap_or(0) == 0
            && self.gold_reward.unwrap_or(0) == 0
            && self.xp_reward.unwrap_or(0) == 0
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Which graph reference of an option is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Next,
    Success,
    Failure,
}

impl RefKind {
    pub fn field(self) -> &'static str {
        match self {
            RefKind::Next => "nextNodeId",
            RefKind::Success => "successNodeId",
            RefKind::Failure => "failureNodeId",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            RefKind::Next => "next",
            RefKind::Success => "success",
            RefKind::Failure => "failure",
        }
    }
}

/// What choosing an option does. Graph references stay optional because
/// generated trees routinely omit them; the repairer fills them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionAction {
    #[serde(rename_all = "camelCase")]
    Talk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SkillCheck {
        skill: Skill,
        #[serde(default = "default_dc")]
        dc: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_node_id: Option<String>,
    },
    Trade,
    #[serde(rename_all = "camelCase")]
    Recruit {
        #[serde(default)]
        requires_roll: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skill: Option<Skill>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dc: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success_node_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_node_id: Option<String>,
    },
    Attack,
    Leave,
}

const DEFAULT_DC: u32 = 10;
const DEFAULT_CHECK_SKILL: Skill = Skill::Persuasion;

fn default_dc() -> u32 {
    DEFAULT_DC
}

impl OptionAction {
    pub fn talk(next: impl Into<String>) -> Self {
        OptionAction::Talk {
            next_node_id: Some(next.into()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            OptionAction::Talk { .. } => "talk",
            OptionAction::SkillCheck { .. } => "skill_check",
            OptionAction::Trade => "trade",
            OptionAction::Recruit { .. } => "recruit",
            OptionAction::Attack => "attack",
            OptionAction::Leave => "leave",
        }
    }

    /// `talk` and `skill_check` keep a conversation going; everything else
    /// leaves the graph.
    pub fn is_conversational(&self) -> bool {
        matches!(
            self,
            OptionAction::Talk { .. } | OptionAction::SkillCheck { .. }
        )
    }

    /// Graph reference slots as `(kind, required, target)`.
    pub fn references(&self) -> Vec<(RefKind, bool, Option<&str>)> {
        match self {
            OptionAction::Talk { next_node_id } => {
                vec![(RefKind::Next, true, next_node_id.as_deref())]
            }
            OptionAction::SkillCheck {
                success_node_id,
                failure_node_id,
                ..
            } => vec![
                (RefKind::Success, true, success_node_id.as_deref()),
                (RefKind::Failure, true, failure_node_id.as_deref()),
            ],
            OptionAction::Recruit {
                next_node_id,
                success_node_id,
                failure_node_id,
                ..
            } => vec![
                (RefKind::Next, false, next_node_id.as_deref()),
                (RefKind::Success, false, success_node_id.as_deref()),
                (RefKind::Failure, false, failure_node_id.as_deref()),
            ],
            OptionAction::Trade | OptionAction::Attack | OptionAction::Leave => Vec::new(),
        }
    }

    pub fn references_mut(&mut self) -> Vec<(RefKind, bool, &mut Option<String>)> {
        match self {
            OptionAction::Talk { next_node_id } => vec![(RefKind::Next, true, next_node_id)],
            OptionAction::SkillCheck {
                success_node_id,
                failure_node_id,
                ..
            } => vec![
                (RefKind::Success, true, success_node_id),
                (RefKind::Failure, true, failure_node_id),
            ],
            OptionAction::Recruit {
                next_node_id,
                success_node_id,
                failure_node_id,
                ..
            } => vec![
                (RefKind::Next, false, next_node_id),
                (RefKind::Success, false, success_node_id),
                (RefKind::Failure, false, failure_node_id),
            ],
            OptionAction::Trade | OptionAction::Attack | OptionAction::Leave => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogOption {
    /// Display order within the node.
    #[serde(default)]
    pub id: u32,
    /// Label shown to the player.
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub action: OptionAction,
}

impl DialogOption {
    pub fn new(id: u32, text: impl Into<String>, action: OptionAction) -> Self {
        Self {
            id,
            text: text.into(),
            action,
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub npc_text: String,
    /// `None` when the generator produced something that is not a list.
    #[serde(default, deserialize_with = "lenient_options")]
    pub options: Option<Vec<DialogOption>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_outcome"
    )]
    pub outcome: Option<Outcome>,
    /// Advisory only; see [`DialogNode::is_terminal`].
    #[serde(rename = "isTerminal", default, skip_serializing_if = "Option::is_none")]
    pub terminal_hint: Option<bool>,
}

impl DialogNode {
    pub fn new(id: impl Into<String>, npc_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            npc_text: npc_text.into(),
            options: Some(Vec::new()),
            outcome: None,
            terminal_hint: None,
        }
    }

    pub fn with_option(mut self, option: DialogOption) -> Self {
        self.options.get_or_insert_with(Vec::new).push(option);
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn options(&self) -> &[DialogOption] {
        self.options.as_deref().unwrap_or(&[])
    }

    /// Derived terminality: no `talk` or `skill_check` option left.
    pub fn is_terminal(&self) -> bool {
        !self.options().iter().any(|o| o.action.is_conversational())
    }
}

/// Integers the way models write them: `15`, `15.0` or `"15"`.
fn loose_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_skill(value: &Value) -> Option<Skill> {
    let name = value.as_str()?;
    name.parse::<Skill>()
        .ok()
        .or_else(|| Ability::parse(name).map(Ability::check_skill))
}

/// Repair the roll fields of a raw option in place so one sloppy value does
/// not cost the whole option. A `skill_check` always ends up with a skill;
/// a `recruit` loses fields it cannot read and falls back to its defaults.
fn normalize_roll_fields(map: &mut Map<String, Value>) {
    let required = match map.get("type").and_then(Value::as_str) {
        Some("skill_check") => true,
        Some("recruit") => false,
        _ => return,
    };

    match map.get("skill").map(|v| (loose_skill(v), v.clone())) {
        Some((Some(skill), _)) => {
            map.insert("skill".into(), Value::from(skill.name()));
        }
        Some((None, raw)) if required => {
            warn!("Unknown skill {raw}; using {DEFAULT_CHECK_SKILL}");
            map.insert("skill".into(), Value::from(DEFAULT_CHECK_SKILL.name()));
        }
        None if required => {
            warn!("Skill check without a skill; using {DEFAULT_CHECK_SKILL}");
            map.insert("skill".into(), Value::from(DEFAULT_CHECK_SKILL.name()));
        }
        Some((None, raw)) => {
            warn!("Unknown recruit skill {raw}; ignoring it");
            map.remove("skill");
        }
        None => {}
    }

    if let Some(raw) = map.get("dc").cloned() {
        match loose_int(&raw).and_then(|dc| u32::try_from(dc).ok()) {
            Some(dc) => {
                map.insert("dc".into(), Value::from(dc));
            }
            None => {
                warn!("Unreadable DC {raw}; using the default");
                map.remove("dc");
            }
        }
    }
}

/// Keep whatever options decode; a non-list becomes `None`.
fn lenient_options<'de, D>(deserializer: D) -> Result<Option<Vec<DialogOption>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let Value::Array(items) = raw else {
        return Ok(None);
    };

    let mut options = Vec::with_capacity(items.len());
    for (idx, mut item) in items.into_iter().enumerate() {
        if let Value::Object(map) = &mut item {
            map.entry("id").or_insert_with(|| Value::from(idx + 1));
            normalize_roll_fields(map);
        }
        match serde_json::from_value::<DialogOption>(item) {
            Ok(option) => options.push(option),
            Err(e) => warn!("Dropping undecodable dialog option #{idx}: {e}"),
        }
    }
    Ok(Some(options))
}

/// Decode an outcome field by field: an unreadable field is skipped, the
/// rest still apply. An unknown `type` is treated as `continue`.
fn lenient_outcome<'de, D>(deserializer: D) -> Result<Option<Outcome>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let map = match raw {
        Value::Object(map) => map,
        Value::Null => return Ok(None),
        other => {
            warn!("Dropping node outcome that is not an object: {other}");
            return Ok(None);
        }
    };

    let kind = match map.get("type") {
        None => OutcomeKind::Continue,
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!("Unknown outcome type {value} ({e}); treating it as continue");
            OutcomeKind::Continue
        }),
    };
    let int = |key: &str| {
        let value = map.get(key)?;
        let parsed = loose_int(value).and_then(|n| i32::try_from(n).ok());
        if parsed.is_none() && !value.is_null() {
            warn!("Ignoring unreadable outcome field {key}: {value}");
        }
        parsed
    };
    let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(Some(Outcome {
        kind,
        relationship_change: int("relationshipChange"),
        quest_id: text("questId"),
        item_name: text("itemName"),
        gold_reward: int("goldReward"),
        xp_reward: int("xpReward"),
    }))
}
