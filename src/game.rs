use std::io::{BufRead, Write};

use anyhow::Result;
use log::{info, warn};
use rand::Rng;

use crate::dialog::navigate::{Conversation, EndReason, Step};
use crate::dialog::node::{Outcome, OutcomeKind, Skill};
use crate::dialog::outcome::{self, Handoff};
use crate::dialog::{self as dlg, DialogContext, DialogError};
use crate::llm::Generator;
use crate::world::{GameState, Npc};

// ---------------------------------------------------------------------------
// Terminal I/O
// ---------------------------------------------------------------------------

pub struct Terminal<R, W> {
    input: R,
    out: W,
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self { input, out }
    }

    /// Read one trimmed line; `None` on end of input.
    fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.out, "\n{label}")?;
        self.out.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

// ---------------------------------------------------------------------------
// Dice
// ---------------------------------------------------------------------------

/// d20 + governing ability modifier against `dc`.
fn roll_check(rng: &mut impl Rng, state: &GameState, skill: Skill, dc: u32) -> (i32, bool) {
    let die: i32 = rng.gen_range(1..=20);
    let total = die + state.player.abilities.modifier(skill.ability());
    (total, total >= dc as i32)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn show_node<R, W: Write>(
    term: &mut Terminal<R, W>,
    conversation: &Conversation,
) -> Result<()> {
    let Some(node) = conversation.current_node() else {
        return Ok(());
    };
    writeln!(term.out, "\n[{}]: {}", conversation.npc_name(), node.npc_text)?;
    for (i, option) in node.options().iter().enumerate() {
        writeln!(term.out, "  {}. {}", i + 1, option.text)?;
    }
    writeln!(term.out, "  0. (leave)")?;
    Ok(())
}

fn show_messages<R, W: Write>(term: &mut Terminal<R, W>, messages: &[String]) -> Result<()> {
    for message in messages {
        writeln!(term.out, "  * {message}")?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Conversation loop
// ---------------------------------------------------------------------------

enum Input {
    Leave,
    Pick(usize),
    Say(String),
}

fn parse_input(line: &str) -> Input {
    if line == "0" || line.eq_ignore_ascii_case("leave") || line.eq_ignore_ascii_case("quit") {
        return Input::Leave;
    }
    match line.parse::<usize>() {
        Ok(n) if n > 0 => Input::Pick(n - 1),
        _ => Input::Say(line.to_string()),
    }
}

/// Talk to `npc_name` until the conversation ends, then record the summary
/// in `state`. Backend failures are shown as a silent NPC, never returned.
pub fn run<R: BufRead, W: Write>(
    term: &mut Terminal<R, W>,
    generator: &mut dyn Generator,
    state: &mut GameState,
    npc_name: &str,
    rng: &mut impl Rng,
) -> Result<()> {
    let npc = state.npc(npc_name);

    let tree = match dlg::generate_tree(generator, &DialogContext::new(state, &npc)) {
        Ok(tree) => tree,
        Err(DialogError::NpcUnavailable(name)) => {
            writeln!(term.out, "{name} is dead. There is no one to talk to.")?;
            return Ok(());
        }
        Err(e @ (DialogError::Generation(_) | DialogError::MissingNodes)) => {
            warn!("Could not open conversation: {e}");
            writeln!(term.out, "\n[{}]: ...", npc.name)?;
            writeln!(term.out, "({} does not seem to want to talk right now.)", npc.name)?;
            return Ok(());
        }
    };

    let (mut conversation, mut step) = Conversation::start(npc.name.clone(), tree);

    loop {
        step = match step {
            Step::Arrived { outcome: None, .. } => {
                show_node(term, &conversation)?;
                match read_action(term, &mut conversation, generator, state, &npc)? {
                    Some(next) => next,
                    None => break,
                }
            }
            Step::Arrived {
                outcome: Some(effect),
                ..
            } => {
                let report = outcome::apply(&effect, &npc, state);
                show_node(term, &conversation)?;
                show_messages(term, &report.messages)?;
                match report.handoff {
                    Some(Handoff::Combat) => {
                        writeln!(term.out, "\nCombat begins!")?;
                        break;
                    }
                    Some(Handoff::Trade) => {
                        shop(term)?;
                        conversation.close_shop()?
                    }
                    None => match read_action(term, &mut conversation, generator, state, &npc)? {
                        Some(next) => next,
                        None => break,
                    },
                }
            }
            Step::RollRequired { skill, dc } => {
                let (total, success) = roll_check(&mut *rng, state, skill, dc);
                writeln!(
                    term.out,
                    "  ({skill} check, DC {dc}: rolled {total}, {})",
                    if success { "success" } else { "failure" }
                )?;
                let ctx = DialogContext::new(state, &npc);
                conversation.resolve_roll(success, generator, &ctx)?
            }
            Step::Recruited => {
                let report = outcome::apply(&Outcome::of(OutcomeKind::JoinParty), &npc, state);
                show_messages(term, &report.messages)?;
                redisplay(&conversation)
            }
            Step::Refused => {
                writeln!(term.out, "  ({} is not convinced.)", npc.name)?;
                redisplay(&conversation)
            }
            Step::ShopOpened => {
                shop(term)?;
                conversation.close_shop()?
            }
            Step::Ended(EndReason::Combat) => {
                writeln!(term.out, "\nCombat begins!")?;
                break;
            }
            Step::Ended(EndReason::Left) => {
                writeln!(term.out, "\nYou take your leave of {}.", npc.name)?;
                break;
            }
        };
    }

    let ctx = DialogContext::new(state, &npc);
    let summary = dlg::summarize(generator, &ctx, conversation.transcript());
    state.remember(&npc, &summary.summary);
    if summary.relationship_change != 0 {
        let now = state.adjust_relationship(&npc.name, summary.relationship_change);
        info!("Relationship with {} is now {now}", npc.name);
    }
    Ok(())
}

/// Prompt until the player does something the conversation accepts.
/// `None` means the conversation is over without a further step.
fn read_action<R: BufRead, W: Write>(
    term: &mut Terminal<R, W>,
    conversation: &mut Conversation,
    generator: &mut dyn Generator,
    state: &GameState,
    npc: &Npc,
) -> Result<Option<Step>> {
    if conversation.is_ended() {
        return Ok(None);
    }
    loop {
        let Some(line) = term.prompt("[You]: ")? else {
            return Ok(Some(conversation.leave()?));
        };
        if line.is_empty() {
            writeln!(term.out, "(Pick an option or say something.)")?;
            continue;
        }

        let ctx = DialogContext::new(state, npc);
        let result = match parse_input(&line) {
            Input::Leave => conversation.leave(),
            Input::Pick(i) => conversation.choose(i, generator, &ctx),
            Input::Say(text) => {
                writeln!(term.out, "\n(Thinking...)")?;
                conversation.say(&text, generator, &ctx)
            }
        };
        match result {
            Ok(step) => return Ok(Some(step)),
            Err(e) => writeln!(term.out, "({e})")?,
        }
    }
}

/// Re-show the current node without firing its outcome again.
fn redisplay(conversation: &Conversation) -> Step {
    match conversation.current_node() {
        Some(node) => Step::Arrived {
            node_id: node.id.clone(),
            outcome: None,
        },
        None => Step::Ended(EndReason::Left),
    }
}

/// The shop itself lives elsewhere; this just holds the conversation.
fn shop<R: BufRead, W: Write>(term: &mut Terminal<R, W>) -> Result<()> {
    writeln!(term.out, "\n(The shop is open. Press enter to return to the conversation.)")?;
    term.prompt("")?;
    Ok(())
}
