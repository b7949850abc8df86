//! Terminal-signal parsing (§4.2): scans an agent's assistant-text output
//! for one of the four structured markers the Ralph loop reacts to.
//!
//! Markers are plain-text lines the hat prompts instruct the agent to emit
//! verbatim, mirroring the same line-oriented convention the harness
//! adapters already use to recognize the agent's own JSON event lines --
//! one marker per line, first match wins.

use poindexter_db::models::Hat;

/// One of the four terminal signals a hat's response can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalSignal {
    /// `TASK_COMPLETE` -- the session finished successfully.
    TaskComplete,
    /// `HAT_COMPLETE <next-hat>` -- transition to the named hat.
    HatComplete(Hat),
    /// `QUESTION <text>` -- pause and ask the user.
    Question(String),
    /// `ERROR <text>` -- unrecoverable; quarantine the task.
    Error(String),
}

/// Scan `text` line by line for the first recognized terminal signal.
///
/// Returns `None` if the agent's response doesn't contain one, meaning the
/// loop should simply continue to the next iteration.
pub fn parse_terminal_signal(text: &str) -> Option<TerminalSignal> {
    for line in text.lines() {
        let line = line.trim();

        if line == "TASK_COMPLETE" {
            return Some(TerminalSignal::TaskComplete);
        }

        if let Some(rest) = line.strip_prefix("HAT_COMPLETE") {
            let hat_name = rest.trim();
            if let Ok(hat) = hat_name.parse::<Hat>() {
                return Some(TerminalSignal::HatComplete(hat));
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("QUESTION") {
            let question = rest.trim();
            if !question.is_empty() {
                return Some(TerminalSignal::Question(question.to_string()));
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("ERROR") {
            let message = rest.trim();
            if !message.is_empty() {
                return Some(TerminalSignal::Error(message.to_string()));
            }
            continue;
        }
    }

    None
}
