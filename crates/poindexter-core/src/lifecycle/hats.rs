//! Hat prompt templates and the legal hat-transition graph (§4.2).
//!
//! Each hat is a named role prompt; the legal follow-on set per hat is
//! fixed so a `HAT_COMPLETE` signal naming an out-of-graph hat is rejected
//! rather than silently honored.

use poindexter_db::models::Hat;

/// Whether `next` is a legal follow-on hat from `current`.
pub fn is_legal_transition(current: Hat, next: Hat) -> bool {
    legal_next_hats(current).contains(&next)
}

/// The hats `current` is allowed to hand off to via `HAT_COMPLETE`.
pub fn legal_next_hats(current: Hat) -> &'static [Hat] {
    use Hat::*;
    match current {
        // The planner doesn't hand off -- it emits sub-task specs and its
        // session ends on its own TASK_COMPLETE (§4.2).
        Planner => &[],
        Architect => &[Implementer],
        Implementer => &[Reviewer, Tester],
        Reviewer => &[Implementer],
        Tester => &[Implementer, Debugger],
        Debugger => &[Implementer, Tester],
        Documenter => &[Reviewer],
        Devops => &[Reviewer],
        ConflictManager => &[Implementer],
    }
}

/// The role-prompt template for a given hat. Interpolated with the
/// rendered task context by [`super::compose_prompt`].
pub fn prompt_template(hat: Hat) -> &'static str {
    use Hat::*;
    match hat {
        Planner => {
            "You are the planner. Break the objective below into concrete \
             child tasks. You do not write code. When you are done, emit \
             TASK_COMPLETE; your session ends once you've produced the plan."
        }
        Architect => {
            "You are the architect. Decide the approach and interfaces for \
             the task below before any implementation starts. When the \
             design is settled, emit HAT_COMPLETE implementer."
        }
        Implementer => {
            "You are the implementer. Make the task below pass its linked \
             invariants. When you believe the work is complete, emit \
             TASK_COMPLETE, or HAT_COMPLETE reviewer / HAT_COMPLETE tester \
             if a handoff is more appropriate."
        }
        Reviewer => {
            "You are the reviewer. Check the implementer's changes for \
             correctness, style, and adherence to the task description. \
             Emit HAT_COMPLETE implementer to send it back with comments, \
             or TASK_COMPLETE if it's ready."
        }
        Tester => {
            "You are the tester. Exercise the task's behavior, including \
             edge cases the invariants don't already cover. Emit \
             HAT_COMPLETE debugger if you find a failure, or TASK_COMPLETE \
             if everything holds."
        }
        Debugger => {
            "You are the debugger. Diagnose and fix the failure reported \
             against this task. Emit HAT_COMPLETE tester once you believe \
             it's fixed, or HAT_COMPLETE implementer for a larger rework."
        }
        Documenter => {
            "You are the documenter. Write or update documentation for the \
             task below. Emit HAT_COMPLETE reviewer when done."
        }
        Devops => {
            "You are the devops hat. Handle CI, deployment, or \
             infrastructure changes the task requires. Emit HAT_COMPLETE \
             reviewer when done."
        }
        ConflictManager => {
            "You are the conflict-manager. Resolve the merge conflict \
             between this task's branch and the base branch in the \
             separate worktree provided. Emit HAT_COMPLETE implementer \
             once the conflict is resolved."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_has_no_legal_handoff() {
        assert!(legal_next_hats(Hat::Planner).is_empty());
    }

    #[test]
    fn implementer_reviewer_cycle_is_legal() {
        assert!(is_legal_transition(Hat::Implementer, Hat::Reviewer));
        assert!(is_legal_transition(Hat::Reviewer, Hat::Implementer));
    }

    #[test]
    fn implementer_cannot_hand_off_to_devops() {
        assert!(!is_legal_transition(Hat::Implementer, Hat::Devops));
    }

    #[test]
    fn every_hat_has_a_nonempty_prompt() {
        for hat in [
            Hat::Planner,
            Hat::Architect,
            Hat::Implementer,
            Hat::Reviewer,
            Hat::Tester,
            Hat::Debugger,
            Hat::Documenter,
            Hat::Devops,
            Hat::ConflictManager,
        ] {
            assert!(!prompt_template(hat).is_empty());
        }
    }
}
