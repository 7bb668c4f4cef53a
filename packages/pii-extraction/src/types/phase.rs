//! Conversation phases and the pure transition function.
//!
//! Parsing the meta-expert's decision is fallible and lives in
//! [`crate::pipeline::parser`]. Applying it is total over the enums
//! defined here and never touches the model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A phase of the extraction conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Instruction synthesis and extraction-prompt acquisition
    Start,
    /// Run the extraction prompt against the text
    Extracting,
    /// Verify every current finding independently
    Verification,
    /// Correct rejected findings and look for missed ones
    IssueSolving,
    /// Terminal phase
    End,
}

impl Phase {
    /// Token used for this phase in the `{"Next": ...}` protocol.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Extracting => "extracting",
            Self::Verification => "verification",
            Self::IssueSolving => "issues_solving",
            Self::End => "end",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A phase the meta-expert is allowed to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextStep {
    Extracting,
    Verification,
    IssuesSolving,
    End,
}

impl NextStep {
    /// Every token the protocol accepts.
    pub const ALL: [NextStep; 4] = [
        NextStep::Extracting,
        NextStep::Verification,
        NextStep::IssuesSolving,
        NextStep::End,
    ];

    /// Parse a protocol token (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "extracting" => Some(Self::Extracting),
            "verification" => Some(Self::Verification),
            "issues_solving" => Some(Self::IssuesSolving),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        self.phase().token()
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Extracting => Phase::Extracting,
            Self::Verification => Phase::Verification,
            Self::IssuesSolving => Phase::IssueSolving,
            Self::End => Phase::End,
        }
    }
}

impl FromStr for NextStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| format!("unknown phase token: {s}"))
    }
}

/// Bounds on how often the model may cycle through phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundLimits {
    /// Maximum Verification phases per conversation.
    ///
    /// Values above 1 allow re-verifying the output of issue solving.
    /// Default: 2.
    pub max_verification_rounds: usize,

    /// Maximum IssueSolving phases per conversation. Default: 1.
    pub max_issue_rounds: usize,

    /// Maximum phase history length, `Start` and `End` included. Default: 10.
    pub max_steps: usize,
}

impl Default for RoundLimits {
    fn default() -> Self {
        Self {
            max_verification_rounds: 2,
            max_issue_rounds: 1,
            max_steps: 10,
        }
    }
}

/// State of the working finding set that transitions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionContext {
    /// The current set was produced by extraction or issue solving and has
    /// not been verified yet.
    pub awaiting_review: bool,

    /// The current set carries verdicts from the latest verification.
    pub reviewed: bool,

    /// The current set is fresh extraction output with at least one finding.
    ///
    /// Unlike issue-solving output, it may not reach `End` without a
    /// verification round.
    pub unverified: bool,
}

/// Outcome of applying a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Phase,

    /// Set when the requested phase was replaced by another one.
    pub coerced: Option<&'static str>,
}

impl Transition {
    fn to(next: Phase) -> Self {
        Self {
            next,
            coerced: None,
        }
    }

    fn coerced(next: Phase, reason: &'static str) -> Self {
        Self {
            next,
            coerced: Some(reason),
        }
    }
}

/// Append-only record of visited phases. The last entry is the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseHistory {
    phases: Vec<Phase>,
}

impl Default for PhaseHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseHistory {
    pub fn new() -> Self {
        Self {
            phases: vec![Phase::Start],
        }
    }

    pub fn current(&self) -> Phase {
        // Never empty: constructed with Start and only appended to.
        self.phases.last().copied().unwrap_or(Phase::Start)
    }

    /// Append a phase. Nothing is appended once `End` was reached.
    pub fn push(&mut self, phase: Phase) {
        if !self.current().is_terminal() {
            self.phases.push(phase);
        }
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.phases.iter().filter(|p| **p == phase).count()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn as_slice(&self) -> &[Phase] {
        &self.phases
    }

    /// Decide the next phase from the model's decision.
    ///
    /// Pure: the same history, decision, context and limits always yield
    /// the same transition.
    pub fn transition(
        &self,
        decision: NextStep,
        ctx: &TransitionContext,
        limits: &RoundLimits,
    ) -> Transition {
        let current = self.current();
        if current.is_terminal() {
            return Transition::to(Phase::End);
        }
        if self.len() + 1 >= limits.max_steps {
            return Transition::coerced(Phase::End, "step budget exhausted");
        }

        let transition = self.requested(decision, ctx, limits);
        if transition.next.is_terminal()
            && ctx.unverified
            && self.count(Phase::Verification) < limits.max_verification_rounds
        {
            return Transition::coerced(
                Phase::Verification,
                "extracted findings need a verification review",
            );
        }
        transition
    }

    fn requested(
        &self,
        decision: NextStep,
        ctx: &TransitionContext,
        limits: &RoundLimits,
    ) -> Transition {
        let current = self.current();
        if decision == NextStep::End {
            return Transition::to(Phase::End);
        }

        let target = decision.phase();
        if target == current {
            return Transition::coerced(Phase::End, "phase repeated itself");
        }

        match target {
            Phase::IssueSolving => {
                if !ctx.reviewed {
                    if ctx.awaiting_review
                        && self.count(Phase::Verification) < limits.max_verification_rounds
                    {
                        return Transition::coerced(
                            Phase::Verification,
                            "issue solving needs a verification review",
                        );
                    }
                    return Transition::coerced(Phase::End, "no review to solve issues from");
                }
                if self.count(Phase::IssueSolving) >= limits.max_issue_rounds {
                    return Transition::coerced(Phase::End, "issue-solving rounds exhausted");
                }
                Transition::to(Phase::IssueSolving)
            }
            Phase::Verification => {
                if !ctx.awaiting_review {
                    return Transition::coerced(Phase::End, "nothing new to verify");
                }
                if self.count(Phase::Verification) >= limits.max_verification_rounds {
                    return Transition::coerced(Phase::End, "verification rounds exhausted");
                }
                Transition::to(Phase::Verification)
            }
            other => Transition::to(other),
        }
    }
}
