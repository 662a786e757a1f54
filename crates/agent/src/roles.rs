//! Pipeline roles: who runs a loop, with which instructions and ceiling.

use buildloop_config::LimitsConfig;
use buildloop_core::{ActionName, SystemPrompt};

/// A stage of the build pipeline that drives its own agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineRole {
    Planner,
    Builder,
    Fixer,
    Auditor,
}

const PLANNER_PREAMBLE: &str = "\
You are the planner of a software build pipeline. Turn the user's request into a \
structured build plan: a summary, a build mode, the technology stack and an ordered \
list of phases. Every phase lists the files it produces in its file manifest and the \
acceptance criteria the audit will hold them to. Files in one phase are built in \
parallel, so a file may only depend on files from the same or an earlier phase.

Fetch any governance contracts you need with `fetch_contract` before planning. \
Use `note` for scratch reasoning. Finish by calling `submit_plan` with the complete \
plan. If it is rejected, fix every listed error and submit again.";

const BUILDER_PREAMBLE: &str = "\
You are the builder of a software build pipeline. Write the complete content of \
exactly one file from the build plan. Read the file's specification, the stack, the \
acceptance criteria and the lessons from earlier tiers with `read_state`, and fetch \
governance contracts with `fetch_contract` when the output must comply with them.

Finish by calling `submit_file` with the file's path and its full content. Never \
submit a partial file or placeholders.";

const FIXER_PREAMBLE: &str = "\
You are the fixer of a software build pipeline. An independent audit rejected a \
generated file. Read the current content, the audit findings and the history of \
earlier fix attempts with `read_state`, then correct every finding without \
regressing anything that already worked.

Finish by calling `submit_file` with the file's path and its full corrected content.";

const AUDITOR_PREAMBLE: &str = "\
You are the auditor of a software build pipeline. Judge the artifact you are given \
against its acceptance criteria and any governance contracts, which you can fetch with \
`fetch_contract`. You did not write it and you do not see how it was written: judge \
only what is in front of you.

Finish by calling `submit_verdict`. A `fail` verdict must list every finding with its \
severity, the rule it breaks and a concrete message.";

impl PipelineRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::Fixer => "fixer",
            Self::Auditor => "auditor",
        }
    }

    /// The action whose accepted call ends this role's loop.
    pub fn terminal_action(self) -> ActionName {
        match self {
            Self::Planner => ActionName::SubmitPlan,
            Self::Builder | Self::Fixer => ActionName::SubmitFile,
            Self::Auditor => ActionName::SubmitVerdict,
        }
    }

    /// The stable role preamble, sent as the cached prompt segment.
    pub fn preamble(self) -> &'static str {
        match self {
            Self::Planner => PLANNER_PREAMBLE,
            Self::Builder => BUILDER_PREAMBLE,
            Self::Fixer => FIXER_PREAMBLE,
            Self::Auditor => AUDITOR_PREAMBLE,
        }
    }

    /// Turn ceiling. Fixing reuses the builder's budget.
    pub fn ceiling(self, limits: &LimitsConfig) -> usize {
        match self {
            Self::Planner => limits.planner,
            Self::Builder | Self::Fixer => limits.builder,
            Self::Auditor => limits.auditor,
        }
    }

    /// Cached preamble followed by the per-run context.
    pub fn system_prompt(self, context: impl Into<String>) -> SystemPrompt {
        SystemPrompt::new().cached(self.preamble()).dynamic(context)
    }
}

impl std::fmt::Display for PipelineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
