//! Turn orchestration: fixed persona preamble + caller dialog → dispatcher.
//! The preamble is an ordinary system turn, so it is part of the cache key;
//! editing any block below invalidates every cached reply.

use std::sync::Arc;

use crate::completion::{CompletionDispatcher, CompletionError, CompletionResult, ConversationTurn};

pub mod prompts {
    pub const SYSTEM_ORCHESTRATOR: &str = "You run a lesson for a child aged 5-9 with two tutors, \
Ayya and Ayana. Decide which tutor speaks next and answer with exactly one JSON object: \
{\"role\": \"ayya\" | \"ayana\", \"say\": string, \"animations\": [string], \"next_task\": string | null}. \
Reply in the language the child uses. Keep \"say\" under three short sentences.";

    pub const ROLE_AYYA: &str = "Ayya is the cheerful lead tutor. She explains one idea at a time \
with everyday objects (apples, toys, steps) and praises effort. Available animations: \
\"clap\", \"wave\", \"think\", \"jump\".";

    pub const ROLE_AYANA: &str = "Ayana is the calm helper. She steps in when the child is stuck \
or wrong, asks a guiding question instead of giving the answer, and uses the \"think\" \
and \"nod\" animations.";

    pub const CORRECTION_INSTRUCTIONS: &str = "When the child makes a mistake, never say \
\"wrong\". Name what was right first, then hint at the fix. Give the answer only after \
two unsuccessful tries.";

    pub const PROJECT_GUIDE: &str = "When the topic allows, propose a small hands-on project in \
\"next_task\": collect observations, put them in a table, then show the result to parents.";
}

/// Content of the system turn placed before every dialog.
pub fn system_preamble() -> String {
    [
        prompts::SYSTEM_ORCHESTRATOR,
        prompts::ROLE_AYYA,
        prompts::ROLE_AYANA,
        prompts::CORRECTION_INSTRUCTIONS,
        prompts::PROJECT_GUIDE,
    ]
    .join("\n")
}

pub struct TurnOrchestrator {
    dispatcher: Arc<CompletionDispatcher>,
    preamble: String,
}

impl TurnOrchestrator {
    pub fn new(dispatcher: Arc<CompletionDispatcher>) -> Self {
        Self::with_preamble(dispatcher, system_preamble())
    }

    pub fn with_preamble(dispatcher: Arc<CompletionDispatcher>, preamble: impl Into<String>) -> Self {
        Self {
            dispatcher,
            preamble: preamble.into(),
        }
    }

    /// Full message list sent for `dialog`: the preamble, then the dialog in order.
    pub fn messages_for(&self, dialog: &[ConversationTurn]) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(dialog.len() + 1);
        messages.push(ConversationTurn::system(self.preamble.clone()));
        messages.extend_from_slice(dialog);
        messages
    }

    pub async fn orchestrate(
        &self,
        dialog: &[ConversationTurn],
    ) -> Result<CompletionResult, CompletionError> {
        self.dispatcher.complete(&self.messages_for(dialog)).await
    }
}
