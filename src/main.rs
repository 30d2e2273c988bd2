//! Run one tutor turn from the command line.
//!
//! Reads a JSON array of `{role, content}` turns from stdin and prints the
//! tutors' reply as JSON. Settings come from the environment.

use std::io::Read;

use anyhow::Context;
use tracing::info;

use ai_tutor::completion::ConversationTurn;
use ai_tutor::config::Settings;
use ai_tutor::{init_tracing, AppContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::from_env().context("loading settings")?;
    let ctx = AppContext::build(settings).context("building app context")?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading dialog from stdin")?;
    let dialog: Vec<ConversationTurn> =
        serde_json::from_str(&input).context("dialog must be a JSON array of {role, content}")?;

    let reply = ctx.orchestrator.orchestrate(&dialog).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);

    for (name, summary) in ctx.metrics.summary() {
        info!(metric = %name, p50_us = summary.p50_us, count = summary.count, "timing");
    }
    Ok(())
}
