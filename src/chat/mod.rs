//! Interactive chat front end.
//!
//! Waits for the knowledge base to come up (showing a spinner while the
//! index builds), then answers questions from the terminal in a loop
//! until the user types `exit`.


use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::error;

use crate::engine::{QueryEngine, Readiness, ReadinessState};
use crate::{LibrettoError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const EXIT_KEYWORDS: [&str; 2] = ["exit", "quit"];

/// Polls the readiness cell until it leaves `Initializing`.
///
/// Returns `Ok(())` once the knowledge base is ready, or the recorded
/// cause as an error if the build failed.
async fn wait_until_ready(readiness: &Readiness, poll_interval: Duration) -> Result<()> {
    loop {
        match readiness.state() {
            ReadinessState::Ready => return Ok(()),
            ReadinessState::Failed => {
                let cause = readiness
                    .failure_cause()
                    .unwrap_or("unknown failure")
                    .to_string();
                return Err(LibrettoError::IndexBuild(cause));
            }
            ReadinessState::Initializing => tokio::time::sleep(poll_interval).await,
        }
    }
}

/// Runs the chat loop until the user exits.
#[inline]
pub async fn run_chat(engine: Arc<QueryEngine>) -> Result<()> {
    let spinner = if console::user_attended_stderr() {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("style template is valid"),
        );
        bar.set_message("Preparing the knowledge base...");
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    } else {
        ProgressBar::hidden()
    };

    let waited = wait_until_ready(engine.readiness(), POLL_INTERVAL).await;
    spinner.finish_and_clear();

    if let Err(e) = waited {
        eprintln!(
            "{}",
            style(format!("Knowledge base initialization failed: {}", e)).red()
        );
        return Err(e);
    }

    eprintln!("{}", style("Knowledge base ready.").green());
    eprintln!("Ask a question, or type 'exit' to leave.");
    eprintln!();

    loop {
        let question = tokio::task::spawn_blocking(|| {
            Input::<String>::new()
                .with_prompt("Question")
                .allow_empty(true)
                .interact_text()
        })
        .await
        .context("Prompt task panicked")?
        .context("Failed to read question")?;

        let question = question.trim().to_string();
        if question.is_empty() {
            continue;
        }
        if EXIT_KEYWORDS.contains(&question.to_lowercase().as_str()) {
            eprintln!("Goodbye.");
            return Ok(());
        }

        match engine.answer(&question).await {
            Ok(answer) => {
                eprintln!();
                eprintln!("{}", style(&answer.text).cyan());
                if !answer.sources.is_empty() {
                    eprintln!(
                        "{}",
                        style(format!("({} passages consulted)", answer.sources.len())).dim()
                    );
                }
                eprintln!();
            }
            Err(e) if e.is_pipeline_error() => {
                error!("Failed to answer question: {}", e);
                eprintln!(
                    "{}",
                    style("Something went wrong answering that; please try again.").red()
                );
                eprintln!();
            }
            Err(e) => return Err(e),
        }
    }
}
