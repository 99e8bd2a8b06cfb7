//! Terminal dialogue
//!
//! `dialoguer` prompts on stderr so stdout stays reserved for JSON output.
//! Prompts block on stdin, so each one runs under `spawn_blocking`.
//! Escape or `q` in a selection, Ctrl-C, or a closed terminal all count as
//! cancellation.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password, Select};
use tracing::debug;

use super::{Dialogue, Reply};

#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalDialogue;

async fn blocking<T: Send + 'static>(
    prompt: impl FnOnce() -> dialoguer::Result<Option<T>> + Send + 'static,
) -> Reply<T> {
    match tokio::task::spawn_blocking(prompt).await {
        Ok(Ok(Some(value))) => Reply::Answer(value),
        Ok(Ok(None)) => Reply::Cancelled,
        Ok(Err(e)) => {
            debug!(error = %e, "terminal prompt failed");
            Reply::Cancelled
        }
        Err(e) => {
            debug!(error = %e, "terminal prompt task failed");
            Reply::Cancelled
        }
    }
}

impl Dialogue for TerminalDialogue {
    async fn ask_text(&self, prompt: &str) -> Reply<String> {
        let prompt = prompt.to_string();
        blocking(move || {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .map(Some)
        })
        .await
    }

    async fn ask_secret(&self, prompt: &str) -> Reply<String> {
        let prompt = prompt.to_string();
        blocking(move || {
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map(Some)
        })
        .await
    }

    async fn choose(&self, prompt: &str, options: &[String]) -> Reply<usize> {
        let prompt = prompt.to_string();
        let options = options.to_vec();
        blocking(move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .items(&options)
                .default(0)
                .interact_opt()
        })
        .await
    }

    async fn notify(&self, message: &str) {
        eprintln!("{message}");
    }
}
