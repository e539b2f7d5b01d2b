//! `keilpilot chat`: single-message or interactive chat.

use std::path::Path;
use std::sync::{Arc, Mutex};

use keilpilot_agent::{ConversationOrchestrator, Session, ToolCatalog};
use keilpilot_config::AppConfig;
use keilpilot_core::event::EventFeed;
use keilpilot_core::surface::OutputSurface;
use keilpilot_providers::OpenAiCompatEndpoint;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::surface::TerminalSurface;

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
    tools: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    KEILPILOT_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let feed = EventFeed::default();
    let registry = Arc::new(super::build_registry(&config, feed));
    let model = Arc::new(OpenAiCompatEndpoint::from_config(&config)?);
    let catalog = ToolCatalog::new(registry, &config.agent.tool_namespace);
    let orchestrator = ConversationOrchestrator::new(model, catalog, config.agent.system_prompt())
        .with_max_iterations(config.agent.max_tool_iterations);

    let surface = TerminalSurface::stdout();
    let mut session = Session::new();

    if let Some(message) = message {
        let mut refs = tools;
        refs.extend(inline_tool_refs(&message));
        let interrupts = Interrupts::listen();
        run_turn(&orchestrator, &mut session, &message, refs, &surface, &interrupts).await?;
        println!();
        return Ok(());
    }

    println!();
    println!("  KeilPilot: interactive mode");
    println!();
    println!("  Model:     {}", config.model);
    match &config.project {
        Some(project) => println!("  Project:   {} ({})", project.name, project.path.display()),
        None => println!("  Project:   none configured"),
    }
    println!("  Tools:     {}", orchestrator.catalog().registry().names().join(", "));
    println!();
    println!("  Type your message and press Enter. Mention a tool as #name to force it.");
    println!("  Ctrl+C cancels the current answer, or quits at the prompt.");
    println!();

    let interrupts = Interrupts::listen();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt_marker()?;
        let next = tokio::select! {
            _ = interrupts.quit_requested().cancelled() => None,
            line = lines.next_line() => line?,
        };
        let Some(line) = next else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let mut refs = tools.clone();
        refs.extend(inline_tool_refs(line));
        println!();
        // Turn errors were already written to the surface
        let _ = run_turn(&orchestrator, &mut session, line, refs, &surface, &interrupts).await;
        println!();
        println!();
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

fn prompt_marker() -> std::io::Result<()> {
    use std::io::Write;
    print!("  You > ");
    std::io::stdout().flush()
}

/// Routes Ctrl+C for the whole session: it cancels the running turn, or
/// asks the REPL to quit when no turn is running.
///
/// One listener lives for the process, since the first `ctrl_c()` call
/// replaces the default SIGINT behaviour for good.
#[derive(Clone, Default)]
pub struct Interrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
    quit: CancellationToken,
}

impl Interrupts {
    /// Start the process-wide listener.
    pub fn listen() -> Self {
        let interrupts = Self::default();
        let handler = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                handler.interrupt();
            }
        });
        interrupts
    }

    /// A fresh token for the turn about to start.
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(token.clone());
        }
        token
    }

    pub fn end_turn(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    /// Handle one Ctrl+C.
    pub fn interrupt(&self) {
        let running = self.current.lock().ok().and_then(|mut c| c.take());
        match running {
            Some(turn) => {
                debug!("Interrupt received, cancelling turn");
                turn.cancel();
            }
            None => {
                debug!("Interrupt received at the prompt, quitting");
                self.quit.cancel();
            }
        }
    }

    pub fn quit_requested(&self) -> &CancellationToken {
        &self.quit
    }
}

/// Run one turn under a token that Ctrl+C cancels.
async fn run_turn(
    orchestrator: &ConversationOrchestrator,
    session: &mut Session,
    prompt: &str,
    tool_refs: Vec<String>,
    surface: &dyn OutputSurface,
    interrupts: &Interrupts,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = interrupts.begin_turn();
    let result = orchestrator
        .handle_turn(session, prompt, tool_refs, surface, &cancel)
        .await;
    interrupts.end_turn();
    result?;
    Ok(())
}

/// Words of the form `#name` are explicit tool references, in order.
pub fn inline_tool_refs(prompt: &str) -> Vec<String> {
    prompt
        .split_whitespace()
        .filter_map(|word| word.strip_prefix('#'))
        .map(|name| name.trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '_'))
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_cancels_the_running_turn_then_quits_when_idle() {
        let interrupts = Interrupts::default();

        let turn = interrupts.begin_turn();
        interrupts.interrupt();
        assert!(turn.is_cancelled());
        assert!(!interrupts.quit_requested().is_cancelled());

        // A second Ctrl+C during the same turn has nothing left to cancel
        interrupts.interrupt();
        assert!(interrupts.quit_requested().is_cancelled());
    }

    #[test]
    fn finished_turn_is_not_cancelled_by_a_later_interrupt() {
        let interrupts = Interrupts::default();

        let first = interrupts.begin_turn();
        interrupts.end_turn();
        interrupts.interrupt();
        assert!(!first.is_cancelled());
        assert!(interrupts.quit_requested().is_cancelled());

        let next = interrupts.begin_turn();
        interrupts.interrupt();
        assert!(next.is_cancelled());
    }

    #[test]
    fn inline_refs_are_collected_in_order() {
        assert_eq!(
            inline_tool_refs("Use #keilpilot_getProjectInfo, then #keilpilot_buildProject."),
            vec!["keilpilot_getProjectInfo", "keilpilot_buildProject"]
        );
        assert!(inline_tool_refs("Fix issue # 12 please").is_empty());
        assert!(inline_tool_refs("Build the project").is_empty());
    }
}
