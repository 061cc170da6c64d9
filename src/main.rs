use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use travel_concierge::collaborators::offline::{offline_registry, AssemblingSynthesizer};
use travel_concierge::{
    config, init_config, init_telemetry, shutdown_telemetry, ConciergeConfig, MemoryEvent,
    Phase, SessionOutcome, ShortTermMemory, ToolKind, TravelRequirements, WorkflowSession,
};

#[derive(Parser)]
#[command(name = "travel-concierge")]
#[command(about = "Phase-driven workflow control for a tool-using travel assistant")]
#[command(long_about = "Travel Concierge drives a travel request through clarification, tool \
                       planning, tool execution, validation and synthesis, retrying failed tools \
                       within a bounded budget. Tools run offline with canned responses.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a travel request through the workflow with offline tools
    Plan {
        /// Where the traveller wants to go
        #[arg(long, help = "Destination; omit it to see the clarification flow")]
        destination: Option<String>,
        /// Travel dates, free-form
        #[arg(long)]
        dates: Option<String>,
        /// Credit card to get recommendations for
        #[arg(long)]
        card: Option<String>,
        /// Answer to give if the workflow asks for clarification
        #[arg(long, help = "Destination to supply when the workflow asks for one")]
        answer: Option<String>,
        /// Make a tool fail a number of times before it answers
        #[arg(long = "fail", value_parser = parse_failure, help = "Inject failures as <tool>:<count>, e.g. search:2")]
        failures: Vec<(ToolKind, u32)>,
        /// Translate the finished plan into this language
        #[arg(long)]
        translate_to: Option<String>,
        /// Print the transition history after the outcome
        #[arg(long)]
        history: bool,
        /// Print the session's conversation memory after the outcome
        #[arg(long)]
        memory: bool,
    },
    /// Print the phase transition table
    Phases,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            destination,
            dates,
            card,
            answer,
            failures,
            translate_to,
            history,
            memory,
        } => tokio::runtime::Runtime::new()?.block_on(async {
            let settings = config()?;
            init_telemetry(&settings.observability)?;

            let result = plan_command(
                settings,
                TravelRequirements::new(destination.as_deref(), dates.as_deref(), card.as_deref()),
                PlanOptions {
                    answer,
                    failures,
                    translate_to,
                    history,
                    memory,
                },
            )
            .await;
            shutdown_telemetry();
            result
        }),
        Commands::Phases => {
            phases_command();
            Ok(())
        }
        Commands::Config => config_command(),
    }
}

fn parse_failure(raw: &str) -> Result<(ToolKind, u32), String> {
    let (tool, count) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected <tool>:<count>, got '{raw}'"))?;
    let kind = ToolKind::from_name(tool.trim()).ok_or_else(|| {
        let known: Vec<&str> = ToolKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown tool '{tool}' (known: {})", known.join(", "))
    })?;
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid failure count '{count}': {e}"))?;
    Ok((kind, count))
}

struct PlanOptions {
    answer: Option<String>,
    failures: Vec<(ToolKind, u32)>,
    translate_to: Option<String>,
    history: bool,
    memory: bool,
}

async fn plan_command(
    settings: &ConciergeConfig,
    requirements: TravelRequirements,
    options: PlanOptions,
) -> Result<()> {
    init_config()?;

    let mut workflow = settings.workflow.clone();
    if options.translate_to.is_some() {
        workflow.translate_to = options.translate_to;
    }

    let mut session = WorkflowSession::new(
        offline_registry(&options.failures),
        Arc::new(AssemblingSynthesizer),
        workflow,
    )
    .with_memory(Box::new(ShortTermMemory::new(
        settings.memory.max_items,
        settings.memory.max_tokens,
    )));

    let mut outcome = session.run(requirements).await?;
    if let SessionOutcome::NeedsClarification { question } = &outcome {
        match &options.answer {
            Some(answer) => {
                eprintln!("❓ {question}");
                eprintln!("💬 {answer}");
                outcome = session.resume_with_clarification(answer).await?;
            }
            None => eprintln!("❓ {question} (pass --answer to continue)"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if options.history {
        println!();
        println!("📜 Transition history:");
        for (i, transition) in session.controller().get_transition_history().iter().enumerate() {
            println!(
                "  {:>2}. {} → {}  ({})",
                i + 1,
                transition.from,
                transition.to,
                transition.reason
            );
        }
    }

    if options.memory {
        println!();
        println!("🧠 Conversation memory (oldest first):");
        for entry in session.memory().entries() {
            let marker = match &entry.event {
                MemoryEvent::ToolCall { success: false, .. } => " ✗",
                _ => "",
            };
            println!("  [{}] {}{}", entry.role, entry.content, marker);
        }
    }

    match outcome {
        SessionOutcome::Escalated { error } => Err(anyhow!(
            "Workflow escalated: {} ({} retries)",
            error.message,
            error.retry_count
        )),
        _ => Ok(()),
    }
}

fn phases_command() {
    println!("🧭 Phase transitions (* = normal successor, ! = reachable from any phase)");
    println!();
    for phase in Phase::ALL {
        let successor = phase.normal_successor();
        let targets: Vec<String> = phase
            .allowed_targets()
            .iter()
            .map(|target| {
                if Some(*target) == successor {
                    format!("{target}*")
                } else {
                    target.to_string()
                }
            })
            .collect();
        let marker = if phase.is_escape_hatch() { "!" } else { " " };
        println!("  {marker} {:<26} → {}", phase.as_str(), targets.join(", "));
    }
}

fn config_command() -> Result<()> {
    let settings = config()?;
    print!("{}", toml::to_string_pretty(settings)?);
    Ok(())
}
