//! Studyloom CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Print a starter config file
//! - `room`    — Create a room (steps generated from the goal)
//! - `rooms`   — List rooms and their steps
//! - `ask`     — Send a message in a room conversation
//! - `refine`  — Rewrite a room's steps from a preference

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use studyloom_config::AppConfig;
use studyloom_core::message::{ConversationId, RoomId};
use studyloom_core::store::Store;
use studyloom_engine::{ResponseEngine, StepRefiner, ToneDirective};
use studyloom_providers::FailoverController;
use studyloom_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "studyloom",
    about = "Studyloom — AI response orchestration for learning rooms",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a starter config file
    Onboard,

    /// Create a room; steps are generated from the goal
    Room {
        /// The room's goal statement
        goal: String,
    },

    /// List rooms and their steps
    Rooms,

    /// Send a message in a conversation (created on first use per step)
    Ask {
        /// The room to talk in
        #[arg(long)]
        room: String,

        /// The step key to converse against (e.g. "step1")
        #[arg(long, default_value = "step1")]
        step: String,

        /// Continue an existing conversation instead of starting one
        #[arg(long)]
        conversation: Option<String>,

        /// Response tone
        #[arg(long, value_enum)]
        tone: Option<ToneArg>,

        /// The message to send
        message: String,
    },

    /// Rewrite a room's steps according to a preference
    Refine {
        /// The room whose steps to refine
        #[arg(long)]
        room: String,

        /// The preference, e.g. "reduce to 3 steps"
        preference: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ToneArg {
    Encouraging,
    Neutral,
    Challenging,
}

impl From<ToneArg> for ToneDirective {
    fn from(tone: ToneArg) -> Self {
        match tone {
            ToneArg::Encouraging => ToneDirective::Encouraging,
            ToneArg::Neutral => ToneDirective::Neutral,
            ToneArg::Challenging => ToneDirective::Challenging,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    if matches!(cli.command, Commands::Onboard) {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().context("loading configuration")?;
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::new(&config.store.database_path)
            .await
            .context("opening store")?,
    );
    let failover = Arc::new(FailoverController::from_config(&config));

    match cli.command {
        Commands::Onboard => unreachable!("handled above"),

        Commands::Room { goal } => {
            let refiner = StepRefiner::new(Arc::clone(&store), Arc::clone(&failover));
            let steps = refiner.generate_steps(&goal).await;
            let room = store.create_room(&goal, &steps).await?;
            println!("Created room {}", room.id);
            for step in steps {
                println!("  {} — {}", step.key, step.label);
            }
        }

        Commands::Rooms => {
            for room in store.list_rooms().await? {
                println!("{}  {}", room.id, room.goal);
                for step in store.list_steps(&room.id).await? {
                    println!("  {} — {}", step.key, step.label);
                }
            }
        }

        Commands::Ask {
            room,
            step,
            conversation,
            tone,
            message,
        } => {
            let engine = ResponseEngine::new(Arc::clone(&store), Arc::clone(&failover), &config);

            let conversation_id = match conversation {
                Some(id) => ConversationId::from(&id),
                None => {
                    let room_id = RoomId::from(&room);
                    let conv = store.create_conversation(&room_id, &step).await?;
                    println!("(conversation {})", conv.id);
                    conv.id
                }
            };

            let reply = engine
                .send_message(&conversation_id, &message, None, tone.map(Into::into))
                .await?;
            println!("{}", reply.text);
            if reply.truncated {
                println!("(reply truncated — continue with the same conversation id)");
            }
            tracing::debug!(provider = %reply.provider_used, "reply attribution");
        }

        Commands::Refine { room, preference } => {
            let refiner = StepRefiner::new(Arc::clone(&store), Arc::clone(&failover));
            let room_id = RoomId::from(&room);
            let record = refiner.refine_steps(&room_id, &preference).await?;
            println!("{}", record.summary);
            for step in &record.new_steps {
                println!("  {} — {}", step.key, step.label);
            }
        }
    }

    Ok(())
}
