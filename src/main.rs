use clap::{Parser, Subcommand};
use libretto::Result;
use libretto::commands::{ask, chat, init_config, run_index, serve, show_config, show_status};

#[derive(Parser)]
#[command(name = "libretto")]
#[command(about = "A question-answering service grounded in a fixed knowledge base")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build or refresh the vector index in the foreground
    Index,
    /// Answer a single question and exit
    Ask {
        /// The question to answer
        question: String,
    },
    /// Start the HTTP API
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Start an interactive chat session
    Chat,
    /// Show the health of every pipeline component
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                init_config()?;
            }
        }
        Commands::Index => {
            run_index().await?;
        }
        Commands::Ask { question } => {
            ask(question).await?;
        }
        Commands::Serve { port } => {
            serve(port).await?;
        }
        Commands::Chat => {
            chat().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
