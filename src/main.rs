use std::path::PathBuf;

use clap::{Parser, Subcommand};
use semdex::Result;
use semdex::commands::{
    ask, clear_index, delete_path, index_paths, init_config, show_config, show_stats, show_status,
};

#[derive(Parser)]
#[command(name = "semdex")]
#[command(about = "Semantic file indexing and retrieval with local LLM answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index files into the vector store
    Index {
        /// Paths of the files to index
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask a question against the indexed files
    Ask {
        /// The question to answer
        question: String,
    },
    /// Show index statistics
    Stats,
    /// Remove all records for one file path
    Delete {
        /// File path whose records should be removed
        path: String,
    },
    /// Drop every record in the index
    Clear,
    /// Check connectivity to the Ollama server and model availability
    Status,
    /// Write a default configuration file, or show the active one
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Index { paths } => {
            index_paths(paths).await?;
        }
        Commands::Ask { question } => {
            ask(&question).await?;
        }
        Commands::Stats => {
            show_stats().await?;
        }
        Commands::Delete { path } => {
            delete_path(&path).await?;
        }
        Commands::Clear => {
            clear_index().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
        Commands::Config { show } => {
            if show {
                show_config().await?;
            } else {
                init_config().await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["semdex", "stats"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Stats);
        }
    }

    #[test]
    fn index_command_with_paths() {
        let cli = Cli::try_parse_from(["semdex", "index", "a.txt", "b.txt"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Index { paths } = parsed.command {
                assert_eq!(paths.len(), 2);
                assert_eq!(paths[0], PathBuf::from("a.txt"));
            }
        }
    }

    #[test]
    fn index_command_requires_a_path() {
        let cli = Cli::try_parse_from(["semdex", "index"]);
        assert!(cli.is_err());
    }

    #[test]
    fn ask_command_with_question() {
        let cli = Cli::try_parse_from(["semdex", "ask", "where is the config parsed?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { question } = parsed.command {
                assert_eq!(question, "where is the config parsed?");
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["semdex", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["semdex", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["semdex", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
