//! Command-line surface: one-shot subcommands plus a small REPL

pub mod formatting;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::agent::model::ProviderKind;
use crate::app::Application;
use crate::config::AppConfig;
use crate::memory::DEFAULT_QUERY_K;
use crate::types::MemoryId;

/// On-device assistant: semantic memory, grounded answers and a tool-using agent
#[derive(Parser, Debug)]
#[command(name = "ondevice-ai")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the usual lookup order)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run; starts the REPL when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the reasoning agent on a question
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Print every reasoning step
        #[arg(long)]
        trace: bool,
    },
    /// Answer from saved memories without tools
    Rag {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        /// Print fragments as they arrive
        #[arg(long)]
        stream: bool,
        /// Completion backend for this call (openai, anthropic, grok, mock)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Save a memory
    Remember {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Show the memories closest to a query
    Recall {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(short = 'k', long, default_value_t = DEFAULT_QUERY_K)]
        k: usize,
    },
    /// List saved memories, newest first
    Memories {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Delete a memory by id
    Forget { id: MemoryId },
    /// Number of saved memories
    Count,
    /// Show the effective configuration
    Config,
    /// Interactive session
    Repl,
}

/// REPL input, parsed from one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Quit,
    Run(Commands),
    SetProvider(String),
    Invalid(String),
    Empty,
}

pub fn parse_command(input: &str) -> ReplCommand {
    let line = input.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Run(Commands::Ask {
            query: vec![line.to_string()],
            trace: false,
        });
    };

    let (cmd, args) = match rest.split_once(char::is_whitespace) {
        Some((cmd, args)) => (cmd.to_lowercase(), args.trim()),
        None => (rest.to_lowercase(), ""),
    };
    let text = || vec![args.to_string()];

    match cmd.as_str() {
        "help" | "h" | "?" => ReplCommand::Help,
        "quit" | "q" | "exit" => ReplCommand::Quit,
        "config" => ReplCommand::Run(Commands::Config),
        "count" => ReplCommand::Run(Commands::Count),
        "trace" if !args.is_empty() => ReplCommand::Run(Commands::Ask {
            query: text(),
            trace: true,
        }),
        "rag" if !args.is_empty() => ReplCommand::Run(Commands::Rag {
            query: text(),
            stream: false,
            provider: None,
        }),
        "remember" if !args.is_empty() => ReplCommand::Run(Commands::Remember { text: text() }),
        "recall" if !args.is_empty() => ReplCommand::Run(Commands::Recall {
            query: text(),
            k: DEFAULT_QUERY_K,
        }),
        "memories" => {
            let mut parts = args.split_whitespace();
            let limit = parts.next().and_then(|s| s.parse().ok()).unwrap_or(20);
            let offset = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            ReplCommand::Run(Commands::Memories { limit, offset })
        }
        "forget" => match args.parse::<MemoryId>() {
            Ok(id) => ReplCommand::Run(Commands::Forget { id }),
            Err(_) => ReplCommand::Invalid("usage: /forget <id>".to_string()),
        },
        "provider" if !args.is_empty() => ReplCommand::SetProvider(args.to_string()),
        _ => ReplCommand::Invalid(format!("unknown or incomplete command: /{}", cmd)),
    }
}

pub struct CliState {
    pub app: Application,
}

impl CliState {
    /// Load config (explicit path or the usual lookup), apply env overrides, and wire services
    pub fn initialize(config_path: Option<&std::path::Path>) -> Result<Self> {
        Self::new_with_config(Self::load_config(config_path)?)
    }

    /// Read the config file and apply environment overrides without wiring services
    pub fn load_config(config_path: Option<&std::path::Path>) -> Result<AppConfig> {
        let mut config = match config_path {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn new_with_config(config: AppConfig) -> Result<Self> {
        let app = Application::from_config(&config).context("initializing application")?;
        Ok(Self { app })
    }

    /// Run one command and return its printable output
    pub async fn execute(&self, command: Commands) -> Result<String> {
        match command {
            Commands::Ask { query, trace } => {
                let executor = self.app.executor().await?;
                let result = executor.run(&query.join(" ")).await;
                Ok(formatting::render_agent_result(&result, trace))
            }
            Commands::Rag {
                query,
                stream,
                provider,
            } => {
                if let Some(provider) = provider {
                    self.set_provider(&provider)?;
                }
                let query = query.join(" ");
                if stream {
                    let mut stdout = io::stdout();
                    self.stream_rag(&query, &mut stdout).await?;
                    return Ok(String::new());
                }
                Ok(self.app.rag.answer_with_rag(&query).await?)
            }
            Commands::Remember { text } => {
                let id = self.app.memory.add_memory(&text.join(" "), None).await?;
                Ok(format!("Stored memory #{}", id))
            }
            Commands::Recall { query, k } => {
                let hits = self.app.memory.query_scored(&query.join(" "), k).await?;
                Ok(formatting::render_recall(&hits))
            }
            Commands::Memories { limit, offset } => {
                let records = self.app.memory.get_all_memories(limit, offset).await?;
                Ok(formatting::render_memories(&records))
            }
            Commands::Forget { id } => {
                if self.app.memory.delete_memory(id).await? {
                    Ok(format!("Deleted memory #{}", id))
                } else {
                    Ok(format!("No memory with id {}", id))
                }
            }
            Commands::Count => {
                let count = self.app.memory.get_memory_count().await?;
                Ok(format!("{} memories stored", count))
            }
            Commands::Config => Ok(self.app.config.summary()),
            Commands::Repl => Err(anyhow!("already in the REPL")),
        }
    }

    /// Write streamed RAG fragments to `out` as they arrive
    pub async fn stream_rag<W>(&self, query: &str, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = self.app.rag.stream_with_rag(query).await?;
        while let Some(fragment) = stream.next().await {
            out.write_all(fragment?.as_bytes()).await?;
            out.flush().await?;
        }
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }

    fn set_provider(&self, name: &str) -> Result<ProviderKind> {
        let kind = ProviderKind::from_str(name)
            .ok_or_else(|| anyhow!("Unknown provider: {}", name))?;
        self.app.rag.set_preferred_provider(kind);
        Ok(kind)
    }

    /// Handle a single line of input. `None` means quit.
    pub async fn handle_line(&self, line: &str) -> Result<Option<String>> {
        match parse_command(line) {
            ReplCommand::Empty => Ok(Some(String::new())),
            ReplCommand::Quit => Ok(None),
            ReplCommand::Help => Ok(Some(formatting::render_help())),
            ReplCommand::Invalid(message) => Ok(Some(message)),
            ReplCommand::SetProvider(name) => {
                let kind = self.set_provider(&name)?;
                Ok(Some(format!("RAG provider set to {}", kind.as_str())))
            }
            ReplCommand::Run(command) => self.execute(command).await.map(Some),
        }
    }

    pub async fn run_repl(&self) -> Result<()> {
        let mut stdout = io::stdout();
        let mut lines = BufReader::new(io::stdin()).lines();

        stdout
            .write_all(b"ondevice-ai REPL. Type /help for commands.\n")
            .await?;
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            match self.handle_line(&line).await {
                Ok(Some(output)) => {
                    if !output.is_empty() {
                        stdout.write_all(output.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    stdout
                        .write_all(format!("Error: {:#}\n", err).as_bytes())
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// `ondevice_ai=<level>` merged with `RUST_LOG`; an explicit crate directive in `RUST_LOG` wins.
pub fn log_filter(level: &str, rust_log: Option<&str>) -> String {
    let default_directive = format!("ondevice_ai={}", level.to_lowercase());
    match rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        None => default_directive,
        Some(env_override) if env_override.contains("ondevice_ai") => env_override.to_string(),
        Some(env_override) => format!("{},{}", env_override, default_directive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command(""), ReplCommand::Empty);
        assert_eq!(parse_command("/help"), ReplCommand::Help);
        assert_eq!(parse_command("/q"), ReplCommand::Quit);
        assert_eq!(
            parse_command("what time is it?"),
            ReplCommand::Run(Commands::Ask {
                query: vec!["what time is it?".to_string()],
                trace: false,
            })
        );
        assert_eq!(
            parse_command("/remember I like tea"),
            ReplCommand::Run(Commands::Remember {
                text: vec!["I like tea".to_string()],
            })
        );
        assert_eq!(
            parse_command("/memories 5 10"),
            ReplCommand::Run(Commands::Memories {
                limit: 5,
                offset: 10
            })
        );
        assert_eq!(
            parse_command("/forget 7"),
            ReplCommand::Run(Commands::Forget { id: 7 })
        );
        assert!(matches!(parse_command("/forget x"), ReplCommand::Invalid(_)));
        assert!(matches!(parse_command("/recall"), ReplCommand::Invalid(_)));
        assert_eq!(
            parse_command("/provider grok"),
            ReplCommand::SetProvider("grok".to_string())
        );
    }

    #[test]
    fn clap_parses_subcommands() {
        let cli = Cli::try_parse_from(["ondevice-ai", "recall", "-k", "2", "favorite", "color"])
            .unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Recall {
                query: vec!["favorite".to_string(), "color".to_string()],
                k: 2,
            })
        );

        let cli = Cli::try_parse_from([
            "ondevice-ai",
            "rag",
            "--stream",
            "--provider",
            "anthropic",
            "hi",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Rag { stream: true, .. })
        ));
        assert!(Cli::try_parse_from(["ondevice-ai", "ask"]).is_err());
    }

    #[test]
    fn load_config_does_not_wire_services() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("untouched.duckdb");
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                "[database]\npath = {:?}\n\n[model]\nprovider = \"mock\"\n",
                db_path.display().to_string()
            ),
        )
        .unwrap();

        let config = CliState::load_config(Some(&config_path)).unwrap();

        assert_eq!(config.database.path, db_path);
        assert!(!db_path.exists());
    }

    #[test]
    fn log_filter_merges_rust_log() {
        assert_eq!(log_filter("INFO", None), "ondevice_ai=info");
        assert_eq!(log_filter("debug", Some("  ")), "ondevice_ai=debug");
        assert_eq!(
            log_filter("info", Some("duckdb=warn")),
            "duckdb=warn,ondevice_ai=info"
        );
        assert_eq!(
            log_filter("info", Some("ondevice_ai=trace")),
            "ondevice_ai=trace"
        );
    }

    #[tokio::test]
    async fn test_cli_smoke() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::embedded_default().unwrap();
        config.database.path = dir.path().join("cli.duckdb");
        let cli = CliState::new_with_config(config).unwrap();

        let stored = cli.handle_line("/remember I like green tea").await.unwrap().unwrap();
        assert!(stored.starts_with("Stored memory #"));

        let count = cli.handle_line("/count").await.unwrap().unwrap();
        assert_eq!(count, "1 memories stored");

        let recall = cli.handle_line("/recall green tea").await.unwrap().unwrap();
        assert!(recall.contains("I like green tea"));

        let listing = cli.handle_line("/memories").await.unwrap().unwrap();
        assert!(listing.contains("I like green tea"));

        let missing = cli.handle_line("/forget 9999").await.unwrap().unwrap();
        assert_eq!(missing, "No memory with id 9999");

        // The default mock reply is unstructured, so the agent degrades but still answers.
        let answer = cli.handle_line("hello").await.unwrap().unwrap();
        assert!(!answer.is_empty());

        assert!(cli.handle_line("/provider nope").await.is_err());
        assert_eq!(cli.handle_line("/quit").await.unwrap(), None);
    }

    #[tokio::test]
    async fn streamed_rag_is_written_incrementally() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::embedded_default().unwrap();
        config.database.path = dir.path().join("stream.duckdb");
        let cli = CliState::new_with_config(config).unwrap();

        let mut out: Vec<u8> = Vec::new();
        cli.stream_rag("anything", &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("This is a mock response"));
    }
}
