mod logging;
mod repl;

use std::{path::PathBuf, process::ExitCode};

use {
    clap::{Parser, Subcommand, ValueEnum},
    grimoire_chat::RulesAssistant,
    grimoire_config::{EmbeddingProviderKind, GrimoireConfig, discover_and_load},
    tracing::info,
};

#[derive(Parser, Debug)]
#[command(
    name = "grimoire",
    about = "Ask D&D 5e rules questions answered from your rulebook",
    version
)]
struct Cli {
    /// Config file (default: ./grimoire.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rulebook PDF to index
    #[arg(long, env = "GRIMOIRE_RULEBOOK", global = true)]
    rulebook: Option<PathBuf>,

    /// Chat model identifier
    #[arg(long, global = true)]
    model: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Embedding backend for the rulebook index
    #[arg(long, value_enum, global = true)]
    embeddings: Option<EmbeddingsArg>,

    /// Game master name used in the prompt
    #[arg(long, global = true)]
    game_master: Option<String>,

    /// Player level used in the prompt
    #[arg(long, global = true)]
    level: Option<u8>,

    /// Campaign setting used in the prompt
    #[arg(long, global = true)]
    setting: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "grimoire_memory=debug")
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Ask one question and exit
    Ask {
        question: String,
        /// Also print the referenced rules
        #[arg(long)]
        rules: bool,
    },
    /// Index the rulebook and print its status
    Status,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum EmbeddingsArg {
    Hashing,
    Openai,
    Local,
}

impl From<EmbeddingsArg> for EmbeddingProviderKind {
    fn from(arg: EmbeddingsArg) -> Self {
        match arg {
            EmbeddingsArg::Hashing => Self::Hashing,
            EmbeddingsArg::Openai => Self::Openai,
            EmbeddingsArg::Local => Self::Local,
        }
    }
}

impl Cli {
    /// Flags take precedence over file values.
    fn apply_overrides(&self, config: &mut GrimoireConfig) {
        if let Some(path) = &self.rulebook {
            config.rulebook.pdf_path.clone_from(path);
        }
        if let Some(model) = &self.model {
            config.llm.model.clone_from(model);
        }
        if let Some(url) = &self.base_url {
            config.llm.base_url.clone_from(url);
        }
        if let Some(kind) = self.embeddings {
            config.embeddings.provider = kind.into();
        }
        if let Some(gm) = &self.game_master {
            config.assistant.game_master_name.clone_from(gm);
        }
        if let Some(level) = self.level {
            config.assistant.player_level = level;
        }
        if let Some(setting) = &self.setting {
            config.assistant.campaign_setting.clone_from(setting);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level, cli.log_json) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = discover_and_load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let command = cli.command.clone().unwrap_or(Command::Chat);
    if command == Command::Config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    info!(rulebook = %config.rulebook.pdf_path.display(), "initialising assistant");
    eprintln!("Loading rulebook and connecting to the model...");
    let mut assistant = match RulesAssistant::new(&config).await {
        Ok(assistant) => assistant,
        Err(e) => {
            eprintln!("Initialization error: {e:#}");
            return Ok(ExitCode::from(2));
        },
    };

    match command {
        Command::Chat => repl::run(assistant).await?,
        Command::Ask { question, rules } => {
            println!("{}", assistant.send_message(&question).await);
            if rules {
                println!();
                repl::print_rules(&assistant.get_referenced_rules());
            }
        },
        Command::Status => repl::print_status(assistant.status()),
        Command::Config => {},
    }
    Ok(ExitCode::SUCCESS)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::try_parse_from([
            "grimoire",
            "--rulebook",
            "/books/phb.pdf",
            "--model",
            "llama-3.1-8b-instant",
            "--embeddings",
            "openai",
            "--level",
            "7",
            "ask",
            "What is a Goliath?",
        ])
        .unwrap();
        let mut config = GrimoireConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.rulebook.pdf_path, PathBuf::from("/books/phb.pdf"));
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.embeddings.provider, EmbeddingProviderKind::Openai);
        assert_eq!(config.assistant.player_level, 7);
        assert_eq!(config.assistant.game_master_name, "Alex");
        assert_eq!(
            cli.command,
            Some(Command::Ask {
                question: "What is a Goliath?".into(),
                rules: false
            })
        );
    }

    #[test]
    fn chat_is_the_default_command() {
        let cli = Cli::try_parse_from(["grimoire", "--log-json"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.log_json);
        assert_eq!(cli.log_level, "warn");
    }
}
