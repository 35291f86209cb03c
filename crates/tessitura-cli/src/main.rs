//! tessitura: tokenise and inspect symbolic music from the command line

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use commands::VocabularyName;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Config file, defaults to <config dir>/tessitura/config.toml
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tokenise every track of a JSON file of MIDI records
    Tokenise {
        input: PathBuf,
        #[clap(short, long, default_value = "large-vocabulary")]
        vocabulary: VocabularyName,
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Turn token streams back into MIDI records
    Detokenise {
        input: PathBuf,
        /// Overrides the vocabulary recorded in the token file
        #[clap(short, long)]
        vocabulary: Option<VocabularyName>,
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Summarise the tracks of a JSON file of MIDI records
    Inspect { input: PathBuf },
    /// List the tokens of a vocabulary
    Vocabulary { name: VocabularyName },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tessitura=info".parse()?)
                .add_directive("tessitura_core=warn".parse()?),
        )
        .init();

    let config = config::load_config(args.config.as_deref());
    config.settings.clone().install()?;

    match args.command {
        Command::Tokenise {
            input,
            vocabulary,
            output,
        } => commands::tokenise(&config, &input, vocabulary, output.as_deref()),
        Command::Detokenise {
            input,
            vocabulary,
            output,
        } => commands::detokenise(&config, &input, vocabulary, output.as_deref()),
        Command::Inspect { input } => commands::inspect(&input),
        Command::Vocabulary { name } => commands::list_vocabulary(&config, name),
    }
}
