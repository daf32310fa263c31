//! CLI argument parsing.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "bizq",
    version,
    about = "Answer business questions from a read-only database",
    after_help = "Examples:\n  bizq ask \"top 5 best-selling products\"\n  bizq ask \"hello\" --json\n  bizq ask --request body.json\n  bizq batch --file questions.txt --jobs 4\n  bizq schema \"revenue by month\"\n  bizq check \"SELECT name FROM products\"\n  bizq config --print-default",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Config file (defaults to $BIZQ_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Ask(AskArgs),
    Batch(BatchArgs),
    Schema(SchemaArgs),
    Check(CheckArgs),
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
#[command(about = "Answer one question")]
pub struct AskArgs {
    /// Question text
    #[arg(required_unless_present = "request", conflicts_with = "request")]
    pub question: Option<String>,

    /// JSON request body ({message, include_sql?, allow_llm_to_see_data?}); `-` reads stdin
    #[arg(long, value_name = "FILE")]
    pub request: Option<PathBuf>,

    /// Emit the response as JSON
    #[arg(long)]
    pub json: bool,

    /// Leave the generated statement off the response
    #[arg(long)]
    pub no_query: bool,

    /// Do not show result rows to the summary model
    #[arg(long)]
    pub no_data_in_prompt: bool,
}

#[derive(Args, Debug)]
#[command(about = "Answer one question per line, concurrently, as JSON lines")]
pub struct BatchArgs {
    /// File with one question per line; `-` reads stdin
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,

    /// Worker threads
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub jobs: u16,
}

#[derive(Args, Debug)]
#[command(about = "Print the schema hint used for a question")]
pub struct SchemaArgs {
    pub question: String,
}

#[derive(Args, Debug)]
#[command(about = "Run a statement through the sanitizer and safety gate only")]
pub struct CheckArgs {
    pub statement: String,
}

#[derive(Args, Debug)]
#[command(about = "Show configuration")]
pub struct ConfigArgs {
    /// Print the built-in default config as JSON
    #[arg(long)]
    pub print_default: bool,
}
