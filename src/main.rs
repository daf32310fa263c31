use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use tracing_subscriber::EnvFilter;

mod cli;

use bizq::config;
use bizq::{safety, sanitize};
use bizq::{AskOptions, AskRequest, Assistant, ResponseEnvelope};
use cli::{AskArgs, BatchArgs, CheckArgs, Command, ConfigArgs, RootArgs, SchemaArgs};

fn main() -> Result<()> {
    let RootArgs {
        config,
        verbose,
        command,
    } = RootArgs::parse();
    init_tracing(verbose);
    let config_path = config.as_deref();

    match command {
        Command::Ask(args) => cmd_ask(config_path, args),
        Command::Batch(args) => cmd_batch(config_path, args),
        Command::Schema(args) => cmd_schema(config_path, args),
        Command::Check(args) => cmd_check(args),
        Command::Config(args) => cmd_config(config_path, args),
    }
}

/// Logs go to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "bizq=debug" } else { "bizq=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn assistant(config_path: Option<&Path>) -> Result<Assistant> {
    let config = config::load(config_path)?;
    config::build_assistant(&config)
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn cmd_ask(config_path: Option<&Path>, args: AskArgs) -> Result<()> {
    let (question, options, json) = match (&args.request, args.question) {
        (Some(path), _) => {
            let body = read_input(path)?;
            let request: AskRequest =
                serde_json::from_str(&body).context("parse request JSON")?;
            let options = request.options();
            (request.message, options, true)
        }
        (None, Some(question)) => {
            let options = AskOptions {
                include_query: !args.no_query,
                allow_data_in_prompt: !args.no_data_in_prompt,
            };
            (question, options, args.json)
        }
        (None, None) => return Err(anyhow!("a question or --request is required")),
    };
    if question.trim().is_empty() {
        return Err(anyhow!("question must be non-empty"));
    }

    let assistant = assistant(config_path)?;
    let envelope = assistant.ask_with(question.trim(), options);
    if json {
        let text = serde_json::to_string_pretty(&envelope.to_json())
            .context("serialize response")?;
        println!("{text}");
    } else {
        print!("{}", render_text(&envelope));
    }
    Ok(())
}

fn render_text(envelope: &ResponseEnvelope) -> String {
    let mut out = format!(
        "[{}] {} ({} ms)\n",
        envelope.status.as_str(),
        envelope
            .category()
            .map(|category| category.as_str())
            .unwrap_or("UNCLASSIFIED"),
        envelope.elapsed.as_millis()
    );
    if let Some(answer) = &envelope.answer {
        out.push_str(answer.trim());
        out.push('\n');
    }
    if let Some(query) = envelope.generated_query() {
        out.push_str(&format!("query: {query}\n"));
    }
    if let Some(rows) = envelope.row_count() {
        out.push_str(&format!("rows: {rows}\n"));
    }
    for (idx, doc) in envelope.related_docs().iter().enumerate() {
        let first_line = doc.lines().next().unwrap_or_default();
        out.push_str(&format!("doc {}: {first_line}\n", idx + 1));
    }
    if let Some(error) = &envelope.error_message {
        out.push_str(&format!("error: {error}\n"));
    }
    out
}

fn cmd_batch(config_path: Option<&Path>, args: BatchArgs) -> Result<()> {
    let input = read_input(&args.file)?;
    let questions: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let assistant = assistant(config_path)?;

    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<Option<String>>> = Mutex::new(vec![None; questions.len()]);
    let workers = usize::from(args.jobs).min(questions.len().max(1));
    tracing::info!(questions = questions.len(), workers, "batch start");

    let outcomes: Vec<Result<()>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(|| -> Result<()> {
                loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(question) = questions.get(idx) else {
                        return Ok(());
                    };
                    let envelope = assistant.ask(question);
                    let line = serde_json::to_string(&envelope.to_json())
                        .context("serialize response")?;
                    results
                        .lock()
                        .map_err(|_| anyhow!("batch results lock poisoned"))?[idx] = Some(line);
                }
            }));
        }
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("batch worker panicked")))
            })
            .collect()
    });
    for outcome in outcomes {
        outcome?;
    }

    let results = results
        .into_inner()
        .map_err(|_| anyhow!("batch results lock poisoned"))?;
    for (idx, line) in results.into_iter().enumerate() {
        let line = line.with_context(|| format!("no response for question {}", idx + 1))?;
        println!("{line}");
    }
    Ok(())
}

fn cmd_schema(config_path: Option<&Path>, args: SchemaArgs) -> Result<()> {
    let assistant = assistant(config_path)?;
    let hint = assistant
        .schema_hint(&args.question)
        .context("build schema hint")?;
    println!("tables: {}", hint.tables.join(", "));
    println!("{}", hint.text);
    Ok(())
}

fn cmd_check(args: CheckArgs) -> Result<()> {
    let sanitized = sanitize::sanitize(&args.statement)?;
    let validated = safety::validate(&sanitized)?;
    println!("safe: {}", validated.as_str());
    Ok(())
}

fn cmd_config(config_path: Option<&Path>, args: ConfigArgs) -> Result<()> {
    if args.print_default {
        println!("{}", config::config_stub()?);
        return Ok(());
    }
    let config = config::load(config_path)?;
    let text = serde_json::to_string_pretty(&config).context("serialize config")?;
    println!("{text}");
    Ok(())
}
