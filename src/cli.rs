use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "oedipus",
    version,
    about = "Statistical comparison of LLM completion datasets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import and list prompt sets.
    Prompts(PromptsArgs),
    /// Import and list completion sets.
    Completions(CompletionsArgs),
    /// Create, run and inspect comparisons.
    Compare(CompareArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/oedipus")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

/// Overrides applied on top of the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct AnalysisArgs {
    #[arg(long)]
    pub settings_path: Option<PathBuf>,

    #[arg(long)]
    pub aligned_row_cap: Option<usize>,

    #[arg(long)]
    pub significance_alpha: Option<f64>,

    #[arg(long)]
    pub large_effect_threshold: Option<f64>,

    #[arg(long)]
    pub confidence_level: Option<f64>,

    #[arg(long)]
    pub tokenizer_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PromptsArgs {
    #[command(subcommand)]
    pub command: PromptsCommand,
}

#[derive(Subcommand, Debug)]
pub enum PromptsCommand {
    /// Import a JSON object mapping prompt id to prompt text.
    Import(PromptImportArgs),
    List(ListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PromptImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[command(subcommand)]
    pub command: CompletionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum CompletionsCommand {
    /// Import a JSON object mapping prompt id to a list of completions.
    Import(CompletionImportArgs),
    List(CompletionListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CompletionImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub prompt_set_id: String,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionListArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub prompt_set_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(subcommand)]
    pub command: CompareCommand,
}

#[derive(Subcommand, Debug)]
pub enum CompareCommand {
    Create(CompareCreateArgs),
    /// Run one pending comparison and wait for it.
    Run(CompareRunArgs),
    /// Run every pending comparison on a worker pool.
    RunPending(RunPendingArgs),
    Show(CompareShowArgs),
    List(ListArgs),
    Delete(CompareIdArgs),
    /// Return comparisons left `running` by a dead process to `pending`.
    Recover(RecoverArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CompareCreateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub analysis: AnalysisArgs,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub prompt_set_id: String,

    #[arg(long = "completion-set-id", required = true)]
    pub completion_set_ids: Vec<String>,

    #[arg(long)]
    pub alignment_key: Option<String>,

    /// `key=value`; values are parsed as JSON when possible.
    #[arg(long = "option")]
    pub options: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub run: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompareRunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub analysis: AnalysisArgs,

    #[arg(long)]
    pub id: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunPendingArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub analysis: AnalysisArgs,

    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareShowArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub id: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Also write the full comparison as JSON to this path.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareIdArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}
