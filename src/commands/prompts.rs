use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use crate::cli::{ListArgs, PromptImportArgs, PromptsArgs, PromptsCommand};
use crate::commands::{open_store, write_json_stdout};
use crate::model::PromptMap;
use crate::util::read_json_file;

pub fn run(args: PromptsArgs) -> Result<()> {
    match args.command {
        PromptsCommand::Import(args) => import(args),
        PromptsCommand::List(args) => list(args),
    }
}

fn import(args: PromptImportArgs) -> Result<()> {
    let prompts = read_json_file::<PromptMap>(&args.file)?;
    info!(file = %args.file.display(), prompts = prompts.len(), "importing prompt set");

    let store = open_store(&args.store)?;
    let prompt_set = store.insert_prompt_set(&args.name, prompts)?;

    let mut output = io::stdout().lock();
    writeln!(
        output,
        "{}\t{}\tprompts={}\tsha256={}",
        prompt_set.id,
        prompt_set.name,
        prompt_set.prompts.len(),
        prompt_set.sha256
    )?;
    Ok(())
}

fn list(args: ListArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    let prompt_sets = store.list_prompt_sets()?;
    if args.json {
        return write_json_stdout(&prompt_sets);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    for listing in &prompt_sets {
        writeln!(
            output,
            "{}\t{}\tprompts={}\tcreated_at={}",
            listing.id, listing.name, listing.item_count, listing.created_at
        )?;
    }
    output.flush()?;
    Ok(())
}
