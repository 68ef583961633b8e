use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use crate::cli::{CompletionImportArgs, CompletionListArgs, CompletionsArgs, CompletionsCommand};
use crate::commands::{open_store, write_json_stdout};
use crate::model::CompletionMap;
use crate::util::read_json_file;

pub fn run(args: CompletionsArgs) -> Result<()> {
    match args.command {
        CompletionsCommand::Import(args) => import(args),
        CompletionsCommand::List(args) => list(args),
    }
}

fn import(args: CompletionImportArgs) -> Result<()> {
    let completions = read_json_file::<CompletionMap>(&args.file)?;
    info!(
        file = %args.file.display(),
        prompt_set_id = %args.prompt_set_id,
        prompt_ids = completions.len(),
        "importing completion set"
    );

    let store = open_store(&args.store)?;
    let completion_set = store.insert_completion_set(&args.prompt_set_id, &args.name, completions)?;

    let mut output = io::stdout().lock();
    writeln!(
        output,
        "{}\t{}\tprompt_set={}\tcompletions={}\tsha256={}",
        completion_set.id,
        completion_set.name,
        completion_set.prompt_set_id,
        completion_set.total_completions(),
        completion_set.sha256
    )?;
    Ok(())
}

fn list(args: CompletionListArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    let completion_sets = store.list_completion_sets(args.prompt_set_id.as_deref())?;
    if args.json {
        return write_json_stdout(&completion_sets);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    for listing in &completion_sets {
        writeln!(
            output,
            "{}\t{}\tprompt_set={}\tcompletions={}\tcreated_at={}",
            listing.id,
            listing.name,
            listing.parent_id.as_deref().unwrap_or("-"),
            listing.item_count,
            listing.created_at
        )?;
    }
    output.flush()?;
    Ok(())
}
