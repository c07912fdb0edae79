//! Command dispatch

use std::io;

use clap::CommandFactory;
use clap_complete::generate;
use itertools::Itertools;
use tracing::{debug, instrument};

use crate::application::Form;
use crate::cli::args::{Cli, Commands, ConfigCommands, FormArgs};
use crate::cli::output;
use crate::cli::CliResult;
use crate::config::{global_config_path, Settings};
use crate::domain::{TreeNodeConvert, Value};
use crate::infrastructure::di::ServiceContainer;

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    match &cli.command {
        Some(Commands::Completion { shell }) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Some(command) => {
            let settings = Settings::load(cli.config.as_deref())?;
            debug!("settings: {:?}", settings);
            let container = ServiceContainer::new(settings);
            dispatch(command, &container)
        }
        None => Ok(()),
    }
}

fn dispatch(command: &Commands, container: &ServiceContainer) -> CliResult<()> {
    match command {
        Commands::Eval { form } => _eval(form, container),
        Commands::Tree { form } => _tree(form, container),
        Commands::Graph { form } => _graph(form, container),
        Commands::Levels { form } => _levels(form, container),
        Commands::Config { command } => _config(command, container),
        Commands::Completion { .. } => Ok(()),
    }
}

/// Load the document and apply `--set` edits in order.
#[instrument(level = "debug", skip(container))]
fn load_form(args: &FormArgs, container: &ServiceContainer) -> CliResult<Form> {
    let mut form = container.documents.load_form(&args.doc)?;
    for (path, raw) in &args.set {
        let value = Value::parse_input(raw);
        debug!("set {} = {:?}", path, value);
        form.set_value(path, value)?;
    }
    Ok(form)
}

fn _eval(args: &FormArgs, container: &ServiceContainer) -> CliResult<()> {
    let form = load_form(args, container)?;
    for (path, value) in form.values() {
        let derived = form
            .resolve(&path.to_string())
            .ok()
            .and_then(|id| form.tree().get(id))
            .is_some_and(|n| n.formula.is_some() && !n.is_overridden());
        let rendered = value.map(|v| v.to_string());
        output::field(&path.to_string(), rendered.as_deref(), derived);
    }
    Ok(())
}

fn _tree(args: &FormArgs, container: &ServiceContainer) -> CliResult<()> {
    let form = load_form(args, container)?;
    output::info(&form.tree().to_tree_string());
    Ok(())
}

fn _graph(args: &FormArgs, container: &ServiceContainer) -> CliResult<()> {
    let mut form = load_form(args, container)?;
    let export = form.export_graph()?;
    for line in export.lines() {
        output::info(line);
    }
    Ok(())
}

fn _levels(args: &FormArgs, container: &ServiceContainer) -> CliResult<()> {
    let mut form = load_form(args, container)?;
    let levels = form.levels()?;
    for (level, group) in &levels.into_iter().chunk_by(|(_, level)| *level) {
        output::header(&format!("level {}", level));
        for (path, _) in group {
            output::detail(&path);
        }
    }
    Ok(())
}

fn _config(command: &ConfigCommands, container: &ServiceContainer) -> CliResult<()> {
    match command {
        ConfigCommands::Show => output::info(&container.settings.to_toml()?),
        ConfigCommands::Template => output::info(&Settings::template()),
        ConfigCommands::Path => match global_config_path() {
            Some(path) => output::info(&path.display()),
            None => output::error("no home directory, global config unavailable"),
        },
    }
    Ok(())
}
