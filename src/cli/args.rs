//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Formula dependency engine for tree-shaped forms
#[derive(Parser, Debug)]
#[command(name = "formgraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Debug output, repeat for more (-d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Config file layered over the global one
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a form, apply edits and print every field value
    Eval {
        #[command(flatten)]
        form: FormArgs,
    },

    /// Print the field tree with values
    Tree {
        #[command(flatten)]
        form: FormArgs,
    },

    /// Print the dependency edges, one `pred -> dep` per line
    Graph {
        #[command(flatten)]
        form: FormArgs,
    },

    /// Print formula fields grouped by level
    Levels {
        #[command(flatten)]
        form: FormArgs,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// A form document plus edits applied after loading.
#[derive(clap::Args, Debug, Clone)]
pub struct FormArgs {
    /// Form document (TOML)
    #[arg(value_hint = ValueHint::FilePath)]
    pub doc: PathBuf,

    /// Set a field value, `path=value`; an empty value clears the field
    #[arg(short, long = "set", value_name = "PATH=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Print a commented config template
    Template,
    /// Show the global config file location
    Path,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (path, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=VALUE, got '{s}'"))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(format!("missing path in '{s}'"));
    }
    Ok((path.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn given_set_flags_when_parsed_then_assignments_split() {
        let cli = Cli::try_parse_from([
            "formgraph", "-dd", "eval", "sheet.toml", "--set", "str=16", "-s", "attacks[0].bonus=",
        ])
        .unwrap();
        assert_eq!(cli.debug, 2);
        match cli.command {
            Some(Commands::Eval { form }) => {
                assert_eq!(form.doc, PathBuf::from("sheet.toml"));
                assert_eq!(
                    form.set,
                    vec![
                        ("str".to_string(), "16".to_string()),
                        ("attacks[0].bonus".to_string(), String::new()),
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn given_assignment_without_equals_when_parsed_then_error() {
        assert!(parse_assignment("str").is_err());
        assert!(parse_assignment("=3").is_err());
    }
}
