//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Source-map aware SASS/SCSS compiler
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: sassmap.toml)
    #[arg(short = 'C', long, global = true, default_value = "sassmap.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile entry files to disk
    #[command(visible_alias = "c")]
    Compile {
        #[arg(required = true, value_hint = clap::ValueHint::FilePath)]
        files: Vec<PathBuf>,
    },

    /// Watch a directory and recompile on change
    #[command(visible_alias = "w")]
    Watch {
        /// Directory to watch (default: the config file's folder)
        #[arg(value_hint = clap::ValueHint::DirPath)]
        dir: Option<PathBuf>,
    },

    /// List the rule selectors of a stylesheet
    Selectors {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        /// Print JSON instead of one line per selector
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compile() {
        let cli = Cli::try_parse_from(["sassmap", "-v", "compile", "a.scss", "b.scss"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("sassmap.toml"));
        let Commands::Compile { files } = cli.command else {
            panic!("expected compile");
        };
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_parse_selectors_json() {
        let cli = Cli::try_parse_from(["sassmap", "selectors", "x.css", "--json", "-C", "cfg.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("cfg.toml"));
        assert!(matches!(cli.command, Commands::Selectors { json: true, .. }));
    }

    #[test]
    fn test_compile_requires_files() {
        assert!(Cli::try_parse_from(["sassmap", "compile"]).is_err());
    }
}
