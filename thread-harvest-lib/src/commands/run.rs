//! Command dispatch logic for thread-harvest

use super::{HarvestArgs, InitArgs, LatestArgs, ValidateArgs, harvest_repository, init_config, print_latest, validate_config};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "thread-harvest", version, author, long_about = None)]
#[command(about = "Harvest issue and pull request discussion threads into CSV tables")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: HarvestSubcommand,
}

#[derive(Subcommand, Debug)]
enum HarvestSubcommand {
    /// Collect every thread of a repository and write checkpoint files
    Harvest(Box<HarvestArgs>),
    /// Generate a default configuration file
    Init(InitArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
    /// Print the most recent final checkpoint file
    Latest(LatestArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Errors
///
/// Returns an error if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    match &Cli::parse_from(args).command {
        HarvestSubcommand::Harvest(harvest_args) => harvest_repository(host, harvest_args).await,
        HarvestSubcommand::Init(init_args) => init_config(host, init_args),
        HarvestSubcommand::Validate(validate_args) => validate_config(host, validate_args),
        HarvestSubcommand::Latest(latest_args) => print_latest(host, latest_args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_repeated_tokens() {
        let cli = Cli::try_parse_from([
            "thread-harvest",
            "harvest",
            "--owner",
            "octo",
            "--token",
            "one",
            "--token",
            "two",
            "--max-concurrent",
            "4",
        ])
        .unwrap();

        let HarvestSubcommand::Harvest(args) = cli.command else {
            unreachable!("expected harvest subcommand");
        };
        assert_eq!(args.owner.as_deref(), Some("octo"));
        assert_eq!(args.tokens, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(args.max_concurrent, Some(4));
        assert_eq!(args.repo, None);
    }

    #[test]
    fn test_parse_log_level_and_color() {
        let cli = Cli::try_parse_from(["thread-harvest", "harvest", "--log-level", "debug", "--color", "never"]).unwrap();

        let HarvestSubcommand::Harvest(args) = cli.command else {
            unreachable!("expected harvest subcommand");
        };
        assert_eq!(args.log_level, crate::commands::LogLevel::Debug);
        assert_eq!(args.color, crate::commands::ColorMode::Never);
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["thread-harvest", "scrape"]).is_err());
    }
}
