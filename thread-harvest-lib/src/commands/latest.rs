use super::Host;
use super::config::Config;
use crate::Result;
use crate::harvest::latest_final;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ohno::bail;
use std::io::Write;

#[derive(Parser, Debug, Default)]
pub struct LatestArgs {
    /// Directory to search (default is the configured `output_dir`)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<Utf8PathBuf>,

    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,
}

fn find_latest(args: &LatestArgs) -> Result<Utf8PathBuf> {
    let dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => Config::load(Utf8Path::new("."), args.config.as_ref())?.output_dir,
    };

    match latest_final(&dir)? {
        Some(path) => Ok(path),
        None => bail!("no *_FINAL.csv file found in '{dir}'"),
    }
}

/// Print the most recently written final checkpoint.
pub fn print_latest<H: Host>(host: &mut H, args: &LatestArgs) -> Result<()> {
    match find_latest(args) {
        Ok(path) => {
            let _ = writeln!(host.output(), "{path}");
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "❌ {e}");
            host.exit(1);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use std::fs;

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_prints_final_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let final_path = dir.join("github_octo_widgets_FINAL.csv");
        fs::write(&final_path, "record_id\n").unwrap();
        fs::write(dir.join("github_octo_widgets_CHECKPOINT.csv"), "record_id\n").unwrap();

        let mut host = TestHost::new();
        print_latest(
            &mut host,
            &LatestArgs {
                output_dir: Some(dir),
                config: None,
            },
        )
        .unwrap();

        assert_eq!(host.output_str().trim_end(), final_path.as_str());
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_reports_missing_final_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        fs::write(dir.join("github_octo_widgets_INTERRUPTED.csv"), "record_id\n").unwrap();

        let mut host = TestHost::new();
        let result = print_latest(
            &mut host,
            &LatestArgs {
                output_dir: Some(dir),
                config: None,
            },
        );

        assert!(result.is_err());
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_str().contains("no *_FINAL.csv file found"));
        assert!(host.output_str().is_empty());
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_uses_configured_output_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let out = dir.join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("github_a_b_FINAL.csv"), "record_id\n").unwrap();

        let config = dir.join("harvest.toml");
        fs::write(&config, format!("owner = \"a\"\nrepo = \"b\"\noutput_dir = \"{out}\"\n")).unwrap();

        let mut host = TestHost::new();
        print_latest(
            &mut host,
            &LatestArgs {
                output_dir: None,
                config: Some(config),
            },
        )
        .unwrap();

        assert!(host.output_str().contains("github_a_b_FINAL.csv"));
    }
}
