use super::Host;
use super::ProgressReporter;
use super::common::{ColorMode, LogLevel, init_logging};
use super::config::Config;
use crate::Result;
use crate::harvest::{
    Checkpointer, CredentialPool, ExecutorOptions, HarvestCoordinator, HarvestOptions, HarvestSummary, Progress, RequestExecutor,
    RequestTracker, ResultBuffer, StallHook, secrets_from_env,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use core::time::Duration;
use std::io::Write;
use std::sync::Arc;

/// Exit status reported when the run was cut short by Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Args, Debug, Default)]
pub struct HarvestArgs {
    /// Path to configuration file (default is `harvest.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// Account or organization owning the repository
    #[arg(long, value_name = "OWNER")]
    pub owner: Option<String>,

    /// Repository name
    #[arg(long, value_name = "REPO")]
    pub repo: Option<String>,

    /// Directory receiving checkpoint files
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<Utf8PathBuf>,

    /// Maximum number of threads processed at the same time
    #[arg(long, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Number of issue list pages to fetch (0 for all)
    #[arg(long, value_name = "N")]
    pub max_pages: Option<u32>,

    /// API token; repeat to rotate between several tokens (default is `GITHUB_TOKEN_1`, `GITHUB_TOKEN_2`, ... or `GITHUB_TOKEN`)
    #[arg(long = "token", value_name = "TOKEN")]
    pub tokens: Vec<String>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,
}

impl HarvestArgs {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(owner) = &self.owner {
            config.owner.clone_from(owner);
        }
        if let Some(repo) = &self.repo {
            config.repo.clone_from(repo);
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir.clone_from(output_dir);
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_threads = max_concurrent;
        }
        if let Some(max_pages) = self.max_pages {
            config.max_issue_pages = max_pages;
        }
    }

    fn secrets(&self) -> Vec<String> {
        if self.tokens.is_empty() {
            secrets_from_env(|name| std::env::var(name).ok())
        } else {
            self.tokens.clone()
        }
    }
}

pub async fn harvest_repository<H: Host>(host: &mut H, args: &HarvestArgs) -> Result<()> {
    init_logging(args.log_level);

    match execute(args).await {
        Ok(summary) => {
            report(host, &summary);
            if summary.interrupted {
                host.exit(INTERRUPTED_EXIT_CODE);
            }
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "❌ Harvest failed: {e}");
            host.exit(1);
            Err(e)
        }
    }
}

async fn execute(args: &HarvestArgs) -> Result<HarvestSummary> {
    let mut config = Config::load(Utf8Path::new("."), args.config.as_ref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    let pool = Arc::new(CredentialPool::new(args.secrets())?);

    let reporter = ProgressReporter::new(args.log_level.progress_delay(), args.color.use_colors());
    let progress: Arc<dyn Progress> = Arc::new(reporter);
    let tracker = RequestTracker::new(&progress);

    let checkpointer = Arc::new(Checkpointer::new(
        Arc::new(ResultBuffer::new()),
        config.output_dir.clone(),
        &config.owner,
        &config.repo,
    ));

    let executor_options = ExecutorOptions {
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        ..ExecutorOptions::default()
    };
    let stall_hook = Arc::clone(&checkpointer) as Arc<dyn StallHook>;
    let executor = RequestExecutor::new(pool, tracker, executor_options)?.with_stall_hook(stall_hook);

    let coordinator = HarvestCoordinator::new(
        Arc::new(executor),
        checkpointer,
        HarvestOptions {
            owner: config.owner,
            repo: config.repo,
            api_base_url: config.api_base_url,
            max_issue_pages: config.max_issue_pages,
            max_concurrent_threads: config.max_concurrent_threads,
            checkpoint_every: config.checkpoint_every,
            progress_interval: PROGRESS_LOG_INTERVAL,
        },
    );

    let result = coordinator.run().await;
    progress.done();
    result
}

fn report<H: Host>(host: &mut H, summary: &HarvestSummary) {
    let mut out = host.output();
    let _ = writeln!(out, "Harvested {} record(s) from {} thread(s)", summary.records, summary.threads);
    match &summary.checkpoint {
        Some(path) if summary.interrupted => {
            let _ = writeln!(out, "Interrupted, partial results saved to {path}");
        }
        Some(path) => {
            let _ = writeln!(out, "Results saved to {path}");
        }
        None if summary.interrupted => {
            let _ = writeln!(out, "Interrupted before any records were harvested");
        }
        None => {
            let _ = writeln!(out, "No data processed, no checkpoint written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use std::fs;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn utf8_dir(tmp: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap()
    }

    fn write_config(dir: &Utf8Path, api_base_url: &str) -> Utf8PathBuf {
        let path = dir.join("harvest.toml");
        fs::write(
            &path,
            format!("owner = \"octo\"\nrepo = \"widgets\"\noutput_dir = \"{}\"\napi_base_url = \"{api_base_url}\"\n", dir.join("out")),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let args = HarvestArgs {
            owner: Some("rust-lang".to_string()),
            repo: Some("rust".to_string()),
            output_dir: Some(Utf8PathBuf::from("elsewhere")),
            max_concurrent: Some(3),
            max_pages: Some(2),
            ..HarvestArgs::default()
        };

        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.owner, "rust-lang");
        assert_eq!(config.repo, "rust");
        assert_eq!(config.output_dir, "elsewhere");
        assert_eq!(config.max_concurrent_threads, 3);
        assert_eq!(config.max_issue_pages, 2);
        assert_eq!(config.checkpoint_every, 250);
    }

    #[test]
    fn test_command_line_tokens_win() {
        let args = HarvestArgs {
            tokens: vec!["a".to_string(), "b".to_string()],
            ..HarvestArgs::default()
        };
        assert_eq!(args.secrets(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn test_invalid_override_fails_before_any_request() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&tmp);
        let config = write_config(&dir, "http://127.0.0.1:9");

        let args = HarvestArgs {
            config: Some(config),
            max_concurrent: Some(0),
            tokens: vec!["t".to_string()],
            ..HarvestArgs::default()
        };

        let mut host = TestHost::new();
        let result = harvest_repository(&mut host, &args).await;

        assert!(result.is_err());
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_str().contains("max_concurrent_threads"));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn test_harvest_writes_final_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "full_name": "octo/widgets",
                "description": "Widgets",
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": 1000,
                "number": 1,
                "title": "Broken widget",
                "body": "It broke",
                "created_at": "2024-03-01T10:00:00Z",
                "html_url": "https://github.com/octo/widgets/issues/1",
                "user": { "id": 7, "login": "alice" },
                "comments": 0,
                "comments_url": format!("{}/repos/octo/widgets/issues/1/comments", server.uri()),
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "name": "Alice" })))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&tmp);
        let config = write_config(&dir, &server.uri());

        let args = HarvestArgs {
            config: Some(config),
            tokens: vec!["t".to_string()],
            color: ColorMode::Never,
            ..HarvestArgs::default()
        };

        let mut host = TestHost::new();
        harvest_repository(&mut host, &args).await.unwrap();

        let expected = dir.join("out").join("github_octo_widgets_FINAL.csv");
        let output = host.output_str();
        assert!(output.contains("Harvested 1 record(s) from 1 thread(s)"), "{output}");
        assert!(output.contains(expected.as_str()), "{output}");
        assert!(expected.exists());
        assert_eq!(host.exit_code, None);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn test_missing_repository_exits_nonzero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&tmp);
        let config = write_config(&dir, &server.uri());

        let args = HarvestArgs {
            config: Some(config),
            tokens: vec!["t".to_string()],
            color: ColorMode::Never,
            ..HarvestArgs::default()
        };

        let mut host = TestHost::new();
        assert!(harvest_repository(&mut host, &args).await.is_err());
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_str().contains("not found"), "{}", host.error_str());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn test_failed_issue_listing_exits_nonzero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "full_name": "octo/widgets" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/widgets/issues"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&tmp);
        let config = write_config(&dir, &server.uri());

        let args = HarvestArgs {
            config: Some(config),
            tokens: vec!["t".to_string()],
            color: ColorMode::Never,
            ..HarvestArgs::default()
        };

        let mut host = TestHost::new();
        assert!(harvest_repository(&mut host, &args).await.is_err());
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_str().contains("Harvest failed"), "{}", host.error_str());
        assert!(!host.output_str().contains("No data processed"));
    }

    #[test]
    fn test_report_variants() {
        let mut host = TestHost::new();
        report(
            &mut host,
            &HarvestSummary {
                threads: 3,
                records: 9,
                checkpoint: Some(Utf8PathBuf::from("data/github_o_r_INTERRUPTED.csv")),
                interrupted: true,
            },
        );
        report(
            &mut host,
            &HarvestSummary {
                threads: 0,
                records: 0,
                checkpoint: None,
                interrupted: false,
            },
        );

        let output = host.output_str();
        assert!(output.contains("Harvested 9 record(s) from 3 thread(s)"));
        assert!(output.contains("Interrupted, partial results saved to data/github_o_r_INTERRUPTED.csv"));
        assert!(output.contains("No data processed"));
    }
}
