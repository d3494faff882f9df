use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::plan::Direction;
use crate::{Error, Result, DEFAULT_BATCH_SIZE, DEFAULT_DAILY_LIMIT, DEFAULT_QUERY_CAP};

/// Years a search window may fall in.
const YEARS: RangeInclusive<i32> = 1..=9999;

/// Downloads Nexis Uni search results month by month, within the portal's limits.
#[derive(Debug, Parser)]
#[command(name = "nexis-harvest", version, about)]
pub struct Cli {
    /// Portal entry point, e.g. the institution's Nexis Uni URL
    #[arg(long, env = "NEXIS_URL")]
    pub base_url: String,

    /// Search query in the portal's boolean syntax
    #[arg(long, env = "NEXIS_QUERY", conflicts_with = "query_file")]
    pub query: Option<String>,

    /// Read the search query from a file instead
    #[arg(long)]
    pub query_file: Option<PathBuf>,

    /// Restrict results to one publication, e.g. "Agence France Presse - English"
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, default_value_t = 2008)]
    pub start_year: i32,

    /// Last year to fetch, inclusive
    #[arg(long, default_value_t = 2023)]
    pub end_year: i32,

    /// Walk each month newest first, to reach results beyond the query cap
    #[arg(long)]
    pub backward: bool,

    /// Articles per download request
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Results the portal serves per query
    #[arg(long, default_value_t = DEFAULT_QUERY_CAP)]
    pub query_cap: usize,

    /// Download requests allowed per calendar day
    #[arg(long, env = "NEXIS_DAILY_LIMIT", default_value_t = DEFAULT_DAILY_LIMIT)]
    pub daily_limit: usize,

    /// Results per listing page
    #[arg(long, default_value_t = 10)]
    pub page_size: usize,

    /// Pause between two portal requests, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub delay_ms: u64,

    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Cookie header of an already signed-in browser session
    #[arg(long, env = "NEXIS_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Only search and log the batches that would be downloaded
    #[arg(long)]
    pub dry_run: bool,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: Url,
    pub query: String,
    pub source: Option<String>,
    pub start_year: i32,
    pub end_year: i32,
    pub direction: Direction,
    pub batch_size: usize,
    pub query_cap: usize,
    pub daily_limit: usize,
    pub page_size: usize,
    pub delay: Duration,
    pub timeout: Duration,
    pub data_dir: PathBuf,
    pub cookie: Option<String>,
    pub dry_run: bool,
}

impl Cli {
    pub fn into_config(self) -> Result<RunConfig> {
        let query = match (self.query, &self.query_file) {
            (Some(q), _) => q,
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => String::new(),
        };
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(Error::Config(
                "a search query is required (--query or --query-file)".into(),
            ));
        }

        // `Url::join` replaces the last segment unless the base ends with a slash.
        let mut base = self.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        for year in [self.start_year, self.end_year] {
            if !YEARS.contains(&year) {
                return Err(Error::Config(format!(
                    "year {year} is outside {}..={}",
                    YEARS.start(),
                    YEARS.end()
                )));
            }
        }
        if self.start_year > self.end_year {
            return Err(Error::Config(format!(
                "start year {} is after end year {}",
                self.start_year, self.end_year
            )));
        }
        for (name, value) in [
            ("batch size", self.batch_size),
            ("query cap", self.query_cap),
            ("daily limit", self.daily_limit),
            ("page size", self.page_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        if self.batch_size > self.query_cap {
            return Err(Error::Config(format!(
                "batch size {} exceeds the query cap {}",
                self.batch_size, self.query_cap
            )));
        }

        Ok(RunConfig {
            base_url,
            query,
            source: self.source.filter(|s| !s.trim().is_empty()),
            start_year: self.start_year,
            end_year: self.end_year,
            direction: if self.backward {
                Direction::Backward
            } else {
                Direction::Forward
            },
            batch_size: self.batch_size,
            query_cap: self.query_cap,
            daily_limit: self.daily_limit,
            page_size: self.page_size,
            delay: Duration::from_millis(self.delay_ms),
            timeout: Duration::from_secs(self.timeout_secs),
            data_dir: self.data_dir,
            cookie: self.cookie.filter(|c| !c.trim().is_empty()),
            dry_run: self.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["nexis-harvest", "--base-url", "https://portal.example/uni"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_follow_the_portal_limits() {
        let config = parse(&["--query", "climate"]).into_config().unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.query_cap, 1_000);
        assert_eq!(config.direction, Direction::Forward);
        assert_eq!(config.base_url.as_str(), "https://portal.example/uni/");
        assert_eq!(config.delay, Duration::from_secs(5));
    }

    #[test]
    fn query_can_come_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.txt");
        std::fs::write(&path, "  (climate) NEAR/10 (protest*)\n").unwrap();
        let config = parse(&["--query-file", path.to_str().unwrap(), "--backward"])
            .into_config()
            .unwrap();
        assert_eq!(config.query, "(climate) NEAR/10 (protest*)");
        assert_eq!(config.direction, Direction::Backward);
    }

    #[test]
    fn rejects_inconsistent_values() {
        let cases: &[&[&str]] = &[
            &["--query", "   "],
            &["--query", "x", "--start-year", "2020", "--end-year", "2019"],
            &["--query", "x", "--daily-limit", "0"],
            &["--query", "x", "--batch-size", "500", "--query-cap", "100"],
            &["--query", "x", "--end-year", "2147483647"],
            &["--query", "x", "--start-year", "0"],
        ];
        for args in cases {
            assert!(
                matches!(parse(args).into_config(), Err(Error::Config(_))),
                "accepted {args:?}"
            );
        }
    }
}
