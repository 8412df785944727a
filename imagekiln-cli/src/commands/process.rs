//! Process command - derive output variants for local source images.
//!
//! Each source path is staged into the cache under a key taken from its
//! file stem, then run through the same pipeline the service uses for
//! remote origins. Paths come from the command line, or from stdin one
//! per line when none are given.

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use imagekiln::config::ServerConfig;
use imagekiln::key::CacheKey;
use imagekiln::orchestrator::{ProcessError, ProcessOutcome};
use imagekiln::service::ImageKilnService;
use imagekiln::upload::UploaderConfig;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Remote store uploader selection.
#[derive(Debug, Clone, ValueEnum)]
pub enum UploaderType {
    /// Keep processed images on local disk only
    Noop,
    /// Mirror processed images into another directory tree
    Directory,
}

/// Arguments for the process command.
#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Source image paths; reads newline-separated paths from stdin when empty
    pub paths: Vec<PathBuf>,

    /// Output variants with dimension and compression: 'x300.jpg,x300.webp'
    #[arg(long)]
    pub outputs: String,

    /// Namespace the processed images are stored under
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Whitelisted extensions (separated by commas)
    #[arg(long, default_value = "jpg,gif,webp")]
    pub extensions: String,

    /// Directory where the images will be saved
    #[arg(long, default_value = "public")]
    pub local_base_path: PathBuf,

    /// Source domain for images
    #[arg(long, default_value = "")]
    pub remote_base_url: String,

    /// Base path for objects in the remote store
    #[arg(long, default_value = "")]
    pub remote_base_path: String,

    /// Remote store uploader
    #[arg(long, value_enum, default_value = "noop")]
    pub uploader: UploaderType,

    /// Directory the directory uploader mirrors into
    #[arg(long, required_if_eq("uploader", "directory"))]
    pub upload_directory: Option<PathBuf>,

    /// Maximum image width
    #[arg(long, default_value = "1000")]
    pub maximum_width: u32,

    /// Default image compression quality
    #[arg(long, default_value = "75")]
    pub default_quality: u8,

    /// Simultaneous uploads
    #[arg(long, default_value = "10")]
    pub uploader_concurrency: usize,

    /// Simultaneous transform engine invocations
    #[arg(long, default_value = "4")]
    pub processor_concurrency: usize,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "5")]
    pub http_timeout: u64,

    /// Max file age in minutes before the cache reaper deletes it
    #[arg(long, default_value = "30")]
    pub max_file_age: u64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Run the process command.
pub async fn run(args: ProcessArgs) -> Result<(), CliError> {
    let runner = CliRunner::with_debug(args.debug)?;
    runner.log_startup("process");

    let (primary, siblings) = parse_outputs(&args.outputs)?;
    let paths = if args.paths.is_empty() {
        read_paths(io::stdin().lock())?
    } else {
        args.paths.clone()
    };
    if paths.is_empty() {
        return Err(CliError::Input(
            "no source paths given on the command line or stdin".to_string(),
        ));
    }

    let service = ImageKilnService::start(server_config(&args)).await?;

    for path in &paths {
        if let Err(err) = process_path(&service, &args.namespace, &primary, &siblings, path).await {
            // Drain uploads for the paths that did succeed.
            service.shutdown().await;
            return Err(err);
        }
    }

    let snapshot = service.shutdown().await;
    println!();
    println!(
        "Processed {} source(s): {} output(s) derived, {} upload(s) completed",
        paths.len(),
        snapshot.outputs_processed,
        snapshot.uploads_completed
    );

    Ok(())
}

/// Stage one source file and derive its outputs.
async fn process_path(
    service: &ImageKilnService,
    namespace: &str,
    primary: &str,
    siblings: &[String],
    path: &Path,
) -> Result<(), CliError> {
    let bytes = fs::read(path).map_err(|error| CliError::FileRead {
        path: path.display().to_string(),
        error,
    })?;
    let key = key_for_path(path)?;

    // The file may have changed since the last run under the same stem.
    service
        .seed_source(namespace, &key, &bytes)
        .map_err(|error| CliError::Process {
            path: path.display().to_string(),
            error: ProcessError::from(error),
        })?;

    let processed = service
        .process_keyed(namespace, &key, primary, siblings)
        .await
        .map_err(|error| CliError::Process {
            path: path.display().to_string(),
            error,
        })?;

    if let ProcessOutcome::Partial { failures, .. } = &processed.outcome {
        return Err(CliError::Outputs {
            path: path.display().to_string(),
            failures: failures
                .iter()
                .map(|failure| format!("{}: {}", failure.filename, failure.error))
                .collect(),
        });
    }

    println!(
        "✓ Processed {}: {} ({})",
        path.display(),
        processed.local_path.display(),
        describe(&processed.outcome)
    );
    Ok(())
}

fn describe(outcome: &ProcessOutcome) -> String {
    match outcome {
        ProcessOutcome::AlreadyProcessed => "already processed".to_string(),
        ProcessOutcome::Processed { derived } => format!("{} output(s)", derived),
        ProcessOutcome::Partial { derived, failures } => {
            format!("{} output(s), {} failed", derived, failures.len())
        }
        ProcessOutcome::Coalesced => "coalesced with concurrent work".to_string(),
    }
}

/// Split the `--outputs` flag into the primary variant and its siblings.
fn parse_outputs(outputs: &str) -> Result<(String, Vec<String>), CliError> {
    let mut names: Vec<String> = outputs
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        return Err(CliError::Input(
            "--outputs must name at least one variant, e.g. 'x300.jpg,x300.webp'".to_string(),
        ));
    }
    let primary = names.remove(0);
    Ok((primary, names))
}

/// Cache key for a local source file, taken from its file stem.
fn key_for_path(path: &Path) -> Result<CacheKey, CliError> {
    match path.file_stem().and_then(|stem| stem.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(CacheKey::from_raw(stem)),
        _ => Err(CliError::Input(format!(
            "cannot derive a cache key from '{}'",
            path.display()
        ))),
    }
}

/// Read newline-separated source paths, skipping blank lines.
fn read_paths<R: BufRead>(reader: R) -> Result<Vec<PathBuf>, CliError> {
    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|error| CliError::FileRead {
            path: "<stdin>".to_string(),
            error,
        })?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            paths.push(PathBuf::from(trimmed));
        }
    }
    Ok(paths)
}

fn server_config(args: &ProcessArgs) -> ServerConfig {
    let allowed_formats: Vec<String> = args
        .extensions
        .split(',')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
        .collect();

    let uploader = match args.uploader {
        UploaderType::Noop => UploaderConfig::Noop,
        UploaderType::Directory => UploaderConfig::Directory {
            root: args.upload_directory.clone().unwrap(), // Safe: required_if_eq
        },
    };

    ServerConfig::default()
        .with_allowed_formats(allowed_formats)
        .with_maximum_width(args.maximum_width)
        .with_default_quality(args.default_quality)
        .with_local_base_path(args.local_base_path.clone())
        .with_remote_base_url(args.remote_base_url.clone())
        .with_remote_base_path(args.remote_base_path.clone())
        .with_uploader(uploader)
        .with_uploader_concurrency(args.uploader_concurrency)
        .with_transform_concurrency(args.processor_concurrency)
        .with_fetch_timeout(Duration::from_secs(args.http_timeout))
        .with_retention_age(retention_age(args.max_file_age))
}

/// Retention age from the flag value. Zero would reap files as they are
/// written; it floors to one minute instead.
fn retention_age(minutes: u64) -> Duration {
    Duration::from_secs(minutes.max(1) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ProcessArgs,
    }

    fn parse(argv: &[&str]) -> ProcessArgs {
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_parse_outputs_splits_primary_and_siblings() {
        let (primary, siblings) = parse_outputs("x300.jpg,x300.webp,w250.jpg").unwrap();
        assert_eq!(primary, "x300.jpg");
        assert_eq!(siblings, vec!["x300.webp", "w250.jpg"]);
    }

    #[test]
    fn test_parse_outputs_single_variant_has_no_siblings() {
        let (primary, siblings) = parse_outputs("x300.jpg").unwrap();
        assert_eq!(primary, "x300.jpg");
        assert!(siblings.is_empty());
    }

    #[test]
    fn test_parse_outputs_drops_blank_entries() {
        let (primary, siblings) = parse_outputs(" x300.jpg ,, x300.webp ").unwrap();
        assert_eq!(primary, "x300.jpg");
        assert_eq!(siblings, vec!["x300.webp"]);
    }

    #[test]
    fn test_parse_outputs_rejects_empty_flag() {
        assert!(parse_outputs("").is_err());
        assert!(parse_outputs(" , ,").is_err());
    }

    #[test]
    fn test_key_for_path_uses_file_stem() {
        let key = key_for_path(Path::new("/srv/images/catalog-shot.png")).unwrap();
        assert_eq!(key.as_str(), "catalog-shot");
    }

    #[test]
    fn test_key_for_path_without_stem_is_rejected() {
        assert!(key_for_path(Path::new("")).is_err());
    }

    #[test]
    fn test_read_paths_skips_blank_lines() {
        let input = "  /srv/a.png\n\n/srv/b.png  \n   \n";
        let paths = read_paths(io::Cursor::new(input)).unwrap();
        assert_eq!(
            paths,
            vec![PathBuf::from("/srv/a.png"), PathBuf::from("/srv/b.png")]
        );
    }

    #[test]
    fn test_defaults_match_the_service_defaults() {
        let args = parse(&["imagekiln", "--outputs", "x300.jpg"]);
        let config = server_config(&args);

        assert_eq!(config.allowed_formats, vec!["jpg", "gif", "webp"]);
        assert_eq!(config.maximum_width, 1000);
        assert_eq!(config.default_quality, 75);
        assert_eq!(config.local_base_path, PathBuf::from("public"));
        assert_eq!(config.uploader, UploaderConfig::Noop);
        assert_eq!(config.uploader_concurrency, 10);
        assert_eq!(config.transform_concurrency, 4);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.retention_age, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_flags_map_onto_the_config() {
        let args = parse(&[
            "imagekiln",
            "--outputs",
            "x300.jpg",
            "--extensions",
            "jpg,png",
            "--local-base-path",
            "/var/cache/images",
            "--uploader",
            "directory",
            "--upload-directory",
            "/mnt/mirror",
            "--maximum-width",
            "500",
            "--default-quality",
            "90",
            "--processor-concurrency",
            "2",
            "--http-timeout",
            "10",
            "--max-file-age",
            "5",
        ]);
        let config = server_config(&args);

        assert_eq!(config.allowed_formats, vec!["jpg", "png"]);
        assert_eq!(config.maximum_width, 500);
        assert_eq!(config.default_quality, 90);
        assert_eq!(config.local_base_path, PathBuf::from("/var/cache/images"));
        assert_eq!(
            config.uploader,
            UploaderConfig::Directory {
                root: PathBuf::from("/mnt/mirror"),
            }
        );
        assert_eq!(config.transform_concurrency, 2);
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert_eq!(config.retention_age, Duration::from_secs(5 * 60));
    }

    #[test]
    fn test_upload_directory_is_required_for_directory_uploader() {
        let result = TestCli::try_parse_from([
            "imagekiln",
            "--outputs",
            "x300.jpg",
            "--uploader",
            "directory",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_file_age_floors_to_one_minute() {
        assert_eq!(retention_age(0), Duration::from_secs(60));
        assert_eq!(retention_age(30), Duration::from_secs(1800));
    }
}
