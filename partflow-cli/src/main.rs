//! partflow command line uploader

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use partflow_core::MIN_PART_SIZE;
use partflow_engine::config::{DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE, DEFAULT_READ_AHEAD_PARTS};
use partflow_engine::{SelectionPolicy, UploaderConfig};
use partflow_s3::StorageConfig;

mod commands;

use commands::{AbortArgs, UploadArgs};

fn cli() -> Command {
    let bucket = Arg::new("bucket")
        .long("bucket")
        .value_name("BUCKET")
        .env("PARTFLOW_BUCKET")
        .help("Destination bucket")
        .required(true);
    let key = Arg::new("key")
        .long("key")
        .value_name("KEY")
        .help("Object key, or key prefix when uploading several files")
        .required(true);

    Command::new("partflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Concurrent multipart uploads to S3-compatible storage")
        .subcommand_required(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log output format")
                .value_parser(["text", "json"])
                .default_value("text")
                .global(true),
        )
        .subcommand(
            Command::new("upload")
                .about("Upload files or stdin as multipart objects")
                .arg(bucket.clone())
                .arg(key.clone())
                .arg(
                    Arg::new("inputs")
                        .value_name("FILE|-")
                        .help("Files to upload; '-' reads stdin")
                        .num_args(1..)
                        .default_value("-")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("part-size")
                        .long("part-size")
                        .value_name("BYTES")
                        .help("Bytes per part [default: 5 MiB]")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .short('j')
                        .value_name("N")
                        .help("Parts in flight across all inputs [default: 4]")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("read-ahead")
                        .long("read-ahead")
                        .value_name("PARTS")
                        .help("Parts buffered ahead per input [default: 2]")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("selection")
                        .long("selection")
                        .value_name("POLICY")
                        .help("How the next input to read from is chosen")
                        .value_parser(["random", "round-robin"])
                        .default_value("random"),
                )
                .arg(
                    Arg::new("content-type")
                        .long("content-type")
                        .value_name("MIME")
                        .help("Content type stored with every object"),
                )
                .arg(
                    Arg::new("metadata")
                        .long("metadata")
                        .value_name("JSON")
                        .help("JSON value echoed back with each completed upload"),
                )
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .value_name("PATH")
                        .help("JSON file with UploadId, Offset and Parts of an interrupted upload")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("abort")
                .about("Abort a dangling multipart upload")
                .arg(bucket)
                .arg(key)
                .arg(
                    Arg::new("upload-id")
                        .long("upload-id")
                        .value_name("ID")
                        .help("Multipart upload id to abort")
                        .required(true),
                ),
        )
}

fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn uploader_config(matches: &ArgMatches) -> anyhow::Result<UploaderConfig> {
    let bucket = required(matches, "bucket")?;
    let selection: SelectionPolicy = required(matches, "selection")?.parse()?;
    let number = |name: &str, default: usize| {
        matches.get_one::<usize>(name).copied().unwrap_or(default)
    };

    let config = UploaderConfig::new(bucket)
        .with_part_size(number("part-size", DEFAULT_PART_SIZE))
        .with_concurrency(number("concurrency", DEFAULT_CONCURRENCY))
        .with_read_ahead_parts(number("read-ahead", DEFAULT_READ_AHEAD_PARTS))
        .with_selection(selection);
    config.validate()?;

    if config.part_size < MIN_PART_SIZE {
        warn!(
            "Part size {} is below the S3 minimum of {} bytes; completion will fail on AWS for multi-part objects",
            config.part_size, MIN_PART_SIZE
        );
    }
    Ok(config)
}

fn required(matches: &ArgMatches, name: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing --{}", name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_logging(
        matches
            .get_one::<String>("log-format")
            .map(String::as_str)
            .unwrap_or("text"),
    );

    let storage = StorageConfig::from_env()?;

    match matches.subcommand() {
        Some(("upload", sub)) => {
            let config = uploader_config(sub)?;
            let args = UploadArgs {
                key: required(sub, "key")?,
                inputs: sub
                    .get_many::<PathBuf>("inputs")
                    .map(|inputs| inputs.cloned().collect())
                    .unwrap_or_default(),
                content_type: sub.get_one::<String>("content-type").cloned(),
                metadata: sub
                    .get_one::<String>("metadata")
                    .map(|raw| serde_json::from_str(raw))
                    .transpose()?,
                resume: sub.get_one::<PathBuf>("resume").cloned(),
            };

            info!("Uploading {} input(s) to bucket {}", args.inputs.len(), config.bucket);
            commands::upload(&storage, config, args).await
        }
        Some(("abort", sub)) => {
            let args = AbortArgs {
                bucket: required(sub, "bucket")?,
                key: required(sub, "key")?,
                upload_id: required(sub, "upload-id")?,
            };
            commands::abort(&storage, args).await
        }
        _ => unreachable!("subcommand is required"),
    }
}
