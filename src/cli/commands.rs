//! Command handlers for the tsfetch binary
//!
//! Every handler validates its arguments (table, time range, field list,
//! output path, sizes) before the pool opens its first connection, and
//! closes the pool on every exit path.

use std::io::{self, Write};
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CliInterface, Commands, FetchArgs, RangeArgs, SinkArgs};
use crate::config::Config;
use crate::connection::ConnectionFactory;
use crate::error::Result;
use crate::export::{self, ExportFormat, ExportOptions, ExportResult};
use crate::fetch::Fetcher;
use crate::formatter::{self, ChunkFormatter, TableFormatter};
use crate::query::{QuerySpec, TableRegistry, TimeRange};
use crate::store::PgConnectionFactory;

/// Run the parsed subcommand
///
/// # Arguments
/// * `cli` - Parsed arguments and loaded configuration
///
/// # Returns
/// * `Result<()>` - Success or the first error
pub async fn run(cli: &CliInterface) -> Result<()> {
    match &cli.args().command {
        Commands::ListTables => {
            let registry = TableRegistry::from_config(&cli.config().tables);
            println!("{}", TableFormatter::new(cli.use_colors()).format_registry(&registry));
            Ok(())
        }
        Commands::Count(range) => {
            let config = cli.config().clone();
            config.validate()?;
            let fetcher = connect(cli, &config)?;
            let result = count(&fetcher, range).await;
            fetcher.close();

            let count = result?;
            let time_range = range.time_range()?;
            println!(
                "{}",
                formatter::format_count(&range.table, &time_range, count, cli.verbose())
            );
            Ok(())
        }
        Commands::Stream {
            fetch,
            output: Some(output),
            sink,
        } => run_export(cli, fetch, output, sink).await,
        Commands::Stream {
            fetch,
            output: None,
            ..
        } => {
            let config = cli.command_config(fetch, None)?;
            let fetcher = connect(cli, &config)?;
            let formatter = ChunkFormatter::new(
                fetch.format.unwrap_or_default(),
                cli.use_colors(),
                cli.verbose(),
            );

            let stdout = io::stdout();
            let mut out = stdout.lock();
            let result = stream_chunks(&fetcher, &config, fetch, &formatter, &mut out).await;
            fetcher.close();

            let (chunks, records) = result?;
            if !cli.quiet() {
                eprintln!("{}", formatter::format_stream_summary(chunks, records));
            }
            Ok(())
        }
        Commands::Export {
            fetch,
            output,
            sink,
        } => run_export(cli, fetch, output, sink).await,
    }
}

/// Export with a progress bar and Ctrl+C cancellation
async fn run_export(
    cli: &CliInterface,
    fetch: &FetchArgs,
    output: &Path,
    sink: &SinkArgs,
) -> Result<()> {
    let config = cli.command_config(fetch, Some(sink))?;
    let fetcher = connect(cli, &config)?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => cancel_clone.cancel(),
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let show_progress = !sink.no_progress && !cli.quiet();
    let result = export_to_file(&fetcher, &config, fetch, output, show_progress, Some(cancel)).await;

    ctrl_c_handle.abort();
    fetcher.close();

    let result = result?;
    if !cli.quiet() {
        println!("{}", formatter::format_export_result(&result, output));
    }
    Ok(())
}

/// Pool, registry and settings for PostgreSQL. Opens no connection.
fn connect(cli: &CliInterface, config: &Config) -> Result<Fetcher<PgConnectionFactory>> {
    let factory = PgConnectionFactory::from_database_config(&config.database)?;
    info!("Using database {}", cli.sanitized_database_target());
    Fetcher::from_config(factory, config)
}

/// Resolve table, filter, fields and time range.
fn prepare<F: ConnectionFactory>(
    fetcher: &Fetcher<F>,
    range: &RangeArgs,
    fields: Option<Vec<String>>,
) -> Result<(QuerySpec, TimeRange)> {
    let spec = fetcher
        .query(&range.table)?
        .with_filter(range.filter.as_deref())
        .with_fields(fields)?;
    let time_range = range.time_range()?;
    debug!(
        table = spec.table(),
        time_field = spec.time_field(),
        order_by = ?spec.order_by(),
        "Resolved query for {}",
        time_range
    );
    Ok((spec, time_range))
}

/// Count the rows of `range`.
pub async fn count<F: ConnectionFactory>(fetcher: &Fetcher<F>, range: &RangeArgs) -> Result<u64> {
    let (spec, time_range) = prepare(fetcher, range, None)?;
    fetcher.get_count(&spec, &time_range).await
}

/// Write every chunk to `out`, one formatted chunk per line
///
/// # Returns
/// * `Result<(u64, u64)>` - Chunks and records streamed
pub async fn stream_chunks<F: ConnectionFactory, W: Write>(
    fetcher: &Fetcher<F>,
    config: &Config,
    fetch: &FetchArgs,
    formatter: &ChunkFormatter,
    out: &mut W,
) -> Result<(u64, u64)> {
    let (spec, range) = prepare(fetcher, &fetch.range, fetch.field_list()?)?;
    let mut stream = fetcher.stream(&spec, range, fetch.mode())?;
    fetcher.pool().warm_up(config.fetch.min_idle).await?;

    while let Some(chunk) = stream.next_chunk().await? {
        let text = formatter.format_chunk(&chunk)?;
        if let Err(e) = writeln!(out, "{text}") {
            if e.kind() == io::ErrorKind::BrokenPipe {
                debug!("Output closed, stopping stream");
                break;
            }
            return Err(e.into());
        }
    }
    out.flush()?;

    Ok((stream.chunks_yielded(), stream.total_records()))
}

/// Export the stream to `output`
///
/// The format comes from `--format`, else the file extension, else json.
pub async fn export_to_file<F: ConnectionFactory>(
    fetcher: &Fetcher<F>,
    config: &Config,
    fetch: &FetchArgs,
    output: &Path,
    show_progress: bool,
    cancel: Option<CancellationToken>,
) -> Result<ExportResult> {
    let (spec, range) = prepare(fetcher, &fetch.range, fetch.field_list()?)?;
    let format = fetch
        .format
        .or_else(|| ExportFormat::from_path(output))
        .unwrap_or_default();
    export::writers::validate_path(output)?;
    let stream = fetcher.stream(&spec, range, fetch.mode())?;

    fetcher.pool().warm_up(config.fetch.min_idle).await?;

    let total = if show_progress {
        Some(fetcher.get_count(&spec, &range).await?)
    } else {
        None
    };

    if format == ExportFormat::Json {
        warn!("json export holds every record in memory until the end; prefer jsonl for large ranges");
    }

    let options = ExportOptions::from_config(format, &config.fetch)
        .with_select_fields(spec.fields().map(<[String]>::to_vec))
        .with_progress(show_progress, total);

    export::export(Box::new(stream), output, &options, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, OutputError};
    use crate::record::{FieldValue, Record};
    use crate::store::MemoryStore;
    use chrono::TimeDelta;

    fn range_args(table: &str) -> RangeArgs {
        RangeArgs {
            table: table.to_string(),
            start_time: "2024-01-01".to_string(),
            end_time: "2024-01-01 03:00:00".to_string(),
            filter: None,
        }
    }

    fn fetch_args(table: &str) -> FetchArgs {
        FetchArgs {
            range: range_args(table),
            format: None,
            chunk_size: Some(7),
            time_interval: Some(60),
            max_connections: None,
            no_time_windows: false,
            fields: None,
        }
    }

    fn setup() -> (MemoryStore, Fetcher<MemoryStore>, Config) {
        let start = TimeRange::parse("2024-01-01", "2024-01-02").unwrap().start();
        let store = MemoryStore::new();
        store.insert_table(
            "tweets",
            (0..30i64)
                .map(|i| {
                    Record::from_pairs([
                        ("tweet_id", FieldValue::Int(i)),
                        (
                            "created_at_ts",
                            FieldValue::Timestamp(start + TimeDelta::minutes(i * 5)),
                        ),
                        ("text", FieldValue::Text(format!("t{i}"))),
                    ])
                })
                .collect(),
        );
        let mut config = Config::default();
        config.fetch.chunk_size = 7;
        let fetcher = Fetcher::from_config(store.clone(), &config).unwrap();
        (store, fetcher, config)
    }

    #[tokio::test]
    async fn test_count() {
        let (_, fetcher, _) = setup();
        assert_eq!(count(&fetcher, &range_args("tweets")).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_stream_jsonl_to_writer() {
        let (_, fetcher, config) = setup();
        let formatter = ChunkFormatter::new(ExportFormat::JsonL, false, false);
        let mut out = Vec::new();

        let (chunks, records) =
            stream_chunks(&fetcher, &config, &fetch_args("tweets"), &formatter, &mut out)
                .await
                .unwrap();
        assert_eq!(records, 30);

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count() as u64, chunks);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["window_index"], 0);
        assert_eq!(first["chunk_size"], 7);
    }

    #[tokio::test]
    async fn test_unknown_table_fails_before_connecting() {
        let (store, fetcher, config) = setup();
        let formatter = ChunkFormatter::new(ExportFormat::Json, false, false);
        let mut out = Vec::new();

        let err = stream_chunks(&fetcher, &config, &fetch_args("orders"), &formatter, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnknownTable(_)));
        assert_eq!(store.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_export_infers_format_and_projects_fields() {
        let (_, fetcher, config) = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweets.csv");
        let mut fetch = fetch_args("tweets");
        fetch.fields = Some("text,tweet_id".to_string());

        let result = export_to_file(&fetcher, &config, &fetch, &path, false, None)
            .await
            .unwrap();
        assert_eq!(result.records_exported, 30);

        let csv = std::fs::read_to_string(&path).unwrap();
        assert!(csv.starts_with("text,tweet_id\nt0,0\n"));
    }

    #[tokio::test]
    async fn test_export_to_missing_directory_fails_before_connecting() {
        let (store, fetcher, config) = setup();
        let err = export_to_file(
            &fetcher,
            &config,
            &fetch_args("tweets"),
            Path::new("/nonexistent/dir/out.jsonl"),
            true,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Output(OutputError::DirectoryNotFound(_))));
        assert_eq!(store.connect_count(), 0);
    }
}
