use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use clap::Parser;
use codesift::{
    BackendKind,
    Chunker,
    ChunkingConfig,
    ChunkingMode,
    ConfigDb,
    DataDir,
    Error,
    IndexConfig,
    IndexSettings,
    PipelineOptions,
    Result,
    cli::{Cli, Command, EvalArgs, IndexArgs, SearchArgs, StatusArgs},
    collection_index,
    evaluation,
    flat_index::{self, DEFAULT_FLUSH_EVERY},
    index_repo,
    model_manager::resolve_model_id,
    open_index,
    search,
};
use kdam::{BarExt, tqdm};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CODESIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.settings_db())?;

    match &cli.command {
        Command::Index(args) => {
            cmd_index(&config_db, &data_dir, cli.model.as_deref(), args)?;
        }
        Command::Search(args) => {
            cmd_search(&config_db, &data_dir, cli.model.as_deref(), args)?;
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, args)?;
        }
        Command::Clear => {
            cmd_clear(&config_db, &data_dir)?;
        }
        Command::Eval(args) => {
            cmd_eval(&config_db, &data_dir, cli.model.as_deref(), args)?;
        }
        Command::Completions(args) => {
            args.generate();
        }
    }

    Ok(())
}

/// Set a flag on the first Ctrl-C and exit on the second.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);

    let spawned = std::thread::Builder::new()
        .name("codesift-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "could not watch for Ctrl-C");
                    return;
                }
            };

            runtime.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if handler_flag.swap(true, Ordering::SeqCst) {
                        std::process::exit(130);
                    }
                    tracing::warn!(
                        "interrupted; finishing in-flight chunks (Ctrl-C again to abort)"
                    );
                }
            });
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "could not watch for Ctrl-C");
    }
    flag
}

/// Settings of the existing index, or a `NotFound` error naming the data
/// directory.
fn require_index(
    config_db: &ConfigDb,
    data_dir: &DataDir,
) -> Result<IndexSettings> {
    config_db.index_settings()?.ok_or_else(|| Error::NotFound {
        kind: "index",
        name: data_dir.root().display().to_string(),
    })
}

/// Open the index described by the stored settings.
fn reopen_index(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_override: Option<&str>,
) -> Result<codesift::Backend> {
    let settings = require_index(config_db, data_dir)?;
    let model_id = resolve_model_id(model_override, &settings.model_id);
    config_db.check_compatible(settings.backend, &model_id)?;

    open_index(
        &IndexConfig {
            backend: settings.backend,
            model_id: Some(model_id),
            flush_every: DEFAULT_FLUSH_EVERY,
        },
        data_dir,
    )
}

fn chunking_config(args: &IndexArgs) -> Result<ChunkingConfig> {
    let (default_size, default_overlap) = args.mode.default_window();
    let mut config = ChunkingConfig::new(
        args.mode,
        args.size.unwrap_or(default_size),
        args.overlap.unwrap_or(default_overlap),
    )
    .with_include_all_files(args.all_files)
    .with_encoding_detection(!args.no_detect_encoding)
    .with_trailing_lines(args.trailing_lines())
    .with_filename_header(args.filename_header)
    .with_exclude(args.exclude.clone());

    if let Some(label) = &args.encoding {
        config = config.with_encoding(label)?;
    }
    Ok(config)
}

fn cmd_index(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_override: Option<&str>,
    args: &IndexArgs,
) -> Result<()> {
    let config = chunking_config(args)?;

    let stored = if args.reset {
        data_dir.remove_indexes()?;
        config_db.clear_index_settings()?;
        None
    } else {
        config_db.index_settings()?
    };

    let backend_kind = args
        .backend
        .or(stored.as_ref().map(|s| s.backend))
        .unwrap_or_default();
    let fallback_model = stored
        .as_ref()
        .filter(|s| s.backend == backend_kind)
        .map(|s| s.model_id.clone())
        .unwrap_or_else(|| backend_kind.default_model().to_string());
    let model_id = resolve_model_id(model_override, &fallback_model);
    config_db.check_compatible(backend_kind, &model_id)?;

    let backend = open_index(
        &IndexConfig {
            backend: backend_kind,
            model_id: Some(model_id.clone()),
            flush_every: args.flush_every,
        },
        data_dir,
    )?;

    let chunking_summary = format!(
        "{} size={} overlap={}",
        config.mode().as_str(),
        config.size(),
        config.overlap()
    );
    let chunker = if config.mode() == ChunkingMode::TokenBudget {
        Chunker::with_token_counter(config, backend.token_counter()?)?
    } else {
        Chunker::new(config)?
    };

    let root = std::fs::canonicalize(&args.path)
        .unwrap_or_else(|_| args.path.clone());
    config_db.save_index_settings(&IndexSettings {
        backend: backend_kind,
        model_id,
        chunking: chunking_summary,
        root: root.display().to_string(),
    })?;

    let mut options = PipelineOptions::default();
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    options.batch_size = args.batch_size;

    let cancel = install_interrupt_handler();
    let progress = Mutex::new(tqdm!(desc = "Indexing", unit = " chunks"));

    let report = index_repo(
        &chunker,
        backend.index.as_ref(),
        &root,
        &options,
        &cancel,
        |done| {
            if let Ok(mut bar) = progress.lock() {
                let _ = bar.update_to(done as usize);
            }
        },
    )?;
    eprintln!();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.cancelled {
        println!(
            "Interrupted after {} chunks; the index holds {} records.",
            report.chunks_indexed, report.record_count
        );
    } else {
        println!(
            "Indexed {} chunks from {} in {:.1}s ({} records, {} backend).",
            report.chunks_indexed,
            root.display(),
            report.duration_ms as f64 / 1000.0,
            report.record_count,
            backend_kind.as_str()
        );
    }
    Ok(())
}

fn cmd_search(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_override: Option<&str>,
    args: &SearchArgs,
) -> Result<()> {
    let backend = reopen_index(config_db, data_dir, model_override)?;
    let index = backend.index.as_ref();
    let results = search::execute_search(index, &args.query, args.count)?;

    if args.json {
        println!(
            "{}",
            search::format_json(&results, &args.query, index.score_order())?
        );
    } else {
        println!(
            "{}",
            search::format_human(&results, &args.query, index.score_order())
        );
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &StatusArgs,
) -> Result<()> {
    let Some(settings) = config_db.index_settings()? else {
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "data_dir": data_dir.root(),
                    "index": null,
                }))?
            );
        } else {
            println!("Data directory: {}", data_dir.root().display());
            println!("No index yet. Run `codesift index <path>` first.");
        }
        return Ok(());
    };

    let path = data_dir.index_file(settings.backend);
    let records = match settings.backend {
        BackendKind::Flat => flat_index::stored_record_count(&path)?,
        BackendKind::Collection => {
            collection_index::stored_record_count(&path)?
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "data_dir": data_dir.root(),
                "index": {
                    "backend": settings.backend.as_str(),
                    "model": settings.model_id,
                    "chunking": settings.chunking,
                    "root": settings.root,
                    "path": path,
                    "records": records,
                },
            }))?
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Backend:        {}", settings.backend.as_str());
        println!("Model:          {}", settings.model_id);
        println!("Chunking:       {}", settings.chunking);
        println!("Source root:    {}", settings.root);
        println!("Records:        {records}");
    }
    Ok(())
}

fn cmd_clear(config_db: &ConfigDb, data_dir: &DataDir) -> Result<()> {
    if config_db.index_settings()?.is_none() {
        println!("Nothing to clear.");
        return Ok(());
    }

    let backend = reopen_index(config_db, data_dir, None)?;
    let before = backend.index.record_count()?;
    backend.index.clear()?;
    println!("Removed {before} records.");
    Ok(())
}

fn cmd_eval(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model_override: Option<&str>,
    args: &EvalArgs,
) -> Result<()> {
    let cases = evaluation::load_test_cases(&args.cases)?;
    let backend = reopen_index(config_db, data_dir, model_override)?;
    let report = evaluation::evaluate(backend.index.as_ref(), &cases, args.k)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for outcome in &report.cases {
        println!("Query:     {}", outcome.question);
        println!("Expected:  {}", outcome.expected.join(", "));
        println!("Retrieved: {}", outcome.retrieved.join(", "));
        println!("Recall@{}:  {:.2}", report.k, outcome.recall);
        println!();
    }
    println!(
        "Mean recall@{} over {} cases: {:.3}",
        report.k,
        report.cases.len(),
        report.mean_recall
    );
    Ok(())
}
