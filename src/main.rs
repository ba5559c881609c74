use clap::Parser;
use docindex::{
    DataDir, IndexConfig, RetrievalIndex, SyncReport,
    backend::IndexBackend,
    dense::DenseBackend,
    embed::{HashingEmbedder, WhitespaceTokenCounter},
    error,
    index::Retrieved,
    sparse::SparseBackend,
    text_util::extract_snippet,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{BackendKind, Cli, Command, QueryArgs, SyncArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCINDEX_LOG") {
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

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let mut config = IndexConfig::default();
    if let Some(similarity) = cli.similarity {
        config.similarity = similarity;
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.max_tokens_per_chunk = max_tokens;
    }

    match cli.backend {
        BackendKind::Dense => {
            let embedder = HashingEmbedder::new(config.dimension);
            let backend = DenseBackend::new(embedder, &config)?;
            run(&cli, &data_dir, config, backend)
        }
        BackendKind::Sparse => {
            let backend = SparseBackend::new(&config)?;
            run(&cli, &data_dir, config, backend)
        }
    }
}

fn run<B: IndexBackend>(
    cli: &Cli,
    data_dir: &DataDir,
    config: IndexConfig,
    backend: B,
) -> error::Result<()> {
    let mut index = RetrievalIndex::open(
        config,
        &cli.docs,
        data_dir.root(),
        backend,
        WhitespaceTokenCounter,
    )?;

    match &cli.command {
        Command::Sync(args) => cmd_sync(&mut index, args),
        Command::Query(args) => cmd_query(&index, args),
        Command::Status(args) => cmd_status(&index, args.json),
        Command::Completions(_) => Ok(()),
    }
}

fn cmd_sync<B: IndexBackend>(
    index: &mut RetrievalIndex<B, WhitespaceTokenCounter>,
    args: &SyncArgs,
) -> error::Result<()> {
    let report = index.sync(args.progress)?;
    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.is_noop() {
        println!("Index is up to date.");
        return;
    }
    println!(
        "Removed {} file(s) ({} passages), added {} file(s) ({} passages)",
        report.removed_files,
        report.removed_passages,
        report.added_files,
        report.added_passages
    );
    for skipped in &report.skipped {
        eprintln!("Warning: skipped {}: {}", skipped.path, skipped.reason);
    }
    if report.oversized > 0 {
        eprintln!(
            "Warning: {} passage(s) exceed the token budget",
            report.oversized
        );
    }
    if report.cancelled {
        eprintln!("Sync was interrupted; run it again to finish.");
    }
}

fn cmd_query<B: IndexBackend>(
    index: &RetrievalIndex<B, WhitespaceTokenCounter>,
    args: &QueryArgs,
) -> error::Result<()> {
    let results = index.get_closest(&args.text, args.count)?;
    let location = |hit: &Retrieved| match &args.base_url {
        Some(base) => hit.passage.source.to_url(base),
        None => hit.passage.source.to_string(),
    };

    if args.json {
        let results: Vec<_> = results
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                serde_json::json!({
                    "rank": i + 1,
                    "score": hit.score,
                    "id": hit.passage.id,
                    "source": location(hit),
                    "content": hit.passage.content,
                })
            })
            .collect();
        let output = serde_json::json!({
            "query": args.text,
            "result_count": results.len(),
            "results": results,
        });
        println!("{output}");
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    for (i, hit) in results.iter().enumerate() {
        match hit.score {
            Some(score) => {
                println!("{:>3}. [{score:.3}] {}", i + 1, location(hit));
            }
            None => println!("{:>3}. {}", i + 1, location(hit)),
        }
        if let Some((snippet, _)) =
            extract_snippet(&hit.passage.content, &args.text)
        {
            for line in snippet.lines() {
                println!("     {line}");
            }
        }
    }
    println!("\n{} result(s)", results.len());
    Ok(())
}

fn cmd_status<B: IndexBackend>(
    index: &RetrievalIndex<B, WhitespaceTokenCounter>,
    json: bool,
) -> error::Result<()> {
    let stats = index.stats()?;
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("Index folder: {}", stats.folder.display());
        println!("Documentation: {}", stats.docs_root.display());
        println!("Backend: {}", stats.backend);
        println!("Files: {}", stats.files);
        println!("Passages: {}", stats.passages);
        if stats.backend_ids != stats.passages {
            println!("Backend entries: {}", stats.backend_ids);
        }
    }
    Ok(())
}
