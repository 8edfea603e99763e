// File: ./src/bin/seriesync.rs
use anyhow::{Result, anyhow};
use seriesync::cli::{self, CliArgs, Command};
use seriesync::config::Settings;
use seriesync::context::{AppContext, StandardContext};
use seriesync::runner::{FatalError, Runner};
use seriesync::sheet::{DryRun, LocalWorkbooks};
use seriesync::source::CommandSource;
use seriesync::store::{CursorStore, JsonCursorStore, MemoryCursorStore, TaskDocument};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::env;
use std::fs::OpenOptions;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let binary_name = args.first().map(String::as_str).unwrap_or("seriesync");

    let cli = match cli::parse_args(args.get(1..).unwrap_or_default()) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    if cli.command == Command::Help {
        cli::print_help(binary_name);
        return Ok(());
    }

    let ctx = StandardContext::new(cli.root.clone());
    let mut settings = Settings::load(&ctx)?;
    if let Some(tasks) = &cli.tasks {
        settings.tasks_file = Some(tasks.clone());
    }
    if let Some(dir) = &cli.workbooks {
        settings.workbook_dir = Some(dir.clone());
    }

    init_logging(&ctx, &settings)?;

    match cli.command {
        Command::Tasks => list_tasks(&ctx, &settings),
        _ => run(&ctx, &settings, &cli),
    }
}

fn init_logging(ctx: &dyn AppContext, settings: &Settings) -> Result<()> {
    let level = settings.level_filter();
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if settings.log_file
        && let Some(path) = ctx.get_log_path()
    {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        loggers.push(WriteLogger::new(level, config, file));
    }

    CombinedLogger::init(loggers).map_err(|e| anyhow!("Failed to initialise logging: {}", e))
}

fn list_tasks(ctx: &dyn AppContext, settings: &Settings) -> Result<()> {
    let path = settings.tasks_path(ctx)?;
    let document = TaskDocument::load(&path)?;
    println!("Tasks in {}:", path.display());
    for (key, task) in document.tasks() {
        match task {
            Ok(task) => println!("  {}  {:?}  {}", key, task.layout, task.cursor),
            Err(e) => println!("  {}  INVALID: {:#}", key, e),
        }
    }
    Ok(())
}

fn run(ctx: &dyn AppContext, settings: &Settings, cli: &CliArgs) -> Result<()> {
    let Some(extractor) = settings.extractor.as_ref() else {
        return Err(anyhow!(
            "No [extractor] configured in {}",
            ctx.get_settings_path()?.display()
        ));
    };
    let mut source = CommandSource::new(&extractor.program, &extractor.args);

    let tasks_path = settings.tasks_path(ctx)?;
    let workbook_dir = settings.workbook_path(ctx)?;
    let workbooks = LocalWorkbooks::new(&workbook_dir);
    log::info!(
        "Starting run: tasks {}, workbooks {}{}",
        tasks_path.display(),
        workbook_dir.display(),
        if cli.dry_run { " (dry run)" } else { "" }
    );

    let result = if cli.dry_run {
        let document = TaskDocument::load(&tasks_path)?;
        let mut sheets = DryRun::new(workbooks);
        let mut store = MemoryCursorStore::new();
        let result = run_with(&mut sheets, &mut source, &mut store, settings, &document);
        log::info!(
            "[dry-run] {} cell write(s) and {} cursor commit(s) not applied",
            sheets.skipped.len(),
            store.history.len()
        );
        result
    } else {
        let mut store = JsonCursorStore::open(&tasks_path)?;
        let document = store.document().clone();
        let mut sheets = workbooks;
        run_with(&mut sheets, &mut source, &mut store, settings, &document)
    };

    if let Err(e) = result {
        if FatalError::find(&e).is_some() {
            log::error!("Run aborted: {:#}", e);
            std::process::exit(1);
        }
        return Err(e);
    }
    Ok(())
}

fn run_with(
    sheets: &mut dyn seriesync::sheet::SheetService,
    source: &mut CommandSource,
    store: &mut dyn CursorStore,
    settings: &Settings,
    document: &TaskDocument,
) -> Result<()> {
    let summary = Runner::new(sheets, source, store, settings).run(document)?;
    println!("{}", summary);
    Ok(())
}
