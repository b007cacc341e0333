use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use climate_evolution::catalog::Catalog;
use climate_evolution::cds::{CdsCredentials, CdsHttpClient};
use climate_evolution::config::{ConfigLoader, ResolvedConfig};
use climate_evolution::domain::{CatalogMode, FailurePolicy, Scenario};
use climate_evolution::error::ClimateError;
use climate_evolution::explore::{self, SeriesQuery, YearSelection};
use climate_evolution::nc_reader::NetcdfReader;
use climate_evolution::output::{FetchReport, JsonOutput, ListReport, StderrProgress};
use climate_evolution::pipeline::{
    BuildOptions, BuildReport, Pipeline, ProgressSink, UnitStatus, request_for,
};
use climate_evolution::store::Store;

#[derive(Parser)]
#[command(name = "climate-evolution")]
#[command(about = "Normalize climate-model archives into array stores and catalogs")]
#[command(version, author)]
struct Cli {
    /// Emit machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch, normalize and catalog every configured dataset (default)")]
    Build(BuildArgs),
    #[command(about = "Fetch and extract one archive")]
    Fetch(FetchArgs),
    #[command(about = "List catalog entries")]
    List(ListArgs),
    #[command(about = "Time series at the grid point nearest to a location")]
    Series(SeriesArgs),
    #[command(about = "Anomaly map between two years")]
    Anomaly(AnomalyArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Only {
    Projections,
    Periods,
}

#[derive(Args, Default)]
struct BuildArgs {
    #[arg(long)]
    only: Option<Only>,

    #[arg(long)]
    catalog_mode: Option<CatalogMode>,

    #[arg(long)]
    on_error: Option<FailurePolicy>,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    experiment: String,

    #[arg(long)]
    variable: String,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    catalog: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct SeriesArgs {
    #[arg(long)]
    entry: String,

    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    #[arg(long)]
    scenario: Vec<String>,

    #[arg(long, default_value_t = 1)]
    window: usize,

    #[arg(long)]
    from_year: Option<i32>,

    #[arg(long)]
    to_year: Option<i32>,

    #[arg(long)]
    catalog: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct AnomalyArgs {
    #[arg(long, default_value = "historical")]
    reference: String,

    #[arg(long)]
    reference_year: i32,

    #[arg(long)]
    comparison: String,

    #[arg(long)]
    comparison_year: i32,

    #[arg(long)]
    reverse: bool,

    #[arg(long)]
    catalog: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ClimateError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ClimateError) -> u8 {
    match error {
        ClimateError::MissingConfig(_)
        | ClimateError::ConfigRead(_)
        | ClimateError::ConfigParse(_)
        | ClimateError::ConfigValue(_)
        | ClimateError::EntryNotFound(_)
        | ClimateError::ScenarioNotFound { .. } => 2,
        ClimateError::MissingCredentials
        | ClimateError::InvalidCredentials(_)
        | ClimateError::CdsHttp(_)
        | ClimateError::CdsStatus { .. }
        | ClimateError::CdsTask { .. } => 3,
        ClimateError::Extraction { .. }
        | ClimateError::UnsupportedArchive(_)
        | ClimateError::NoDataFiles(_)
        | ClimateError::UnsafeArchiveMember(_)
        | ClimateError::DatasetRead { .. }
        | ClimateError::MissingAttribute { .. }
        | ClimateError::UnsupportedUnit { .. }
        | ClimateError::VariableMismatch { .. }
        | ClimateError::UnitsMismatch { .. }
        | ClimateError::InvalidTimeUnits { .. }
        | ClimateError::UnsupportedCalendar { .. }
        | ClimateError::InvalidLayout { .. }
        | ClimateError::DimensionMismatch { .. }
        | ClimateError::DuplicateLongitude(_)
        | ClimateError::EmptySelection(_)
        | ClimateError::NoInputs => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Store::new_with_paths(config.data_root.clone(), config.catalog_root.clone());

    match cli.command.unwrap_or(Commands::Build(BuildArgs::default())) {
        Commands::Build(args) => run_build(args, &config, store, cli.json),
        Commands::Fetch(args) => run_fetch(args, &config, store, cli.json),
        Commands::List(args) => run_list(args, &config, &store, cli.json),
        Commands::Series(args) => run_series(args, &config, &store, cli.json),
        Commands::Anomaly(args) => run_anomaly(args, &config, &store, cli.json),
    }
}

fn pipeline(
    config: &ResolvedConfig,
    store: Store,
) -> miette::Result<Pipeline<CdsHttpClient, NetcdfReader>> {
    let credentials = CdsCredentials::from_env()?;
    let client = CdsHttpClient::new(credentials, config.poll_interval)?;
    Ok(Pipeline::new(store, client, NetcdfReader))
}

fn run_build(
    args: BuildArgs,
    config: &ResolvedConfig,
    store: Store,
    json: bool,
) -> miette::Result<()> {
    let options = BuildOptions {
        force: args.force,
        catalog_mode: args.catalog_mode,
        on_error: Some(args.on_error.unwrap_or(config.on_error)),
    };
    let pipeline = pipeline(config, store)?;
    let sink: &dyn ProgressSink = if json { &JsonOutput } else { &StderrProgress };

    let mut reports = Vec::new();
    if args.only != Some(Only::Periods) {
        reports.push(pipeline.run_projections(&config.projections, &options, sink)?);
    }
    if args.only != Some(Only::Projections) {
        reports.push(pipeline.run_periods(&config.periods, &options, sink)?);
    }

    if json {
        JsonOutput::print_build(&reports).into_diagnostic()?;
    } else {
        for report in &reports {
            print_build_summary(report);
        }
    }

    let failed: usize = reports.iter().map(BuildReport::failed).sum();
    if failed > 0 {
        return Err(ClimateError::BatchFailed { failed }.into());
    }
    Ok(())
}

fn print_build_summary(report: &BuildReport) {
    println!(
        "{:?} catalog {} ({:?})",
        report.pipeline, report.catalog.path, report.catalog.action
    );
    for unit in &report.units {
        match unit.status {
            UnitStatus::Failed => println!(
                "  {} failed: {}",
                unit.name,
                unit.error.as_deref().unwrap_or("unknown error")
            ),
            status => println!(
                "  {} -> {} ({status:?})",
                unit.name,
                unit.store.as_ref().map(|path| path.as_str()).unwrap_or("-")
            ),
        }
    }
}

fn run_fetch(
    args: FetchArgs,
    config: &ResolvedConfig,
    store: Store,
    json: bool,
) -> miette::Result<()> {
    let experiment: Scenario = args.experiment.parse()?;
    let mut source = config.projections.source.clone();
    if let Some(model) = args.model {
        source.model = model;
    }
    let request = request_for(&source, experiment, &args.variable);

    let pipeline = pipeline(config, store)?;
    let (archive, files) = pipeline.acquire(&request, args.force)?;
    let report = FetchReport {
        archive,
        files: files.iter().map(ToString::to_string).collect(),
    };

    if json {
        JsonOutput::print_fetch(&report).into_diagnostic()?;
    } else {
        println!("{:?} {}", report.archive.action, report.archive.path);
        for file in &report.files {
            println!("  {file}");
        }
    }
    Ok(())
}

fn catalog_path(explicit: Option<Utf8PathBuf>, store: &Store, default_file: &str) -> Utf8PathBuf {
    explicit.unwrap_or_else(|| store.catalog_path(default_file))
}

fn run_list(
    args: ListArgs,
    config: &ResolvedConfig,
    store: &Store,
    json: bool,
) -> miette::Result<()> {
    let paths = match args.catalog {
        Some(path) => vec![path],
        None => vec![
            store.catalog_path(&config.projections.catalog_file),
            store.catalog_path(&config.periods.catalog_file),
        ],
    };

    for path in paths {
        if !path.as_std_path().exists() {
            tracing::debug!(path = %path, "catalog not built yet");
            continue;
        }
        let catalog = Catalog::load(&path)?;
        let report = ListReport {
            catalog: path.to_string(),
            entries: catalog.sources.into_values().collect(),
        };
        if json {
            JsonOutput::print_list(&report).into_diagnostic()?;
        } else {
            println!("{}", report.catalog);
            for entry in &report.entries {
                println!(
                    "  {:<24} {} [{}] {}",
                    entry.name,
                    entry.metadata.variable,
                    entry.metadata.units,
                    entry.args.urlpath
                );
            }
        }
    }
    Ok(())
}

fn run_series(
    args: SeriesArgs,
    config: &ResolvedConfig,
    store: &Store,
    json: bool,
) -> miette::Result<()> {
    let path = catalog_path(args.catalog, store, &config.projections.catalog_file);
    let catalog = Catalog::load(&path)?;
    let array = catalog.entry(&args.entry)?.open()?;
    let scenarios = args
        .scenario
        .iter()
        .map(|value| value.parse::<Scenario>())
        .collect::<Result<Vec<_>, _>>()?;

    let series = explore::series_at(
        &array,
        &SeriesQuery {
            latitude: args.lat,
            longitude: args.lon,
            scenarios,
            window: args.window,
            from_year: args.from_year,
            to_year: args.to_year,
        },
    )?;

    if json {
        JsonOutput::print_series(&series).into_diagnostic()?;
    } else {
        println!(
            "{} [{}] at ({:.2}, {:.2}), window {}",
            series.variable, series.units, series.latitude, series.longitude, series.window
        );
        for scenario in &series.series {
            println!("  {}", scenario.label);
            for point in &scenario.points {
                if let Some(value) = point.value {
                    println!("    {} {value:.3}", point.period);
                }
            }
        }
    }
    Ok(())
}

fn run_anomaly(
    args: AnomalyArgs,
    config: &ResolvedConfig,
    store: &Store,
    json: bool,
) -> miette::Result<()> {
    let path = catalog_path(args.catalog, store, &config.periods.catalog_file);
    let catalog = Catalog::load(&path)?;
    let reference = catalog.entry(&args.reference)?.open()?;
    let comparison = catalog.entry(&args.comparison)?.open()?;

    let map = explore::anomaly(
        YearSelection {
            array: &reference,
            year: args.reference_year,
            scenario: None,
        },
        YearSelection {
            array: &comparison,
            year: args.comparison_year,
            scenario: None,
        },
        args.reverse,
    )?;

    if json {
        JsonOutput::print_anomaly(&map).into_diagnostic()?;
    } else {
        println!(
            "{} anomaly {} vs {} [{}], {} x {} cells, max |delta| {}",
            map.variable,
            map.comparison_year,
            map.reference_year,
            map.units,
            map.latitude.len(),
            map.longitude.len(),
            map.limit
                .map(|limit| format!("{limit:.3}"))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    Ok(())
}
