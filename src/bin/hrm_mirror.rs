use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hrm_mirror::app::{App, RunParams};
use hrm_mirror::catalog::CatalogRepository;
use hrm_mirror::config::ConfigLoader;
use hrm_mirror::domain::{ObjectKind, split_id_list};
use hrm_mirror::error::MirrorError;
use hrm_mirror::fetcher::Layout;
use hrm_mirror::output::{ConsoleOutput, JsonOutput, OutputMode};
use hrm_mirror::remote::HttpTransfer;
use hrm_mirror::report::RunReport;
use hrm_mirror::store::MirrorStore;

#[derive(Parser)]
#[command(name = "hrm-mirror")]
#[command(about = "Send images from OMERO containers to your HRM deconvolution folder")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "JSON snapshot of the remote hierarchy")]
    catalog: Option<Utf8PathBuf>,

    #[arg(long, help = "Mounted HRM share root")]
    mount_root: Option<Utf8PathBuf>,

    #[arg(long)]
    layout: Option<Layout>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long, ignore_case = true, default_value = "dataset")]
    kind: ObjectKind,

    #[arg(long, help = "Overwrite images already present on HRM")]
    overwrite: bool,

    #[arg(required = true, help = "Object ids, separated by spaces or commas")]
    ids: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(report) if report.is_completed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> miette::Result<RunReport> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(mount_root) = cli.mount_root {
        config.mount_root = mount_root;
    }
    if let Some(catalog) = cli.catalog {
        config.catalog = Some(catalog);
    }
    if let Some(layout) = cli.layout {
        config.layout = layout;
    }
    if let Some(secs) = cli.timeout_secs.filter(|secs| *secs > 0) {
        config.timeout = std::time::Duration::from_secs(secs);
    }

    let catalog = config.catalog.as_deref().ok_or(MirrorError::MissingCatalog)?;
    let transfer = HttpTransfer::new(config.timeout)?;
    let repo = CatalogRepository::open(catalog, transfer)?;
    let app = App::new(MirrorStore::new(config.mount_root.clone()), repo)
        .with_layout(config.layout)
        .with_account_url(config.account_url.clone());

    let params = RunParams {
        kind: cli.kind,
        ids: split_id_list(&cli.ids),
        overwrite: cli.overwrite,
    };
    tracing::debug!(
        kind = %params.kind,
        ids = ?params.ids,
        overwrite = params.overwrite,
        "script params"
    );

    let report = match output_mode {
        OutputMode::Interactive => {
            let report = app.run(&params, &ConsoleOutput);
            ConsoleOutput::print_report(&report).into_diagnostic()?;
            report
        }
        OutputMode::NonInteractive => {
            let report = app.run(&params, &JsonOutput);
            JsonOutput::print_report(&report).into_diagnostic()?;
            report
        }
    };
    Ok(report)
}
