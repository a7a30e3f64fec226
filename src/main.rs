use causal_entropy::data::{Dataset, parse_column_list};
use causal_entropy::{
    CausalFit, CausalRegressionConfig, ConvergencePolicy, LinearFit, causal_regression,
    linear_regression,
};
use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "causal-entropy")]
#[command(about = "Causal effect estimation by iterative kernel-weighted least squares", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Default log filter when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ordinary least squares of one or more target columns on feature columns.
    #[command(alias = "ols")]
    Linear(LinearArgs),
    /// Causal-entropy regression of one outcome on treatments and confounders.
    Causal(CausalArgs),
}

#[derive(Args, Debug)]
struct LinearArgs {
    data: PathBuf,
    /// Comma-separated outcome columns.
    #[arg(long = "target")]
    target: String,
    /// Comma-separated feature columns.
    #[arg(long = "features")]
    features: String,
    /// Print the fit as JSON instead of a table.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct CausalArgs {
    data: PathBuf,
    #[arg(long = "outcome")]
    outcome: String,
    /// Comma-separated confounder columns.
    #[arg(long = "confounders")]
    confounders: String,
    /// Comma-separated treatment columns. Omit to fit bias and confounders only.
    #[arg(long = "treatments")]
    treatments: Option<String>,
    /// JSON file with `sigma`, `tolerance`, `max_iterations` and `convergence`.
    /// Flags given on the command line take precedence.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Gaussian kernel bandwidth.
    #[arg(long = "sigma")]
    sigma: Option<f64>,
    /// Convergence tolerance on the change in causal entropy.
    #[arg(long = "tol")]
    tol: Option<f64>,
    #[arg(long = "max-iter")]
    max_iter: Option<usize>,
    /// Fail instead of returning the last iterate when the iteration cap is hit.
    #[arg(long = "require-convergence", default_value_t = false)]
    require_convergence: bool,
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    match cli.command {
        Command::Linear(args) => run_linear(args),
        Command::Causal(args) => run_causal(args),
    }
}

fn init_logging(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid --log-level '{level}': {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| format!("failed to initialise logging: {e}"))
}

fn require_columns(raw: &str, flag: &str) -> Result<Vec<String>, String> {
    let cols = parse_column_list(raw);
    if cols.is_empty() {
        return Err(format!("{flag} cannot be empty"));
    }
    Ok(cols)
}

fn run_linear(args: LinearArgs) -> Result<(), String> {
    let targets = require_columns(&args.target, "--target")?;
    let features = require_columns(&args.features, "--features")?;
    let ds = Dataset::from_path(&args.data).map_err(|e| e.to_string())?;
    let x = ds.columns(&features).map_err(|e| e.to_string())?;
    let y = ds.columns(&targets).map_err(|e| e.to_string())?;

    let fit = linear_regression(x.view(), y.view()).map_err(|e| e.to_string())?;
    if args.json {
        let payload = serde_json::to_string_pretty(&fit)
            .map_err(|e| format!("failed to serialize fit: {e}"))?;
        println!("{payload}");
    } else {
        print_linear_fit(&fit, &features, &targets);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CausalRegressionConfig, String> {
    let Some(path) = path else {
        return Ok(CausalRegressionConfig::default());
    };
    let payload = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
    serde_json::from_str(&payload).map_err(|e| format!("failed to parse config json: {e}"))
}

fn run_causal(args: CausalArgs) -> Result<(), String> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(sigma) = args.sigma {
        config.sigma = sigma;
    }
    if let Some(tol) = args.tol {
        config.tolerance = tol;
    }
    if let Some(max_iter) = args.max_iter {
        config.max_iterations = max_iter;
    }
    if args.require_convergence {
        config.convergence = ConvergencePolicy::RequireTolerance;
    }

    let confounder_names = require_columns(&args.confounders, "--confounders")?;
    let treatment_names = match args.treatments.as_deref() {
        Some(raw) => require_columns(raw, "--treatments")?,
        None => Vec::new(),
    };

    let ds = Dataset::from_path(&args.data).map_err(|e| e.to_string())?;
    let y = ds.column(&args.outcome).map_err(|e| e.to_string())?;
    let z = ds.columns(&confounder_names).map_err(|e| e.to_string())?;
    let x = if treatment_names.is_empty() {
        None
    } else {
        Some(ds.columns(&treatment_names).map_err(|e| e.to_string())?)
    };

    let fit = causal_regression(z.view(), y.view(), x.as_ref().map(|x| x.view()), &config)
        .map_err(|e| e.to_string())?;
    if args.json {
        let payload = serde_json::to_string_pretty(&fit)
            .map_err(|e| format!("failed to serialize fit: {e}"))?;
        println!("{payload}");
    } else {
        print_causal_fit(&fit, &treatment_names, &confounder_names);
    }
    Ok(())
}

fn print_linear_fit(fit: &LinearFit, features: &[String], targets: &[String]) {
    let mut table = Table::new();
    let mut header = vec!["Term".to_string()];
    header.extend(targets.iter().cloned());
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);

    let mut bias_row = vec![Cell::new("(Intercept)")];
    bias_row.extend(fit.bias.iter().map(|b| Cell::new(format!("{b:.6}"))));
    table.add_row(Row::from(bias_row));
    for (name, coefs) in features.iter().zip(fit.coefficients.rows()) {
        let mut row = vec![Cell::new(name)];
        row.extend(coefs.iter().map(|c| Cell::new(format!("{c:.6}"))));
        table.add_row(Row::from(row));
    }
    println!("{table}");
}

fn print_causal_fit(fit: &CausalFit, treatments: &[String], confounders: &[String]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Term", "Role", "Coefficient"]);

    for (name, c) in treatments.iter().zip(fit.treatment_effects()) {
        table.add_row(Row::from(vec![
            Cell::new(name),
            Cell::new("Treatment"),
            Cell::new(format!("{c:.6}")),
        ]));
    }
    table.add_row(Row::from(vec![
        Cell::new("(Intercept)"),
        Cell::new("Bias"),
        Cell::new(format!("{:.6}", fit.bias())),
    ]));
    for (name, c) in confounders.iter().zip(fit.confounder_effects()) {
        table.add_row(Row::from(vec![
            Cell::new(name),
            Cell::new("Confounder"),
            Cell::new(format!("{c:.6}")),
        ]));
    }

    println!("{table}");
    println!(
        "causal entropy: {:.6}  iterations: {}  converged: {}",
        fit.causal_entropy, fit.iterations, fit.converged
    );
}
