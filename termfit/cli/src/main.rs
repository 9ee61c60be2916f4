use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use shared_event_bus::FileEventPublisher;
use termfit_optimizer::{
    comparator, Analyzer, LexiconTokenizer, NoSubstitutions, OptimizationJob, OptimizationLoop,
    OptimizerConfig, OptimizerTelemetry, RefinementAdvisor, ScriptRunTokenizer,
    SubstitutionSource, SubstitutionTable, TargetDeriver, TargetTermSet, Tokenizer,
};

mod provider;

use provider::CommandProvider;

#[derive(Parser, Debug)]
#[command(name = "termfit", version, about = "Keyword term-frequency optimizer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prints the base and compound terms derived from a keyword.
    Targets(TermArgs),
    /// Scores a body text and prints the verdict with refinement advice.
    Analyze {
        #[command(flatten)]
        terms: TermArgs,
        #[arg(long)]
        substitutions: Option<PathBuf>,
        /// Body text; stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Tells whether a candidate text should replace a baseline.
    Compare {
        #[command(flatten)]
        terms: TermArgs,
        baseline: PathBuf,
        candidate: PathBuf,
    },
    /// Runs the generate/refine loop against an external provider program.
    Optimize(OptimizeArgs),
}

#[derive(Args, Debug)]
struct TermArgs {
    #[arg(long)]
    keyword: String,
    /// Extra target term; repeatable.
    #[arg(long = "term")]
    terms: Vec<String>,
    /// Word list for segmentation, one word per line.
    #[arg(long)]
    lexicon: Option<PathBuf>,
    /// TOML optimizer configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    #[command(flatten)]
    terms: TermArgs,
    /// Program that reads a JSON request on stdin and prints the body text.
    #[arg(long)]
    provider: PathBuf,
    #[arg(long = "provider-arg", allow_hyphen_values = true)]
    provider_args: Vec<String>,
    /// JSON research context passed through to the provider.
    #[arg(long)]
    context: Option<PathBuf>,
    #[arg(long)]
    substitutions: Option<PathBuf>,
    #[arg(long)]
    log: Option<PathBuf>,
    #[arg(long)]
    event_log: Option<PathBuf>,
    /// Writes the selected text here instead of embedding it in the report.
    #[arg(long)]
    output: Option<PathBuf>,
}

struct Session {
    config: OptimizerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Session {
    fn open(args: &TermArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => OptimizerConfig::load(path)?,
            None => OptimizerConfig::default(),
        };
        let tokenizer: Arc<dyn Tokenizer> = match &args.lexicon {
            Some(path) => Arc::new(LexiconTokenizer::from_file(path)?),
            None => Arc::new(ScriptRunTokenizer),
        };
        Ok(Self { config, tokenizer })
    }

    fn targets(&self, args: &TermArgs) -> TargetTermSet {
        TargetDeriver::new(Arc::clone(&self.tokenizer), None).derive(&args.keyword, &args.terms)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command {
        Commands::Targets(args) => {
            let session = Session::open(&args)?;
            json!({ "targets": session.targets(&args) })
        }
        Commands::Analyze {
            terms,
            substitutions,
            file,
        } => handle_analyze(&terms, substitutions.as_deref(), file.as_deref())?,
        Commands::Compare {
            terms,
            baseline,
            candidate,
        } => handle_compare(&terms, &baseline, &candidate)?,
        Commands::Optimize(args) => handle_optimize(&args)?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_analyze(
    args: &TermArgs,
    substitutions: Option<&Path>,
    file: Option<&Path>,
) -> Result<Value> {
    let session = Session::open(args)?;
    let targets = session.targets(args);
    let text = match file {
        Some(path) => read_text(path)?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading body from stdin")?;
            buf
        }
    };
    let verdict = Analyzer::new(&session.config).analyze(&text, &targets);
    let advice = RefinementAdvisor::new(
        session.config.ranges,
        session.config.refinement.max_substitutions,
        load_substitutions(substitutions)?,
    )
    .advise(&verdict, &targets);
    Ok(json!({ "targets": targets, "verdict": verdict, "advice": advice }))
}

fn handle_compare(args: &TermArgs, baseline: &Path, candidate: &Path) -> Result<Value> {
    let session = Session::open(args)?;
    let targets = session.targets(args);
    let analyzer = Analyzer::new(&session.config);
    let baseline = analyzer.analyze(&read_text(baseline)?, &targets);
    let candidate = analyzer.analyze(&read_text(candidate)?, &targets);
    let chars = &session.config.ranges.chars;
    Ok(json!({
        "baseline": baseline,
        "candidate": candidate,
        "ordering": format!("{:?}", comparator::compare(&candidate, &baseline, chars)),
        "candidate_is_better": comparator::is_better(&candidate, &baseline, chars),
    }))
}

fn handle_optimize(args: &OptimizeArgs) -> Result<Value> {
    let session = Session::open(&args.terms)?;
    let context = match &args.context {
        Some(path) => serde_json::from_str(&read_text(path)?)
            .with_context(|| format!("parsing context {}", path.display()))?,
        None => Value::Null,
    };

    let mut telemetry = OptimizerTelemetry::builder("termfit");
    if let Some(path) = &args.log {
        telemetry = telemetry.log_path(path);
    }
    if let Some(path) = &args.event_log {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }

    let provider = CommandProvider::new(&args.provider, args.provider_args.clone());
    let optimizer = OptimizationLoop::new(session.config, session.tokenizer, Arc::new(provider))?
        .with_substitutions(load_substitutions(args.substitutions.as_deref())?)
        .with_telemetry(telemetry.build()?);

    let job = OptimizationJob::new(&args.terms.keyword)
        .with_terms(args.terms.terms.iter().cloned())
        .with_context(context);
    let outcome = optimizer
        .run(&job)
        .with_context(|| format!("optimizing '{}'", job.keyword))?;

    let mut report = serde_json::to_value(&outcome)?;
    if let Some(path) = &args.output {
        fs::write(path, &outcome.selected_text)
            .with_context(|| format!("writing {}", path.display()))?;
        if let Value::Object(map) = &mut report {
            map.remove("selected_text");
            map.insert("output".into(), json!(path));
        }
    }
    Ok(report)
}

fn load_substitutions(path: Option<&Path>) -> Result<Arc<dyn SubstitutionSource>> {
    Ok(match path {
        Some(path) => Arc::new(SubstitutionTable::load(path)?),
        None => Arc::new(NoSubstitutions),
    })
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
