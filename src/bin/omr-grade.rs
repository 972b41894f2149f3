//! CLI binary for omr-grader.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `GradingConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use omr_grader::{
    detect_question, grade, inspect, random_answers, write_sheet, AmbiguousPolicy, AnswerKey,
    GradeReport, GradingConfig, GradingProgressCallback, ImageFormat, Letter, ProgressCallback,
    RowStatus, SheetLayout,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per question.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_grading_start` tells us the question count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering sheet…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} questions  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Grading");
        self.bar.reset_eta();
    }
}

impl GradingProgressCallback for CliProgressCallback {
    fn on_grading_start(&self, total_questions: usize) {
        self.activate_bar(total_questions);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Grading {total_questions} questions…"))
        ));
    }

    fn on_question_start(&self, question: usize, _total: usize) {
        self.bar.set_message(format!("question {question}"));
    }

    fn on_question_complete(&self, question: usize, total: usize, answer: &str) {
        self.bar.println(format!(
            "  {} Question {:>3}/{:<3}  {}",
            green("✓"),
            question,
            total,
            dim(answer)
        ));
        self.bar.inc(1);
    }

    fn on_question_error(&self, question: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Question {:>3}/{:<3}  {}",
            red("✗"),
            question,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_grading_complete(&self, _score: usize, _total: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors > 0 {
            eprintln!("{} {} questions could not be read", cyan("⚠"), red(&errors.to_string()));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Grade a sheet against a key file, print the table
  omr-grade grade answer_sheet.pdf --key key.txt

  # Inline key, spreadsheet and JSON exports
  omr-grade grade answer_sheet.pdf --answers DDACBCBBCC --csv results.csv --json results.json

  # Four questions in flight, fail on any unclear reply
  omr-grade grade sheet.pdf --key key.txt --concurrency 4 --ambiguous abort

  # Read one question only
  omr-grade detect sheet.pdf --question 12

  # Make a synthetic filled sheet and its key
  omr-grade generate -o sheet.pdf --seed 42 --key-out key.txt

  # Page count (no API key needed)
  omr-grade inspect sheet.pdf

ANSWER KEY FORMATS:
  DDACB                      compact letters
  D, D, A, C, B              separated by commas, spaces or semicolons
  1. D \n 2) D \n 3: A       numbered lines, numbering must run 1..N
  ["D","D","A"]              JSON array
  Lines starting with # are ignored.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Grade multiple-choice answer sheets with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "omr-grade",
    version,
    about = "Grade multiple-choice answer sheets with Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OMR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "OMR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grade a sheet against an answer key.
    Grade(GradeArgs),
    /// Read a single question off a sheet.
    Detect(DetectArgs),
    /// Draw a synthetic filled answer sheet.
    Generate(GenerateArgs),
    /// Print basic facts about a PDF.
    Inspect(InspectArgs),
}

/// Options shared by every command that asks the model.
#[derive(Args, Debug)]
struct ModelArgs {
    /// 1-indexed page holding the answer grid.
    #[arg(long, env = "OMR_PAGE", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    page: u32,

    /// Rendering DPI (72–600).
    #[arg(long, env = "OMR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Image encoding sent to the model.
    #[arg(long, env = "OMR_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// JPEG quality (1–100).
    #[arg(long, env = "OMR_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// LLM model ID (default: gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// What to do with a reply that is not A–D or a dash.
    #[arg(long, env = "OMR_AMBIGUOUS", value_enum, default_value = "retry-once")]
    ambiguous: AmbiguousArg,

    /// Retries per question on a failed model call.
    #[arg(long, env = "OMR_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Max LLM output tokens per question.
    #[arg(long, env = "OMR_MAX_TOKENS", default_value_t = 1)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "OMR_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "OMR_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "OMR_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Per-question LLM call timeout in seconds.
    #[arg(long, env = "OMR_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "OMR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug)]
struct GradeArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Answer key file.
    #[arg(short, long, env = "OMR_KEY", conflicts_with = "answers",
          required_unless_present = "answers")]
    key: Option<PathBuf>,

    /// Inline answer key, e.g. DDACB.
    #[arg(short, long, env = "OMR_ANSWERS")]
    answers: Option<String>,

    /// Write the spreadsheet export here.
    #[arg(long, env = "OMR_CSV")]
    csv: Option<PathBuf>,

    /// Write the full JSON report here ("-" for stdout).
    #[arg(long, env = "OMR_JSON")]
    json: Option<PathBuf>,

    /// Questions in flight at once.
    #[arg(short, long, env = "OMR_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Exit non-zero if any question could not be read.
    #[arg(long, env = "OMR_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "OMR_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct DetectArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// 1-indexed question number.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    question: u32,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Output PDF path.
    #[arg(short, long, default_value = "answer_sheet_filled.pdf")]
    output: PathBuf,

    /// RNG seed; the same seed draws the same marks.
    #[arg(long, env = "OMR_SEED", default_value_t = 0)]
    seed: u64,

    /// Number of questions (at most 40).
    #[arg(long, default_value_t = 40,
          value_parser = clap::value_parser!(u32).range(1..=40))]
    questions: u32,

    /// Also write the drawn marks as an answer key file.
    #[arg(long)]
    key_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "OMR_PASSWORD")]
    password: Option<String>,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for ImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => ImageFormat::Jpeg,
            FormatArg::Png => ImageFormat::Png,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum AmbiguousArg {
    MarkWrong,
    RetryOnce,
    Abort,
}

impl From<AmbiguousArg> for AmbiguousPolicy {
    fn from(v: AmbiguousArg) -> Self {
        match v {
            AmbiguousArg::MarkWrong => AmbiguousPolicy::MarkWrong,
            AmbiguousArg::RetryOnce => AmbiguousPolicy::RetryOnce,
            AmbiguousArg::Abort => AmbiguousPolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is on screen.
    let show_progress = match &cli.command {
        Command::Grade(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Grade(args) => run_grade(args, show_progress, cli.quiet).await,
        Command::Detect(args) => run_detect(args).await,
        Command::Generate(args) => run_generate(args, cli.quiet),
        Command::Inspect(args) => run_inspect(args).await,
    }
}

async fn run_grade(args: GradeArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let key = load_key(&args)?;

    let cli_cb = show_progress.then(CliProgressCallback::new_dynamic);
    let progress_cb: Option<ProgressCallback> = cli_cb
        .clone()
        .map(|cb| cb as Arc<dyn GradingProgressCallback>);
    // A failed run never reaches `on_grading_complete`; stop the spinner
    // before the error is printed.
    let clear_bar = || {
        if let Some(cb) = &cli_cb {
            cb.bar.finish_and_clear();
        }
    };

    let mut config = build_config(&args.model, progress_cb)
        .await
        .inspect_err(|_| clear_bar())?;
    config.concurrency = args.concurrency.max(1);

    let report = grade(&args.input, &key, &config)
        .await
        .inspect_err(|_| clear_bar())
        .context("Grading failed")?;

    let json_to_stdout = args.json.as_deref().is_some_and(|p| p.as_os_str() == "-");
    if json_to_stdout {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else {
        print_table(&report);
    }

    if let Some(ref path) = args.csv {
        report
            .write_csv(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !quiet {
            eprintln!("{} spreadsheet → {}", green("✔"), bold(&path.display().to_string()));
        }
    }
    if let Some(ref path) = args.json {
        if !json_to_stdout {
            report
                .write_json(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !quiet {
                eprintln!("{} report → {}", green("✔"), bold(&path.display().to_string()));
            }
        }
    }

    if !quiet {
        eprintln!(
            "   {} tokens in  /  {} tokens out  ·  {}ms total",
            dim(&report.stats.total_input_tokens.to_string()),
            dim(&report.stats.total_output_tokens.to_string()),
            report.stats.total_duration_ms,
        );
    }

    if args.strict {
        report.into_result().context("Some questions could not be read")?;
    }
    Ok(())
}

async fn run_detect(args: DetectArgs) -> Result<()> {
    let config = build_config(&args.model, None).await?;
    let analysis = detect_question(&args.input, config.page, args.question as usize, &config)
        .await
        .context("Detection failed")?;
    println!("{}", analysis.detection);
    Ok(())
}

fn run_generate(args: GenerateArgs, quiet: bool) -> Result<()> {
    let letters = random_answers(args.questions as usize, args.seed);
    let marks: Vec<Option<Letter>> = letters.iter().copied().map(Some).collect();

    write_sheet(&args.output, &SheetLayout::default(), &marks)
        .context("Failed to generate answer sheet")?;

    let key = AnswerKey::new(letters).context("Generated key is invalid")?;
    if let Some(ref path) = args.key_out {
        std::fs::write(path, format!("{}\n", key.to_compact_string()))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if !quiet {
        eprintln!(
            "{} {} questions → {}",
            green("✔"),
            args.questions,
            bold(&args.output.display().to_string())
        );
        eprintln!("   key: {}", key.to_compact_string());
    }
    Ok(())
}

async fn run_inspect(args: InspectArgs) -> Result<()> {
    let mut builder = GradingConfig::builder();
    if let Some(pwd) = args.password {
        builder = builder.password(pwd);
    }
    let config = builder.build().context("Invalid configuration")?;

    let info = inspect(&args.input, &config)
        .await
        .context("Failed to inspect PDF")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise info")?
        );
    } else {
        println!("File:   {}", info.source);
        println!("Size:   {} bytes", info.size_bytes);
        println!("Pages:  {}", info.page_count);
    }
    Ok(())
}

/// Answer key from `--key` or `--answers`.
fn load_key(args: &GradeArgs) -> Result<AnswerKey> {
    if let Some(ref inline) = args.answers {
        return AnswerKey::parse(inline).context("Invalid --answers");
    }
    let path = args
        .key
        .as_ref()
        .context("Provide an answer key with --key or --answers")?;
    AnswerKey::from_file(path).with_context(|| format!("Invalid answer key {}", path.display()))
}

fn print_table(report: &GradeReport) {
    println!(
        "{:>8}  {:>8}  {:>7}  {}",
        bold("Question"),
        bold("Detected"),
        bold("Correct"),
        bold("Status")
    );
    println!("{}", dim(&"─".repeat(36)));
    for row in &report.rows {
        let status = match row.status() {
            RowStatus::Correct => green(row.status().as_str()),
            RowStatus::Wrong => red(row.status().as_str()),
            RowStatus::Error => cyan(row.status().as_str()),
        };
        println!(
            "{:>8}  {:>8}  {:>7}  {}",
            row.question,
            row.detected_label(),
            row.expected.to_string(),
            status
        );
    }
    println!(
        "\n{} {} / {} ({:.1}%)",
        bold("Score:"),
        report.score,
        report.total,
        report.percentage()
    );
}

/// Map CLI args to `GradingConfig`.
async fn build_config(args: &ModelArgs, progress: Option<ProgressCallback>) -> Result<GradingConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = GradingConfig::builder()
        .page(args.page as usize - 1)
        .dpi(args.dpi)
        .image_format(args.format.into())
        .jpeg_quality(args.quality)
        .ambiguous_policy(args.ambiguous.into())
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .download_timeout_secs(args.download_timeout)
        .api_timeout_secs(args.api_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Fields without builder special-casing
    config.model = args.model.clone();
    config.provider_name = args.provider.clone();
    config.password = args.password.clone();
    config.system_prompt = system_prompt;

    Ok(config)
}
