//! CLI binary for edgequake-pdfchat.
//!
//! A thin shim over the library crate: each subcommand maps its flags onto
//! the library types and prints the results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_pdfchat::pdf::{self, PdfDestinationIndex};
use edgequake_pdfchat::{
    ask, AnswerQuality, ChatConfig, CitationTokenizer, ContextQuality, EmbeddingIndex,
    NavigationCoordinator, OutlineNode, PageRenderScheduler, PageSelection, PdfiumCanvas,
    RenderProgressCallback, Segment, ViewerConfig, Viewport,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
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

/// Terminal progress for the `render` subcommand: one bar plus a log line
/// per page, printed above the bar.
struct CliRenderProgress {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u32, Instant>>,
}

impl CliRenderProgress {
    fn new(total: u64) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(total);
        bar.set_style(style);
        bar.set_prefix("Rendering");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_ms(&self, page: u32) -> u128 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&page))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0)
    }
}

impl RenderProgressCallback for CliRenderProgress {
    fn on_render_start(&self, page: u32, _scale: f32) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(page, Instant::now());
        }
        self.bar.set_message(format!("page {page}"));
    }

    fn on_render_complete(&self, page: u32, scale: f32, elapsed_ms: u64) {
        if let Ok(mut t) = self.start_times.lock() {
            t.remove(&page);
        }
        self.bar.println(format!(
            "  {} Page {:>4}  {}  {}",
            green("✓"),
            page,
            dim(&format!("×{scale:.2}")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_render_error(&self, page: u32, error: &str) {
        let elapsed_ms = self.elapsed_ms(page);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}  {}  {}",
            red("✗"),
            page,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }
}

/// The CLI has no scroll container; scrolling is only logged.
struct LogViewport;

impl Viewport for LogViewport {
    fn scroll_to_page(&self, page: u32) {
        debug!("Viewport scrolled to page {}", page);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Print a document's bookmark outline
  pdfchat outline report.pdf

  # Find page citations in a piece of text
  pdfchat cite "Revenue grew 12% 【4】 (see also page 7)."
  echo "(Seite 3)" | pdfchat cite -

  # Ask a question against a pre-built chunk index
  pdfchat ask report.pdf --index chunks.json "What was the 2023 revenue?"

  # Render pages 1-5 at 1.5x into ./pages
  pdfchat render report.pdf --pages 1-5 --scale 1.5 --out pages

INDEX FORMAT:
  A JSON array of chunks produced by the ingestion step:
  [{"index": 0, "text": "[page 1] ...", "embedding": [0.01, ...]}, ...]

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to a pdfium shared library
"#;

/// Chat with PDF documents: citations, outlines and page rendering.
#[derive(Parser, Debug)]
#[command(
    name = "pdfchat",
    version,
    about = "Chat with PDF documents: grounded answers with clickable page citations",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "PDFCHAT_PASSWORD")]
    password: Option<String>,

    /// Output JSON instead of text.
    #[arg(long, global = true, env = "PDFCHAT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDFCHAT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFCHAT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFCHAT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved bookmark outline of a PDF.
    Outline {
        /// Local PDF file.
        pdf: PathBuf,
    },

    /// Tokenize text (or `-` for stdin) into segments and page citations.
    Cite {
        /// Text to scan, or `-` to read stdin.
        text: String,
    },

    /// Answer a question about a PDF from its chunk index.
    Ask(AskArgs),

    /// Render pages to PNG through the viewer's render scheduler.
    Render {
        /// Local PDF file.
        pdf: PathBuf,

        /// Page selection: all, 5, 3-15, or 1,3,5,7.
        #[arg(long, env = "PDFCHAT_PAGES", default_value = "all")]
        pages: String,

        /// Zoom factor (clamped to 0.25–4.0).
        #[arg(long, env = "PDFCHAT_SCALE", default_value_t = 1.0)]
        scale: f32,

        /// Output directory for page-NNNN.png files.
        #[arg(short, long, env = "PDFCHAT_OUT", default_value = "pages")]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct AskArgs {
    /// Local PDF file; cited pages are checked against its page count.
    pdf: PathBuf,

    /// The question.
    question: String,

    /// JSON chunk index with embeddings.
    #[arg(long, env = "PDFCHAT_INDEX")]
    index: PathBuf,

    /// Answer quality: fast (fewer chunks) or high (more chunks).
    #[arg(long, value_enum, default_value = "fast", env = "PDFCHAT_QUALITY")]
    quality: QualityArg,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Character budget for the retrieved context.
    #[arg(long, env = "PDFCHAT_CONTEXT_BUDGET", default_value_t = 8000)]
    budget: usize,

    /// Expected embedding dimension of the index and the question.
    #[arg(long, env = "PDFCHAT_EMBEDDING_DIM", default_value_t = 1536)]
    embedding_dim: usize,

    /// Path to a text file containing a custom system prompt with `{context}`.
    #[arg(long, env = "PDFCHAT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens.
    #[arg(long, env = "PDFCHAT_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFCHAT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries on LLM failure.
    #[arg(long, env = "PDFCHAT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Fast,
    High,
}

impl From<QualityArg> for AnswerQuality {
    fn from(v: QualityArg) -> Self {
        match v {
            QualityArg::Fast => AnswerQuality::Fast,
            QualityArg::High => AnswerQuality::HighQuality,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The render bar covers progress; keep library INFO logs out of its way.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || (show_progress && matches!(cli.command, Command::Render { .. })) {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Outline { pdf } => run_outline(&cli, pdf).await,
        Command::Cite { text } => run_cite(&cli, text),
        Command::Ask(args) => run_ask(&cli, args).await,
        Command::Render {
            pdf,
            pages,
            scale,
            out,
        } => run_render(&cli, pdf, pages, *scale, out, show_progress).await,
    }
}

// ── outline ──────────────────────────────────────────────────────────────────

async fn run_outline(cli: &Cli, pdf: &Path) -> Result<()> {
    let outline = pdf::load_outline(pdf, cli.password.as_deref())
        .await
        .context("Failed to read outline")?;
    let page_count = outline.page_count;
    let tree = outline.resolve().await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&tree).context("Failed to serialise outline")?
        );
        return Ok(());
    }

    if tree.is_empty() {
        println!("{}", dim("(no outline)"));
    }
    print_outline(&tree);
    if !cli.quiet {
        eprintln!("{} pages", page_count);
    }
    Ok(())
}

fn print_outline(nodes: &[OutlineNode<PdfDestinationIndex>]) {
    for node in nodes {
        let indent = "  ".repeat(node.level);
        match node.resolved_page {
            Some(page) => println!("{indent}{}  {}", node.title, cyan(&format!("p.{page}"))),
            None => println!("{indent}{}  {}", dim(&node.title), dim("(no page)")),
        }
        print_outline(&node.children);
    }
}

// ── cite ─────────────────────────────────────────────────────────────────────

fn run_cite(cli: &Cli, text: &str) -> Result<()> {
    let text = if text == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        text.to_string()
    };

    let segments = CitationTokenizer::default().tokenize(&text);
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&segments).context("Failed to serialise segments")?
        );
        return Ok(());
    }

    println!("{}", highlight(&segments));
    for token in Segment::citations(&segments) {
        println!(
            "  {} page {:<4} {:?}  bytes {}..{}  {}",
            cyan("→"),
            token.page_number,
            token.style,
            token.span_start,
            token.span_end,
            dim(&token.raw_text),
        );
    }
    Ok(())
}

fn highlight(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Text(t) => t.clone(),
            Segment::Citation(c) => cyan(&c.raw_text),
        })
        .collect()
}

// ── ask ──────────────────────────────────────────────────────────────────────

async fn run_ask(cli: &Cli, args: &AskArgs) -> Result<()> {
    let AskArgs {
        pdf,
        question,
        index,
        quality,
        model,
        provider,
        budget,
        embedding_dim,
        system_prompt,
        max_tokens,
        temperature,
        max_retries,
    } = args;

    let system_prompt = if let Some(ref path) = system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ChatConfig::builder()
        .quality((*quality).into())
        .context_budget_chars(*budget)
        .embedding_dim(*embedding_dim)
        .max_tokens(*max_tokens)
        .temperature(*temperature)
        .max_retries(*max_retries);
    if let Some(m) = model {
        builder = builder.model(m.clone());
    }
    if let Some(p) = provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(p) = system_prompt {
        builder = builder.system_prompt(p);
    }
    let config = builder.build().context("Invalid configuration")?;

    let index = EmbeddingIndex::from_json_file(index).context("Failed to load chunk index")?;
    let answer = ask(question, &index, &config)
        .await
        .context("Answering failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&answer).context("Failed to serialise answer")?
        );
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", highlight(&answer.segments)).context("Failed to write to stdout")?;

    if cli.quiet {
        return Ok(());
    }

    if answer.quality == ContextQuality::Ungrounded {
        eprintln!("{} no relevant passage found; answer is not grounded", cyan("⚠"));
    }

    let cited = answer.cited_pages();
    if !cited.is_empty() {
        // Only warn when the page count is unknown; the answer is already out.
        match pdf::page_count(pdf, cli.password.as_deref()).await {
            Ok(total) => {
                let shown: Vec<String> = cited
                    .iter()
                    .map(|&p| {
                        if p <= total {
                            green(&p.to_string())
                        } else {
                            red(&format!("{p} (beyond {total} pages)"))
                        }
                    })
                    .collect();
                eprintln!("{} cited pages: {}", cyan("◆"), shown.join(", "));
            }
            Err(e) => {
                tracing::warn!("Cannot check cited pages: {}", e);
                eprintln!(
                    "{} cited pages: {:?}",
                    cyan("◆"),
                    cited
                );
            }
        }
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out  /  {}ms total",
        dim(&answer.input_tokens.to_string()),
        dim(&answer.output_tokens.to_string()),
        answer.duration_ms,
    );
    Ok(())
}

// ── render ───────────────────────────────────────────────────────────────────

async fn run_render(
    cli: &Cli,
    pdf: &Path,
    pages: &str,
    scale: f32,
    out: &Path,
    show_progress: bool,
) -> Result<()> {
    let outline = pdf::load_outline(pdf, cli.password.as_deref())
        .await
        .context("Failed to open PDF")?;
    let total = outline.page_count;
    let selected = parse_pages(pages)?.to_pages(total);
    if selected.is_empty() {
        anyhow::bail!("No pages selected (document has {} pages)", total);
    }
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("Failed to create {:?}", out))?;

    let canvas = Arc::new(PdfiumCanvas::new(pdf, cli.password.clone()));
    let mut scheduler = PageRenderScheduler::new(
        canvas.clone(),
        Arc::new(LogViewport),
        total,
        ViewerConfig::default(),
    );
    let progress = show_progress.then(|| CliRenderProgress::new(selected.len() as u64));
    if let Some(ref p) = progress {
        scheduler = scheduler.with_progress(p.clone());
    }
    let applied = scheduler.set_scale(scale);
    let nav = NavigationCoordinator::new(Arc::new(scheduler), outline.resolve().await);

    let start = Instant::now();
    let mut written = 0usize;
    let mut failed = 0usize;
    for page in &selected {
        if let Err(e) = nav.jump_to_page(*page).await {
            debug!("{}", e);
            failed += 1;
            continue;
        }
        let Some(rendered) = canvas.take_page(*page) else {
            failed += 1;
            continue;
        };
        let path = out.join(format!("page-{page:04}.png"));
        tokio::task::spawn_blocking(move || rendered.image.save(&path).map(|_| path))
            .await
            .context("Image writer panicked")?
            .context("Failed to write page image")?;
        written += 1;
    }

    if let Some(p) = progress {
        p.bar.finish_and_clear();
    }
    if !cli.quiet {
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{}  {}/{} pages at ×{:.2}  {}ms  →  {}",
            mark,
            written,
            selected.len(),
            applied,
            start.elapsed().as_millis(),
            bold(&out.display().to_string()),
        );
        if failed > 0 {
            eprintln!("   {} pages failed", red(&failed.to_string()));
        }
    }
    Ok(())
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: u32 = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: u32 = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<u32> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<u32>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: u32 = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pages_forms() {
        assert_eq!(parse_pages("all").unwrap(), PageSelection::All);
        assert_eq!(parse_pages(" 5 ").unwrap(), PageSelection::Single(5));
        assert_eq!(parse_pages("3-15").unwrap(), PageSelection::Range(3, 15));
        assert_eq!(parse_pages("1,3,5").unwrap(), PageSelection::Set(vec![1, 3, 5]));
    }

    #[test]
    fn parse_pages_rejects_bad_input() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("9-2").is_err());
        assert!(parse_pages("1,x").is_err());
        assert!(parse_pages("two").is_err());
    }

    #[test]
    fn highlight_keeps_text() {
        let segs = CitationTokenizer::default().tokenize("a (7) b");
        let shown = highlight(&segs);
        assert!(shown.starts_with("a "));
        assert!(shown.contains("(7)"));
        assert!(shown.ends_with(" b"));
    }
}
