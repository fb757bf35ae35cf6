use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Use library instead of local modules
use gradcafe::{
    clean_data, fetch_analysis, load_applicants, load_records, open_connection, save_records,
    scrape_data, verify_count, Analysis, AnalysisParams, DbConfig, HttpHarvester, Pipeline,
    PullOutcome, ScrapeLimits,
};

#[derive(Parser)]
#[command(name = "gradcafe")]
#[command(about = "Scrape, clean, load and analyse GradCafe admissions results")]
struct Cli {
    /// Database location (`sqlite://path` or a bare path); defaults to DATABASE_URL / DB_DIR / DB_NAME
    #[arg(long, global = true)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest listing pages into a raw JSON file
    Scrape {
        #[arg(long, default_value = "raw_data.json")]
        out: PathBuf,
        #[arg(long)]
        min_entries: Option<usize>,
        #[arg(long)]
        max_pages: Option<u32>,
        #[arg(long)]
        per_page: Option<u32>,
    },
    /// Normalize a raw data file
    Clean {
        #[arg(long, default_value = "raw_data.json")]
        input: PathBuf,
        #[arg(long, default_value = "applicant_data.json")]
        output: PathBuf,
    },
    /// Load a cleaned data file into the database
    Load {
        #[arg(long, default_value = "applicant_data.json")]
        input: PathBuf,
    },
    /// Print the analysis results
    Analysis {
        #[arg(long)]
        term: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        institution: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Scrape, clean and load in one run
    Pull,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gradcafe=info")),
        )
        .init();

    let cli = Cli::parse();
    let db = match &cli.db {
        Some(url) => DbConfig::from_url(url),
        None => DbConfig::from_env(),
    };

    match cli.command {
        Commands::Scrape {
            out,
            min_entries,
            max_pages,
            per_page,
        } => {
            let defaults = ScrapeLimits::from_env();
            let limits = ScrapeLimits {
                min_entries: min_entries.unwrap_or(defaults.min_entries),
                max_pages: max_pages.unwrap_or(defaults.max_pages),
                per_page: per_page.unwrap_or(defaults.per_page),
            };
            run_scrape(&out, &limits).await
        }
        Commands::Clean { input, output } => run_clean(&input, &output),
        Commands::Load { input } => run_load(&db, &input),
        Commands::Analysis {
            term,
            year,
            institution,
            limit,
        } => {
            let defaults = AnalysisParams::default();
            let params = AnalysisParams {
                term: term.unwrap_or(defaults.term),
                year: year.unwrap_or(defaults.year),
                institution: institution.unwrap_or(defaults.institution),
                limit: limit.unwrap_or(defaults.limit),
                ..defaults
            };
            let analysis = fetch_analysis(&db, &params)?;
            print_analysis(&analysis);
            Ok(())
        }
        Commands::Pull => run_pull(db).await,
    }
}

async fn run_scrape(out: &Path, limits: &ScrapeLimits) -> Result<()> {
    println!("Scraping up to {} pages (target {} entries)...", limits.max_pages, limits.min_entries);

    let harvester = HttpHarvester::new().context("failed to build HTTP client")?;
    let records = scrape_data(&harvester, limits).await?;
    save_records(&records, out)?;

    println!("✓ Saved {} records to {}", records.len(), out.display());
    Ok(())
}

fn run_clean(input: &Path, output: &Path) -> Result<()> {
    let records = load_records(input)?;
    let cleaned = clean_data(records);
    save_records(&cleaned, output)?;

    println!("✓ Cleaned {} records into {}", cleaned.len(), output.display());
    Ok(())
}

fn run_load(db: &DbConfig, input: &Path) -> Result<()> {
    let records = load_records(input)?;
    let rows = load_applicants(db, &records)?;

    let conn = open_connection(db)?;
    let count = verify_count(&conn)?;

    println!("✓ Prepared {} rows from {}", rows.len(), input.display());
    println!("✓ Database {} contains {} applicants", db.path.display(), count);
    Ok(())
}

async fn run_pull(db: DbConfig) -> Result<()> {
    let harvester = HttpHarvester::new().context("failed to build HTTP client")?;
    let pipeline = Pipeline::new(Arc::new(harvester), db)
        .with_limits(ScrapeLimits::from_env())
        .run_async(false);

    match pipeline.trigger_pull().await? {
        PullOutcome::Completed { rows } => println!("✓ Pull finished: {} records loaded", rows),
        other => println!("Pull not completed: {:?}", other),
    }
    Ok(())
}

fn show(value: Option<f64>) -> String {
    value.map_or_else(|| "no data".to_string(), |v| format!("{:.2}", v))
}

fn print_analysis(analysis: &Analysis) {
    let p = &analysis.params;

    println!("Applicants for {}: {}", p.term, analysis.term_count);
    println!("International applicants: {}%", show(analysis.international_percent));
    println!("Average GPA: {}", show(analysis.avg_gpa));
    println!("Average GRE: {}", show(analysis.avg_gre));
    println!("Average GRE V: {}", show(analysis.avg_gre_v));
    println!("Average GRE AW: {}", show(analysis.avg_gre_aw));
    println!("Average GPA of American applicants, {}: {}", p.term, show(analysis.avg_gpa_american_fall));
    println!("Acceptance rate, {}: {}%", p.term, show(analysis.accept_percent_fall));
    println!("Average GPA of accepted applicants, {}: {}", p.term, show(analysis.avg_gpa_accept_fall));
    println!("{} Masters applicants in {}: {}", p.institution, p.program, analysis.jhu_ms_cs);
    println!("{} PhD acceptances in {} at selected universities: {}", p.year, p.program, analysis.cs_phd_accept_2026);
    println!("{} PhD acceptances in {} (LLM-labelled fields): {}", p.year, p.program, analysis.cs_phd_accept_2026_llm);

    println!("\nAverage GPA by status, {}:", p.term);
    for row in &analysis.gpa_by_status {
        println!("  {:<12} {}", row.status.as_deref().unwrap_or("Unknown"), show(row.avg_gpa));
    }

    println!("\nTop universities, {}:", p.term);
    for row in &analysis.top_universities {
        println!("  {:<40} {}", row.university, row.total);
    }
}
