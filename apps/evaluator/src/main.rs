use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use evaluator::auth;
use evaluator::dashboard::requires_login;
use evaluator::models::job::EvaluationResult;
use evaluator::upload::DocumentFile;
use evaluator::{
    ApiClient, ClientError, Config, Dashboard, EvaluationSnapshot, FileStore, Phase,
    PollSettings, SessionStore,
};

#[derive(Debug, Parser)]
#[command(name = "evaluator", version, about = "Score a CV and project report against a job")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exchange credentials for a session token
    Login {
        #[arg(long, env = "EVALUATOR_EMAIL")]
        email: String,
        #[arg(long, env = "EVALUATOR_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Upload both documents, submit them and wait for the score
    Evaluate {
        #[arg(long)]
        cv: PathBuf,
        #[arg(long)]
        project_report: PathBuf,
        /// Inline text, or @path to read it from a file
        #[arg(long)]
        job_description: String,
        /// Inline text, or @path to read it from a file
        #[arg(long)]
        study_case_brief: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on missing API_BASE_URL)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting evaluator v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", config.api_base_url);

    let api = ApiClient::new(&config.api_base_url, config.request_timeout)?;
    let sessions = SessionStore::new(FileStore::new(&config.session_file));

    match cli.command {
        Command::Login { email, password } => {
            let session = auth::login(&api, &sessions, &email, &password)
                .await
                .map_err(to_user_error)?;
            println!("Logged in (tenant {})", session.tenant_id);
        }
        Command::Logout => {
            auth::logout(&sessions).map_err(to_user_error)?;
            println!("Logged out");
        }
        Command::Evaluate {
            cv,
            project_report,
            job_description,
            study_case_brief,
        } => {
            let job_description = read_text_arg(&job_description).await?;
            let study_case_brief = read_text_arg(&study_case_brief).await?;
            let dashboard = match Dashboard::open(api, sessions, PollSettings::from(&config)) {
                Ok(dashboard) => dashboard,
                Err(e) if requires_login(&e) => {
                    return Err(anyhow!("Not logged in. Run `evaluator login` first."));
                }
                Err(e) => return Err(to_user_error(e)),
            };
            run_evaluation(dashboard, cv, project_report, &job_description, &study_case_brief)
                .await?;
        }
    }

    Ok(())
}

async fn run_evaluation(
    mut dashboard: Dashboard<FileStore>,
    cv: PathBuf,
    project_report: PathBuf,
    job_description: &str,
    study_case_brief: &str,
) -> Result<()> {
    let cv = DocumentFile::from_path(&cv).await.map_err(to_user_error)?;
    let project_report = DocumentFile::from_path(&project_report)
        .await
        .map_err(to_user_error)?;

    let handles = dashboard
        .upload(Some(cv), Some(project_report))
        .await
        .map_err(to_user_error)?;
    println!(
        "Uploaded (cv {}, project report {})",
        handles.cv_file_id, handles.project_file_id
    );

    let job_id = dashboard
        .evaluate(job_description, study_case_brief)
        .await
        .map_err(to_user_error)?;
    println!("Evaluation {job_id} submitted");

    let mut updates = dashboard.subscribe();
    let printer = tokio::spawn(async move {
        let mut last_shown = -1.0_f64;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.progress.floor() > last_shown {
                last_shown = snapshot.progress.floor();
                println!("[{:?}] {:>3.0}%", snapshot.phase, snapshot.progress);
            }
            if snapshot.phase.is_terminal() {
                break;
            }
        }
    });

    let outcome = dashboard.wait_for_result().await;
    printer.abort();
    render_outcome(&outcome)
}

fn render_outcome(snapshot: &EvaluationSnapshot) -> Result<()> {
    match (snapshot.phase, &snapshot.result) {
        (Phase::Completed, Some(result)) => {
            print_result(result);
            Ok(())
        }
        _ => Err(anyhow!(snapshot
            .error
            .clone()
            .unwrap_or_else(|| "Evaluation did not finish".to_string()))),
    }
}

fn print_result(result: &EvaluationResult) {
    println!();
    println!("CV match rate:   {:.0}%", result.cv_match_rate * 100.0);
    println!("CV feedback:     {}", result.cv_feedback);
    println!("Project score:   {:.1} / 10", result.project_score);
    println!("Project feedback: {}", result.project_feedback);
    println!();
    println!("{}", result.overall_summary);
}

/// `@path` reads the text from a file; anything else is used verbatim.
async fn read_text_arg(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {path}")),
        None => Ok(arg.to_string()),
    }
}

fn to_user_error(err: ClientError) -> anyhow::Error {
    anyhow!(err.user_message())
}
