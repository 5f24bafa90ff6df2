use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use qamigrate_core::assets::ImageRehoster;
use qamigrate_core::client::{ApiClient, ClientConfig};
use qamigrate_core::config::{
    ConfigOverrides, DEFAULT_CONFIG_PATH, MigrateConfig, RepoIdent, load_config,
};
use qamigrate_core::corpus::{TagPolicy, load_questions, load_tags};
use qamigrate_core::delete::{
    DeleteOptions, delete_all_labels, delete_threads_for_questions, load_question_ids,
};
use qamigrate_core::extract::extract_questions;
use qamigrate_core::github::GithubDiscussions;
use qamigrate_core::migrate::{CleanMode, MigrationOptions, MigrationOrchestrator};
use qamigrate_core::redirect::{RedirectLog, merge_redirect_logs};
use qamigrate_core::validate::{ValidationOptions, validate_migration};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "qamigrate",
    version,
    about = "Migrate a Q&A export into GitHub Discussions and audit the result"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay questions, answers and comments as discussions
    Migrate(MigrateArgs),
    /// Compare the migrated category against the source export
    Validate(ValidateArgs),
    /// Delete the discussions created for specific source questions
    Delete(DeleteArgs),
    /// Copy selected questions into a smaller export for a retry run
    Extract(ExtractArgs),
    /// Delete every label in the repository
    #[command(name = "delete-labels")]
    DeleteLabels(DeleteLabelsArgs),
    /// Merge two redirect logs, letting the patch win
    #[command(name = "merge-redirects")]
    MergeRedirects(MergeRedirectsArgs),
}

#[derive(Debug, Args)]
struct TargetArgs {
    #[arg(long, value_name = "OWNER/NAME", help = "Target repository")]
    repo: String,
    #[arg(long, value_name = "NAME", help = "Discussion category name")]
    category: String,
}

#[derive(Debug, Args)]
struct CorpusArgs {
    #[arg(long, value_name = "PATH", help = "Questions JSON export")]
    questions_file: PathBuf,
    #[arg(long, value_name = "PATH", help = "Tags JSON export")]
    tags_file: PathBuf,
    #[arg(long, value_name = "N", help = "Minimum tag usage for a tag to become a label")]
    min_tag_count: Option<u64>,
    #[arg(long, value_name = "N", help = "View count at which a question is popular")]
    popular_views: Option<u64>,
    #[arg(long = "ignore-tag", value_name = "TAG", help = "Skip questions carrying this tag (repeatable)")]
    ignore_tags: Vec<String>,
    #[arg(long, value_name = "SECONDS", help = "Minimum interval between API calls")]
    api_interval: Option<f64>,
}

impl CorpusArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            min_tag_count: self.min_tag_count,
            popular_views: self.popular_views,
            ignore_tags: (!self.ignore_tags.is_empty()).then(|| self.ignore_tags.clone()),
            api_interval_secs: self.api_interval,
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    corpus: CorpusArgs,
    #[arg(long, value_name = "PATH", help = "Local folder of cached images")]
    image_folder: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Redirect log to append to")]
    redirect_log: Option<PathBuf>,
    #[arg(long, value_name = "N", help = "Only process the first N questions of the file")]
    limit: Option<usize>,
    #[arg(long, conflicts_with = "clean_only", help = "Empty the category before migrating")]
    clean: bool,
    #[arg(long, help = "Empty the category and exit")]
    clean_only: bool,
}

#[derive(Debug, Args)]
struct ValidateArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    corpus: CorpusArgs,
    #[arg(long, value_name = "PERCENT", help = "Minimum body similarity (0-100)")]
    similarity_threshold: Option<f64>,
    #[arg(long, value_name = "PATH", default_value = "validation_report.md")]
    output: PathBuf,
    #[arg(long, help = "Write the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, value_name = "PATH", help = "File with one source question id per line")]
    question_ids: PathBuf,
    #[arg(long, value_name = "PATH", help = "Questions JSON export")]
    questions_file: PathBuf,
    #[arg(long, help = "Report what would be deleted")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long, value_name = "PATH", help = "Questions JSON export")]
    questions_file: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        required_unless_present = "ids",
        conflicts_with = "ids",
        help = "File with one source question id per line"
    )]
    question_ids: Option<PathBuf>,
    #[arg(long, value_name = "ID", num_args = 1.., help = "Source question ids")]
    ids: Vec<i64>,
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct DeleteLabelsArgs {
    #[arg(long, value_name = "OWNER/NAME")]
    repo: String,
    #[arg(long, help = "List labels without deleting them")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct MergeRedirectsArgs {
    #[arg(long, value_name = "PATH")]
    base_file: PathBuf,
    #[arg(long, value_name = "PATH")]
    patch_file: PathBuf,
    #[arg(long, value_name = "PATH")]
    new_file: PathBuf,
}

fn main() -> Result<()> {
    init_tracing(env_filter(None));
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Migrate(args)) => run_migrate(&cli.config, args),
        Some(Commands::Validate(args)) => run_validate(&cli.config, args),
        Some(Commands::Delete(args)) => run_delete(&cli.config, args),
        Some(Commands::Extract(args)) => run_extract(args),
        Some(Commands::DeleteLabels(args)) => run_delete_labels(&cli.config, args),
        Some(Commands::MergeRedirects(args)) => run_merge_redirects(args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Load `.env` first so a `RUST_LOG` set there reaches the filter.
fn env_filter(env_file: Option<&Path>) -> EnvFilter {
    match env_file {
        Some(path) => dotenvy::from_path(path).ok(),
        None => dotenvy::dotenv().ok().map(|_| ()),
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_config(config_path: &Path, overrides: ConfigOverrides) -> Result<MigrateConfig> {
    let mut config = load_config(config_path)?;
    config.apply(overrides);
    config.validate()?;
    Ok(config)
}

fn connect(config: &MigrateConfig, repo: &str) -> Result<GithubDiscussions> {
    let repo = RepoIdent::parse(repo)?;
    let client = ApiClient::connect(&ClientConfig::from_config(config))
        .context("failed to initialize GitHub client")?;
    info!("connected to {repo}");
    Ok(GithubDiscussions::new(client, repo, config.branch()))
}

fn load_policy(config: &MigrateConfig, tags_file: &Path) -> Result<TagPolicy> {
    let tags = load_tags(tags_file)?;
    let migration = &config.migration;
    let policy = TagPolicy::new(
        &tags,
        migration.min_tag_count(),
        migration.popular_views(),
        &migration.ignore_tags,
    );
    let under = policy.under_threshold();
    if !under.is_empty() {
        info!(
            "{} tags below the usage threshold will not become labels",
            under.len()
        );
    }
    Ok(policy)
}

fn run_migrate(config_path: &Path, args: MigrateArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        image_folder: args.image_folder.clone(),
        redirect_log: args.redirect_log.clone(),
        ..args.corpus.overrides()
    };
    let config = resolve_config(config_path, overrides)?;
    let questions = load_questions(&args.corpus.questions_file)?;
    let policy = load_policy(&config, &args.corpus.tags_file)?;
    let images = ImageRehoster::index(&config.migration.image_folder())?;
    let redirect_path = config.migration.redirect_log();
    let redirects = RedirectLog::to_file(&redirect_path);

    let clean = match (args.clean, args.clean_only) {
        (_, true) => CleanMode::CleanOnly,
        (true, false) => CleanMode::Clean,
        (false, false) => CleanMode::Keep,
    };
    let options = MigrationOptions {
        category: args.target.category.clone(),
        clean,
        limit: args.limit,
    };

    let mut api = connect(&config, &args.target.repo)?;
    let mut orchestrator = MigrationOrchestrator::new(&mut api, policy, images, redirects);
    let report = orchestrator.run(&questions, &options)?;

    println!("migration");
    println!("repo: {}", args.target.repo);
    println!("category: {}", options.category);
    if let Some(clean) = &report.clean {
        println!("clean.threads_deleted: {}", clean.threads_deleted);
        println!("clean.comments_deleted: {}", clean.comments_deleted);
        println!("clean.labels_removed: {}", clean.labels_removed);
    }
    println!("questions: {}", report.questions);
    println!("created: {}", report.created);
    println!("resumed: {}", report.resumed);
    println!("ignored: {}", report.ignored);
    println!("failed: {}", report.failed.len());
    println!("labels_created: {}", report.labels_created);
    println!("comments_created: {}", report.comments_created);
    println!("answers_marked: {}", report.answers_marked);
    println!("images_uploaded: {}", report.images_uploaded);
    println!("redirects_written: {}", report.redirects_written);
    println!("redirect_log: {}", normalize_path(&redirect_path));
    println!("api_requests: {}", report.request_count);
    if !report.failed.is_empty() {
        println!("failures:");
        for failure in &report.failed {
            println!("  - {}: {}", failure.question_id, failure.message);
        }
    }
    Ok(())
}

fn run_validate(config_path: &Path, args: ValidateArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        similarity_threshold: args.similarity_threshold,
        ..args.corpus.overrides()
    };
    let config = resolve_config(config_path, overrides)?;
    let questions = load_questions(&args.corpus.questions_file)?;
    let policy = load_policy(&config, &args.corpus.tags_file)?;
    let options = ValidationOptions {
        category: args.target.category.clone(),
        similarity_threshold: config.migration.similarity_threshold(),
    };

    let mut api = connect(&config, &args.target.repo)?;
    let report = validate_migration(&mut api, &questions, &policy, &options)?;
    report.write(&args.output, args.json)?;

    println!("validation");
    println!("total_questions: {}", report.total_questions);
    println!("migrated_questions: {}", report.migrated_questions);
    println!("success_rate: {:.1}%", report.success_rate());
    println!("missing: {}", report.missing.len());
    println!("ignored: {}", report.ignored.len());
    println!("content_issues: {}", report.content_issues.len());
    println!("answer_issues: {}", report.answer_issues.len());
    println!("comment_issues: {}", report.comment_issues.len());
    println!("missing_popular: {}", report.missing_popular.len());
    println!("unexpected_popular: {}", report.unexpected_popular.len());
    println!("report: {}", normalize_path(&args.output));
    Ok(())
}

fn run_delete(config_path: &Path, args: DeleteArgs) -> Result<()> {
    let config = resolve_config(config_path, ConfigOverrides::default())?;
    let ids = load_question_ids(&args.question_ids)?;
    if ids.is_empty() {
        bail!("no question ids found in {}", normalize_path(&args.question_ids));
    }
    let questions = load_questions(&args.questions_file)?;
    let options = DeleteOptions {
        category: args.target.category.clone(),
        dry_run: args.dry_run,
    };

    let mut api = connect(&config, &args.target.repo)?;
    let report = delete_threads_for_questions(&mut api, &questions, &ids, &options)?;

    println!("delete");
    println!("category: {}", report.category);
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("requested: {}", report.requested);
    println!("deleted: {}", report.deleted.len());
    for thread in &report.deleted {
        println!(
            "  - {} #{} {} ({} comments)",
            thread.question_id, thread.number, thread.title, thread.comments
        );
    }
    println!("unknown_question_ids: {}", report.unknown_question_ids.len());
    println!("missing_titles: {}", report.missing_titles.len());
    for title in &report.missing_titles {
        println!("  - {title}");
    }
    Ok(())
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let ids = match &args.question_ids {
        Some(path) => load_question_ids(path)?,
        None => args.ids.clone(),
    };
    let report = extract_questions(&args.questions_file, &ids, &args.output)?;

    println!("extract");
    println!("requested: {}", report.requested);
    println!("duplicates_removed: {}", report.duplicates_removed);
    println!("questions: {}", report.questions);
    println!("answers: {}", report.answers);
    println!("comments: {}", report.comments);
    println!("unknown_question_ids: {}", report.unknown_question_ids.len());
    for id in &report.unknown_question_ids {
        println!("  - {id}");
    }
    println!("output: {}", normalize_path(&args.output));
    Ok(())
}

fn run_delete_labels(config_path: &Path, args: DeleteLabelsArgs) -> Result<()> {
    let config = resolve_config(config_path, ConfigOverrides::default())?;
    let mut api = connect(&config, &args.repo)?;
    let report = delete_all_labels(&mut api, args.dry_run)?;

    println!("delete-labels");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("labels: {}", report.labels.len());
    for label in &report.labels {
        println!("  - {label}");
    }
    println!("deleted: {}", report.deleted);
    Ok(())
}

fn run_merge_redirects(args: MergeRedirectsArgs) -> Result<()> {
    let report = merge_redirect_logs(&args.base_file, &args.patch_file, &args.new_file)?;
    println!("merge-redirects");
    println!("base_entries: {}", report.base_entries);
    println!("patch_entries: {}", report.patch_entries);
    println!("overridden: {}", report.overridden);
    println!("skipped_lines: {}", report.skipped_lines);
    println!("written_entries: {}", report.written_entries);
    println!("output: {}", report.output);
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
