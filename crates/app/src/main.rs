use std::fmt;
use std::str::FromStr;

use exam_core::model::{
    BankItemDraft, DifficultyLevel, Grade, OptionDraft, Phase, PhaseAuthorization, StudentId,
    Subject, SubjectCatalog, SubjectCode, Topic, TopicCode,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use services::progression::ResolveRequest;
use services::{Clock, EngineConfig, EngineServices, ExamRequest};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_value<T: FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidValue { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- migrate  [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- seed     [--db <sqlite_url>] [--grade <n>]");
    eprintln!("  cargo run -p app -- resolve  --student <id> --subject <name|code> --grade <n>");
    eprintln!(
        "  cargo run -p app -- allocate --student <id> --subject <name|code> --grade <n> --phase <first|second|third> [--count <n>] [--seed <n>]"
    );
    eprintln!();
    eprintln!("Every command accepts --db <sqlite_url> and -v/--verbose.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_DURATION_SECS, EXAM_QUESTION_COUNT, EXAM_MAX_STRIKES,");
    eprintln!("  EXAM_WEAKNESS_RATIO, EXAM_COUNTER_MAX_ATTEMPTS, EXAM_AI_API_KEY,");
    eprintln!("  EXAM_AI_BASE_URL, EXAM_AI_MODEL, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Migrate,
    Seed,
    Resolve,
    Allocate,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "migrate" => Some(Self::Migrate),
            "seed" => Some(Self::Seed),
            "resolve" => Some(Self::Resolve),
            "allocate" => Some(Self::Allocate),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    db_url: Option<String>,
    verbose: bool,
    student: Option<StudentId>,
    subject: Option<String>,
    grade: Option<Grade>,
    phase: Option<Phase>,
    count: Option<usize>,
    seed: Option<u64>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(value);
                }
                "--student" => {
                    let value = require_value(args, "--student")?;
                    parsed.student = Some(StudentId::new(value.clone()).map_err(|_| {
                        ArgsError::InvalidValue {
                            flag: "--student",
                            raw: value,
                        }
                    })?);
                }
                "--subject" => parsed.subject = Some(require_value(args, "--subject")?),
                "--grade" => {
                    let value: u32 = parse_value(require_value(args, "--grade")?, "--grade")?;
                    parsed.grade = Some(Grade::new(value).map_err(|_| ArgsError::InvalidValue {
                        flag: "--grade",
                        raw: value.to_string(),
                    })?);
                }
                "--phase" => {
                    parsed.phase = Some(parse_value(require_value(args, "--phase")?, "--phase")?);
                }
                "--count" => {
                    parsed.count = Some(parse_value(require_value(args, "--count")?, "--count")?);
                }
                "--seed" => {
                    parsed.seed = Some(parse_value(require_value(args, "--seed")?, "--seed")?);
                }
                "-v" | "--verbose" => parsed.verbose = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn student(&self) -> Result<StudentId, ArgsError> {
        self.student
            .clone()
            .ok_or(ArgsError::MissingFlag { flag: "--student" })
    }

    fn grade(&self) -> Result<Grade, ArgsError> {
        self.grade.ok_or(ArgsError::MissingFlag { flag: "--grade" })
    }

    fn phase(&self) -> Result<Phase, ArgsError> {
        self.phase.ok_or(ArgsError::MissingFlag { flag: "--phase" })
    }

    /// Accepts a subject name or its two-letter catalog code.
    fn subject(&self, catalog: &SubjectCatalog) -> Result<Subject, ArgsError> {
        let raw = self
            .subject
            .as_deref()
            .ok_or(ArgsError::MissingFlag { flag: "--subject" })?;
        let invalid = || ArgsError::InvalidValue {
            flag: "--subject",
            raw: raw.to_string(),
        };
        if let Ok(code) = SubjectCode::new(raw.to_ascii_uppercase()) {
            if let Some(subject) = catalog.subject_for(&code) {
                return Ok(subject.clone());
            }
        }
        let subject = Subject::new(raw).map_err(|_| invalid())?;
        if catalog.code_for(&subject).is_none() {
            return Err(invalid());
        }
        Ok(subject)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

//
// ─── COMMANDS ──────────────────────────────────────────────────────────────────
//

const DEMO_TOPICS: [(&str, &str); 3] = [
    ("Álgebra", "ALG"),
    ("Geometría", "GEO"),
    ("Estadística", "EST"),
];
const DEMO_ITEMS_PER_TOPIC: u32 = 8;

async fn seed(engine: &EngineServices, grade: Grade) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = SubjectCatalog::default();
    let subjects: Vec<Subject> = catalog.entries().iter().map(|e| e.subject.clone()).collect();
    let authorizations = engine.storage().authorizations.as_ref();
    authorizations
        .upsert_authorization(&PhaseAuthorization::new(
            grade,
            Phase::First,
            true,
            subjects.clone(),
        ))
        .await?;
    for phase in [Phase::Second, Phase::Third] {
        authorizations
            .upsert_authorization(&PhaseAuthorization::new(
                grade,
                phase,
                false,
                subjects.clone(),
            ))
            .await?;
    }

    let math = Subject::new("Matemáticas")?;
    let math_code = catalog
        .code_for(&math)
        .cloned()
        .ok_or_else(|| ArgsError::InvalidValue {
            flag: "--subject",
            raw: math.to_string(),
        })?;
    let allocator = engine.allocator();
    let mut created = 0_u32;
    for (topic, topic_code) in DEMO_TOPICS {
        for n in 1..=DEMO_ITEMS_PER_TOPIC {
            let draft = BankItemDraft {
                subject: math.clone(),
                subject_code: math_code.clone(),
                topic: Topic::new(topic)?,
                topic_code: TopicCode::new(topic_code)?,
                grade,
                level: DifficultyLevel::Basic,
                prompt: format!("{topic}: ejercicio {n}"),
                prompt_image: None,
                options: vec![
                    OptionDraft::text((n * 2).to_string(), true),
                    OptionDraft::text((n * 2 + 1).to_string(), false),
                    OptionDraft::text((n * 3 + 2).to_string(), false),
                ],
            };
            let item = allocator.create_item(draft).await?;
            println!("created {}", item.code);
            created += 1;
        }
    }
    info!(created, %grade, "demo bank seeded");
    Ok(())
}

async fn resolve(engine: &EngineServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let request = ResolveRequest {
        student: args.student()?,
        grade: args.grade()?,
        subject: args.subject(&SubjectCatalog::default())?,
    };
    // The process exits right after, so maintenance runs inline instead of in the background.
    let resolver = (*engine.resolver())
        .clone()
        .with_background_maintenance(false);
    let resolution = resolver.resolve(&request).await?;
    for view in &resolution.phases {
        println!(
            "{:<7} {:<26} authorized={} completed={}",
            view.phase.as_str(),
            view.status.as_str(),
            view.authorized,
            view.exam_completed
        );
    }
    println!("display: {}", resolution.display);
    if resolution.needs_maintenance() {
        if let Err(err) = resolver.apply_maintenance(&resolution).await {
            warn!(error = %err, "maintenance incomplete");
        }
    }
    Ok(())
}

async fn allocate(engine: &EngineServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let request = ExamRequest {
        student: args.student()?,
        subject: args.subject(&SubjectCatalog::default())?,
        grade: args.grade()?,
        phase: args.phase()?,
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut allocator = (*engine.allocator()).clone();
    if let Some(count) = args.count {
        let mut policy = allocator.policy();
        policy.question_count = count;
        allocator = allocator.with_policy(policy);
    }

    let allocation = allocator.allocate_for_phase(&request, &mut rng).await?;
    for item in &allocation.items {
        println!("{}  {:<14} {}", item.code, item.topic.as_str(), item.prompt);
    }
    println!(
        "{} of {} requested ({:?})",
        allocation.items.len(),
        allocation.requested,
        allocation.mode
    );
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            ArgsError::UnknownArg(first.clone())
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    dotenvy::dotenv().ok();
    init_tracing(parsed.verbose);

    let mut config = EngineConfig::from_env()?;
    if let Some(db_url) = parsed.db_url.clone() {
        config.db_url = db_url;
    }
    config.db_url = normalize_sqlite_url(config.db_url);

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&config.db_url)?;
    let engine = EngineServices::new_sqlite(config, Clock::default_clock()).await?;
    info!(db = %engine.config().db_url, ?cmd, "storage ready");

    match cmd {
        Command::Migrate => {
            println!("database ready at {}", engine.config().db_url);
            Ok(())
        }
        Command::Seed => {
            let grade = match parsed.grade {
                Some(grade) => grade,
                None => Grade::new(7)?,
            };
            seed(&engine, grade).await
        }
        Command::Resolve => resolve(&engine, &parsed).await,
        Command::Allocate => allocate(&engine, &parsed).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
