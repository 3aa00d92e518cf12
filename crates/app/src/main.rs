use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use services::api::{LoginIn, RegisterIn, TopicMode};
use services::{
    AggregateOrder, ApiClient, ApiConfig, AuthSession, BookService, FetchOutcome,
    LeaderboardService, ResyncCoordinator, RuntimePhase, SessionLauncher, SessionOutcome,
    SessionPlan, SessionRuntime, SubmitOutcome, sessions::format_clock, spawn_countdown,
};
use storage::{BlobStore, JsonFileStore, ScopedStore};
use studypact_core::Clock;
use studypact_core::model::{Book, BookId, SessionRecord, SessionTone, TopicId};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => {
                write!(f, "invalid {flag} value: {raw}")
            }
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- register --email <email> --password <pw> [--name <name>]");
    eprintln!("  cargo run -p app -- login    --email <email> --password <pw>");
    eprintln!("  cargo run -p app -- logout");
    eprintln!("  cargo run -p app -- books");
    eprintln!("  cargo run -p app -- upload   --title <title> (--file <path> | --text <path>) [--authors <names>]");
    eprintln!("  cargo run -p app -- topics   --book <book_id> [--mode rag|rule]");
    eprintln!("  cargo run -p app -- run      --topic <topic_id> [--minutes <n>] [--questions <n>] [--tone neutral|mean]");
    eprintln!("  cargo run -p app -- history");
    eprintln!("  cargo run -p app -- standings [--limit <n>] [--order best|total]");
    eprintln!("  cargo run -p app -- reset    (clear the signed-in user's local data)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  STUDYPACT_API_URL (default http://localhost:8000)");
    eprintln!("  STUDYPACT_DATA_DIR (default .studypact)");
}

/// Shared services behind the command handlers.
struct AppContext {
    auth: Arc<AuthSession>,
    api: Arc<ApiClient>,
    books: Arc<ScopedStore<Book>>,
    sessions: Arc<ScopedStore<SessionRecord>>,
    _coordinator: ResyncCoordinator,
}

impl AppContext {
    async fn build() -> Result<Self, Box<dyn std::error::Error>> {
        let data_dir =
            std::env::var("STUDYPACT_DATA_DIR").unwrap_or_else(|_| ".studypact".into());
        let blobs: Arc<dyn BlobStore> = Arc::new(JsonFileStore::new(data_dir));
        let clock = Clock::default_clock();

        let auth = Arc::new(AuthSession::load(Arc::clone(&blobs), clock).await?);
        let books: Arc<ScopedStore<Book>> =
            Arc::new(ScopedStore::load("books", Arc::clone(&blobs)).await?);
        let sessions: Arc<ScopedStore<SessionRecord>> =
            Arc::new(ScopedStore::load("sessions", Arc::clone(&blobs)).await?);

        // Views derive from the rehydrated identity before any command reads.
        let coordinator = ResyncCoordinator::start(
            &auth,
            vec![
                Arc::clone(&books) as _,
                Arc::clone(&sessions) as _,
            ],
        );

        let api = Arc::new(ApiClient::new(&ApiConfig::from_env(), Arc::clone(&auth))?);

        Ok(Self {
            auth,
            api,
            books,
            sessions,
            _coordinator: coordinator,
        })
    }

    fn book_service(&self) -> BookService {
        BookService::new(
            Clock::default_clock(),
            Arc::clone(&self.api) as _,
            Arc::clone(&self.books),
        )
    }

    fn launcher(&self) -> SessionLauncher {
        SessionLauncher::new(
            Clock::default_clock(),
            Arc::clone(&self.api) as _,
            Arc::clone(&self.sessions),
        )
    }

    fn require_auth(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.auth.is_authenticated() {
            Ok(())
        } else {
            Err("not signed in (or the token has expired); run `login` first".into())
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let Some(command) = argv.next() else {
        print_usage();
        return Ok(());
    };
    if command == "--help" || command == "-h" {
        print_usage();
        return Ok(());
    }

    let context = AppContext::build().await?;
    match command.as_str() {
        "register" => register(&context, &mut argv).await,
        "login" => login(&context, &mut argv).await,
        "logout" => {
            context.auth.logout().await?;
            println!("Signed out.");
            Ok(())
        }
        "books" => books(&context),
        "upload" => upload(&context, &mut argv).await,
        "topics" => topics(&context, &mut argv).await,
        "run" => run_session_command(&context, &mut argv).await,
        "history" => history(&context),
        "standings" => standings(&context, &mut argv).await,
        "reset" => {
            context.require_auth()?;
            context.books.clear_for_user().await?;
            context.sessions.clear_for_user().await?;
            println!("Cleared this account's local books and session history.");
            Ok(())
        }
        other => {
            eprintln!("unknown subcommand: {other}");
            print_usage();
            Err(ArgsError::UnknownArg(other.to_owned()).into())
        }
    }
}

async fn register(
    context: &AppContext,
    args: &mut impl Iterator<Item = String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut email = None;
    let mut password = None;
    let mut name = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--email" => email = Some(require_value(args, "--email")?),
            "--password" => password = Some(require_value(args, "--password")?),
            "--name" => name = Some(require_value(args, "--name")?),
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }
    let email = email.ok_or(ArgsError::MissingValue { flag: "--email" })?;
    let password = password.ok_or(ArgsError::MissingValue { flag: "--password" })?;

    let out = context
        .api
        .register(&RegisterIn {
            email: email.clone(),
            password: password.clone(),
            display_name: name,
        })
        .await?;
    println!("Registered {} ({}).", email, out.user_id);

    // Straight into a signed-in state, like the web client does.
    let login = context.api.login(&LoginIn { email, password }).await?;
    let identity = context.auth.set_auth(login.token, login.user_id).await?;
    println!(
        "Signed in as {}.",
        identity.display_name.as_deref().unwrap_or("(no name)")
    );
    Ok(())
}

async fn login(
    context: &AppContext,
    args: &mut impl Iterator<Item = String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut email = None;
    let mut password = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--email" => email = Some(require_value(args, "--email")?),
            "--password" => password = Some(require_value(args, "--password")?),
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }
    let email = email.ok_or(ArgsError::MissingValue { flag: "--email" })?;
    let password = password.ok_or(ArgsError::MissingValue { flag: "--password" })?;

    let out = context.api.login(&LoginIn { email, password }).await?;
    let identity = context.auth.set_auth(out.token, out.user_id).await?;
    println!(
        "Signed in as {} <{}>.",
        identity.display_name.as_deref().unwrap_or("(no name)"),
        identity.email.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

fn books(context: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    context.require_auth()?;
    let books = context.books.view();
    if books.is_empty() {
        println!("No books yet. Use `upload` to add one.");
        return Ok(());
    }
    for book in books {
        println!(
            "{}  {} ({} topics, uploaded {})",
            book.book_id,
            book.title,
            book.topics.len(),
            book.uploaded_at.format("%Y-%m-%d")
        );
    }
    Ok(())
}

async fn upload(
    context: &AppContext,
    args: &mut impl Iterator<Item = String>,
) -> Result<(), Box<dyn std::error::Error>> {
    context.require_auth()?;
    let mut title = None;
    let mut file = None;
    let mut text = None;
    let mut authors = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--title" => title = Some(require_value(args, "--title")?),
            "--file" => file = Some(require_value(args, "--file")?),
            "--text" => text = Some(require_value(args, "--text")?),
            "--authors" => authors = Some(require_value(args, "--authors")?),
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }
    let title = title.ok_or(ArgsError::MissingValue { flag: "--title" })?;

    let service = context.book_service();
    let book = match (file, text) {
        (Some(path), None) => {
            let bytes = tokio::fs::read(&path).await?;
            let file_name = std::path::Path::new(&path)
                .file_name()
                .map_or_else(|| path.clone(), |n| n.to_string_lossy().into_owned());
            service.upload_file(title, authors, &file_name, bytes).await?
        }
        (None, Some(path)) => {
            let raw_text = tokio::fs::read_to_string(&path).await?;
            service.ingest_text(title, authors, raw_text).await?
        }
        _ => {
            return Err(ArgsError::InvalidValue {
                flag: "--file/--text",
                raw: "exactly one of --file or --text is required".into(),
            }
            .into());
        }
    };

    println!("Added {}  {}.", book.book_id, book.title);
    println!("Next: `topics --book {}` to generate topics.", book.book_id);
    Ok(())
}

async fn topics(
    context: &AppContext,
    args: &mut impl Iterator<Item = String>,
) -> Result<(), Box<dyn std::error::Error>> {
    context.require_auth()?;
    let mut book_id = None;
    let mut mode = TopicMode::Rag;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--book" => book_id = Some(require_value(args, "--book")?),
            "--mode" => {
                let raw = require_value(args, "--mode")?;
                mode = match raw.as_str() {
                    "rag" => TopicMode::Rag,
                    "rule" => TopicMode::Rule,
                    _ => return Err(ArgsError::InvalidValue { flag: "--mode", raw }.into()),
                };
            }
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }
    let book_id = BookId::new(book_id.ok_or(ArgsError::MissingValue { flag: "--book" })?);

    let service = context.book_service();
    let topics = service.generate_topics(&book_id, mode).await?;
    if topics.is_empty() {
        println!("No topics came back; try `--mode rule`.");
        return Ok(());
    }
    for topic in topics {
        println!("{}  {}", topic.id, topic.title);
    }
    println!("Start a session with `run --topic <topic_id>`.");
    Ok(())
}

fn history(context: &AppContext) -> Result<(), Box<dyn std::error::Error>> {
    context.require_auth()?;
    let sessions = context.sessions.view();
    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }
    for record in sessions {
        let score = record
            .score
            .map_or_else(|| "—".to_owned(), |s| s.to_string());
        let status = if record.is_finished() { "done" } else { "open" };
        println!(
            "{}  {} / {}  {}min  score {score}  [{status}]",
            record.session_id,
            record.topic_title,
            record.book_title,
            record.duration_minutes,
        );
    }
    Ok(())
}

async fn standings(
    context: &AppContext,
    args: &mut impl Iterator<Item = String>,
) -> Result<(), Box<dyn std::error::Error>> {
    context.require_auth()?;
    let mut limit = 10;
    let mut order = AggregateOrder::Best;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--limit" => {
                let raw = require_value(args, "--limit")?;
                limit = raw
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue { flag: "--limit", raw })?;
            }
            "--order" => {
                let raw = require_value(args, "--order")?;
                order = match raw.as_str() {
                    "best" => AggregateOrder::Best,
                    "total" => AggregateOrder::Total,
                    _ => return Err(ArgsError::InvalidValue { flag: "--order", raw }.into()),
                };
            }
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }

    let leaderboard = LeaderboardService::new(Arc::clone(&context.api) as _);
    for (rank, row) in leaderboard.top(limit, order).await?.iter().enumerate() {
        println!(
            "#{:<3} {}  best {}  total {}  over {} sessions",
            rank + 1,
            row.user_id,
            row.best_score,
            row.total_score,
            row.sessions
        );
    }

    if let Some(user_id) = context.auth.user_id() {
        match leaderboard.user_aggregate(&user_id).await {
            Ok(own) => println!(
                "You: best {}  total {}  over {} sessions",
                own.best_score, own.total_score, own.sessions
            ),
            Err(e) => tracing::warn!(error = %e, "could not fetch own standing"),
        }
    }
    Ok(())
}

async fn run_session_command(
    context: &AppContext,
    args: &mut impl Iterator<Item = String>,
) -> Result<(), Box<dyn std::error::Error>> {
    context.require_auth()?;
    let mut topic_id = None;
    let mut minutes = 30;
    let mut questions = 5;
    let mut tone = SessionTone::Neutral;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--topic" => topic_id = Some(require_value(args, "--topic")?),
            "--minutes" => {
                let raw = require_value(args, "--minutes")?;
                minutes = raw
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue { flag: "--minutes", raw })?;
            }
            "--questions" => {
                let raw = require_value(args, "--questions")?;
                questions = raw
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue { flag: "--questions", raw })?;
            }
            "--tone" => {
                let raw = require_value(args, "--tone")?;
                tone = match raw.as_str() {
                    "neutral" => SessionTone::Neutral,
                    "mean" => SessionTone::Mean,
                    _ => return Err(ArgsError::InvalidValue { flag: "--tone", raw }.into()),
                };
            }
            _ => return Err(ArgsError::UnknownArg(arg).into()),
        }
    }
    let topic_id = TopicId::new(topic_id.ok_or(ArgsError::MissingValue { flag: "--topic" })?);

    // Resolve display titles from the cached books.
    let (topic_title, book_title) = context
        .books
        .view()
        .iter()
        .find_map(|book| {
            book.topics
                .iter()
                .find(|t| t.id == topic_id)
                .map(|t| (t.title.clone(), book.title.clone()))
        })
        .unwrap_or_else(|| ("Unknown Topic".to_owned(), "Unknown Book".to_owned()));

    let plan = SessionPlan::new(topic_id, topic_title, book_title)
        .with_tone(tone)
        .with_duration_minutes(minutes)
        .with_question_count(questions);

    println!("Preparing session…");
    let runtime = context.launcher().launch(&plan).await?;
    drive_session(runtime).await
}

/// Interactive loop for one live session.
async fn drive_session(runtime: SessionRuntime) -> Result<(), Box<dyn std::error::Error>> {
    runtime.start();
    let mut timer = spawn_countdown(runtime.clone());
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if let Err(e) = runtime.fetch_next().await {
        eprintln!("Failed to load question: {e}");
    }

    let outcome = loop {
        let snapshot = runtime.snapshot();
        match snapshot.phase {
            RuntimePhase::Ending => {
                // The countdown beat us to it; its task carries the outcome.
                break (&mut timer).await?;
            }
            RuntimePhase::Loading => {
                println!("Loading question… (press enter to retry, or `e` to end)");
                match read_or_expire(&mut input, &mut timer).await? {
                    Input::Expired(outcome) => break outcome,
                    Input::Line(line) if line.trim() == "e" => break end_now(&runtime).await,
                    Input::Line(_) => {
                        if let Err(e) = runtime.fetch_next().await {
                            eprintln!("Failed to load question: {e}");
                        }
                    }
                }
            }
            RuntimePhase::AwaitingAnswer => {
                render_prompt(&snapshot);
                match read_or_expire(&mut input, &mut timer).await? {
                    Input::Expired(outcome) => break outcome,
                    Input::Line(line) => {
                        let choice = line.trim();
                        let result = match choice {
                            "e" => break end_now(&runtime).await,
                            "s" => runtime.submit("", true).await,
                            _ if choice.parse::<usize>().is_ok() => {
                                runtime.submit(choice, false).await
                            }
                            _ => {
                                println!("Answer with a choice number, `s` to skip, `e` to end.");
                                continue;
                            }
                        };
                        match result {
                            Ok(SubmitOutcome::Graded(_)) | Ok(SubmitOutcome::Dropped) => {}
                            Err(e) => eprintln!("Failed to submit. Try again. ({e})"),
                        }
                    }
                }
            }
            RuntimePhase::Graded => {
                render_grade(&snapshot);
                match read_or_expire(&mut input, &mut timer).await? {
                    Input::Expired(outcome) => break outcome,
                    Input::Line(line) if line.trim() == "e" => break end_now(&runtime).await,
                    Input::Line(_) => match runtime.advance().await {
                        Ok(FetchOutcome::Delivered | FetchOutcome::NoMoreQuestions) => {}
                        Ok(FetchOutcome::Dropped) => {}
                        Err(e) => eprintln!("Failed to load question: {e}"),
                    },
                }
            }
            RuntimePhase::Complete => {
                println!(
                    "All questions answered! You answered {}. Press enter to finish.",
                    snapshot.answered
                );
                match read_or_expire(&mut input, &mut timer).await? {
                    Input::Expired(outcome) => break outcome,
                    Input::Line(_) => break end_now(&runtime).await,
                }
            }
        }
    };

    timer.abort();
    match outcome {
        Some(outcome) => print_results(&outcome),
        None => println!("Session ended with nothing to show."),
    }
    Ok(())
}

enum Input {
    Line(String),
    Expired(Option<SessionOutcome>),
}

async fn read_or_expire(
    input: &mut Lines<BufReader<Stdin>>,
    timer: &mut tokio::task::JoinHandle<Option<SessionOutcome>>,
) -> Result<Input, Box<dyn std::error::Error>> {
    tokio::select! {
        line = input.next_line() => Ok(Input::Line(line?.unwrap_or_default())),
        outcome = timer => {
            println!("Time's up!");
            Ok(Input::Expired(outcome?))
        }
    }
}

async fn end_now(runtime: &SessionRuntime) -> Option<SessionOutcome> {
    runtime.end().await
}

fn render_prompt(snapshot: &services::RuntimeSnapshot) {
    let Some(prompt) = &snapshot.prompt else {
        return;
    };
    println!();
    println!(
        "[{}{}]  score {}  mistakes {}  skipped {}{}",
        format_clock(snapshot.seconds_left),
        if snapshot.is_low_time() { " !" } else { "" },
        snapshot.score,
        snapshot.failures,
        snapshot.rejects,
        snapshot
            .remaining
            .map_or_else(String::new, |r| format!("  ({r} left)")),
    );
    if let Some(comment) = &snapshot.mean_comment {
        println!("!! {comment}");
    }
    println!("Q{}: {}", snapshot.answered + 1, prompt.question_text());
    for (index, choice) in prompt.choices.iter().enumerate() {
        println!("  {index}) {choice}");
    }
    println!("Answer with a choice number, `s` to skip, `e` to end:");
}

fn render_grade(snapshot: &services::RuntimeSnapshot) {
    let Some(result) = &snapshot.last_result else {
        return;
    };
    if result.is_rejected() {
        println!("Skipped. ({} skipped so far)", snapshot.rejects);
    } else if result.correct == Some(true) {
        println!("Correct! Score: {}", snapshot.score);
    } else {
        let answer = result.correct_answer.as_deref().unwrap_or("unknown");
        println!("Incorrect — the answer is {answer}. Mistakes: {}", snapshot.failures);
        if let Some(explanation) = &result.explanation {
            println!("   {explanation}");
        }
    }
    if let Some(comment) = &snapshot.mean_comment {
        println!("!! {comment}");
    }
    println!("Press enter for the next question (`e` to end).");
}

fn print_results(outcome: &SessionOutcome) {
    println!();
    println!("─── Session results ───");
    println!("{} / {}", outcome.topic_title, outcome.book_title);
    println!("Score:    {}", outcome.score);
    println!("Answered: {}", outcome.answered);
    println!("Mistakes: {}", outcome.failures);
    println!("Skipped:  {}", outcome.rejects);
    if !outcome.synced {
        println!("(local totals — the server could not confirm the final score)");
    }
    if let Some(aggregate) = &outcome.aggregate {
        println!(
            "Overall: best {}  total {}  over {} sessions",
            aggregate.best_score, aggregate.total_score, aggregate.sessions
        );
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
