use dotenvy::dotenv;
use reel_relay::acquire::backends;
use reel_relay::acquire::session::SessionRefresh;
use reel_relay::bot::handlers::{self, Admins, Command};
use reel_relay::cache::{CacheStore, MemoryStore, SqliteStore};
use reel_relay::config::Settings;
use reel_relay::{Coordinator, PipelineContext};
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Entries kept by the in-memory cache store
const MEMORY_CACHE_CAPACITY: u64 = 10_000;

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    session: Regex,
    csrf: Regex,
    password: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            session: Regex::new(r"(sessionid[=\s:]+)[^\s;&]+")?,
            csrf: Regex::new(r"(csrftoken[=\s:]+)[^\s;&]+")?,
            password: Regex::new(r#"("--password",\s*")[^"]*"#)?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token1
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .token2
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self.session.replace_all(&output, "${1}[MASKED]").to_string();
        output = self.csrf.replace_all(&output, "${1}[MASKED]").to_string();
        output = self
            .password
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full even if the redacted
        // text has a different length.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Compiled before logging starts so nothing is written unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting Reel Relay bot...");

    let settings = init_settings();

    if std::env::args().nth(1).as_deref() == Some("refresh-session") {
        return refresh_session(&settings).await;
    }

    let bot = Bot::new(settings.telegram_token.clone());

    let bot_username = match bot.get_me().await {
        Ok(me) => me.user.username.clone(),
        Err(e) => {
            warn!("Failed to fetch bot profile, captions will have no footer: {e}");
            None
        }
    };

    let coordinator = init_coordinator(&settings, bot_username);
    let admins = Arc::new(Admins(settings.admin_ids()));
    info!("Admins configured: {}", admins.0.len());

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![coordinator, admins])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Logs in once and shares the session with yt-dlp, then exits
async fn refresh_session(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let refresh = SessionRefresh::from_settings(settings)?;
    let cookies = refresh.run().await?;
    info!(
        cookies,
        path = %refresh.cookies_file().display(),
        "Session refreshed"
    );
    Ok(())
}

fn init_store(settings: &Settings) -> Arc<dyn CacheStore> {
    let Some(path) = &settings.cache_path else {
        info!("No cache path configured, using in-memory cache.");
        return Arc::new(MemoryStore::new(MEMORY_CACHE_CAPACITY));
    };
    match SqliteStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open cache database {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_coordinator(settings: &Settings, bot_username: Option<String>) -> Arc<Coordinator> {
    let backends = match backends::build(settings) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to configure extraction backends: {}", e);
            std::process::exit(1);
        }
    };
    let store = init_store(settings);
    let config = settings.to_pipeline_config(bot_username);

    info!(
        "Pipeline: workers={}, timeout={:?}, workspace={}",
        config.worker_pool_size,
        config.request_timeout,
        config.workspace_root.display()
    );

    let ctx = PipelineContext::new(backends, store, config);
    info!("Backends in order: {:?}", ctx.backend_names());
    Arc::new(Coordinator::new(Arc::new(ctx)))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
) -> Result<(), teloxide::RequestError> {
    handlers::log_handler_error("Command", handlers::handle_command(bot, msg, cmd).await);
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    coordinator: Arc<Coordinator>,
    admins: Arc<Admins>,
) -> Result<(), teloxide::RequestError> {
    // downloads run off the update loop
    tokio::spawn(async move {
        handlers::log_handler_error(
            "Text handler",
            handlers::handle_text(bot, msg, coordinator, admins).await,
        );
    });
    respond(())
}
