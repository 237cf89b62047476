use dotenvy::dotenv;
use image_relay::bot::{handle_message, TelegramSink};
use image_relay::config::Settings;
use image_relay::llm::LlmBot;
use image_relay::pairing::PairingStore;
use image_relay::plugin::ImageUploader;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    api_key: Regex,
    authorization: Regex,
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
            api_key: Regex::new(r"sk-[A-Za-z0-9_-]{16,}")?,
            authorization: Regex::new(r#"(?i)("?authorization"?\s*[:=]\s*"?)[^\s",}]+"#)?,
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
        output = self.api_key.replace_all(&output, "[API_KEY]").to_string();
        output = self
            .authorization
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
        // Report the original length even though the redacted text differs
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

    // Redaction must be ready before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting image relay...");

    let settings = init_settings();

    let Some(token) = settings.telegram_token.clone().filter(|t| !t.is_empty()) else {
        error!("TELEGRAM_TOKEN is not set");
        std::process::exit(1);
    };
    let bot = Bot::new(token);

    let Some(llm_bot) = LlmBot::from_settings(&settings) else {
        error!("LLM_API_KEY is not set, downstream bot unavailable");
        std::process::exit(1);
    };
    info!(model = %settings.llm_model, "Downstream bot initialized.");

    let store = Arc::new(PairingStore::new(settings.pending_ttl()));
    let uploader = match ImageUploader::from_settings(
        &settings,
        Arc::clone(&store),
        Arc::new(llm_bot),
        Arc::new(TelegramSink::new(bot.clone())),
    ) {
        Ok(u) => Arc::new(u),
        Err(e) => {
            error!(error = %e, "Image uploader failed to activate");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    if settings.pending_ttl().is_some() {
        spawn_sweeper(Arc::clone(&store), &settings, shutdown.clone());
    }

    info!("Bot is running...");

    let handler = Update::filter_message().endpoint(handle_update);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![uploader])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    shutdown.cancel();
    info!("Image relay stopped.");
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

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn spawn_sweeper(store: Arc<PairingStore>, settings: &Settings, shutdown: CancellationToken) {
    let period = settings.pending_sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = store.purge_expired().await;
                    if removed > 0 {
                        info!(removed, "Purged expired pending entries");
                    } else {
                        debug!("No expired pending entries");
                    }
                }
            }
        }
    });
}

async fn handle_update(
    bot: Bot,
    msg: Message,
    uploader: Arc<ImageUploader>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handle_message(bot, msg, uploader).await {
        error!("Message handler error: {}", e);
    }
    respond(())
}
