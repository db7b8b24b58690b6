use std::sync::Arc;

use inbox_triage::config::InboxConfig;
use inbox_triage::error::{ConfigError, Result};
use inbox_triage::llm::create_provider;
use inbox_triage::mail::ImapMailbox;
use inbox_triage::pipeline::{Classifier, Pipeline};
use inbox_triage::server::refresh_routes;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = InboxConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!(
            "  export EMAIL_USER=you@example.com EMAIL_PASS=... IMAP_SERVER=imap.example.com"
        );
        std::process::exit(1);
    });

    let mut args = std::env::args().skip(1);
    let command = args.next();

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {}@{}:{}/{}",
        config.imap.username, config.imap.host, config.imap.port, config.imap.mailbox
    );
    eprintln!(
        "   Model: {} ({:?} at {})",
        config.llm.model, config.llm.backend, config.llm.base_url
    );
    eprintln!(
        "   Classify: {} concurrent, {}s timeout",
        config.pipeline.concurrency,
        config.classifier.timeout.as_secs()
    );

    let llm = create_provider(&config.llm);
    let classifier = Arc::new(Classifier::new(llm, &config.classifier));
    let mailbox = Arc::new(ImapMailbox::new(config.imap.clone()));
    let pipeline = Arc::new(Pipeline::new(mailbox, classifier, &config.pipeline));

    match command.as_deref() {
        // One-shot: print a single snapshot and exit.
        Some("scan") => {
            let limit = match args.next() {
                Some(raw) => raw.parse::<usize>().map_err(|e| ConfigError::InvalidValue {
                    key: "limit".into(),
                    message: format!("'{raw}': {e}"),
                })?,
                None => config.pipeline.fetch_limit,
            };
            let snapshot = pipeline.run(limit).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None | Some("serve") => {
            eprintln!("   Refresh API: POST http://0.0.0.0:{}/api/refresh\n", config.http_port);

            let app = refresh_routes(pipeline, &config.pipeline);
            let listener =
                tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
            tracing::info!(port = config.http_port, "Refresh server started");
            axum::serve(listener, app).await?;
        }
        Some(other) => {
            eprintln!("Error: unknown command '{other}'");
            eprintln!("  usage: inbox-triage [serve | scan [limit]]");
            std::process::exit(2);
        }
    }

    Ok(())
}
