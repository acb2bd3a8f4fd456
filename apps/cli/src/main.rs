use clap::Parser;
use librarian_cli::exit_error::EXIT_FAILURE;
use librarian_cli::{run, Cli, ClientError, ExitError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "librarian_cli=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    librarian_shared_config::load_dotenv();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        std::process::exit(report(&err));
    }
}

/// Print an error and pick the exit code
fn report(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        if !exit.message.is_empty() {
            eprintln!("Error: {}", exit.message);
        }
        return exit.code;
    }
    if let Some(ClientError::Http { status, body }) = err.downcast_ref::<ClientError>() {
        eprintln!("Error: HTTP {}: {}", status, body);
        return EXIT_FAILURE;
    }
    eprintln!("Error: {:#}", err);
    EXIT_FAILURE
}
