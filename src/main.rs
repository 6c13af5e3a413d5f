use anyhow::Context;
use carelens::{
    api,
    config::Config,
    feedback::{AgeValue, FeedbackRequest},
    logging,
    service::{InsightApi, InsightService},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Document question answering and patient feedback risk analysis.
#[derive(Parser)]
#[command(name = "carelens", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Synchronise the watched directories once and print the report.
    Sync,
    /// Answer a question from the indexed documents.
    Ask {
        /// Question text.
        question: String,
    },
    /// Analyze one piece of patient feedback.
    Analyze {
        /// Feedback text.
        text: String,
        /// Rating from 1 to 5.
        #[arg(long)]
        rating: Option<i64>,
        /// Wait time in minutes.
        #[arg(long = "wait-time")]
        wait_time: Option<f64>,
        /// Resolution time in minutes.
        #[arg(long = "resolution-time")]
        resolution_time: Option<f64>,
        /// Department name.
        #[arg(long)]
        department: Option<String>,
        /// Patient age in years or an age-group label.
        #[arg(long)]
        age: Option<String>,
        /// Patient identifier.
        #[arg(long = "patient-id")]
        patient_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let service = Arc::new(
        InsightService::from_config(&config).context("failed to initialise the service")?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service, config.server_port).await,
        Command::Sync => print_json(&service.reload().await?),
        Command::Ask { question } => print_json(&service.answer(&question).await?),
        Command::Analyze {
            text,
            rating,
            wait_time,
            resolution_time,
            department,
            age,
            patient_id,
        } => {
            let request = FeedbackRequest {
                feedback_text: Some(text),
                patient_age: age.map(parse_age),
                department,
                wait_time_min: wait_time,
                resolution_time_min: resolution_time,
                rating,
                patient_id,
                ..FeedbackRequest::default()
            };
            print_json(&service.analyze_feedback(request).await?)
        }
    }
}

async fn serve(service: Arc<InsightService>, port: Option<u16>) -> anyhow::Result<()> {
    let background = Arc::clone(&service);
    tokio::spawn(async move {
        if let Err(error) = background.reload().await {
            tracing::warn!(error = %error, "Startup sync failed");
        }
    });

    let app = api::create_router(service);
    let (listener, port) = bind_listener(port)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn parse_age(raw: String) -> AgeValue {
    match raw.trim().parse::<u32>() {
        Ok(years) => AgeValue::Years(years),
        Err(_) => AgeValue::Label(raw),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 5000..=5099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 5000-5099",
    ))
}
