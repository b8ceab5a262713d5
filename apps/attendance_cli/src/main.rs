use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    AttendanceSessionController, ClientContext, ControllerOptions, DeniedLocation, FixedLocation,
    GeolocationProvider, NoticeLevel, RosterSnapshot, Session, SessionEvent, SessionPhase,
};
use shared::domain::{AttendanceStatus, ClassId, ScheduleId, ScheduleRef, StudentId, SubjectId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "attendance-cli", about = "Run QR attendance sessions against the school backend")]
struct Args {
    /// Config file; defaults to ./attendance.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and print the landing route for the account's role.
    Login,
    /// Open a QR attendance session for a scheduled class period.
    Start {
        #[arg(long)]
        schedule_id: String,
        #[arg(long)]
        class_id: String,
        #[arg(long)]
        subject_id: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
        /// Write the QR image (PNG) here.
        #[arg(long)]
        qr_out: Option<PathBuf>,
        #[arg(long)]
        watch: bool,
    },
    /// Re-attach to the session the backend reports as active.
    Resume {
        #[arg(long)]
        watch: bool,
    },
    /// Print the roster of the active session.
    Roster,
    /// Set a student's status by hand.
    Override {
        #[arg(long)]
        student_id: String,
        #[arg(long, value_parser = parse_status)]
        status: AttendanceStatus,
    },
}

fn parse_status(raw: &str) -> Result<AttendanceStatus, String> {
    raw.parse().map_err(|err| format!("{err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let settings = load_settings(args.config.as_deref())?;

    let api_url = args
        .api_url
        .clone()
        .unwrap_or_else(|| settings.api_base_url.clone());
    let context = Arc::new(ClientContext::with_timeout(&api_url, settings.http_timeout())?);
    authenticate(&context, &args, &settings).await?;
    if matches!(args.command, Command::Login) {
        return Ok(());
    }

    let controller = AttendanceSessionController::new(
        context.clone(),
        ControllerOptions {
            refresh_interval: settings.refresh_interval(),
            geolocation_timeout: settings.geolocation_timeout(),
        },
    );

    match args.command {
        Command::Login => {}
        Command::Start {
            schedule_id,
            class_id,
            subject_id,
            lat,
            lon,
            qr_out,
            watch,
        } => {
            let schedule = ScheduleRef {
                schedule_id: ScheduleId::new(schedule_id),
                class_id: ClassId::new(class_id),
                subject_id: SubjectId::new(subject_id),
            };
            let latitude = lat.or(settings.default_latitude);
            let longitude = lon.or(settings.default_longitude);
            let geolocation: Box<dyn GeolocationProvider> = match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => {
                    Box::new(FixedLocation::new(latitude, longitude))
                }
                _ => Box::new(DeniedLocation),
            };

            let session = controller
                .start_session(&schedule, geolocation.as_ref())
                .await?;
            print_session(&session);
            if let Some(path) = qr_out {
                write_qr(&session, &path).await?;
            }
            run_view(&controller, watch).await;
        }
        Command::Resume { watch } => {
            let Some(session) = controller.resume_session().await? else {
                println!("No active attendance session.");
                return Ok(());
            };
            print_session(&session);
            run_view(&controller, watch).await;
        }
        Command::Roster => {
            require_session(&controller).await?;
            print_roster(&controller.roster().await);
        }
        Command::Override { student_id, status } => {
            require_session(&controller).await?;
            let snapshot = controller
                .override_status(&StudentId::new(student_id), status)
                .await?;
            print_roster(&snapshot);
        }
    }

    controller.shutdown();
    Ok(())
}

async fn authenticate(context: &ClientContext, args: &Args, settings: &Settings) -> Result<()> {
    if let Some(token) = args.token.as_ref().or(settings.token.as_ref()) {
        context.set_token(token.clone()).await?;
        return Ok(());
    }

    match (&args.email, &args.password) {
        (Some(email), Some(password)) => {
            let outcome = context.login(email, password).await?;
            info!(
                "auth: signed in as {} ({:?})",
                outcome.user.nama.as_deref().unwrap_or(outcome.user.id.as_str()),
                outcome.user.role
            );
            println!("Signed in. Landing route: {}", outcome.route);
            Ok(())
        }
        _ => bail!("provide --token (or ATTENDANCE_TOKEN) or --email with --password"),
    }
}

async fn require_session(controller: &Arc<AttendanceSessionController>) -> Result<Session> {
    controller
        .resume_session()
        .await?
        .context("no active attendance session")
}

async fn write_qr(session: &Session, path: &Path) -> Result<()> {
    let Some(png) = session.qr_png()? else {
        warn!("attendance: backend sent no QR image for code={}", session.code);
        return Ok(());
    };
    tokio::fs::write(path, png)
        .await
        .with_context(|| format!("failed to write QR image to '{}'", path.display()))?;
    println!("QR image written to {}", path.display());
    Ok(())
}

/// Prints the roster once, or follows it until expiry / Ctrl-C when `watch` is set.
async fn run_view(controller: &Arc<AttendanceSessionController>, watch: bool) {
    if !watch {
        print_roster(&controller.roster().await);
        return;
    }

    let mut events = controller.subscribe_events();
    print_roster(&controller.roster().await);
    if watch_events(&mut events, tokio::signal::ctrl_c()).await == WatchExit::Stopped {
        println!("Stopping.");
    }

    controller.end_session().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchExit {
    Expired,
    SignedOut,
    Stopped,
    Closed,
}

/// Prints session events until the session expires, the backend signs us out,
/// or `stop` resolves.
async fn watch_events<F: Future>(
    events: &mut broadcast::Receiver<SessionEvent>,
    stop: F,
) -> WatchExit {
    tokio::pin!(stop);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::RosterUpdated(snapshot)) => print_roster(&snapshot),
                Ok(SessionEvent::PhaseChanged { phase: SessionPhase::Expired, .. }) => {
                    println!("Session expired.");
                    return WatchExit::Expired;
                }
                Ok(SessionEvent::PhaseChanged { .. }) => {}
                Ok(SessionEvent::Notice(notice)) => match notice.level {
                    NoticeLevel::Info => println!("note: {}", notice.message),
                    NoticeLevel::Error => eprintln!("error: {}", notice.message),
                },
                Ok(SessionEvent::LoginRequired { route }) => {
                    eprintln!("Signed out by the backend; sign in again ({route}).");
                    return WatchExit::SignedOut;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("attendance: view skipped {skipped} events");
                }
                Err(RecvError::Closed) => return WatchExit::Closed,
            },
            _ = &mut stop => return WatchExit::Stopped,
        }
    }
}

fn print_session(session: &Session) {
    let remaining = session.remaining_at(Utc::now()).as_secs();
    println!(
        "Session {} for schedule {} (class {}, subject {})",
        session.code, session.schedule_id, session.class_id, session.subject_id
    );
    println!(
        "Expires at {} ({}m{:02}s left)",
        session.expires_at,
        remaining / 60,
        remaining % 60
    );
}

fn print_roster(snapshot: &RosterSnapshot) {
    let counts = snapshot.counts;
    println!(
        "present={} excused={} sick={} absent={} total={}",
        counts.present,
        counts.excused,
        counts.sick,
        counts.absent,
        counts.total()
    );
    for entry in &snapshot.entries {
        let check_in = entry
            .check_in_time
            .map(|time| time.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<8} {}",
            entry.student_name.as_deref().unwrap_or(entry.student_id.as_str()),
            entry.status,
            check_in
        );
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
