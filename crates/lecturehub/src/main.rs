use anyhow::Context;
use clap::{Parser, Subcommand};
use lecturehub::capture::{CaptureSession, FileCamera};
use lecturehub::chat::ChatSession;
use lecturehub::config::LectureHubConfig;
use lecturehub::realtime::RealtimeSubscription;
use lecturehub::schedule::{FormMessage, LectureScheduler, ScheduleForm};
use lecturehub::sync::{CourseSync, RefreshSource};
use lecturehub::types::{Role, Session};
use lecturehub::{ApiClient, InferenceClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lecture platform client")]
struct Args {
    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a lecture chat, optionally posting one message first
    Chat {
        lecture_id: String,

        #[arg(long)]
        sender: String,

        #[arg(short, long)]
        message: Option<String>,
    },
    /// Watch a course's ongoing and upcoming lectures
    Watch { course_id: String },
    /// Schedule a lecture as a teacher
    Schedule {
        #[arg(long)]
        user: String,

        #[arg(long)]
        course: String,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Local date and time, e.g. 2025-06-01T10:00
        #[arg(long)]
        at: String,
    },
    /// Replay a media file as the webcam and upload clips for inference
    Capture { media_file: PathBuf },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<LectureHubConfig> {
    let mut config = match path {
        Some(path) => LectureHubConfig::load_from_file(path)?,
        None => LectureHubConfig::default(),
    };
    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Chat {
            lecture_id,
            sender,
            message,
        } => run_chat(&config, lecture_id, sender, message).await,
        Command::Watch { course_id } => run_watch(&config, course_id).await,
        Command::Schedule {
            user,
            course,
            title,
            description,
            at,
        } => {
            let api = Arc::new(ApiClient::new(&config.endpoints, &config.http)?);
            let scheduler = LectureScheduler::new(api, &config.schedule, &config.endpoints)?;
            let session = Session {
                user_id: Some(user),
                role: Role::Teacher,
                loading: false,
            };
            let mut form = ScheduleForm::new(title, description, at);
            let ok = scheduler.submit(&session, Some(&course), &mut form).await;
            match form.message {
                Some(FormMessage::Success(text)) => println!("{}", text),
                Some(FormMessage::Error(text)) => eprintln!("{}", text),
                None => {}
            }
            if !ok {
                anyhow::bail!("Lecture was not scheduled");
            }
            Ok(())
        }
        Command::Capture { media_file } => {
            let uploader = Arc::new(InferenceClient::new(&config.endpoints, &config.http)?);
            let camera = FileCamera::new(&media_file);
            let session = CaptureSession::start(&camera, uploader, &config.capture)
                .await
                .with_context(|| format!("Failed to open {}", media_file.display()))?;

            wait_for_shutdown().await;
            let status = session.status();
            session.shutdown().await;
            info!(
                cycles = status.cycle,
                uploaded = status.clips_uploaded,
                failed = status.uploads_failed,
                skipped = status.clips_skipped,
                "Capture finished"
            );
            Ok(())
        }
    }
}

async fn run_chat(
    config: &LectureHubConfig,
    lecture_id: String,
    sender: String,
    message: Option<String>,
) -> anyhow::Result<()> {
    let api = Arc::new(ApiClient::new(&config.endpoints, &config.http)?);
    let chat = ChatSession::start(api, lecture_id, &config.chat);

    if let Some(text) = message {
        chat.send_message(&sender, &text)
            .await
            .context("Failed to send message")?;
    }

    let mut updates = chat.subscribe();
    let mut printed = 0;
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if view.messages.len() < printed {
                    printed = 0;
                }
                for msg in &view.messages[printed..] {
                    println!("[{}] {}: {}", msg.id, msg.sender_id, msg.message);
                }
                printed = view.messages.len();
            }
        }
    }

    chat.shutdown().await;
    Ok(())
}

async fn run_watch(config: &LectureHubConfig, course_id: String) -> anyhow::Result<()> {
    let api = Arc::new(ApiClient::new(&config.endpoints, &config.http)?);

    let mut subscription = None;
    let source = match &config.endpoints.realtime_url {
        Some(url) => {
            let (tx, rx) = mpsc::channel(32);
            match RealtimeSubscription::connect(
                url,
                config.endpoints.realtime_api_key.as_deref(),
                &course_id,
                tx,
            )
            .await
            {
                Ok(sub) => {
                    subscription = Some(sub);
                    RefreshSource::Realtime(rx)
                }
                Err(e) => {
                    warn!(error = %e, "Realtime unavailable, polling instead");
                    RefreshSource::Poll(config.sync.fallback_poll_interval())
                }
            }
        }
        None => RefreshSource::Poll(config.sync.fallback_poll_interval()),
    };

    let sync = CourseSync::start(api, course_id, source, &config.sync);
    let mut updates = sync.subscribe();
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                if view.ongoing.loading || view.upcoming.loading {
                    continue;
                }
                let title = view
                    .course
                    .data
                    .as_ref()
                    .map(|c| c.title.as_str())
                    .unwrap_or(view.course_id.as_str());
                println!("== {} ==", title);
                for lecture in &view.ongoing.data {
                    println!("  LIVE  {} ({})", lecture.title, lecture.scheduled_at);
                }
                for lecture in &view.upcoming.data {
                    println!("  NEXT  {} ({})", lecture.title, lecture.scheduled_at);
                }
                for error in [&view.course.error, &view.ongoing.error, &view.upcoming.error]
                    .into_iter()
                    .flatten()
                {
                    eprintln!("  ! {}", error);
                }
            }
        }
    }

    if let Some(sub) = subscription {
        sub.unsubscribe().await;
    }
    sync.shutdown().await;
    Ok(())
}
