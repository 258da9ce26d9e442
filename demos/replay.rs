//! Replay a recorded agent run in the terminal.
//!
//! Usage:
//!   cargo run --example replay -- --dir ./runs --run run-42
//!   cargo run --example replay -- --dir ./runs --run run-42 --play --speed 4
//!   RUST_LOG=nexus_progress=debug cargo run --example replay -- --dir ./runs --run run-42
//!
//! Reads `<dir>/<run>.jsonl` (or `.json`), prints the folded stages, and with
//! `--play` steps through the timeline with its original pacing.

use clap::Parser;
use nexus_progress::group::effective_status;
use nexus_progress::{
    Channel, FileEventSource, PlaybackSpeed, ProgressConfig, ProgressTracker, ReplayMode,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replay", about = "Replay a recorded agent run")]
struct Cli {
    /// Directory holding event logs
    #[arg(long, default_value = ".")]
    dir: String,

    /// Run id (file stem of the event log)
    #[arg(long)]
    run: String,

    /// Step through the timeline after printing the summary
    #[arg(long)]
    play: bool,

    /// Playback speed: 1, 2 or 4
    #[arg(long, default_value_t = 1)]
    speed: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let speed = PlaybackSpeed::try_from(cli.speed).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(2);
    });
    let config = ProgressConfig::default()
        .with_mode(ReplayMode::Historical)
        .with_speed(speed);

    let source = FileEventSource::new(&cli.dir);
    let tracker = match ProgressTracker::from_source(&source, &cli.run, config).await {
        Ok(tracker) => tracker,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let snapshot = tracker.snapshot();
    let durations = tracker.durations();
    for group in &snapshot.groups {
        let elapsed = durations
            .elapsed_opt(group.start_time, group.end_time)
            .map(|d| format!(" ({}s)", d.num_seconds()))
            .unwrap_or_default();
        let status = effective_status(&group.stage, tracker.config().mode);
        println!("[{}] {}{}", status.as_str(), group.stage.label, elapsed);
        for tool in &group.tools {
            println!("    {} x{}", tool.display_name, tool.count);
        }
        for detail in group.stage.details.iter().filter(|d| !d.kind.is_tool_like()) {
            println!("    - {}", detail.text);
        }
    }
    let summary = snapshot.summary;
    println!(
        "\n{}/{} stages, {} tool calls{}",
        summary.completed,
        summary.total,
        summary.total_tools,
        if summary.has_error { ", with errors" } else { "" }
    );

    if !cli.play {
        return;
    }

    let controller = tracker.playback();
    let mut frames = controller.subscribe();
    if !controller.play() {
        println!("nothing to replay");
        return;
    }

    let timeline = tracker.timeline().snapshot();
    let per_channel: Vec<_> = Channel::ALL
        .iter()
        .map(|c| format!("{} {}", timeline.channel_len(*c), channel_name(Some(*c))))
        .collect();
    println!(
        "\nreplaying {} steps ({}) at {speed}",
        timeline.total_steps(),
        per_channel.join(", ")
    );
    while frames.changed().await.is_ok() {
        let frame = *frames.borrow_and_update();
        if frame.step > 0 {
            let view = timeline.view(frame.step, false);
            let line = match frame.channel {
                Some(Channel::Terminal) => view.terminal.last().map(|l| l.text.clone()),
                Some(Channel::Plan) => view
                    .plan
                    .last()
                    .map(|p| format!("{} {}", p.status.as_str(), p.name)),
                Some(Channel::Browser) => view
                    .browser
                    .map(|b| format!("{} {}", b.action, b.description)),
                Some(Channel::File) => view.file.map(|f| format!("{} {}", f.operation, f.path)),
                None => None,
            };
            if let Some(line) = line {
                let channel = channel_name(frame.channel);
                println!("{:>4}/{} {channel:<8} {line}", frame.step, frame.total);
            }
        }
        if !frame.playing {
            break;
        }
    }
}

fn channel_name(channel: Option<Channel>) -> &'static str {
    match channel {
        Some(Channel::Terminal) => "terminal",
        Some(Channel::Plan) => "plan",
        Some(Channel::Browser) => "browser",
        Some(Channel::File) => "file",
        None => "",
    }
}
