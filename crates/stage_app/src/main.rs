mod bounds;
mod collision;
mod config;
mod engine;
mod events;
mod session;
mod stage;
mod swap;
mod tracker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use collision::CollisionDetector;
use config::{apply_script_reload, load_stage_from_path, StageFile, StageWatcher};
use engine::{RunOutcome, SpriteEngine};
use events::{EventSink, StageEvent};
use session::{load_session_from_path, Session, SessionRunner};
use stage::Stage;
use swap::SwapCoordinator;
use tracker::PositionTracker;

const STAGE_PATH: &str = "assets/stage.json";
const WATCH_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on waiting for collision swaps to play out after the last run.
const MAX_SETTLE: Duration = Duration::from_secs(60);

fn usage() -> String {
    "Usage: cargo run -p stage_app -- [stage_json] [session_json]\nExample: cargo run -p stage_app -- assets/stage.json assets/session.json".to_string()
}

fn main() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Block stage starting...");

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 3 {
        return Err(usage());
    }
    let stage_path = PathBuf::from(args.get(1).map(String::as_str).unwrap_or(STAGE_PATH));
    let stage_file = if stage_path.exists() {
        load_stage_from_path(&stage_path)?
    } else {
        log::warn!(
            "Stage file '{}' not found; using the built-in roster",
            stage_path.display()
        );
        StageFile::default()
    };
    let session = match args.get(2) {
        Some(path) => Some(load_session_from_path(&PathBuf::from(path))?),
        None => None,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| format!("Failed to build async runtime: {e}"))?;
    runtime.block_on(run_stage(stage_path, stage_file, session));

    log::info!("Block stage finished");
    Ok(())
}

async fn run_stage(stage_path: PathBuf, file: StageFile, session: Option<Session>) {
    let timing = file.timing;
    let (events, receiver) = EventSink::channel();
    tokio::spawn(drain_events(receiver));

    let tracker_wake = Arc::new(Notify::new());
    let roster = file.roster();
    let stage = Stage::new(roster.clone(), timing, tracker_wake.clone());
    for sprite in &roster {
        stage.register_engine(
            sprite.id,
            SpriteEngine::new(sprite.id, sprite.kind, file.stage, timing, events.clone()),
        );
    }
    log::info!(
        "Stage {}x{} with {} sprite(s), {} displayed",
        file.stage.width,
        file.stage.height,
        roster.len(),
        stage.displayed_ids().len()
    );

    let coordinator = SwapCoordinator::new(stage.clone(), timing, events.clone());
    let detector = Arc::new(CollisionDetector::new(
        file.collision_tolerance,
        timing,
        file.swap,
        coordinator,
        events,
        tracker_wake.clone(),
    ));
    let tracker = Arc::new(PositionTracker::new(
        stage.clone(),
        detector.clone(),
        tracker_wake,
        timing,
    ));
    tokio::spawn(tracker.clone().run());
    tokio::spawn(watch_stage_file(stage_path, stage.clone()));

    let runs = match session {
        Some(session) => {
            SessionRunner::new(stage.clone(), detector.clone(), tracker.clone())
                .run(&session)
                .await
        }
        None => stage.global_play(),
    };
    await_runs(runs).await;
    settle(&stage, timing.swap_settle() + timing.poll_interval()).await;

    let coordinates = tracker.latest_snapshot();
    log::info!("Collision indicator at exit: {:?}", detector.colliding());
    // Teardown: every engine leaves the registry and any stray run is cancelled.
    for sprite in stage.sprites() {
        let Some(engine) = stage.deregister_engine(sprite.id) else {
            continue;
        };
        let state = engine.snapshot();
        log::info!(
            "{} ({}, {}): {} block(s), at ({}, {}) rotation {}, tracked {:?}",
            sprite.name,
            engine.kind(),
            if sprite.displayed { "shown" } else { "hidden" },
            sprite.script.len(),
            state.position.x,
            state.position.y,
            state.rotation,
            coordinates.get(&sprite.id)
        );
    }
}

async fn await_runs(runs: Vec<JoinHandle<Option<RunOutcome>>>) {
    for run in runs {
        match run.await {
            Ok(Some(outcome)) => log::debug!("Run ended: {outcome:?}"),
            Ok(None) => log::debug!("Run was never started"),
            Err(err) => log::error!("Run task failed: {err}"),
        }
    }
}

/// Wait until no engine has been running for two consecutive checks.
///
/// A swap leaves both engines idle for the settle delay before restarting
/// them, so a single idle reading is not enough.
async fn settle(stage: &Stage, check_every: Duration) {
    let started = tokio::time::Instant::now();
    let mut idle_checks = 0;
    while idle_checks < 2 {
        if started.elapsed() > MAX_SETTLE {
            log::warn!("Stage still busy after {} s; stopping", MAX_SETTLE.as_secs());
            return;
        }
        tokio::time::sleep(check_every).await;
        let busy = stage
            .displayed_ids()
            .into_iter()
            .filter_map(|id| stage.engine(id))
            .any(|engine| engine.is_running());
        idle_checks = if busy { 0 } else { idle_checks + 1 };
    }
}

async fn watch_stage_file(stage_path: PathBuf, stage: Stage) {
    let mut watcher = StageWatcher::new(stage_path);
    let mut interval = tokio::time::interval(WATCH_INTERVAL);
    loop {
        interval.tick().await;
        if !watcher.should_reload() {
            continue;
        }
        match load_stage_from_path(watcher.path()) {
            Ok(file) => {
                let replaced = apply_script_reload(&stage, &file);
                log::info!(
                    "Stage scripts reloaded (file changed): {replaced} script(s) from {}",
                    watcher.path().display()
                );
            }
            Err(err) => log::error!("Stage reload failed (file changed): {err}"),
        }
    }
}

async fn drain_events(mut receiver: tokio::sync::mpsc::UnboundedReceiver<StageEvent>) {
    while let Some(event) = receiver.recv().await {
        match event {
            StageEvent::Transform {
                sprite,
                position,
                rotation,
            } => log::debug!(
                "Sprite {sprite} -> ({}, {}) rotation {rotation}",
                position.x,
                position.y
            ),
            StageEvent::Message { sprite, bubble } => match bubble {
                Some(bubble) => log::info!("Sprite {sprite} {:?}: {}", bubble.style, bubble.text),
                None => log::debug!("Sprite {sprite} bubble cleared"),
            },
            StageEvent::Colliding(ids) if ids.is_empty() => log::debug!("Collision indicator cleared"),
            StageEvent::Colliding(ids) => log::info!("Colliding: {ids:?}"),
            StageEvent::Notice { text, duration } => {
                log::info!("Notice ({} ms): {text}", duration.as_millis())
            }
            StageEvent::NoticeCleared => log::debug!("Notice cleared"),
        }
    }
}
