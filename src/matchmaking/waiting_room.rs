//! Pre-game countdown for a room

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, info};

/// Reason sent to clients when the countdown runs out short-handed
pub const NOT_ENOUGH_PLAYERS: &str = "not enough players";

/// Receives waiting-room transitions. Called without any waiting-room lock held.
pub trait RoomLifecycle: Send + Sync {
    /// Periodic countdown update while the room is still waiting
    fn waiting_room_tick(&self, update: &WaitingRoomUpdate);

    fn game_started(&self, room_id: &str);

    /// Countdown ran out below the minimum player count
    fn room_expired(&self, room_id: &str, reason: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct WaitingRoomSettings {
    pub duration: Duration,
    pub update_period: Duration,
    pub min_players: u32,
}

impl Default for WaitingRoomSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(90),
            update_period: Duration::from_millis(1000),
            min_players: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingPhase {
    Active,
    GameStarted,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitingRoomUpdate {
    pub room_id: String,
    pub max_players: u32,
    pub current_players: u32,
    pub time_left: u32,
    pub is_active: bool,
}

struct WaitingInner {
    current_players: u32,
    time_left: u32,
    phase: WaitingPhase,
}

/// Countdown state for one room. `GameStarted` and `Closed` are terminal.
pub struct WaitingRoom {
    pub room_id: String,
    pub max_players: u32,
    min_players: u32,
    deadline: Instant,
    inner: Mutex<WaitingInner>,
    cancel_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WaitingRoom {
    fn new(room_id: String, max_players: u32, current_players: u32, settings: &WaitingRoomSettings) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            room_id,
            max_players,
            min_players: settings.min_players,
            deadline: Instant::now() + settings.duration,
            inner: Mutex::new(WaitingInner {
                current_players,
                time_left: settings.duration.as_secs() as u32,
                phase: WaitingPhase::Active,
            }),
            cancel_tx,
            task: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> WaitingPhase {
        self.inner.lock().phase
    }

    pub fn current_players(&self) -> u32 {
        self.inner.lock().current_players
    }

    pub fn update(&self) -> WaitingRoomUpdate {
        let inner = self.inner.lock();
        WaitingRoomUpdate {
            room_id: self.room_id.clone(),
            max_players: self.max_players,
            current_players: inner.current_players,
            time_left: inner.time_left,
            is_active: inner.phase == WaitingPhase::Active,
        }
    }

    pub fn player_joined(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == WaitingPhase::Active {
            inner.current_players += 1;
        }
    }

    /// Floors at zero; never forces a transition by itself
    pub fn player_left(&self) {
        let mut inner = self.inner.lock();
        if inner.phase == WaitingPhase::Active {
            inner.current_players = inner.current_players.saturating_sub(1);
        }
    }

    /// Stop the countdown without a decision. Safe to call repeatedly.
    pub fn cancel(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.phase == WaitingPhase::Active {
                inner.phase = WaitingPhase::Closed;
            }
        }
        self.cancel_tx.send_replace(true);
    }

    /// Wait for the driving task to exit
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn ready_to_start(&self, current_players: u32) -> bool {
        current_players >= self.min_players
    }

    /// Periodic check: start early once the room is full
    fn on_tick(&self) -> Step {
        let mut inner = self.inner.lock();
        if inner.phase != WaitingPhase::Active {
            return Step::Cancelled;
        }

        inner.time_left = self
            .deadline
            .saturating_duration_since(Instant::now())
            .as_secs() as u32;

        if inner.current_players >= self.max_players && self.ready_to_start(inner.current_players) {
            inner.phase = WaitingPhase::GameStarted;
            return Step::Finished(inner.phase);
        }
        Step::Continue
    }

    /// Deadline reached: start with whoever is here, or give up
    fn on_deadline(&self) -> Step {
        let mut inner = self.inner.lock();
        if inner.phase != WaitingPhase::Active {
            return Step::Cancelled;
        }

        inner.time_left = 0;
        inner.phase = if self.ready_to_start(inner.current_players) {
            WaitingPhase::GameStarted
        } else {
            WaitingPhase::Closed
        };
        Step::Finished(inner.phase)
    }
}

enum Step {
    Continue,
    Finished(WaitingPhase),
    /// Someone else ended the countdown
    Cancelled,
}

/// Create the countdown, register it and spawn its driving task
pub(crate) fn spawn(
    registry: Arc<DashMap<String, Arc<WaitingRoom>>>,
    room_id: String,
    max_players: u32,
    current_players: u32,
    settings: WaitingRoomSettings,
    lifecycle: Arc<dyn RoomLifecycle>,
) -> Arc<WaitingRoom> {
    let waiting = Arc::new(WaitingRoom::new(room_id.clone(), max_players, current_players, &settings));
    if let Some(previous) = registry.insert(room_id.clone(), waiting.clone()) {
        previous.cancel();
    }

    let task = tokio::spawn(run(
        waiting.clone(),
        registry,
        lifecycle,
        settings.update_period,
    ));
    *waiting.task.lock() = Some(task);

    info!(room_id = %room_id, max_players, "Waiting room started");
    waiting
}

async fn run(
    waiting: Arc<WaitingRoom>,
    registry: Arc<DashMap<String, Arc<WaitingRoom>>>,
    lifecycle: Arc<dyn RoomLifecycle>,
    update_period: Duration,
) {
    let mut cancel_rx = waiting.cancel_tx.subscribe();
    let mut ticks = interval(update_period);
    let deadline = sleep_until(waiting.deadline);
    tokio::pin!(deadline);

    let outcome = loop {
        if *cancel_rx.borrow_and_update() {
            break Step::Cancelled;
        }

        let step = tokio::select! {
            biased;
            _ = cancel_rx.changed() => Step::Cancelled,
            _ = &mut deadline => waiting.on_deadline(),
            _ = ticks.tick() => waiting.on_tick(),
        };

        match step {
            Step::Continue => lifecycle.waiting_room_tick(&waiting.update()),
            done => break done,
        }
    };

    registry.remove_if(&waiting.room_id, |_, current| Arc::ptr_eq(current, &waiting));

    match outcome {
        Step::Finished(WaitingPhase::GameStarted) => {
            info!(
                room_id = %waiting.room_id,
                players = waiting.current_players(),
                "Waiting room finished, starting game"
            );
            lifecycle.game_started(&waiting.room_id);
        }
        Step::Finished(_) => {
            info!(room_id = %waiting.room_id, "Waiting room timed out");
            lifecycle.room_expired(&waiting.room_id, NOT_ENOUGH_PLAYERS);
        }
        Step::Continue | Step::Cancelled => {
            debug!(room_id = %waiting.room_id, "Waiting room cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        ticks: Mutex<Vec<WaitingRoomUpdate>>,
        started: Mutex<Vec<String>>,
        expired: Mutex<Vec<(String, String)>>,
    }

    impl RoomLifecycle for Recorder {
        fn waiting_room_tick(&self, update: &WaitingRoomUpdate) {
            self.ticks.lock().push(update.clone());
        }

        fn game_started(&self, room_id: &str) {
            self.started.lock().push(room_id.to_string());
        }

        fn room_expired(&self, room_id: &str, reason: &str) {
            self.expired
                .lock()
                .push((room_id.to_string(), reason.to_string()));
        }
    }

    fn start(
        max_players: u32,
        current_players: u32,
    ) -> (
        Arc<DashMap<String, Arc<WaitingRoom>>>,
        Arc<Recorder>,
        Arc<WaitingRoom>,
    ) {
        let registry = Arc::new(DashMap::new());
        let recorder = Arc::new(Recorder::default());
        let waiting = spawn(
            registry.clone(),
            "room01".to_string(),
            max_players,
            current_players,
            WaitingRoomSettings::default(),
            recorder.clone(),
        );
        (registry, recorder, waiting)
    }

    #[tokio::test(start_paused = true)]
    async fn lone_host_times_out_and_closes() {
        let (registry, recorder, waiting) = start(2, 1);

        tokio::time::sleep(Duration::from_secs(89)).await;
        assert_eq!(waiting.phase(), WaitingPhase::Active);
        assert!(registry.contains_key("room01"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        waiting.join().await;

        assert_eq!(waiting.phase(), WaitingPhase::Closed);
        assert!(registry.is_empty());
        assert!(recorder.started.lock().is_empty());
        assert_eq!(
            *recorder.expired.lock(),
            vec![("room01".to_string(), NOT_ENOUGH_PLAYERS.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_room_starts_before_deadline() {
        let (registry, recorder, waiting) = start(2, 1);
        waiting.player_joined();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        waiting.join().await;

        assert_eq!(waiting.phase(), WaitingPhase::GameStarted);
        assert_eq!(*recorder.started.lock(), vec!["room01".to_string()]);
        assert!(recorder.expired.lock().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_starts_game_with_minimum_players() {
        let (_registry, recorder, waiting) = start(4, 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        waiting.player_joined();

        tokio::time::sleep(Duration::from_secs(85)).await;
        waiting.join().await;
        assert_eq!(waiting.phase(), WaitingPhase::GameStarted);
        assert_eq!(recorder.started.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_updates_report_time_left() {
        let (_registry, recorder, waiting) = start(3, 1);
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let ticks = recorder.ticks.lock().clone();
        assert_eq!(ticks.len(), 4);
        assert_eq!(ticks[0].time_left, 90);
        assert_eq!(ticks[3].time_left, 87);
        assert!(ticks.iter().all(|t| t.is_active && t.max_players == 3));

        waiting.cancel();
        waiting.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_floors_at_zero_without_transition() {
        let (_registry, recorder, waiting) = start(2, 1);
        waiting.player_left();
        waiting.player_left();
        assert_eq!(waiting.current_players(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(waiting.phase(), WaitingPhase::Active);
        assert!(recorder.expired.lock().is_empty());

        waiting.cancel();
        waiting.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_silent() {
        let (registry, recorder, waiting) = start(2, 1);
        waiting.cancel();
        waiting.cancel();
        waiting.join().await;

        assert_eq!(waiting.phase(), WaitingPhase::Closed);
        assert!(registry.is_empty());
        assert!(recorder.started.lock().is_empty());
        assert!(recorder.expired.lock().is_empty());

        // late joins after a terminal state are ignored
        waiting.player_joined();
        assert_eq!(waiting.current_players(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_arrival_pattern_ends_in_one_terminal_state() {
        for max_players in 1..=4u32 {
            for joins in 0..=4u32 {
                for gap_secs in [0u64, 20, 40] {
                    let (registry, recorder, waiting) = start(max_players, 1);
                    for _ in 0..joins {
                        tokio::time::sleep(Duration::from_secs(gap_secs)).await;
                        waiting.player_joined();
                    }
                    tokio::time::sleep(Duration::from_secs(120)).await;
                    waiting.join().await;

                    let started = recorder.started.lock().len();
                    let expired = recorder.expired.lock().len();
                    assert_eq!(started + expired, 1, "max={max_players} joins={joins} gap={gap_secs}");
                    assert_ne!(waiting.phase(), WaitingPhase::Active);
                    assert!(registry.is_empty());
                }
            }
        }
    }
}
