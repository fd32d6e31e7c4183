//! Game state and authoritative tick loop

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::physics::{
    bounce_paddles, bounce_walls, reset_ball, scoring_side, Ball, Direction, Field, PaddleDims,
    PaddleSide, Score, Team, BALL_RADIUS, INITIAL_BALL_DX,
};

/// Receives state changes produced by running games
pub trait GameEventSink: Send + Sync {
    /// Called once per tick with the post-collision ball
    fn ball_moved(&self, game_id: &str, ball: &Ball);

    /// Called once per point, after the ball has been re-served
    fn scored(&self, game_id: &str, score: Score, scorer: Team);
}

/// Engine errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Game already initialized")]
    AlreadyInitialized,

    #[error("Game has not been initialized")]
    NotInitialized,

    #[error("Field and paddle dimensions must be positive")]
    InvalidDimensions,
}

/// Timing knobs for running games
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub tick_period: Duration,
    /// Pause after a point so clients can show the score
    pub score_cooldown: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(32),
            score_cooldown: Duration::from_secs(3),
        }
    }
}

/// Mutable simulation state, guarded by the game's lock
struct GameState {
    field: Field,
    paddle: PaddleDims,
    ball: Ball,
    left: PaddleSide,
    right: PaddleSide,
    score: Score,
    initialized: bool,
    running: bool,
    last_scorer: Option<Team>,
    tick: u64,
    rng: ChaCha8Rng,
}

impl GameState {
    fn new(seed: u64) -> Self {
        Self {
            field: Field::default(),
            paddle: PaddleDims::default(),
            ball: Ball::default(),
            left: PaddleSide::default(),
            right: PaddleSide::default(),
            score: Score::default(),
            initialized: false,
            running: false,
            last_scorer: None,
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn side_mut(&mut self, team: Team) -> &mut PaddleSide {
        match team {
            Team::Left => &mut self.left,
            Team::Right => &mut self.right,
        }
    }
}

/// Point-in-time copy of a game
#[derive(Debug, Clone, Serialize)]
pub struct GameSnapshot {
    pub ball: Ball,
    pub field: Field,
    pub left_paddle: f64,
    pub right_paddle: f64,
    pub left_players: u32,
    pub right_players: u32,
    pub score: Score,
    pub initialized: bool,
    pub running: bool,
    pub last_scorer: Option<Team>,
    pub tick: u64,
}

/// Result of a single simulation step
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    pub ball: Ball,
    pub scored: Option<(Score, Team)>,
}

struct Ticker {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// One authoritative match
pub struct Game {
    pub id: String,
    state: Mutex<GameState>,
    ticker: Mutex<Option<Ticker>>,
}

impl Game {
    fn new(id: String, seed: u64) -> Self {
        Self {
            id,
            state: Mutex::new(GameState::new(seed)),
            ticker: Mutex::new(None),
        }
    }

    /// Size the field and serve the first ball. Only the first call counts.
    pub fn initialize(
        &self,
        width: f64,
        height: f64,
        paddle_width: f64,
        paddle_height: f64,
    ) -> Result<(), EngineError> {
        if !(width > 0.0 && height > 0.0 && paddle_width > 0.0 && paddle_height > 0.0) {
            return Err(EngineError::InvalidDimensions);
        }

        let mut state = self.state.lock();
        if state.initialized {
            return Err(EngineError::AlreadyInitialized);
        }

        state.field = Field { width, height };
        state.paddle = PaddleDims {
            width: paddle_width,
            height: paddle_height,
        };
        state.ball = Ball {
            x: width / 2.0,
            y: height / 2.0,
            dx: INITIAL_BALL_DX,
            dy: 0.0,
            radius: BALL_RADIUS,
            visible: true,
        };

        let center = (height / 2.0 - paddle_height / 2.0).max(0.0);
        state.left.position = center;
        state.right.position = center;
        state.initialized = true;

        info!(game_id = %self.id, width, height, "Game initialized");
        Ok(())
    }

    /// Apply one paddle input and return (left, right) positions
    pub fn move_paddle(&self, team: Team, direction: Direction) -> (f64, f64) {
        let mut state = self.state.lock();
        if state.initialized {
            let paddle_height = state.paddle.height;
            let field_height = state.field.height;
            state
                .side_mut(team)
                .apply_input(direction, paddle_height, field_height);
        }
        (state.left.position, state.right.position)
    }

    pub fn add_player(&self, team: Team) {
        self.state.lock().side_mut(team).players += 1;
    }

    pub fn remove_player(&self, team: Team) {
        let mut state = self.state.lock();
        let side = state.side_mut(team);
        side.players = side.players.saturating_sub(1);
    }

    pub fn player_count(&self) -> u32 {
        let state = self.state.lock();
        state.left.players + state.right.players
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn paddles(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.left.position, state.right.position)
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let state = self.state.lock();
        GameSnapshot {
            ball: state.ball,
            field: state.field,
            left_paddle: state.left.position,
            right_paddle: state.right.position,
            left_players: state.left.players,
            right_players: state.right.players,
            score: state.score,
            initialized: state.initialized,
            running: state.running,
            last_scorer: state.last_scorer,
            tick: state.tick,
        }
    }

    /// Advance the simulation by one tick.
    ///
    /// Scoring and the re-serve happen under the same lock, so a crossing can
    /// only ever count once.
    pub fn step(&self) -> TickOutcome {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;

        state.ball.x += state.ball.dx;
        state.ball.y += state.ball.dy;

        bounce_walls(&mut state.ball, &state.field);
        bounce_paddles(
            &mut state.ball,
            &state.field,
            &state.paddle,
            state.left.position,
            state.right.position,
            &mut state.rng,
        );

        let ball = state.ball;

        let scored = scoring_side(&state.ball, &state.field).map(|scorer| {
            match scorer {
                Team::Left => state.score.left += 1,
                Team::Right => state.score.right += 1,
            }
            reset_ball(&mut state.ball, &state.field, scorer, &mut state.rng);
            state.ball.visible = false;
            state.last_scorer = Some(scorer);

            info!(
                game_id = %self.id,
                scorer = %scorer,
                left = state.score.left,
                right = state.score.right,
                "Point scored"
            );
            (state.score, scorer)
        });

        TickOutcome { ball, scored }
    }

    fn show_ball(&self) {
        self.state.lock().ball.visible = true;
    }

    /// Signal the tick task to exit. Returns its handle if one was running.
    fn stop(&self) -> Option<JoinHandle<()>> {
        // same lock order as start_ticking: ticker, then state
        let mut slot = self.ticker.lock();
        self.state.lock().running = false;
        slot.take().map(|ticker| {
            let _ = ticker.stop_tx.send(true);
            ticker.task
        })
    }
}

/// Registry of all games, keyed by room id (or "lobby")
pub struct GameEngine {
    games: DashMap<String, Arc<Game>>,
    sink: Arc<dyn GameEventSink>,
    settings: EngineSettings,
}

impl GameEngine {
    pub fn new(sink: Arc<dyn GameEventSink>, settings: EngineSettings) -> Self {
        Self {
            games: DashMap::new(),
            sink,
            settings,
        }
    }

    /// Create a game, or hand back the existing one with that id
    pub fn create_game(&self, id: &str) -> Arc<Game> {
        self.games
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(game_id = %id, "Game created");
                Arc::new(Game::new(id.to_string(), rand::random()))
            })
            .value()
            .clone()
    }

    pub fn get_game(&self, id: &str) -> Option<Arc<Game>> {
        self.games.get(id).map(|g| g.value().clone())
    }

    fn game(&self, id: &str) -> Result<Arc<Game>, EngineError> {
        self.get_game(id)
            .ok_or_else(|| EngineError::GameNotFound(id.to_string()))
    }

    /// Stop the game's loop (if any) and forget it
    pub fn remove_game(&self, id: &str) -> Option<Arc<Game>> {
        let (_, game) = self.games.remove(id)?;
        game.stop();
        info!(game_id = %id, "Game removed");
        Some(game)
    }

    pub fn initialize(
        &self,
        id: &str,
        width: f64,
        height: f64,
        paddle_width: f64,
        paddle_height: f64,
    ) -> Result<(), EngineError> {
        self.game(id)?
            .initialize(width, height, paddle_width, paddle_height)
    }

    /// Spawn the tick task. Returns false if it was already running.
    pub fn start_ticking(&self, id: &str) -> Result<bool, EngineError> {
        let game = self.game(id)?;
        if !game.is_initialized() {
            return Err(EngineError::NotInitialized);
        }

        let mut ticker = game.ticker.lock();
        if ticker.as_ref().is_some_and(|t| !t.task.is_finished()) {
            return Ok(false);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        game.state.lock().running = true;
        let task = tokio::spawn(run_ticks(
            game.clone(),
            self.sink.clone(),
            self.settings,
            stop_rx,
        ));
        *ticker = Some(Ticker { stop_tx, task });

        info!(game_id = %id, "Ball updates started");
        Ok(true)
    }

    /// Ask the tick task to exit; never waits for it
    pub fn stop_ticking(&self, id: &str) {
        if let Some(game) = self.get_game(id) {
            if game.stop().is_some() {
                info!(game_id = %id, "Ball updates stopped");
            }
        }
    }

    pub fn move_paddle(
        &self,
        id: &str,
        team: Team,
        direction: Direction,
    ) -> Result<(f64, f64), EngineError> {
        Ok(self.game(id)?.move_paddle(team, direction))
    }

    pub fn add_player(&self, id: &str, team: Team) -> Result<(), EngineError> {
        self.game(id)?.add_player(team);
        Ok(())
    }

    pub fn remove_player(&self, id: &str, team: Team) -> Result<(), EngineError> {
        self.game(id)?.remove_player(team);
        Ok(())
    }

    pub fn snapshot(&self, id: &str) -> Result<GameSnapshot, EngineError> {
        Ok(self.game(id)?.snapshot())
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn running_count(&self) -> usize {
        self.games.iter().filter(|g| g.value().is_running()).count()
    }

    /// Stop every tick task and wait for all of them to finish
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> =
            self.games.iter().filter_map(|g| g.value().stop()).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Game engine stopped");
    }
}

async fn run_ticks(
    game: Arc<Game>,
    sink: Arc<dyn GameEventSink>,
    settings: EngineSettings,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticks = interval(settings.tick_period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticks.tick() => {}
        }

        let outcome = game.step();
        sink.ball_moved(&game.id, &outcome.ball);

        if let Some((score, scorer)) = outcome.scored {
            sink.scored(&game.id, score, scorer);

            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(settings.score_cooldown) => {}
            }
            game.show_ball();
            ticks.reset();
        }
    }

    debug!(game_id = %game.id, "Tick loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Ball(f64, f64),
        Score(Score, Team),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn scores(&self) -> Vec<(Score, Team)> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Score(s, t) => Some((s, t)),
                    _ => None,
                })
                .collect()
        }
    }

    impl GameEventSink for RecordingSink {
        fn ball_moved(&self, _game_id: &str, ball: &Ball) {
            self.events.lock().push(Event::Ball(ball.x, ball.y));
        }

        fn scored(&self, _game_id: &str, score: Score, scorer: Team) {
            self.events.lock().push(Event::Score(score, scorer));
        }
    }

    fn engine() -> (GameEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (GameEngine::new(sink.clone(), EngineSettings::default()), sink)
    }

    fn ready_game(engine: &GameEngine, id: &str) -> Arc<Game> {
        let game = engine.create_game(id);
        engine.initialize(id, 800.0, 600.0, 10.0, 100.0).unwrap();
        game
    }

    #[test]
    fn initialize_centers_ball_and_paddles() {
        let (engine, _) = engine();
        ready_game(&engine, "g");

        let snap = engine.snapshot("g").unwrap();
        assert_eq!((snap.ball.x, snap.ball.y), (400.0, 300.0));
        assert_eq!((snap.ball.dx, snap.ball.dy), (-10.0, 0.0));
        assert_eq!(snap.ball.radius, BALL_RADIUS);
        assert_eq!((snap.left_paddle, snap.right_paddle), (250.0, 250.0));
        assert!(snap.initialized);
        assert!(!snap.running);
    }

    #[test]
    fn second_initialize_does_not_reset() {
        let (engine, _) = engine();
        let game = ready_game(&engine, "g");
        game.add_player(Team::Left);
        game.move_paddle(Team::Left, Direction::Down);

        assert_eq!(
            engine.initialize("g", 1000.0, 1000.0, 10.0, 100.0),
            Err(EngineError::AlreadyInitialized)
        );
        let snap = game.snapshot();
        assert_eq!(snap.field.width, 800.0);
        assert_eq!(snap.left_paddle, 252.0);
    }

    #[test]
    fn initialize_rejects_empty_viewport() {
        let (engine, _) = engine();
        engine.create_game("g");
        assert_eq!(
            engine.initialize("g", 0.0, 600.0, 10.0, 100.0),
            Err(EngineError::InvalidDimensions)
        );
        assert!(!engine.get_game("g").unwrap().is_initialized());
    }

    #[test]
    fn create_game_is_idempotent() {
        let (engine, _) = engine();
        let first = engine.create_game("room");
        first.add_player(Team::Left);
        let second = engine.create_game("room");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.player_count(), 1);
        assert_eq!(engine.game_count(), 1);
    }

    #[test]
    fn unknown_game_is_an_error() {
        let (engine, _) = engine();
        assert_eq!(
            engine.move_paddle("nope", Team::Left, Direction::Up),
            Err(EngineError::GameNotFound("nope".to_string()))
        );
        assert!(engine.remove_game("nope").is_none());
    }

    #[test]
    fn moving_one_side_leaves_the_other_alone() {
        let (engine, _) = engine();
        let game = ready_game(&engine, "g");
        game.add_player(Team::Left);
        game.add_player(Team::Right);

        let (left, right) = engine.move_paddle("g", Team::Right, Direction::Up).unwrap();
        assert_eq!(left, 250.0);
        assert_eq!(right, 248.0);
    }

    #[test]
    fn uninitialized_paddles_do_not_move() {
        let (engine, _) = engine();
        let game = engine.create_game("g");
        game.add_player(Team::Left);
        assert_eq!(game.move_paddle(Team::Left, Direction::Down), (0.0, 0.0));
    }

    #[test]
    fn player_counts_never_go_negative() {
        let (engine, _) = engine();
        let game = engine.create_game("g");
        engine.remove_player("g", Team::Right).unwrap();
        game.add_player(Team::Right);
        game.remove_player(Team::Right);
        game.remove_player(Team::Right);
        assert_eq!(game.snapshot().right_players, 0);
    }

    #[test]
    fn ball_past_left_edge_scores_for_right_once() {
        let (engine, _) = engine();
        let game = ready_game(&engine, "g");
        {
            let mut state = game.state.lock();
            state.left.position = 0.0;
            state.ball = Ball {
                x: 5.0,
                y: 300.0,
                dx: -10.0,
                dy: 0.0,
                radius: 8.0,
                visible: true,
            };
        }

        let outcome = game.step();
        assert_eq!(outcome.ball.x, -5.0);
        let (score, scorer) = outcome.scored.expect("right side should score");
        assert_eq!(scorer, Team::Right);
        assert_eq!(score, Score { left: 0, right: 1 });

        let snap = game.snapshot();
        assert_eq!((snap.ball.x, snap.ball.y), (400.0, 300.0));
        assert_eq!(snap.ball.dx, 10.0);
        assert!(!snap.ball.visible);
        assert_eq!(snap.last_scorer, Some(Team::Right));

        assert!(game.step().scored.is_none());
        assert_eq!(game.snapshot().score, Score { left: 0, right: 1 });
    }

    #[test]
    fn scores_only_ever_increase() {
        let (engine, _) = engine();
        let game = ready_game(&engine, "g");
        game.add_player(Team::Left);
        game.add_player(Team::Right);

        let mut last = Score::default();
        let mut points = 0;
        for tick in 0..20_000u32 {
            if tick % 7 == 0 {
                let direction = if tick % 3 == 0 { Direction::Up } else { Direction::Down };
                game.move_paddle(Team::Left, direction);
                game.move_paddle(Team::Right, Direction::Idle);
            }
            let outcome = game.step();
            let score = game.snapshot().score;
            assert!(score.left >= last.left && score.right >= last.right);
            assert!(score.left + score.right - last.left - last.right <= 1);
            if outcome.scored.is_some() {
                points += 1;
            }
            last = score;
        }
        assert_eq!(points, last.left + last.right);
    }

    #[test]
    fn step_keeps_ball_inside_vertically_bounded_band() {
        let (engine, _) = engine();
        let game = ready_game(&engine, "g");
        game.state.lock().ball.dy = 7.0;
        for _ in 0..1_000 {
            let outcome = game.step();
            assert!(outcome.ball.y > -20.0 && outcome.ball.y < 620.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_emits_ball_updates_until_stopped() {
        let (engine, sink) = engine();
        ready_game(&engine, "g");

        assert_eq!(engine.start_ticking("g"), Ok(true));
        assert_eq!(engine.start_ticking("g"), Ok(false));
        assert!(engine.snapshot("g").unwrap().running);
        assert_eq!(engine.running_count(), 1);

        tokio::time::sleep(Duration::from_millis(32 * 5 + 10)).await;
        let seen = sink.events().len();
        assert!(seen >= 5, "expected ball updates, saw {seen}");

        engine.stop_ticking("g");
        engine.stop_ticking("g");
        assert!(!engine.snapshot("g").unwrap().running);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.events().len(), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_reports_running() {
        let (engine, sink) = engine();
        ready_game(&engine, "g");

        for _ in 0..3 {
            assert_eq!(engine.start_ticking("g"), Ok(true));
            engine.stop_ticking("g");
        }
        assert_eq!(engine.start_ticking("g"), Ok(true));
        assert!(engine.snapshot("g").unwrap().running);
        assert_eq!(engine.running_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!sink.events().is_empty());
        engine.shutdown().await;
        assert_eq!(engine.running_count(), 0);
    }

    #[tokio::test]
    async fn uninitialized_game_refuses_to_tick() {
        let (engine, _) = engine();
        engine.create_game("g");
        assert_eq!(engine.start_ticking("g"), Err(EngineError::NotInitialized));
    }

    #[tokio::test(start_paused = true)]
    async fn score_pauses_the_loop_for_the_cooldown() {
        let (engine, sink) = engine();
        let game = ready_game(&engine, "g");
        game.state.lock().left.position = 0.0;
        game.state.lock().ball.x = 5.0;

        engine.start_ticking("g").unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sink.scores(), vec![(Score { left: 0, right: 1 }, Team::Right)]);
        let after_score = sink.events().len();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.events().len(), after_score);
        assert!(!game.snapshot().ball.visible);

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(sink.events().len() > after_score);
        assert!(game.snapshot().ball.visible);

        engine.shutdown().await;
        assert!(!game.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_running_game_stops_its_loop() {
        let (engine, sink) = engine();
        ready_game(&engine, "a");
        ready_game(&engine, "b");
        engine.start_ticking("a").unwrap();
        engine.start_ticking("b").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let removed = engine.remove_game("a").unwrap();
        assert!(!removed.is_running());
        assert!(engine.get_game("a").is_none());
        assert_eq!(engine.running_count(), 1);

        let before = sink.events().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.events().len() > before);
        engine.shutdown().await;
    }
}
