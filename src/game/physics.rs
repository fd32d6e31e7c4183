//! Ball and paddle physics

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Ball speed after a score reset
pub const BASE_SPEED: f64 = 10.0;
/// Horizontal ball speed right after `initialize`
pub const INITIAL_BALL_DX: f64 = -10.0;
pub const BALL_RADIUS: f64 = 8.0;
/// Max deflection off a paddle edge (60 degrees)
pub const MAX_BOUNCE_ANGLE: f64 = PI / 3.0;

/// Paddle tuning
pub const MAX_PADDLE_SPEED: f64 = 10.0;
pub const PADDLE_ACCELERATION: f64 = 2.0;
pub const PADDLE_FRICTION: f64 = 0.9;

/// Paddle ownership grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Left,
    Right,
}

impl Team {
    pub fn as_str(self) -> &'static str {
        match self {
            Team::Left => "left",
            Team::Right => "right",
        }
    }

    /// Name used in score announcements
    pub fn display(self) -> &'static str {
        match self {
            Team::Left => "Left",
            Team::Right => "Right",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single paddle input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    /// Anything else: let the paddle coast
    Idle,
}

impl Direction {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "up" => Direction::Up,
            "down" => Direction::Down,
            _ => Direction::Idle,
        }
    }
}

/// Playing field, fixed after initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Field {
    pub width: f64,
    pub height: f64,
}

/// Paddle dimensions reported by the first client
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PaddleDims {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
    pub radius: f64,
    pub visible: bool,
}

impl Ball {
    pub fn speed(&self) -> f64 {
        self.dx.hypot(self.dy)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Score {
    pub left: u32,
    pub right: u32,
}

/// Per-team paddle state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaddleSide {
    pub position: f64,
    pub velocity: f64,
    pub players: u32,
    /// Pending input not yet averaged over `players`
    pub accumulator: f64,
}

impl PaddleSide {
    /// Apply one input event.
    ///
    /// The input's velocity delta is averaged across everyone sharing the side,
    /// so N players each pressing "up" once move the paddle like one press.
    pub fn apply_input(&mut self, direction: Direction, paddle_height: f64, field_height: f64) {
        let delta = match direction {
            Direction::Up => -PADDLE_ACCELERATION,
            Direction::Down => PADDLE_ACCELERATION,
            Direction::Idle => self.velocity * (PADDLE_FRICTION - 1.0),
        };

        self.accumulator += delta;
        if self.players == 0 {
            self.position = 0.0;
            self.velocity = 0.0;
            self.accumulator = 0.0;
            return;
        }

        let averaged = self.accumulator / self.players as f64;
        self.accumulator = 0.0;

        self.velocity = (self.velocity + averaged).clamp(-MAX_PADDLE_SPEED, MAX_PADDLE_SPEED);

        let max_position = (field_height - paddle_height).max(0.0);
        let next = self.position + self.velocity;
        if next < 0.0 {
            self.position = 0.0;
            self.velocity = 0.0;
        } else if next > max_position {
            self.position = max_position;
            self.velocity = 0.0;
        } else {
            self.position = next;
        }
    }
}

/// Reflect off the top and bottom walls
pub fn bounce_walls(ball: &mut Ball, field: &Field) {
    if ball.y - ball.radius <= 0.0 {
        ball.dy = ball.dy.abs();
    } else if ball.y + ball.radius >= field.height {
        ball.dy = -ball.dy.abs();
    }
}

/// Deflect the ball off whichever paddle it overlaps.
///
/// Returns the paddle that was hit.
pub fn bounce_paddles<R: Rng + ?Sized>(
    ball: &mut Ball,
    field: &Field,
    paddle: &PaddleDims,
    left_top: f64,
    right_top: f64,
    rng: &mut R,
) -> Option<Team> {
    let left_face = paddle.width;
    let right_face = field.width - paddle.width;

    if ball.x - ball.radius <= left_face && within(ball.y, left_top, paddle.height) {
        deflect(ball, left_top, paddle.height, 1.0, rng);
        ball.x = left_face + ball.radius;
        return Some(Team::Left);
    }

    if ball.x + ball.radius >= right_face && within(ball.y, right_top, paddle.height) {
        deflect(ball, right_top, paddle.height, -1.0, rng);
        ball.x = right_face - ball.radius;
        return Some(Team::Right);
    }

    None
}

fn within(y: f64, top: f64, height: f64) -> bool {
    y >= top && y <= top + height
}

fn deflect<R: Rng + ?Sized>(ball: &mut Ball, top: f64, height: f64, away: f64, rng: &mut R) {
    let half = height / 2.0;
    let relative = if half > 0.0 {
        ((ball.y - (top + half)) / half).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let angle = relative * MAX_BOUNCE_ANGLE;
    let speed = ball.speed();

    ball.dx = away * (speed * angle.cos()).abs();
    ball.dy = speed * angle.sin() + rng.gen_range(-1.0..=1.0);
}

/// Which side earns a point if the ball has left the field horizontally
pub fn scoring_side(ball: &Ball, field: &Field) -> Option<Team> {
    if ball.x - ball.radius <= 0.0 {
        Some(Team::Right)
    } else if ball.x + ball.radius >= field.width {
        Some(Team::Left)
    } else {
        None
    }
}

/// Serve from the center after a point
pub fn reset_ball<R: Rng + ?Sized>(ball: &mut Ball, field: &Field, scorer: Team, rng: &mut R) {
    let direction = match scorer {
        Team::Right => 1.0,
        Team::Left => -1.0,
    };
    ball.x = field.width / 2.0;
    ball.y = field.height / 2.0;
    ball.dx = direction * BASE_SPEED;
    ball.dy = (rng.gen::<f64>() - 0.5) * 5.0;
}
