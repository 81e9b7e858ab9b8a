//! Relevance ranking for one viewer.
//!
//! Three signals, each in [0,1]:
//! - `distance` : exp(-0.05 · km), only when both sides have coordinates
//! - `time`     : exp(-0.01 · hours until start) ahead, 0.5 while running, 0 once over
//! - `newness`  : 1 for events still flagged new
//!
//! score = 0.6·distance + 0.3·time + 0.1·newness

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geo::GeoPoint;
use crate::ingest::types::Event;

pub const DISTANCE_DECAY_PER_KM: f64 = 0.05;
pub const TIME_DECAY_PER_HOUR: f64 = 0.01;
pub const ONGOING_TIME_SCORE: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Weights {
    pub w_distance: f64,
    pub w_time: f64,
    pub w_newness: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            w_distance: 0.6,
            w_time: 0.3,
            w_newness: 0.1,
        }
    }
}

/// Frame of reference for one ranking request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewerContext {
    pub location: GeoPoint,
    pub now: DateTime<Utc>,
}

impl ViewerContext {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self::at(GeoPoint::new(latitude, longitude), Utc::now())
    }

    pub fn at(location: GeoPoint, now: DateTime<Utc>) -> Self {
        Self { location, now }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Signals {
    pub distance: f64,
    pub time: f64,
    pub newness: f64,
}

impl Signals {
    pub fn of(ctx: &ViewerContext, event: &Event) -> Self {
        Self {
            distance: distance_score(&ctx.location, &event.position()),
            time: time_score(ctx.now, event),
            newness: newness_score(event),
        }
    }

    pub fn combine(&self, w: &Weights) -> f64 {
        self.distance * w.w_distance + self.time * w.w_time + self.newness * w.w_newness
    }
}

pub fn distance_score(viewer: &GeoPoint, event: &GeoPoint) -> f64 {
    if !viewer.is_known() || !event.is_known() {
        return 0.0;
    }
    (-DISTANCE_DECAY_PER_KM * viewer.distance_km(event)).exp()
}

pub fn time_score(now: DateTime<Utc>, event: &Event) -> f64 {
    if event.date_start > now {
        let hours = (event.date_start - now).num_milliseconds() as f64 / 3_600_000.0;
        (-TIME_DECAY_PER_HOUR * hours).exp()
    } else if event.date_end > now {
        ONGOING_TIME_SCORE
    } else {
        0.0
    }
}

pub fn newness_score(event: &Event) -> f64 {
    if event.is_new {
        1.0
    } else {
        0.0
    }
}

/// Pure: identical inputs give bit-identical output.
pub fn score(ctx: &ViewerContext, event: &Event) -> f64 {
    Signals::of(ctx, event).combine(&Weights::default())
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredEvent {
    #[serde(flatten)]
    pub event: Event,
    pub score: f64,
}

/// Scores in input order.
pub fn score_all(ctx: &ViewerContext, events: Vec<Event>) -> Vec<ScoredEvent> {
    events
        .into_iter()
        .map(|event| ScoredEvent {
            score: score(ctx, &event),
            event,
        })
        .collect()
}

/// Highest score first; equal scores keep their input order.
pub fn recommend(ctx: &ViewerContext, events: Vec<Event>) -> Vec<Event> {
    let mut scored = score_all(ctx, events);
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.into_iter().map(|s| s.event).collect()
}
