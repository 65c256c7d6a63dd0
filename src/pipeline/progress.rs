//! Stage progress reporting

use serde::Serialize;
use std::fmt;

/// Pipeline stage a progress report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Parsing,
    Transforming,
    Estimating,
    Refining,
    Redistributing,
    SecondPass,
    Encoding,
    Done,
}

impl Stage {
    /// Percent range this stage spans: (start, end)
    pub fn span(self) -> (f32, f32) {
        match self {
            Stage::Parsing => (0.0, 5.0),
            Stage::Transforming => (5.0, 15.0),
            Stage::Estimating => (15.0, 40.0),
            Stage::Refining => (40.0, 80.0),
            Stage::Redistributing => (80.0, 85.0),
            Stage::SecondPass => (85.0, 90.0),
            Stage::Encoding => (90.0, 95.0),
            Stage::Done => (100.0, 100.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::Transforming => "transforming",
            Stage::Estimating => "estimating masks",
            Stage::Refining => "refining",
            Stage::Redistributing => "redistributing",
            Stage::SecondPass => "second pass",
            Stage::Encoding => "encoding",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One progress report
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub stage: Stage,
    /// Overall completion, 0 to 100
    pub percent: f32,
}

/// Emits monotonically non-decreasing progress through a callback
pub struct ProgressTracker<'a> {
    sink: &'a mut dyn FnMut(Progress),
    last: f32,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a mut dyn FnMut(Progress)) -> Self {
        Self { sink, last: 0.0 }
    }

    /// Report reaching the end of a stage
    pub fn complete(&mut self, stage: Stage) {
        self.emit(stage, stage.span().1);
    }

    /// Report `done` of `total` steps within a stage
    pub fn step(&mut self, stage: Stage, done: usize, total: usize) {
        let (start, end) = stage.span();
        let fraction = if total == 0 {
            1.0
        } else {
            done.min(total) as f32 / total as f32
        };
        self.emit(stage, start + (end - start) * fraction);
    }

    fn emit(&mut self, stage: Stage, percent: f32) {
        let percent = percent.clamp(self.last, 100.0);
        self.last = percent;
        (self.sink)(Progress { stage, percent });
    }

    /// Last reported percentage
    pub fn percent(&self) -> f32 {
        self.last
    }
}
