//! Color theming for CLI output.
//!
//! One palette shared by `owo_colors` (plain terminal text) and
//! `comfy_table` (status tables). Colors are switched off globally by
//! `--no-color` or `NO_COLOR`, after which every helper returns plain text.

use std::sync::atomic::{AtomicBool, Ordering};

use warmpool::worker::WorkerState;

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally. Call early in `main()`.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic color categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// Idle worker, accepted actions.
    Healthy,
    /// Worker serving a request.
    Active,
    /// Spawning or draining: in transition.
    Transition,
    /// Terminated slots and failures.
    Failed,
    /// Numeric values such as pids and counters.
    Count,
    /// Secondary text (defaults, missing values).
    Muted,
}

impl Semantic {
    /// Category used to paint a worker state.
    pub fn for_state(state: WorkerState) -> Self {
        match state {
            WorkerState::Ready => Semantic::Healthy,
            WorkerState::Busy => Semantic::Active,
            WorkerState::Spawning | WorkerState::Draining => Semantic::Transition,
            WorkerState::Terminated => Semantic::Failed,
        }
    }

    fn color(self) -> comfy_table::Color {
        match self {
            Semantic::Healthy => comfy_table::Color::Green,
            Semantic::Active => comfy_table::Color::Cyan,
            Semantic::Transition => comfy_table::Color::Yellow,
            Semantic::Failed => comfy_table::Color::Red,
            Semantic::Count => comfy_table::Color::Cyan,
            Semantic::Muted => comfy_table::Color::DarkGrey,
        }
    }
}

/// The comfy_table color for a category, or `None` when colors are off.
pub fn table_color(semantic: Semantic) -> Option<comfy_table::Color> {
    colors_enabled().then(|| semantic.color())
}

/// comfy_table cells with NO_COLOR support.
pub trait ThemedCell {
    fn themed(self, semantic: Semantic) -> Self;
}

impl ThemedCell for comfy_table::Cell {
    fn themed(self, semantic: Semantic) -> Self {
        match table_color(semantic) {
            Some(color) => self.fg(color),
            None => self,
        }
    }
}

/// Semantic styling for terminal text.
pub trait Themed: owo_colors::OwoColorize + std::fmt::Display {
    /// Field names in key/value output (yellow).
    fn label(&self) -> String {
        if colors_enabled() {
            format!("{}", owo_colors::OwoColorize::yellow(self))
        } else {
            self.to_string()
        }
    }

    /// Section headers (bold + underline).
    fn section_header(&self) -> String {
        if colors_enabled() {
            format!(
                "{}",
                owo_colors::OwoColorize::underline(&owo_colors::OwoColorize::bold(self))
            )
        } else {
            self.to_string()
        }
    }

    /// Success messages (green + bold).
    fn success(&self) -> String {
        if colors_enabled() {
            format!(
                "{}",
                owo_colors::OwoColorize::bold(&owo_colors::OwoColorize::green(self))
            )
        } else {
            self.to_string()
        }
    }

    fn warning(&self) -> String {
        if colors_enabled() {
            format!("{}", owo_colors::OwoColorize::yellow(self))
        } else {
            self.to_string()
        }
    }

    fn count(&self) -> String {
        if colors_enabled() {
            format!("{}", owo_colors::OwoColorize::cyan(self))
        } else {
            self.to_string()
        }
    }
}

impl Themed for String {}
impl Themed for &str {}
impl Themed for u64 {}
impl Themed for usize {}
