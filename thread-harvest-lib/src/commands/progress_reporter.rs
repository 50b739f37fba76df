use crate::harvest::Progress;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

type Snapshot = Box<dyn Fn() -> (u64, u64, String) + Send + Sync>;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

const BAR_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {msg}";
const BAR_TEMPLATE_PLAIN: &str = "{prefix:>12} [{bar:25}] {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:>12.bold.cyan} {spinner} {elapsed:>4} {msg}";
const SPINNER_TEMPLATE_PLAIN: &str = "{prefix:>12} {spinner} {elapsed:>4} {msg}";

#[derive(Debug)]
struct Visibility {
    shown_after: Instant,
    shown: AtomicBool,
    spinning: AtomicBool,
}

/// Progress bar on stderr that stays hidden for short runs.
///
/// Bar contents are pulled from the installed callback on every refresh tick.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    visibility: Arc<Visibility>,
    snapshot: Arc<Mutex<Snapshot>>,
    refresh: Arc<JoinHandle<()>>,
    use_colors: bool,
}

impl ProgressReporter {
    /// Create a reporter that becomes visible once `delay` has passed.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());

        let visibility = Arc::new(Visibility {
            shown_after: Instant::now() + delay,
            shown: AtomicBool::new(false),
            spinning: AtomicBool::new(false),
        });

        let snapshot: Arc<Mutex<Snapshot>> = Arc::new(Mutex::new(Box::new(|| (0, 0, String::new()))));

        let refresh = tokio::spawn(refresh(bar.clone(), Arc::clone(&visibility), Arc::clone(&snapshot)));

        Self {
            bar,
            visibility,
            snapshot,
            refresh: Arc::new(refresh),
            use_colors,
        }
    }

    fn style(&self, colored: &str, plain: &str) -> ProgressStyle {
        ProgressStyle::with_template(if self.use_colors { colored } else { plain }).expect("progress templates are valid")
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
        self.bar.reset_elapsed();
    }

    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {
        *self.snapshot.lock().expect("lock not poisoned") = callback;
        self.visibility.spinning.store(false, Ordering::Relaxed);
        self.bar.disable_steady_tick();
        self.bar.set_length(0);
        self.bar.set_position(0);
        self.bar
            .set_style(self.style(BAR_TEMPLATE, BAR_TEMPLATE_PLAIN).progress_chars("=> "));
    }

    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {
        *self.snapshot.lock().expect("lock not poisoned") = Box::new(move || (0, 0, callback()));
        self.visibility.spinning.store(true, Ordering::Relaxed);
        self.bar.reset_elapsed();
        self.bar.set_style(
            self.style(SPINNER_TEMPLATE, SPINNER_TEMPLATE_PLAIN)
                .tick_strings(&["<=>   ", " <=>  ", "  <=> ", "   <=>", "  <=> ", " <=>  ", "======"]),
        );
        self.bar.enable_steady_tick(REFRESH_INTERVAL);
    }

    fn println(&self, msg: &str) {
        if self.visibility.shown.load(Ordering::Relaxed) {
            self.bar.suspend(|| eprintln!("{msg}"));
        } else {
            eprintln!("{msg}");
        }
    }

    fn done(&self) {
        self.refresh.abort();
        if self.visibility.shown.load(Ordering::Relaxed) {
            self.bar.finish_and_clear();
        }
    }

    fn use_colors(&self) -> bool {
        self.use_colors
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bar", &self.bar)
            .field("visibility", &self.visibility)
            .field("snapshot", &"<callback>")
            .field("use_colors", &self.use_colors)
            .finish_non_exhaustive()
    }
}

async fn refresh(bar: ProgressBar, visibility: Arc<Visibility>, snapshot: Arc<Mutex<Snapshot>>) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);

    #[expect(clippy::infinite_loop, reason = "aborted by ProgressReporter::done")]
    loop {
        let _ = interval.tick().await;

        if !visibility.shown.load(Ordering::Relaxed) {
            if Instant::now() < visibility.shown_after {
                continue;
            }
            visibility.shown.store(true, Ordering::Relaxed);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        }

        let (length, position, message) = {
            let snapshot = snapshot.lock().expect("lock not poisoned");
            snapshot()
        };

        if !visibility.spinning.load(Ordering::Relaxed) && length > 0 {
            bar.set_length(length);
            bar.set_position(position);
        }
        bar.set_message(message);
    }
}
