use crate::orchestrator::Orchestrator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once, PoisonError, Weak};
use tracing::{info, warn};

/// Exit status after an interrupt-triggered cleanup (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static HANDLER: Once = Once::new();
static TARGETS: Targets = Mutex::new(Vec::new());

/// Shut `target` down when the process receives Ctrl-C (SIGINT).
///
/// The first signal marks shutdown as requested, destroys the registered
/// environments of every live target on a separate thread and exits with
/// [`EXIT_INTERRUPTED`]. A second signal exits with status 1 immediately.
pub fn install_signal_handler(target: Weak<Orchestrator>) {
    register(&TARGETS, target);
    HANDLER.call_once(|| {
        if let Err(e) = ctrlc::set_handler(on_signal) {
            warn!("failed to install signal handler: {e}");
        }
    });
}

fn on_signal() {
    if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
        std::process::exit(1);
    }
    eprintln!("\ninterrupted, destroying environments (press Ctrl-C again to abort)...");
    std::thread::spawn(|| {
        let destroyed = shutdown_all(&TARGETS);
        info!("destroyed {destroyed} environment(s) after interrupt");
        std::process::exit(EXIT_INTERRUPTED);
    });
}

type Targets = Mutex<Vec<Weak<Orchestrator>>>;

fn register(targets: &Targets, target: Weak<Orchestrator>) {
    let mut targets = targets.lock().unwrap_or_else(PoisonError::into_inner);
    targets.retain(|t| t.strong_count() > 0);
    targets.push(target);
}

/// Run shutdown on every live orchestrator in `targets`, dropping the dead
/// ones from the list.
fn shutdown_all(targets: &Targets) -> usize {
    let live: Vec<_> = {
        let mut targets = targets.lock().unwrap_or_else(PoisonError::into_inner);
        targets.retain(|t| t.strong_count() > 0);
        targets.iter().filter_map(Weak::upgrade).collect()
    };
    live.iter().map(|o| o.shutdown()).sum()
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
