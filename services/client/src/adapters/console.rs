//! services/client/src/adapters/console.rs
//!
//! Presentation ports for the command line: navigation is logged, notices are
//! printed to standard error.

use library_core::ports::{Navigator, Notifier};
use library_core::{Notice, NoticeLevel, Route};
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn navigate(&self, route: Route) {
        info!(route = route.path(), "Navigating");
        if route == Route::Login {
            eprintln!("→ please log in (`library login <username>`)");
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => {
                info!(message = %notice.message, "Notice");
                eprintln!("✓ {}", notice.message);
            }
            NoticeLevel::Error => {
                warn!(message = %notice.message, "Notice");
                eprintln!("✗ {}", notice.message);
            }
        }
    }
}
