//! Process/application context.
//!
//! The key store needs to know what kind of process it runs in to decide
//! how loudly to fail when the keychain is unavailable.

use std::sync::atomic::{AtomicBool, Ordering};

/// Describes the hosting process.
#[cfg_attr(test, mockall::automock)]
pub trait AppContext: Send + Sync {
    /// Whether the process currently has a usable UI context.
    fn has_ui_context(&self) -> bool;

    /// Whether this is the main application (as opposed to an extension or
    /// helper process sharing the database).
    fn is_main_app(&self) -> bool;

    /// Whether the main application is currently backgrounded.
    fn is_in_background(&self) -> bool;

    /// Whether the process is a test harness.
    fn is_running_tests(&self) -> bool;
}

/// Context for a plain process: configurable flags, nothing platform
/// specific.
///
/// # Examples
///
/// ```
/// use cipherstore::{AppContext, ProcessContext};
///
/// let context = ProcessContext::main_app();
/// assert!(context.is_main_app());
/// assert!(!context.is_in_background());
/// ```
#[derive(Debug, Default)]
pub struct ProcessContext {
    ui: AtomicBool,
    main_app: AtomicBool,
    background: AtomicBool,
    tests: AtomicBool,
}

impl ProcessContext {
    /// Context for the foreground main application.
    #[must_use]
    pub fn main_app() -> Self {
        Self {
            ui: AtomicBool::new(true),
            main_app: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Context for a helper process (extension, CLI tool).
    #[must_use]
    pub fn helper() -> Self {
        Self::default()
    }

    /// Context for a test harness.
    #[must_use]
    pub fn test_harness() -> Self {
        Self {
            tests: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Records whether the application moved to the background.
    pub fn set_in_background(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }
}

impl AppContext for ProcessContext {
    fn has_ui_context(&self) -> bool {
        self.ui.load(Ordering::SeqCst)
    }

    fn is_main_app(&self) -> bool {
        self.main_app.load(Ordering::SeqCst)
    }

    fn is_in_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    fn is_running_tests(&self) -> bool {
        self.tests.load(Ordering::SeqCst)
    }
}
