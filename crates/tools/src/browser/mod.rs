//! Browser engine plumbing.
//!
//! `engine` defines the capability traits the rest of the crate programs
//! against; `chrome` implements them by driving Chrome or Edge over the
//! DevTools protocol (`cdp`). `session` wraps one engine and its page with
//! deadlines and error classification.

pub mod cdp;
pub mod chrome;
pub mod engine;
pub mod session;

pub use chrome::{find_browser_binary, list_available_browsers, ChromeLauncher};
pub use engine::{BrowserLauncher, EngineError, EngineHandle, LaunchOptions, PageHandle};
pub use session::{BrowserSession, NavigateOutcome, ScreenshotOutcome, SessionInfo};
