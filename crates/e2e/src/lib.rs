//! webrig E2E lifecycle manager
//!
//! Brings up the two external processes a browser test suite needs, runs
//! the suite against them, and guarantees they are torn down afterwards:
//! - Launches the test server and waits until it answers HTTP
//! - Launches the browser driver and waits for its ready line
//! - Runs the suite (an external runner or an async closure)
//! - Stops the driver, then the server, on completion or on interrupt
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Lifecycle (owns both)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  setup()                                                    │
//! │    ├── Launcher::launch(server) -> ProcessHandle            │
//! │    ├── wait_ready_within(server, HttpPoll)                  │
//! │    ├── Launcher::launch(driver) -> ProcessHandle            │
//! │    └── wait_ready_within(driver, OutputContains)            │
//! │  run_suite(TestSuite) -> SuiteReport                        │
//! │  teardown() -> TeardownReport  (driver, then server)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Interrupt (SIGINT / SIGTERM, first one wins)               │
//! │  ChangeStream (notify, debounced) for watch mode            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod interrupt;
pub mod lifecycle;
pub mod process;
pub mod readiness;
pub mod suite;
pub mod watch;

pub use config::{Config, SuiteConfig, Timeouts, WatchConfig};
pub use error::{E2eError, E2eResult};
pub use interrupt::Interrupt;
pub use lifecycle::{Lifecycle, LifecycleState, RunOutcome, TeardownReport};
pub use process::{
    parse_signal, ChildProcess, CommandLauncher, ExitInfo, Launcher, ProcessHandle, ProcessSpec,
    StopOutcome,
};
pub use readiness::{wait_ready, wait_ready_within, HttpProbe, ProbeResult, Readiness, ReqwestProbe};
pub use suite::{write_report, CommandSuite, FnSuite, SuiteContext, SuiteReport, TestSuite};
pub use watch::ChangeStream;
