//! OS signals delivered to this test process

#![cfg(unix)]

use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;

use webrig_e2e::Interrupt;

// One test only: signals are process-wide and would reach every listener
// in this binary.
#[tokio::test]
async fn test_os_signals_trigger_once() {
    let interrupt = Interrupt::from_os_signals();

    // Listening starts before arming, as during setup
    interrupt.listen();
    assert!(interrupt.is_listening());
    assert!(!interrupt.is_armed());

    kill(getpid(), Signal::SIGTERM).unwrap();
    tokio::time::timeout(Duration::from_secs(5), interrupt.triggered())
        .await
        .expect("SIGTERM should trigger the interrupt");

    assert!(interrupt.arm());
    kill(getpid(), Signal::SIGINT).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Still alive, still fired, and nothing can fire it again
    assert!(interrupt.is_triggered());
    assert!(!interrupt.trigger());
    tokio::time::timeout(Duration::from_secs(1), interrupt.triggered())
        .await
        .expect("fired interrupt stays fired");
}
