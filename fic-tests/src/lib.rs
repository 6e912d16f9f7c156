//! Helpers for the end-to-end tests: a daemon on a loopback port backed by a
//! simulated board.
use std::{net::SocketAddr, sync::mpsc, thread, time::Duration};

use fic_server::{pins::PinMap, register::TransferWidth, server::Builder, sim::SimBoard};
use tokio::net::TcpListener;

/// Server settings with short timeouts and a lock file private to `name`.
pub fn test_builder(name: &str) -> Builder {
    let lock_file = std::env::temp_dir().join(format!(
        "fic-tests-{}-{}.lock",
        std::process::id(),
        name
    ));
    let _ = std::fs::remove_file(&lock_file);
    Builder::new()
        .lock_file(lock_file)
        .lock_timeout(Duration::from_secs(5))
        .lock_poll_interval(Duration::from_millis(10))
        .comm_timeout(Duration::from_millis(50))
        .init_timeout(Duration::from_millis(200))
        .done_timeout(Duration::from_millis(500))
        .status_period(Duration::from_millis(100))
        .body_timeout(Duration::from_secs(2))
}

pub fn sim_board() -> SimBoard {
    SimBoard::new(PinMap::default(), TransferWidth::Nibble)
}

/// Serves `sim` on an ephemeral loopback port from a runtime of its own.
pub fn spawn_server(sim: SimBoard, builder: Builder) -> SocketAddr {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("Failed to start runtime");
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("Failed to bind");
            sender
                .send(listener.local_addr().expect("No local address"))
                .expect("Test finished before the server started");
            let server = builder.build(sim, PinMap::default());
            if let Err(e) = server.serve(listener).await {
                eprintln!("Server failed: {e}");
            }
        });
    });
    receiver.recv().expect("Server thread died")
}
