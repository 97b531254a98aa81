//! Instance Queue Worker - Entry Point
//!
//! Provisions a per-process queue subscribed to the configured topics and
//! handles notifications until SIGINT/SIGTERM.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    iq_worker::run().await
}
