//! Forge Processing Core - Entry Point
//!
//! Single-process server hosting the job store, broker, worker pool, queue
//! manager, realtime gateway, and optimization pipeline.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    forge_server::run().await
}
