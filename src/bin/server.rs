//! Real-time chat fan-out server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --queue memory --port 3000
//! ```

use std::sync::Arc;

use clap::{Parser, ValueEnum};

use hiroba::{
    common::logger::setup_logger,
    dispatch::{self, DEFAULT_DISPATCH_CAPACITY, DEFAULT_WORKERS},
    queue::{MessagePublisher, jetstream::JetStreamQueue, memory::MemoryQueue, run_consumer},
    registry::Registry,
    server::{AppState, run_server},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueueBackend {
    /// NATS JetStream (durable, supports multiple server instances)
    Nats,
    /// In-process queue (single instance, no external services)
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Real-time chat server with queue-backed fan-out", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Queue backend carrying published messages
    #[arg(long, value_enum, default_value_t = QueueBackend::Nats)]
    queue: QueueBackend,

    /// NATS server URL (nats backend only)
    #[arg(long, default_value = "nats://127.0.0.1:4222")]
    nats_url: String,

    /// Number of broadcast workers
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Dispatch queue capacity between the consumer and the workers
    #[arg(long, default_value_t = DEFAULT_DISPATCH_CAPACITY)]
    dispatch_capacity: usize,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let registry = Arc::new(Registry::new());
    let (dispatch_tx, dispatch_rx) = dispatch::dispatch_queue(args.dispatch_capacity);

    // Publisher and consumer task for the selected queue backend. A queue
    // that cannot be reached at startup is fatal.
    let publisher: Arc<dyn MessagePublisher> = match args.queue {
        QueueBackend::Nats => {
            let queue = match JetStreamQueue::connect(&args.nats_url).await {
                Ok(queue) => Arc::new(queue),
                Err(e) => {
                    tracing::error!("Failed to connect to NATS at {}: {}", args.nats_url, e);
                    std::process::exit(1);
                }
            };
            let subscriber = match queue.subscriber().await {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    tracing::error!("Failed to open queue subscription: {}", e);
                    std::process::exit(1);
                }
            };
            tokio::spawn(run_consumer(subscriber, dispatch_tx));
            queue
        }
        QueueBackend::Memory => {
            let queue = MemoryQueue::new();
            tokio::spawn(run_consumer(queue.subscriber(), dispatch_tx));
            Arc::new(queue)
        }
    };

    dispatch::spawn_workers(args.workers, registry.clone(), dispatch_rx);

    let state = Arc::new(AppState {
        registry,
        publisher,
    });
    if let Err(e) = run_server(&args.host, args.port, state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
