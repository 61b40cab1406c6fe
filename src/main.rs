use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use lobx_match::bus::ChannelBus;
use lobx_match::engine::{Engine, MatchResult, OrderRecord, Outcome, Side};
use lobx_match::settings::{Settings, StoreBackend};
use lobx_match::store::{BookStore, MemoryStore, SledStore};
use lobx_match::telemetry;

#[derive(Parser, Debug)]
#[command(name = "lobx-match", about = "Interactive front end for the matching core")]
struct Cli {
    /// TOML settings file (defaults to ./lobx.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "eth2usdt")]
    symbol: String,

    /// Client id stamped on orders entered here
    #[arg(long, default_value = "cli")]
    client: String,
}

fn print_match(result: &MatchResult) {
    if result.is_cancel() {
        println!("  Cancelled {} ({} released)", result.node.order_id, result.node.volume);
    } else {
        println!(
            "  Fill: {} x {} @ {} (taker {} left {}, maker {} left {})",
            result.match_volume,
            result.match_node.side,
            result.match_node.price,
            result.node.order_id,
            result.node.volume,
            result.match_node.order_id,
            result.match_node.volume,
        );
    }
}

// Helper function to print state summary
async fn print_state_summary(engine: &Engine, symbol: &str) -> anyhow::Result<()> {
    let book = engine.book();
    println!("\n=== Book State Summary ({symbol}) ===");
    match book.best_bid(symbol).await? {
        Some((price, qty)) => println!("Best bid: {qty} @ {price}"),
        None => println!("Best bid: None"),
    }
    match book.best_ask(symbol).await? {
        Some((price, qty)) => println!("Best ask: {qty} @ {price}"),
        None => println!("Best ask: None"),
    }
    match book.spread(symbol).await? {
        Some(spread) => println!("Spread: {spread}"),
        None => println!("Spread: N/A"),
    }
    println!("Undelivered events: {}", engine.undelivered());
    println!("========================\n");
    Ok(())
}

async fn print_depth(engine: &Engine, symbol: &str, levels: usize) -> anyhow::Result<()> {
    let asks = engine.book().depth(symbol, Side::Sale, levels).await?;
    let bids = engine.book().depth(symbol, Side::Buy, levels).await?;
    println!("  Asks:");
    for (price, qty) in asks.iter().rev() {
        println!("    {price}: {qty}");
    }
    println!("  Bids:");
    for (price, qty) in &bids {
        println!("    {price}: {qty}");
    }
    Ok(())
}

async fn place(engine: &Engine, order: OrderRecord) {
    if let Err(e) = engine.register(&order).await {
        println!("Rejected: {e}");
        return;
    }
    match engine.dispatch(order).await {
        Ok(Outcome::Submitted(result)) => {
            println!(
                "Order {}: traded {}, {} left{}",
                result.order.order_id,
                result.traded_volume(),
                result.order.volume,
                if result.rested { " (resting)" } else { "" }
            );
        }
        Ok(Outcome::Cancelled(_)) => {}
        Err(e) => println!("Rejected: {e}"),
    }
}

fn parse_side(s: &str) -> Option<Side> {
    match s {
        "buy" | "b" => Some(Side::Buy),
        "sell" | "sale" | "s" => Some(Side::Sale),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    telemetry::init_tracing(&settings.log.filter);
    telemetry::init_metrics(&settings.metrics.listen)?;

    let store: Arc<dyn BookStore> = match settings.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sled => Arc::new(SledStore::open(&settings.store.path)?),
    };
    let bus = Arc::new(ChannelBus::new(settings.bus.capacity));
    let mut events = bus.subscribe();
    let engine = Engine::new(store, bus.clone(), settings.topics())
        .with_undelivered_capacity(settings.bus.undelivered_capacity);

    let match_topic = settings.bus.match_topic.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(env) if env.topic == match_topic => match env.decode::<MatchResult>() {
                    Ok(result) => print_match(&result),
                    Err(e) => warn!(error = %e, "Undecodable match event"),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let symbol = cli.symbol;
    // Clock-seeded so ids do not repeat across restarts.
    let mut next_order_id = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;

    // CLI loop
    loop {
        print!("\nLOBX CLI> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let command = input.trim().to_lowercase();
        let parts: Vec<&str> = command.split_whitespace().collect();

        match parts.as_slice() {
            ["help"] | ["h"] => {
                println!("Available commands:");
                println!("  buy <price> <qty>                  - Submit buy limit order");
                println!("  sell <price> <qty>                 - Submit sell limit order");
                println!("  cancel <buy|sell> <price> <id>     - Cancel a resting order");
                println!("  top                                - Show top of book");
                println!("  depth [levels]                     - Show book depth");
                println!("  redeliver                          - Retry undelivered events");
                println!("  quit, q                            - Exit");
            }
            [side @ ("buy" | "sell"), price, qty] => {
                let (Ok(price), Ok(qty)) = (Decimal::from_str(price), Decimal::from_str(qty)) else {
                    println!("Invalid numbers");
                    continue;
                };
                let Some(side) = parse_side(side) else { continue };
                let order_id = next_order_id.to_string();
                next_order_id += 1;
                println!("Submitting {side} order ID {order_id}: {qty} @ {price}");
                place(&engine, OrderRecord::add(cli.client.as_str(), order_id, symbol.as_str(), side, price, qty)).await;
            }
            ["cancel", side, price, order_id] => {
                let (Some(side), Ok(price)) = (parse_side(side), Decimal::from_str(price)) else {
                    println!("Usage: cancel <buy|sell> <price> <id>");
                    continue;
                };
                place(&engine, OrderRecord::cancel(cli.client.as_str(), *order_id, symbol.as_str(), side, price)).await;
            }
            ["top"] => {
                if let Err(e) = print_state_summary(&engine, &symbol).await {
                    error!(error = %e, "Failed to read book");
                }
            }
            ["depth", rest @ ..] => {
                let levels = rest.first().and_then(|n| n.parse().ok()).unwrap_or(5);
                if let Err(e) = print_depth(&engine, &symbol, levels).await {
                    error!(error = %e, "Failed to read book");
                }
            }
            ["redeliver"] => match engine.redeliver().await {
                Ok(sent) => println!("Redelivered {sent} events"),
                Err(e) => println!("Redelivery failed: {e}"),
            },
            ["quit"] | ["q"] | ["exit"] => {
                println!("Goodbye!");
                break;
            }
            [] => continue,
            _ => {
                println!("Unknown command. Type 'help' for available commands.");
            }
        }
    }

    Ok(())
}
