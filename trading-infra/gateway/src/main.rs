use anyhow::{Context, bail};
use gateway::{MarketEvent, StreamEngine, Topic, VenueId, load_config, load_default_config};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Usage: gateway [--config <path>] <venue> <topic> [symbol]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("gateway=info".parse()?))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).cloned().context("--config needs a path")?;
            args.drain(i..=i + 1);
            load_config(&path).with_context(|| format!("loading {}", path))?
        }
        None => load_default_config()?,
    };

    let (venue, topic) = match (args.first(), args.get(1)) {
        (Some(venue), Some(topic)) => (
            VenueId::new(venue),
            Topic::parse(topic).with_context(|| format!("unknown topic {}", topic))?,
        ),
        _ => bail!("usage: gateway [--config <path>] <venue> <topic> [symbol]"),
    };
    let symbol = match args.get(2) {
        Some(symbol) => Some(symbol.clone()),
        None => config
            .get_venue(venue.as_str())
            .and_then(|v| v.symbols.first().cloned()),
    };

    tracing::info!("Starting gateway: {} {} {:?}", venue, topic, symbol);
    let engine = StreamEngine::from_config(&config)?;
    let mut stream = engine.subscribe(&venue, topic, symbol.as_deref()).await?;

    loop {
        tokio::select! {
            item = stream.recv() => match item {
                Some(Ok(events)) => events.iter().for_each(log_event),
                Some(Err(e)) if e.is_retryable() => tracing::warn!("{}", e),
                Some(Err(e)) => {
                    tracing::error!("{}", e);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    drop(stream);
    engine.shutdown().await;
    Ok(())
}

fn log_event(event: &MarketEvent) {
    match event {
        MarketEvent::OrderBook(book) => tracing::info!(
            symbol = %book.symbol,
            sequence = book.sequence,
            "book bid={:?} ask={:?}",
            book.best_bid().map(|l| l.price),
            book.best_ask().map(|l| l.price)
        ),
        MarketEvent::Trade(t) => {
            tracing::info!(symbol = %t.symbol, "trade {:?} {} @ {}", t.side, t.amount, t.price)
        }
        MarketEvent::Ticker(t) => tracing::info!(symbol = %t.symbol, "ticker last={:?}", t.last),
        MarketEvent::BidAsk(q) => tracing::info!(symbol = %q.symbol, "quote {} / {}", q.bid, q.ask),
        MarketEvent::FundingRate(f) => {
            tracing::info!(symbol = %f.symbol, "funding {:?}", f.funding_rate)
        }
        MarketEvent::Order(o) => tracing::info!(symbol = %o.symbol, "order {} {:?}", o.id, o.status),
        MarketEvent::Position(p) => {
            tracing::info!(symbol = %p.symbol, "position {} {}", p.side, p.contracts)
        }
    }
}
