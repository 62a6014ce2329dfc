//! Subscribe to a channel and publish to it through the pool.
//!
//! ```text
//! PG_HOST=localhost PG_USER=postgres PG_PASSWORD=postgres PG_DATABASE=postgres \
//!     cargo run -p pgmux-listener --example notify
//! ```

use std::time::Duration;

use pgmux_client::{Config, PooledClient};
use pgmux_listener::{Listener, ListenerConfig, ListenerEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = Config::new()
        .host(std::env::var("PG_HOST").unwrap_or_else(|_| "localhost".into()))
        .user(std::env::var("PG_USER").unwrap_or_else(|_| "postgres".into()))
        .database(std::env::var("PG_DATABASE").unwrap_or_else(|_| "postgres".into()))
        .max_connections(4);
    if let Ok(password) = std::env::var("PG_PASSWORD") {
        config = config.password(password);
    }

    let client = PooledClient::postgres(config)?;
    let listener = Listener::new(
        &client,
        ListenerConfig::new().poll_interval(Duration::from_millis(100)),
    )?;

    let mut events = listener.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ListenerEvent::Error(e) = event {
                eprintln!("listener error: {e}");
            }
        }
    });

    let callback = listener
        .subscribe_fn("potato", |n| {
            println!("{} -> {:?}", n.channel, n.payload);
        })
        .await?;

    for fruit in ["lemon", "lime", "orange"] {
        let payload = format!(r#"{{"fruit":"{fruit}"}}"#);
        client
            .query("notify %I, %L", &[&"potato", &payload])
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    listener.unsubscribe("potato", &callback).await?;
    listener.close().await;
    client.close().await;
    Ok(())
}
