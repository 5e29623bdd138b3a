use std::error::Error;

use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;
use tradier_streaming::stream::client::{StreamRequest, StreamingClient};
use tradier_streaming::stream::proto::EventKind;
use tradier_streaming::ClientConfig;

fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = StreamingClient::from_config(&config)?;
        let session = client.create_session().await?;
        println!("session url={}", session.url());

        let request = StreamRequest::new(["SPY", "AAPL", "MSFT"])
            .with_filter([EventKind::Quote, EventKind::Trade]);
        let mut feed = client.stream_quotes(&session, &request).await?;

        let mut remaining = 25;
        while let Some(item) = feed.next().await {
            match item {
                Ok(event) => match event.kind {
                    EventKind::Quote => println!(
                        "{} quote bid={:?} ask={:?}",
                        event.symbol,
                        event.bid(),
                        event.ask()
                    ),
                    _ => println!(
                        "{} {} price={:?} size={:?}",
                        event.symbol,
                        event.kind,
                        event.price(),
                        event.size()
                    ),
                },
                Err(err) => eprintln!("skipping message: {err}"),
            }

            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        feed.close();

        Ok::<(), Box<dyn Error>>(())
    })
}
