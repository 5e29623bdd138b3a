use std::error::Error;
use std::pin::pin;
use std::time::Duration;

use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;
use tradier_streaming::stream::client::{StreamRequest, StreamingClient};
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

        let request = StreamRequest::new(["SPY"]).with_advanced_details(true);
        let feed = client.stream_quotes_websocket(&session, &request).await?;

        // Stop after thirty seconds; dropping the stream closes the socket.
        let mut feed = pin!(feed.take_until(tokio::time::sleep(Duration::from_secs(30))));
        while let Some(item) = feed.next().await {
            let event = item?;
            println!("{} {} {:?}", event.symbol, event.kind, event.fields);
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
