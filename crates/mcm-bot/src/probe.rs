use std::time::Duration;

use async_trait::async_trait;
use bedrock_ping::Pong;

/// Asks a game server whether it is up and how many players it has.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, host: &str, port: u16, timeout: Duration)
    -> Result<Pong, bedrock_ping::Error>;
}

/// RakNet unconnected ping against a Bedrock server.
pub struct BedrockProber;

#[async_trait]
impl Prober for BedrockProber {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Pong, bedrock_ping::Error> {
        bedrock_ping::ping(host, port, timeout).await
    }
}
