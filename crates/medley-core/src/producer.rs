//! Fire-and-forget AMQP message producer.
//!
//! Messages go to the default exchange with the queue name as routing
//! key; queues are declared durable and messages published persistent.
//! Delivery beyond the broker confirm is the consumer's problem.

use deadpool_lapin::{Manager, Pool, PoolError};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, ConnectionProperties};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("amqp connection error: {0}")]
    Connection(String),
    #[error("amqp publish error: {0}")]
    Publish(String),
}

#[derive(Clone)]
pub struct Producer {
    pool: Pool,
}

impl Producer {
    pub async fn connect(url: &str) -> Result<Self, ProducerError> {
        let manager = Manager::new(url.to_string(), ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(8)
            .build()
            .map_err(|err| ProducerError::Connection(format!("failed to create pool: {err}")))?;

        // Verify the broker is reachable before the service starts
        // accepting requests.
        let conn = pool
            .get()
            .await
            .map_err(|err| ProducerError::Connection(format!("failed to connect: {err}")))?;
        conn.create_channel()
            .await
            .map_err(|err| ProducerError::Connection(format!("failed to open channel: {err}")))?;

        info!(url = %url, "connected to AMQP");

        Ok(Self { pool })
    }

    /// Builds the pool without touching the broker. Connections are
    /// established on first publish.
    pub fn connect_lazy(url: &str) -> Result<Self, ProducerError> {
        let manager = Manager::new(url.to_string(), ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(8)
            .build()
            .map_err(|err| ProducerError::Connection(format!("failed to create pool: {err}")))?;
        Ok(Self { pool })
    }

    async fn channel(&self) -> Result<Channel, ProducerError> {
        let conn = self.pool.get().await.map_err(|err: PoolError| {
            ProducerError::Connection(format!("failed to get connection from pool: {err}"))
        })?;

        conn.create_channel()
            .await
            .map_err(|err| ProducerError::Connection(format!("failed to open channel: {err}")))
    }

    pub async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), ProducerError> {
        let channel = self.channel().await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| ProducerError::Publish(format!("failed to declare queue: {err}")))?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|err| ProducerError::Publish(format!("failed to publish: {err}")))?
            .await
            .map_err(|err| ProducerError::Publish(format!("publish confirmation failed: {err}")))?;

        debug!(queue = %queue, bytes = payload.len(), "published message");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration test requires RabbitMQ running, e.g.
    // AMQP_URL=amqp://localhost:5672 cargo test -- --ignored

    #[tokio::test]
    #[ignore]
    async fn publish_reaches_broker() {
        let url =
            std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://localhost:5672".to_string());
        let producer = Producer::connect(&url).await.expect("connect to AMQP");

        producer
            .publish("medley-test:producer", br#"{"ping":true}"#)
            .await
            .expect("publish");
    }
}
