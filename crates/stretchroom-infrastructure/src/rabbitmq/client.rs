use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{RabbitMqError, RabbitMqRequest, RabbitMqResponse, SimpleRabbitMqConfiguration};
use crate::metrics::record_rabbit_message;

type PendingReplies = Arc<DashMap<String, oneshot::Sender<RabbitMqResponse>>>;

/// Publishes requests to a controller's exchange.
///
/// Replies arrive on the callback queue and are matched to the waiting
/// caller by correlation id.
pub struct RabbitMqClient {
    configuration: SimpleRabbitMqConfiguration,
    connection: Connection,
    channel: Channel,
    pending: PendingReplies,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RabbitMqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqClient")
            .field("exchange", &self.configuration.exchange_name)
            .field("routing_key", &self.configuration.routing_key())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl RabbitMqClient {
    /// Connect, declare the exchange and, when configured, start listening
    /// for replies.
    pub async fn connect(configuration: SimpleRabbitMqConfiguration) -> Result<Self, RabbitMqError> {
        configuration.validate()?;

        let connection =
            Connection::connect(&configuration.connection_string, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .exchange_declare(
                &configuration.exchange_name,
                configuration.exchange_type.into(),
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let pending: PendingReplies = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        if let Some((exchange, queue)) = configuration.callback() {
            channel
                .exchange_declare(
                    exchange,
                    configuration.callback_exchange_type.into(),
                    ExchangeDeclareOptions {
                        auto_delete: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        auto_delete: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_bind(queue, exchange, queue, QueueBindOptions::default(), FieldTable::default())
                .await?;

            let consumer = channel
                .basic_consume(
                    queue,
                    &format!("{queue}-{}", Uuid::now_v7().simple()),
                    BasicConsumeOptions {
                        no_ack: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            tokio::spawn(dispatch_replies(consumer, pending.clone(), shutdown.clone()));
        }

        tracing::info!(
            exchange = %configuration.exchange_name,
            routing_key = %configuration.routing_key(),
            callback = configuration.callback().is_some(),
            "rabbitmq client connected"
        );

        Ok(Self {
            configuration,
            connection,
            channel,
            pending,
            shutdown,
        })
    }

    pub fn configuration(&self) -> &SimpleRabbitMqConfiguration {
        &self.configuration
    }

    fn encode(request: &RabbitMqRequest) -> Result<Vec<u8>, RabbitMqError> {
        serde_json::to_vec(request).map_err(RabbitMqError::Serialize)
    }

    async fn publish(&self, payload: &[u8], properties: BasicProperties) -> Result<(), RabbitMqError> {
        self.channel
            .basic_publish(
                &self.configuration.exchange_name,
                self.configuration.routing_key(),
                BasicPublishOptions::default(),
                payload,
                properties.with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Publish without waiting for a reply.
    pub async fn send(&self, request: RabbitMqRequest) -> Result<(), RabbitMqError> {
        let payload = Self::encode(&request)?;
        tracing::debug!(method = %request.method, "publishing rabbitmq message");
        self.publish(&payload, BasicProperties::default()).await?;
        record_rabbit_message(&request.method, "sent");
        Ok(())
    }

    /// Fire-and-forget call without parameters.
    pub async fn send_message(&self, method: &str) -> Result<(), RabbitMqError> {
        self.send(RabbitMqRequest::new(method)).await
    }

    /// Fire-and-forget call with one parameter.
    pub async fn send_message_with<P: Serialize>(&self, method: &str, param: &P) -> Result<(), RabbitMqError> {
        self.send(RabbitMqRequest::new(method).with_param(param)?).await
    }

    /// Publish and wait for the reply.
    ///
    /// Fails with [`RabbitMqError::Timeout`] when no reply arrives within the
    /// callback timeout and with [`RabbitMqError::Remote`] when the controller
    /// reports an error.
    pub async fn request<T: DeserializeOwned>(&self, request: RabbitMqRequest) -> Result<T, RabbitMqError> {
        let (_, reply_queue) = self
            .configuration
            .callback()
            .ok_or(RabbitMqError::CallbackNotConfigured)?;

        let payload = Self::encode(&request)?;
        let correlation_id = Uuid::now_v7().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        let properties = BasicProperties::default()
            .with_correlation_id(correlation_id.as_str().into())
            .with_reply_to(reply_queue.into());
        tracing::debug!(method = %request.method, correlation_id = %correlation_id, "publishing rabbitmq request");
        if let Err(e) = self.publish(&payload, properties).await {
            self.pending.remove(&correlation_id);
            return Err(e);
        }

        let timeout = self.configuration.callback_timeout();
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                record_rabbit_message(&request.method, "closed");
                return Err(RabbitMqError::NotConnected);
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                record_rabbit_message(&request.method, "timeout");
                return Err(RabbitMqError::Timeout {
                    method: request.method,
                    timeout,
                });
            }
        };

        if let Some(message) = response.error {
            record_rabbit_message(&request.method, "error");
            return Err(RabbitMqError::Remote {
                method: request.method,
                message,
            });
        }
        record_rabbit_message(&request.method, "ok");
        serde_json::from_value(response.result.unwrap_or(serde_json::Value::Null)).map_err(|source| {
            RabbitMqError::Decode {
                method: request.method,
                source,
            }
        })
    }

    /// Request without parameters.
    pub async fn send_request<T: DeserializeOwned>(&self, method: &str) -> Result<T, RabbitMqError> {
        self.request(RabbitMqRequest::new(method)).await
    }

    /// Request with one parameter.
    pub async fn send_request_with<P, T>(&self, method: &str, param: &P) -> Result<T, RabbitMqError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        self.request(RabbitMqRequest::new(method).with_param(param)?).await
    }

    /// Stop listening for replies and close the connection.
    pub async fn close(&self) -> Result<(), RabbitMqError> {
        self.shutdown.cancel();
        self.pending.clear();
        self.connection.close(200, "client closed").await?;
        Ok(())
    }
}

impl Drop for RabbitMqClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_replies(mut consumer: lapin::Consumer, pending: PendingReplies, shutdown: CancellationToken) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "reply consumer failed");
                    break;
                }
                None => break,
            },
        };

        let Some(correlation_id) = delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
        else {
            tracing::warn!("reply without correlation id dropped");
            continue;
        };

        let response = match serde_json::from_slice::<RabbitMqResponse>(&delivery.data) {
            Ok(response) => response,
            Err(e) => RabbitMqResponse::error(format!("malformed reply: {e}")),
        };

        match pending.remove(&correlation_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(response);
            }
            None => tracing::debug!(correlation_id = %correlation_id, "late or unknown reply dropped"),
        }
    }
}
