//! Payment request and settlement between agents

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use agent_comms::{ErrorCode, Message, MessageDispatcher, MessageType, ProtocolError, Result};

use crate::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Requested,
    /// Transfer in flight
    Settling,
    Confirmed,
    Rejected,
}

/// A payee's request and its settlement outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Id of the `PaymentRequest` message
    pub request_id: String,
    pub payee_id: String,
    pub payer_id: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Requests payment over the protocol and settles through the payment port
pub struct PaymentFlow {
    dispatcher: Arc<MessageDispatcher>,
    payments: Arc<dyn PaymentProvider>,
    records: DashMap<String, PaymentRecord>,
}

impl PaymentFlow {
    pub fn new(dispatcher: Arc<MessageDispatcher>, payments: Arc<dyn PaymentProvider>) -> Self {
        Self {
            dispatcher,
            payments,
            records: DashMap::new(),
        }
    }

    /// Payee asks payer for an amount
    pub async fn request_payment(
        &self,
        payee: &str,
        payer: &str,
        amount: f64,
        currency: &str,
        description: &str,
    ) -> Result<PaymentRecord> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ProtocolError::invalid_params(format!(
                "amount must be a positive number, got {}",
                amount
            )));
        }
        if currency.trim().is_empty() {
            return Err(ProtocolError::invalid_params("currency is required"));
        }

        let message = Message::new(payee, payer, MessageType::PaymentRequest)
            .with_content(description)
            .with_field("amount", json!(amount))
            .with_field("currency", json!(currency))
            .with_field("description", json!(description));
        let request_id = message.id.clone();

        let record = PaymentRecord {
            request_id: request_id.clone(),
            payee_id: payee.to_string(),
            payer_id: payer.to_string(),
            amount,
            currency: currency.to_string(),
            description: description.to_string(),
            status: PaymentStatus::Requested,
            transaction_ref: None,
            failure_reason: None,
            created_at: Utc::now(),
        };
        // Recorded before dispatch so a payer reacting to the notification can settle
        self.records.insert(request_id.clone(), record.clone());
        if let Err(e) = self.dispatcher.dispatch(message).await {
            self.records.remove(&request_id);
            return Err(e);
        }

        tracing::info!("{} requested {} {} from {}", payee, amount, currency, payer);
        Ok(record)
    }

    /// Payer settles an outstanding request
    ///
    /// On success a `PaymentConfirmation` carrying the transaction reference
    /// goes back to the payee; on failure a `PaymentRejection` does and the
    /// payment error is returned.
    pub async fn settle(&self, request_id: &str, payer: &str) -> Result<PaymentRecord> {
        let record = self.begin_settlement(request_id, payer)?;

        let outcome = self
            .payments
            .transfer(&record.payer_id, &record.payee_id, record.amount, &record.currency)
            .await
            .map_err(|e| match e.code() {
                ErrorCode::InsufficientFunds | ErrorCode::PaymentFailed => e,
                _ => ProtocolError::PaymentFailed(e.to_string()),
            });

        let reply = Message::new(&record.payer_id, &record.payee_id, MessageType::PaymentConfirmation)
            .with_response_to(request_id)
            .with_field("amount", json!(record.amount))
            .with_field("currency", json!(record.currency));

        match outcome {
            Ok(tx) => {
                let updated = self.update(request_id, |r| {
                    r.status = PaymentStatus::Confirmed;
                    r.transaction_ref = Some(tx.clone());
                })?;
                self.notify(reply.with_transaction_ref(tx.clone()).with_content(format!("Payment confirmed: {}", tx)))
                    .await;
                tracing::info!("Payment {} settled as {}", request_id, tx);
                Ok(updated)
            }
            Err(e) => {
                self.update(request_id, |r| {
                    r.status = PaymentStatus::Rejected;
                    r.failure_reason = Some(e.to_string());
                })?;
                let mut rejection = reply.with_content(e.to_string());
                rejection.message_type = MessageType::PaymentRejection;
                self.notify(rejection).await;
                tracing::warn!("Payment {} failed: {}", request_id, e);
                Err(e)
            }
        }
    }

    pub fn get(&self, request_id: &str) -> Result<PaymentRecord> {
        self.records
            .get(request_id)
            .map(|r| r.clone())
            .ok_or_else(|| ProtocolError::invalid_params(format!("unknown payment request {}", request_id)))
    }

    /// Claim a `Requested` record for one settlement
    fn begin_settlement(&self, request_id: &str, payer: &str) -> Result<PaymentRecord> {
        let mut record = self
            .records
            .get_mut(request_id)
            .ok_or_else(|| ProtocolError::invalid_params(format!("unknown payment request {}", request_id)))?;
        if record.payer_id != payer {
            return Err(ProtocolError::invalid_request(format!(
                "payment {} is owed by {}, not {}",
                request_id, record.payer_id, payer
            )));
        }
        if record.status != PaymentStatus::Requested {
            return Err(ProtocolError::invalid_state(format!(
                "payment {} is already {:?}",
                request_id, record.status
            )));
        }
        record.status = PaymentStatus::Settling;
        Ok(record.clone())
    }

    fn update<F: FnOnce(&mut PaymentRecord)>(&self, request_id: &str, f: F) -> Result<PaymentRecord> {
        let mut record = self
            .records
            .get_mut(request_id)
            .ok_or_else(|| ProtocolError::invalid_params(format!("unknown payment request {}", request_id)))?;
        f(&mut record);
        Ok(record.clone())
    }

    async fn notify(&self, message: Message) {
        let message_type = message.message_type;
        if let Err(e) = self.dispatcher.dispatch(message).await {
            tracing::warn!("Dropped {} message: {}", message_type, e);
        }
    }
}
