//! Server-authoritative flows: orders, sales and order-slip scans.
//!
//! None of these touch the local cache. They are online-only calls; a failure
//! means the action did not happen and is returned to the caller with the
//! server's message.

use super::MutationGateway;
use crate::error::{ClientError, Result};
use crate::remote::{blob_path, BatchOp, RemoteError};
use catalog_engine::Product;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const CREATE_ORDER: &str = "createOrder";
pub const FINALIZE_SALE: &str = "finalizeSale";
pub const SCAN_ORDER_SLIP: &str = "scanOrderSlip";

/// Blob category of scanned order slips.
pub const ORDER_SCANS: &str = "scans";

const ORDERS: &str = "orders";
const TABLES: &str = "tables";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OrderLine {
    /// A line for `quantity` units of `product`, priced from the catalog.
    pub fn from_product(product: &Product, variant_id: Option<&str>, quantity: u32) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            variant_id: variant_id.map(str::to_string),
            quantity,
            unit_price: product.price_of(variant_id),
            notes: None,
        }
    }

    pub fn total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub lines: Vec<OrderLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OrderDraft {
    pub fn total(&self) -> f64 {
        self.lines.iter().map(OrderLine::total).sum()
    }

    fn check(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(invalid("lines", "an order needs at least one line"));
        }
        if self.lines.iter().any(|line| line.quantity == 0) {
            return Err(invalid("quantity", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: String,
    /// Sequence number assigned by the server
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    pub order_id: String,
    pub payment_method: String,
    pub amount_paid: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleReceipt {
    pub sale_id: String,
    pub total: f64,
    #[serde(default)]
    pub change: f64,
}

/// An order line read off a scanned slip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedLine {
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: Option<f64>,
    /// Catalog match proposed by the server, if any
    #[serde(default)]
    pub product_id: Option<String>,
}

#[derive(Deserialize)]
struct ScanResult {
    #[serde(default)]
    lines: Vec<ScannedLine>,
}

fn invalid(field: &str, reason: &str) -> ClientError {
    ClientError::Validation(catalog_engine::Error::InvalidProduct {
        field: field.to_string(),
        reason: reason.to_string(),
    })
}

impl MutationGateway {
    /// Create an order; the server assigns its sequence number.
    pub async fn create_order(&self, draft: &OrderDraft) -> Result<OrderReceipt> {
        draft.check()?;
        let receipt: OrderReceipt = self.call_procedure(CREATE_ORDER, draft).await?;
        tracing::info!(order_id = %receipt.order_id, sequence = receipt.sequence, "Order created");
        Ok(receipt)
    }

    pub async fn finalize_sale(&self, request: &SaleRequest) -> Result<SaleReceipt> {
        let receipt: SaleReceipt = self.call_procedure(FINALIZE_SALE, request).await?;
        tracing::info!(order_id = %request.order_id, sale_id = %receipt.sale_id, "Sale finalized");
        Ok(receipt)
    }

    /// Upload a photo of a paper order slip and extract its lines.
    pub async fn scan_order_slip(
        &self,
        owner_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Vec<ScannedLine>> {
        let path = blob_path(ORDER_SCANS, owner_id, filename, self.catalog.now());
        let image_url = self.remote.blobs.upload(&path, bytes, content_type).await?;
        let result: ScanResult = self
            .call_procedure(SCAN_ORDER_SLIP, json!({ "imageUrl": image_url }))
            .await?;
        Ok(result.lines)
    }

    /// Open an order on a table: the order is created and the table marked
    /// occupied in one atomic batch. Returns the new order id.
    pub async fn open_table_order(&self, table_id: &str, draft: &OrderDraft) -> Result<String> {
        draft.check()?;
        let order_id = uuid::Uuid::new_v4().to_string();

        let mut order = serde_json::to_value(draft)
            .map_err(|e| invalid_payload(e.to_string()))?;
        if let Value::Object(fields) = &mut order {
            fields.insert("tableId".into(), json!(table_id));
            fields.insert("status".into(), json!("open"));
            fields.insert("total".into(), json!(draft.total()));
            fields.insert("createdAt".into(), json!(self.catalog.now()));
        }

        let mut table = Map::new();
        table.insert("status".into(), json!("occupied"));
        table.insert("currentOrderId".into(), json!(order_id));

        self.remote
            .store
            .batch_write(vec![
                BatchOp::Set {
                    collection: ORDERS.into(),
                    id: order_id.clone(),
                    document: order,
                },
                BatchOp::Update {
                    collection: TABLES.into(),
                    id: table_id.to_string(),
                    fields: table,
                },
            ])
            .await?;

        tracing::info!(order_id = %order_id, table_id = %table_id, "Table order opened");
        Ok(order_id)
    }

    /// Invoke a procedure and decode its `data`.
    ///
    /// A `success: false` answer becomes [`ClientError::Procedure`] carrying
    /// the server's message.
    pub async fn call_procedure<T, P>(&self, name: &str, payload: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let payload =
            serde_json::to_value(payload).map_err(|e| invalid_payload(e.to_string()))?;
        let response = self
            .remote
            .procedures
            .call(name, payload)
            .await
            .inspect_err(|err| tracing::warn!(procedure = name, error = %err, "Procedure call failed"))?;

        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| "the server rejected the request".to_string());
            tracing::warn!(procedure = name, message = %message, "Procedure rejected");
            return Err(ClientError::Procedure {
                name: name.to_string(),
                message,
            });
        }

        serde_json::from_value(response.data)
            .map_err(|e| ClientError::Remote(RemoteError::Decode(e.to_string())))
    }
}

fn invalid_payload(message: String) -> ClientError {
    ClientError::Validation(catalog_engine::Error::InvalidPayload(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::FeedSettings;
    use crate::remote::{MemoryRemote, ProcedureResponse, RemoteServices};
    use catalog_engine::ManualClock;
    use std::sync::Arc;

    async fn gateway() -> (Arc<MemoryRemote>, MutationGateway) {
        let catalog = Catalog::in_memory(Arc::new(ManualClock::new(5_000)), FeedSettings::default())
            .await
            .unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let gateway = MutationGateway::new(catalog, RemoteServices::memory(remote.clone()), None);
        (remote, gateway)
    }

    fn draft() -> OrderDraft {
        let mut latte = Product::new("p1", "Latte", 1);
        latte.sale_price = 4.0;
        OrderDraft {
            lines: vec![OrderLine::from_product(&latte, None, 2)],
            ..OrderDraft::default()
        }
    }

    #[tokio::test]
    async fn create_order_returns_sequence() {
        let (remote, gateway) = gateway().await;
        remote.register_procedure(CREATE_ORDER, |payload| {
            assert_eq!(payload["lines"][0]["unitPrice"], 4.0);
            ProcedureResponse::ok(json!({"orderId": "o1", "sequence": 42}))
        });

        let receipt = gateway.create_order(&draft()).await.unwrap();
        assert_eq!(
            receipt,
            OrderReceipt {
                order_id: "o1".into(),
                sequence: 42
            }
        );
    }

    #[tokio::test]
    async fn rejected_procedure_carries_server_message() {
        let (remote, gateway) = gateway().await;
        remote.register_procedure(FINALIZE_SALE, |_| ProcedureResponse::failure("Order already paid"));

        let err = gateway
            .finalize_sale(&SaleRequest {
                order_id: "o1".into(),
                payment_method: "cash".into(),
                amount_paid: 10.0,
                affiliate_code: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "finalizeSale failed: Order already paid");
    }

    #[tokio::test]
    async fn empty_orders_never_reach_the_server() {
        let (remote, gateway) = gateway().await;
        let err = gateway.create_order(&OrderDraft::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(remote.procedure_calls().is_empty());
    }

    #[tokio::test]
    async fn scan_uploads_then_extracts() {
        let (remote, gateway) = gateway().await;
        remote.register_procedure(SCAN_ORDER_SLIP, |payload| {
            assert_eq!(payload["imageUrl"], "memory://blobs/scans/owner-1/5000_slip.jpg");
            ProcedureResponse::ok(json!({"lines": [{"name": "Latte", "quantity": 2}]}))
        });

        let lines = gateway
            .scan_order_slip("owner-1", "slip.jpg", vec![0xff], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
        assert!(remote.blob("scans/owner-1/5000_slip.jpg").is_some());
    }

    #[tokio::test]
    async fn table_order_commits_together() {
        let (remote, gateway) = gateway().await;
        remote.put_document(TABLES, "t1", json!({"status": "free"}));

        let order_id = gateway.open_table_order("t1", &draft()).await.unwrap();

        let table = remote.document(TABLES, "t1").unwrap();
        assert_eq!(table["status"], "occupied");
        assert_eq!(table["currentOrderId"], json!(order_id));
        let order = remote.document(ORDERS, &order_id).unwrap();
        assert_eq!(order["total"], 8.0);

        // Unknown table: nothing is written.
        assert!(gateway.open_table_order("t9", &draft()).await.is_err());
        assert_eq!(remote.documents(ORDERS).len(), 1);
    }

    #[tokio::test]
    async fn offline_calls_fail_visibly() {
        let (remote, gateway) = gateway().await;
        remote.set_online(false);
        let err = gateway.create_order(&draft()).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(RemoteError::Offline)));
    }
}
