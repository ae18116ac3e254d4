//! Client-facing placement responses.
//!
//! Every purchase attempt ends in exactly one [`PlacementResponse`]. Clients
//! decide whether to retry from `code` and `retryable` alone:
//! - contention rejections carry their own code and are never retryable
//! - store faults collapse into `SERVICE_UNAVAILABLE` and are retryable
//! - invariant violations and configuration faults are `INTERNAL_ERROR`

use seckill_core::{OrderId, OrderOutcome, OrderRejection, SeckillError, SeckillResult};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// PLACEMENT CODE ENUM
// ============================================================================

/// Stable machine-readable result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementCode {
    /// The order was committed
    Placed,

    // ========================================================================
    // Contention rejections
    // ========================================================================
    /// Resource does not exist
    ResourceNotFound,

    /// Sale window has not opened
    SaleNotStarted,

    /// Sale window has closed
    SaleEnded,

    /// No stock left
    SoldOut,

    /// Another request from the same actor holds the order lock
    AlreadyProcessing,

    /// The actor already owns an order for the resource
    AlreadyOrdered,

    // ========================================================================
    // Faults
    // ========================================================================
    /// KV store or durable store unreachable or timed out
    ServiceUnavailable,

    /// Broken invariant or bad configuration
    InternalError,
}

impl PlacementCode {
    pub fn default_message(&self) -> &'static str {
        match self {
            PlacementCode::Placed => "Order placed",
            PlacementCode::ResourceNotFound => OrderRejection::ResourceNotFound.reason(),
            PlacementCode::SaleNotStarted => OrderRejection::NotStarted.reason(),
            PlacementCode::SaleEnded => OrderRejection::Ended.reason(),
            PlacementCode::SoldOut => OrderRejection::SoldOut.reason(),
            PlacementCode::AlreadyProcessing => OrderRejection::AlreadyProcessing.reason(),
            PlacementCode::AlreadyOrdered => OrderRejection::AlreadyOrdered.reason(),
            PlacementCode::ServiceUnavailable => "Service temporarily unavailable",
            PlacementCode::InternalError => "Internal error",
        }
    }

    /// Only store faults are worth an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlacementCode::ServiceUnavailable)
    }
}

impl From<OrderRejection> for PlacementCode {
    fn from(rejection: OrderRejection) -> Self {
        match rejection {
            OrderRejection::ResourceNotFound => PlacementCode::ResourceNotFound,
            OrderRejection::NotStarted => PlacementCode::SaleNotStarted,
            OrderRejection::Ended => PlacementCode::SaleEnded,
            OrderRejection::SoldOut => PlacementCode::SoldOut,
            OrderRejection::AlreadyProcessing => PlacementCode::AlreadyProcessing,
            OrderRejection::AlreadyOrdered => PlacementCode::AlreadyOrdered,
        }
    }
}

impl fmt::Display for PlacementCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// PLACEMENT RESPONSE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementResponse {
    pub success: bool,
    pub code: PlacementCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    pub retryable: bool,
}

impl PlacementResponse {
    pub fn placed(order_id: OrderId) -> Self {
        Self {
            success: true,
            code: PlacementCode::Placed,
            message: PlacementCode::Placed.default_message().to_string(),
            order_id: Some(order_id),
            retryable: false,
        }
    }

    pub fn rejected(rejection: OrderRejection) -> Self {
        Self::from_code(PlacementCode::from(rejection))
    }

    /// Map a fault. The error text is logged by the caller, not echoed here.
    pub fn fault(error: &SeckillError) -> Self {
        match error {
            SeckillError::Store(_) => Self::from_code(PlacementCode::ServiceUnavailable),
            SeckillError::Invariant(_) | SeckillError::Config(_) => {
                Self::from_code(PlacementCode::InternalError)
            }
        }
    }

    pub fn from_outcome(outcome: OrderOutcome) -> Self {
        match outcome {
            OrderOutcome::Placed { order_id } => Self::placed(order_id),
            OrderOutcome::Rejected(rejection) => Self::rejected(rejection),
        }
    }

    pub fn from_result(result: &SeckillResult<OrderOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::from_outcome(*outcome),
            Err(e) => Self::fault(e),
        }
    }

    fn from_code(code: PlacementCode) -> Self {
        Self {
            success: false,
            code,
            message: code.default_message().to_string(),
            order_id: None,
            retryable: code.is_retryable(),
        }
    }
}
