//! Purchase outcomes.
//!
//! A rejection is an expected answer under contention, so it travels in the
//! `Ok` side of a `SeckillResult`. Only store faults and invariant violations
//! use the `Err` side.

use crate::OrderId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage a purchase attempt has reached.
///
/// ```text
/// Received → WindowChecked → Locked → Validated → StockReserved → Committed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PurchaseStage {
    Received,
    WindowChecked,
    Locked,
    Validated,
    StockReserved,
    Committed,
}

impl PurchaseStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStage::Received => "received",
            PurchaseStage::WindowChecked => "window_checked",
            PurchaseStage::Locked => "locked",
            PurchaseStage::Validated => "validated",
            PurchaseStage::StockReserved => "stock_reserved",
            PurchaseStage::Committed => "committed",
        }
    }
}

impl fmt::Display for PurchaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a purchase attempt was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderRejection {
    /// No such resource in the durable store.
    ResourceNotFound,
    /// The sale window has not opened yet.
    NotStarted,
    /// The sale window has closed.
    Ended,
    /// Either the advisory snapshot or the conditional decrement saw zero stock.
    SoldOut,
    /// Another attempt by the same actor holds the order lock.
    AlreadyProcessing,
    /// The actor already owns an order for this resource.
    AlreadyOrdered,
}

impl OrderRejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderRejection::ResourceNotFound => "RESOURCE_NOT_FOUND",
            OrderRejection::NotStarted => "SALE_NOT_STARTED",
            OrderRejection::Ended => "SALE_ENDED",
            OrderRejection::SoldOut => "SOLD_OUT",
            OrderRejection::AlreadyProcessing => "ALREADY_PROCESSING",
            OrderRejection::AlreadyOrdered => "ALREADY_ORDERED",
        }
    }

    /// Human-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            OrderRejection::ResourceNotFound => "resource does not exist",
            OrderRejection::NotStarted => "sale has not started yet",
            OrderRejection::Ended => "sale has already ended",
            OrderRejection::SoldOut => "sold out",
            OrderRejection::AlreadyProcessing => "a previous request from this actor is still being processed",
            OrderRejection::AlreadyOrdered => "actor has already ordered this resource",
        }
    }

    /// Whether trying the same request later could succeed.
    ///
    /// A sale that has not started may open; a busy lock will be released.
    /// The other rejections are final for this `(actor, resource)`.
    pub fn may_succeed_later(&self) -> bool {
        matches!(
            self,
            OrderRejection::NotStarted | OrderRejection::AlreadyProcessing
        )
    }
}

impl fmt::Display for OrderRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.reason())
    }
}

/// Result of one purchase attempt that did not hit a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Placed { order_id: OrderId },
    Rejected(OrderRejection),
}

impl OrderOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, OrderOutcome::Placed { .. })
    }

    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            OrderOutcome::Placed { order_id } => Some(*order_id),
            OrderOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<OrderRejection> {
        match self {
            OrderOutcome::Placed { .. } => None,
            OrderOutcome::Rejected(r) => Some(*r),
        }
    }
}

impl From<OrderRejection> for OrderOutcome {
    fn from(rejection: OrderRejection) -> Self {
        OrderOutcome::Rejected(rejection)
    }
}
