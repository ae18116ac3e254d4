//! Durable-store records the subsystem reasons about.

use crate::{ActorId, OrderId, ResourceId, Timestamp};
use serde::{Deserialize, Serialize};

/// Position of "now" relative to a sale window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaleWindow {
    /// `now` is before `begin_at`.
    NotStarted,
    /// `begin_at <= now <= end_at`.
    Open,
    /// `now` is after `end_at`.
    Ended,
}

/// A time-boxed, limited-inventory resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashSaleResource {
    pub resource_id: ResourceId,
    /// Remaining stock. The durable store only ever decrements this through
    /// a conditional update that requires it to be positive.
    pub stock: u32,
    pub begin_at: Timestamp,
    pub end_at: Timestamp,
}

impl FlashSaleResource {
    /// Classify `now` against the sale window.
    pub fn window_at(&self, now: Timestamp) -> SaleWindow {
        if self.begin_at > now {
            SaleWindow::NotStarted
        } else if self.end_at < now {
            SaleWindow::Ended
        } else {
            SaleWindow::Open
        }
    }

    /// Advisory stock check. Never used as a correctness guard.
    pub fn appears_in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// A committed purchase. `(actor_id, resource_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub actor_id: ActorId,
    pub resource_id: ResourceId,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn resource(begin_offset: i64, end_offset: i64) -> FlashSaleResource {
        let now = Utc::now();
        FlashSaleResource {
            resource_id: ResourceId::new(1),
            stock: 10,
            begin_at: now + Duration::seconds(begin_offset),
            end_at: now + Duration::seconds(end_offset),
        }
    }

    #[test]
    fn test_window_not_started() {
        let r = resource(60, 120);
        assert_eq!(r.window_at(Utc::now()), SaleWindow::NotStarted);
    }

    #[test]
    fn test_window_open() {
        let r = resource(-60, 60);
        assert_eq!(r.window_at(Utc::now()), SaleWindow::Open);
    }

    #[test]
    fn test_window_ended() {
        let r = resource(-120, -60);
        assert_eq!(r.window_at(Utc::now()), SaleWindow::Ended);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let r = resource(-60, 60);
        assert_eq!(r.window_at(r.begin_at), SaleWindow::Open);
        assert_eq!(r.window_at(r.end_at), SaleWindow::Open);
    }

    #[test]
    fn test_appears_in_stock() {
        let mut r = resource(-60, 60);
        assert!(r.appears_in_stock());
        r.stock = 0;
        assert!(!r.appears_in_stock());
    }
}
