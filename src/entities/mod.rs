//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod balance_cache;
pub mod delivery_log;
pub mod event;
pub mod event_role;
pub mod ledger_entry;
pub mod ledger_transaction;
pub mod map_spot;
pub mod pickup_token;
pub mod sales_order;
pub mod sales_order_item;
pub mod staff_audit_log;
pub mod stall;
pub mod stall_assignment;
pub mod stall_product;
pub mod stock_movement;
pub mod topup_record;

// Re-export specific types to avoid conflicts
pub use account::{AccountKind, Entity as Account, Model as AccountModel};
pub use balance_cache::{Entity as BalanceCache, Model as BalanceCacheModel};
pub use delivery_log::{DeliveryAction, Entity as DeliveryLog, Model as DeliveryLogModel};
pub use event::{Entity as Event, EventStatus, Model as EventModel};
pub use event_role::{Entity as EventRole, Model as EventRoleModel};
pub use ledger_entry::{Direction, Entity as LedgerEntry, Model as LedgerEntryModel};
pub use ledger_transaction::{
    Entity as LedgerTransaction, Model as LedgerTransactionModel, TransactionKind,
};
pub use map_spot::{Entity as MapSpot, Model as MapSpotModel, SpotStatus};
pub use pickup_token::{Entity as PickupToken, Model as PickupTokenModel};
pub use sales_order::{Entity as SalesOrder, Model as SalesOrderModel, OrderStatus};
pub use sales_order_item::{Entity as SalesOrderItem, Model as SalesOrderItemModel};
pub use staff_audit_log::{Entity as StaffAuditLog, Model as StaffAuditLogModel};
pub use stall::{Entity as Stall, Model as StallModel, StallStatus};
pub use stall_assignment::{Entity as StallAssignment, Model as StallAssignmentModel};
pub use stall_product::{Entity as StallProduct, Model as StallProductModel};
pub use stock_movement::{Entity as StockMovement, Model as StockMovementModel};
pub use topup_record::{Entity as TopupRecord, Model as TopupRecordModel};
