//! # Engine Limits and Defaults
//!
//! Hardcoded bounds applied at ingestion. Every request the engine accepts
//! is computationally bounded by these values.

/// Maximum number of line items in one order.
pub const MAX_LINE_ITEMS: usize = 100;

/// Maximum quantity on a single line item.
///
/// Guards against typos such as 1000 instead of 10.
pub const MAX_LINE_QUANTITY: u32 = 999;

/// Maximum number of customizations on a single line item.
pub const MAX_CUSTOMIZATIONS: usize = 20;

/// Maximum length of order notes, in bytes.
pub const MAX_NOTES_LENGTH: usize = 1024;

/// Maximum length of catalog names (ingredients, menu items, customers), in bytes.
pub const MAX_NAME_LENGTH: usize = 256;

/// Default loyalty accrual rate: one point per whole currency unit,
/// expressed in thousandths of a point.
pub const DEFAULT_POINTS_PER_UNIT_MILLI: u64 = 1000;

/// Divisor turning `cents * points_per_unit_milli` into whole points.
pub const POINTS_DIVISOR: u128 = 100 * 1000;
