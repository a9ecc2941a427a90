//! Byte range math and range allocation.
//!
//! Splits one logical object into disjoint work items, computes HTTP
//! `Range`/`Content-Range` values and tracks which bytes are still unclaimed.

mod allocator;
mod interval;

pub use allocator::RangeAllocator;
pub use interval::{parse_content_range, ByteRange, ContentRange, UNBOUNDED};
