pub mod read_receipts;

pub use read_receipts::{BusReadReceipts, LogOnlyReadReceipts, ReadReceiptSink};
