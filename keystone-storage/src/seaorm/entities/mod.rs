pub mod idempotency_records;

pub use idempotency_records::{
    ActiveModel as IdempotencyRecordActiveModel, Column as IdempotencyRecordColumn, Entity as IdempotencyRecords,
    Model as IdempotencyRecord,
};
