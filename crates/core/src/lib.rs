pub mod amount;
pub mod period;
pub mod transaction;

pub use amount::{Amount, AmountParseError};
pub use period::DateRange;
pub use transaction::{
    FieldValue, JournalId, Transaction, TransactionId, TransactionKind, TransactionOwner,
};
