pub mod atomic;
pub mod ledger;
pub mod sink;
