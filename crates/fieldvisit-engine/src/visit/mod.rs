pub mod machine;
pub mod outbox;
