pub mod schema;

pub use schema::{CompletionContract, GuardConfig, OverseerConfig, RetryConfig, SpawnerConfig};
