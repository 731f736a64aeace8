// Module declarations
pub mod encoding;
pub mod identity;
pub mod ids;
pub mod persistence;

// Re-export all implementations
pub use encoding::SimulatedFheEncoder;
pub use identity::SessionIdentity;
pub use ids::{RandomSuffixGenerator, SystemClock};
pub use persistence::InMemoryKeyValueStore;
