pub mod simulated_fhe;

pub use simulated_fhe::SimulatedFheEncoder;
