// Prediction domain: model outputs, final prediction, feature statistics
pub mod prediction;

// Collaborator interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
