/// The event model
pub mod event;

/// The middleware contract every stage implements
pub mod event_middleware;
