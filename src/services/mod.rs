pub mod in_flight;
pub mod relay;
pub mod transport;
pub mod window;
