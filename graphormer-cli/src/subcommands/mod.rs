mod forward;
pub use forward::ForwardApp;
