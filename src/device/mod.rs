mod context;
mod memory;

pub use context::Device;
pub(crate) use memory::Reservation;
