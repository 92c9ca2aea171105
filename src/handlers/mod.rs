pub mod status;
pub mod ws;
