pub mod approval;
pub mod card;
pub mod ports;
pub mod session;
pub mod transaction;
