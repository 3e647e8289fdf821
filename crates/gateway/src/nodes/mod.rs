pub mod directory;
pub mod pairing;
pub mod registry;
pub mod router;
pub mod ws;
