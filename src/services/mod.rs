pub mod backend;
pub mod center;
pub mod init;
pub mod preferences;
pub mod protocol;
pub mod reconnect;
pub mod socket;
pub mod store;
pub mod transport;
