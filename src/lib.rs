pub mod clock;
pub mod config;
pub mod ntp;
pub mod ntp_server;
pub mod packet;
pub mod probe;
pub mod simulation;
