pub mod gossip;
pub mod health;
