pub mod blocks;
pub mod leaderboard;
pub mod server;
pub mod tick;
pub mod verifiers;
pub mod verify;
