pub mod analyticsdb;
pub mod cache;
pub mod chatdb;
pub mod contractdb;
pub mod db;
pub mod disputedb;
pub mod escrowdb;
pub mod notificationdb;
pub mod projectdb;
pub mod reviewdb;
pub mod supportdb;
pub mod userdb;

pub use db::DBClient;
