pub mod chatmodels;
pub mod contractmodel;
pub mod disputemodel;
pub mod notificationmodel;
pub mod projectmodel;
pub mod reviewmodel;
pub mod supportmodel;
pub mod transactionmodel;
pub mod usermodel;
