pub mod admin;
pub mod auth;
pub mod chat;
pub mod contracts;
pub mod disputes;
pub mod notification_handler;
pub mod payments;
pub mod projects;
pub mod realtime;
pub mod reviews;
pub mod support_handler;
pub mod users;
